use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing_subscriber::fmt::MakeWriter;

const REDACTED: &str = "[REDACTED]";

/// Configured secrets shorter than this are not scrubbed verbatim; they
/// would match ordinary text.
const MIN_SECRET_CHARS: usize = 8;

/// A writer that redacts API keys and bearer tokens from log output.
pub struct RedactingWriter<W> {
    inner: W,
    secrets: Arc<[String]>,
}

impl RedactingWriter<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W> RedactingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            secrets: Arc::from(Vec::new()),
        }
    }

    /// Also scrub these exact values, e.g. the configured provider key.
    pub fn with_secrets<I, S>(mut self, secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let secrets: Vec<String> = secrets
            .into_iter()
            .map(Into::into)
            .filter(|s| s.chars().count() >= MIN_SECRET_CHARS)
            .collect();
        self.secrets = Arc::from(secrets);
        self
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn redact(&self, input: &str) -> String {
        let mut output = redact_secrets(input);
        for secret in self.secrets.iter() {
            if output.contains(secret.as_str()) {
                output = output.replace(secret.as_str(), REDACTED);
            }
        }
        output
    }
}

impl<W: std::io::Write> std::io::Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let original = String::from_utf8_lossy(buf);
        let redacted = self.redact(&original);
        self.inner.write_all(redacted.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<'a> MakeWriter<'a> for RedactingWriter<std::io::Stderr> {
    type Writer = RedactingWriter<std::io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: std::io::stderr(),
            secrets: self.secrets.clone(),
        }
    }
}

/// Replace OpenAI-style keys and bearer tokens with `[REDACTED]`.
pub fn redact_secrets(input: &str) -> String {
    static API_KEY: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"sk-(?:proj-)?[A-Za-z0-9_\-]{16,}").expect("api key regex should compile")
    });
    static BEARER: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)(bearer\s+)[A-Za-z0-9._~+/\-]{8,}=*").expect("bearer regex should compile")
    });

    let output = API_KEY.replace_all(input, REDACTED);
    BEARER
        .replace_all(&output, format!("${{1}}{REDACTED}").as_str())
        .into_owned()
}
