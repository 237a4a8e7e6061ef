/// Errors shared by every Counsel crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Validation failures are reported to the client without closing the socket.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
