use anyhow::{Context, Result};
use counsel_config::{AppConfig, ConfigLoader, LogFormat};
use counsel_gateway::GatewayServer;
use counsel_gateway::bootstrap::build_runtime;
use counsel_security::RedactingWriter;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<()> {
    let (config, env_file) = ConfigLoader::load().context("failed to load configuration")?;
    init_tracing(&config);

    match env_file {
        Some(path) => info!("loaded environment from {}", path.display()),
        None => debug!("no .env file found, using process environment"),
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.gateway.bind_addr(),
        model = %config.llm.default_model,
        "starting counsel"
    );

    let runtime = build_runtime(&config).context("failed to initialize runtime")?;
    GatewayServer::new(config, runtime)
        .run()
        .await
        .context("gateway exited with an error")?;

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let writer = RedactingWriter::stderr().with_secrets(config.llm.api_key.clone());
    let registry = tracing_subscriber::registry().with(filter);

    match config.logging.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(writer),
            )
            .init(),
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(writer),
            )
            .init(),
    }
}
