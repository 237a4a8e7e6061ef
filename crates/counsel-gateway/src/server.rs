use std::sync::Arc;

use counsel_agents::CounselRuntime;
use counsel_common::{Error, Result};
use counsel_config::AppConfig;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::router::build_router;
use crate::state::AppState;

/// The HTTP + WebSocket server.
pub struct GatewayServer {
    config: AppConfig,
    runtime: Arc<CounselRuntime>,
}

impl GatewayServer {
    pub fn new(config: AppConfig, runtime: CounselRuntime) -> Self {
        Self {
            config,
            runtime: Arc::new(runtime),
        }
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let addr = self.config.gateway.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Gateway(format!("failed to bind {addr}: {e}")))?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        let state = Arc::new(AppState::new(self.config, self.runtime));
        let app = build_router(state);

        info!("counsel gateway listening on {local_addr}");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Gateway(format!("server error: {e}")))?;

        info!("counsel gateway stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
