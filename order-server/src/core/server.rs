//! Server lifecycle
//!
//! Startup, serving and graceful shutdown.

use crate::core::{Config, Result, ServerState};

pub struct Server {
    config: Config,
    state: Option<ServerState>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// Serve over an already-built state (in-memory backends)
    pub fn with_state(config: Config, state: ServerState) -> Self {
        Self {
            config,
            state: Some(state),
        }
    }

    /// Run until Ctrl-C
    ///
    /// Backends are connected (if no state was given), the cache is warmed,
    /// background tasks are started, then HTTP is served. On shutdown the
    /// listener stops first, then background tasks are cancelled and awaited.
    pub async fn run(self) -> Result<()> {
        let state = match self.state {
            Some(s) => s,
            None => ServerState::initialize(&self.config).await?,
        };

        // A failed warm-start only leaves the cache cold
        if let Err(e) = state.warm_start().await {
            tracing::warn!(error = %e, "Cache warm-start failed, starting cold");
        }

        let tasks = state.start_background_tasks();

        let app = crate::api::router(state.clone());
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, environment = %self.config.environment, "Order server listening");

        let shutdown = async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        };
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        tasks.shutdown().await;
        served?;
        tracing::info!("Order server stopped");
        Ok(())
    }
}
