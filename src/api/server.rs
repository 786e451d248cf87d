//! API server
//!
//! Server setup with the middleware stack and graceful shutdown.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::{
    aggregator::{AggregatorDirectory, AdapterRegistry},
    config::ServerConfig,
    engine::SettlementEngine,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub struct ApiServer {
    config: ServerConfig,
    engine: Arc<SettlementEngine>,
    registry: Arc<AdapterRegistry>,
    aggregators: Arc<AggregatorDirectory>,
}

impl ApiServer {
    pub fn new(
        config: ServerConfig,
        engine: Arc<SettlementEngine>,
        registry: Arc<AdapterRegistry>,
        aggregators: Arc<AggregatorDirectory>,
    ) -> Self {
        Self {
            config,
            engine,
            registry,
            aggregators,
        }
    }

    /// Start the API server
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let app = self.create_app();
        let addr = self.socket_addr()?;

        info!("🌐 Starting gamebridge webhook gateway");
        info!("   Listen: http://{}", addr);
        info!("   Request timeout: {}s", self.config.request_timeout_secs);
        info!("📊 Available endpoints:");
        info!("   GET  /health                          - Health check");
        info!("   POST /launch                          - Open session + launch URL");
        info!("   POST /:identity/webhook               - Aggregator webhook");
        info!("   GET  /:identity/games                 - Aggregator catalog");
        info!("   POST /:identity/freespins             - Create freespin");
        info!("   POST /:identity/freespins/:ref/cancel - Cancel freespin");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("✅ Gateway running");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("🛑 Gateway stopped gracefully");
        Ok(())
    }

    fn create_app(&self) -> axum::Router {
        let state = Arc::new(AppState {
            engine: self.engine.clone(),
            registry: self.registry.clone(),
            aggregators: self.aggregators.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        });

        create_router(state)
            // Request ID middleware (first for tracing)
            .layer(axum::middleware::from_fn(request_id_middleware))
            // CORS layer (before timeout to handle preflight)
            .layer(create_cors_layer(self.config.allowed_origins.clone()))
            // Aggregators expect a bounded response; time out well below
            // their own callback deadline
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.request_timeout_secs)))
            .layer(TraceLayer::new_for_http())
    }

    fn socket_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        Ok(SocketAddr::from((
            self.config.host.parse::<std::net::IpAddr>()?,
            self.config.port,
        )))
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
