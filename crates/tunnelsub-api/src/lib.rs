//! HTTP publisher for the subscription document
//!
//! Serves a greeting on `/` and the current subscription file on
//! `/<subscription path>`. The file is read on every request, so a new
//! document is visible as soon as it has been written.

pub mod handlers;

use axum::{routing::get, Router};
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::info;

use tunnelsub_links::SubscriptionStore;

/// Application state shared across handlers
pub struct AppState {
    pub store: SubscriptionStore,
    /// Request path of the subscription, without the leading slash
    pub subscription_path: String,
}

/// API server configuration
pub struct ApiServerConfig {
    /// Address to bind the server
    pub bind_addr: SocketAddr,
    /// Path the subscription is served under, e.g. `sub`
    pub subscription_path: String,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            subscription_path: "sub".to_string(),
        }
    }
}

/// API Server
pub struct ApiServer {
    config: ApiServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, store: SubscriptionStore) -> Self {
        let state = Arc::new(AppState {
            store,
            subscription_path: config.subscription_path.trim_matches('/').to_string(),
        });

        Self { config, state }
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        // The subscription path is matched in the handler so any configured
        // value is safe to use, including ones with route syntax in them
        Router::new()
            .route("/", get(handlers::greeting))
            .route("/{*path}", get(handlers::subscription))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind and serve until the process exits
    pub async fn start(self) -> Result<(), anyhow::Error> {
        let router = self.build_router();

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        info!("HTTP server listening on {}", self.config.bind_addr);
        info!(
            "Subscription: http://{}/{}",
            self.config.bind_addr, self.state.subscription_path
        );

        axum::serve(listener, router)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }
}
