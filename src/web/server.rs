//! Web server for Ephimail.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;

use super::handlers::AppState;
use super::router::{create_health_router, create_router, create_static_router};
use crate::config::WebConfig;
use crate::Result;

/// HTTP and viewer stream server.
pub struct WebServer {
    listener: TcpListener,
    router: Router,
}

impl WebServer {
    /// Bind the listener and build the router.
    pub async fn bind(config: &WebConfig, app_state: Arc<AppState>) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr).await?;

        let mut router =
            create_router(app_state, &config.cors_origins).merge(create_health_router());
        if let Some(static_router) = create_static_router(&config.static_path) {
            router = router.merge(static_router);
        }

        Ok(Self { listener, router })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the listener fails.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Web server listening on http://{}", self.local_addr()?);
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }
}
