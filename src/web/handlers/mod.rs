//! HTTP handlers and their shared state.

pub mod config;
pub mod inbox;
pub mod reservation;

pub use config::*;
pub use inbox::*;
pub use reservation::*;

use axum::http::{header, HeaderMap};

use crate::config::{HubConfig, WebConfig};
use crate::hub::MailboxHub;
use crate::smtp::DomainAllowList;
use crate::storage::MailStorage;

/// State shared by every handler.
pub struct AppState {
    /// Message and reservation storage.
    pub storage: MailStorage,
    /// Event hub viewers register with.
    pub hub: MailboxHub,
    /// Domains this server accepts mail for.
    pub allowed: DomainAllowList,
    /// Public backend URL; empty when derived per request.
    pub backend_url: String,
    /// Whether the reservation API is served.
    pub reservations_enabled: bool,
    /// Viewer connection settings.
    pub viewer: HubConfig,
}

impl AppState {
    /// Create the application state.
    pub fn new(
        storage: MailStorage,
        hub: MailboxHub,
        allowed: DomainAllowList,
        web: &WebConfig,
        viewer: HubConfig,
    ) -> Self {
        Self {
            storage,
            hub,
            allowed,
            backend_url: web.backend_url.trim().trim_end_matches('/').to_string(),
            reservations_enabled: web.reservations_enabled,
            viewer,
        }
    }

    /// Base URL of this server as seen by the client.
    ///
    /// The configured backend URL wins; otherwise the request's `Host` header
    /// and `X-Forwarded-Proto` (default `http`) are used.
    pub fn base_url(&self, headers: &HeaderMap) -> String {
        if !self.backend_url.is_empty() {
            return self.backend_url.clone();
        }

        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost");
        let scheme = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("http");
        format!("{scheme}://{host}")
    }
}
