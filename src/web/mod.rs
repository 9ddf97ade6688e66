//! Web surface for Ephimail.
//!
//! Serves the viewer WebSocket stream, the inbox and domain listings, the
//! reservation API and the frontend build.

pub mod cors;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod ws;

pub use error::ApiError;
pub use handlers::AppState;
pub use router::create_router;
pub use server::WebServer;
