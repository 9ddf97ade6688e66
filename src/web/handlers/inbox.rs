//! Inbox and domain listing handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use super::AppState;
use crate::smtp::normalize_mailbox;
use crate::web::error::ApiError;

/// List the domains mail is accepted for.
///
/// GET /domains
pub async fn list_domains(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.allowed.domains().to_vec())
}

/// Every stored message of a mailbox, keyed by message ID.
///
/// Bodies are kept as raw bytes; JSON needs text, so invalid UTF-8 is
/// replaced here and only here.
///
/// GET /inbox/:email
pub async fn get_inbox(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> Result<Json<BTreeMap<String, String>>, ApiError> {
    let mailbox = normalize_mailbox(&email);
    let emails = state
        .storage
        .retrieve_emails(&mailbox)
        .await?
        .into_iter()
        .map(|(key, body)| (key, String::from_utf8_lossy(&body).into_owned()))
        .collect();
    Ok(Json(emails))
}
