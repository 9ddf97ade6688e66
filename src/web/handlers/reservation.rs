//! Mailbox reservation handlers.
//!
//! All routes answer 501 while reservations are disabled.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::AppState;
use crate::crypto::RsaOaepEncryptor;
use crate::smtp::normalize_mailbox;
use crate::storage::{Reservation, ReservationDuration};
use crate::web::error::ApiError;

/// Fragment appended to the inbox URL of an encrypted reservation; the
/// frontend replaces it with the private key, which never reaches the server.
const PRIVATE_KEY_PLACEHOLDER: &str = "#private_key_goes_here";

/// Reservation request body.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReserveRequest {
    /// Mailbox to reserve.
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    /// One of "1h", "24h", "168h".
    pub duration: String,
    /// Base64 public key (SPKI DER or PEM); enables encrypted delivery.
    #[serde(default)]
    pub public_key: Option<String>,
}

/// Reservation response body.
#[derive(Debug, Clone, Serialize)]
pub struct ReservationResponse {
    pub email: String,
    pub expires_at: DateTime<Utc>,
    pub encrypted: bool,
    pub reserved_at: DateTime<Utc>,
    /// Inbox link, only returned on creation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl From<Reservation> for ReservationResponse {
    fn from(r: Reservation) -> Self {
        Self {
            email: r.email,
            expires_at: r.expires_at,
            encrypted: r.encrypted,
            reserved_at: r.reserved_at,
            url: None,
        }
    }
}

fn ensure_enabled(state: &AppState) -> Result<(), ApiError> {
    if state.reservations_enabled {
        Ok(())
    } else {
        Err(ApiError::not_implemented("Mailbox reservation is disabled"))
    }
}

/// Reserve a mailbox.
///
/// POST /api/inbox/reserve
pub async fn reserve_mailbox(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ReserveRequest>,
) -> Result<Json<ReservationResponse>, ApiError> {
    ensure_enabled(&state)?;
    req.validate().map_err(ApiError::from_validation_errors)?;

    let mailbox = state.allowed.check_recipient(&req.email)?;
    let duration: ReservationDuration = req.duration.parse()?;
    let public_key = req
        .public_key
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty());
    if let Some(key) = &public_key {
        RsaOaepEncryptor::parse_public_key(key)
            .map_err(|e| ApiError::bad_request(format!("Invalid public key: {e}")))?;
    }

    let reservation = state.storage.reserve(&mailbox, duration, public_key).await?;

    let mut url = format!("{}/inbox/{}", state.base_url(&headers), reservation.email);
    if reservation.encrypted {
        url.push_str(PRIVATE_KEY_PLACEHOLDER);
    }

    let mut response = ReservationResponse::from(reservation);
    response.url = Some(url);
    Ok(Json(response))
}

/// Get the active reservation of a mailbox.
///
/// GET /api/inbox/:email/reservation
pub async fn get_reservation(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> Result<Json<ReservationResponse>, ApiError> {
    ensure_enabled(&state)?;

    let mailbox = normalize_mailbox(&email);
    match state.storage.get_reservation(&mailbox).await? {
        Some(reservation) => Ok(Json(reservation.into())),
        None => Err(ApiError::not_found("Reservation not found")),
    }
}

/// Release a reservation before it expires.
///
/// DELETE /api/inbox/:email/reservation
pub async fn delete_reservation(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> Result<StatusCode, ApiError> {
    ensure_enabled(&state)?;

    state
        .storage
        .delete_reservation(&normalize_mailbox(&email))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
