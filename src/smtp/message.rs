//! Structural validation of message payloads.
//!
//! A payload is accepted when it starts with a header block `mailparse` can
//! read and every field name is printable US-ASCII without spaces. Folded
//! headers, bare LF line endings and an empty header block are fine; the
//! body is not inspected.

use mailparse::parse_headers;

use crate::{EphimailError, Result};

/// Check that `payload` is a well-formed message.
pub fn validate_message(payload: &[u8]) -> Result<()> {
    if payload.is_empty() {
        return Err(malformed("empty message"));
    }

    let (headers, _body_offset) =
        parse_headers(payload).map_err(|e| malformed(&e.to_string()))?;

    for header in &headers {
        let name = header.get_key();
        if name.is_empty() || !name.bytes().all(is_field_name_byte) {
            return Err(malformed(&format!("invalid header field name {name:?}")));
        }
    }
    Ok(())
}

/// Printable US-ASCII except colon and space.
fn is_field_name_byte(b: u8) -> bool {
    (33..=126).contains(&b) && b != b':'
}

fn malformed(reason: &str) -> EphimailError {
    EphimailError::MalformedMessage(reason.to_string())
}
