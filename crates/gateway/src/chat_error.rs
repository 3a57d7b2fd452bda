//! Mapping chat failures to HTTP statuses and JSON payloads.

use {
    axum::http::StatusCode,
    relay_agents::{ProviderErrorKind, classify_error},
    relay_chat::Error,
    serde_json::{Value, json},
};

/// Prefix of the single SSE event sent when a streamed reply fails.
pub const STREAM_ERROR_PREFIX: &str = "ERROR: ";

/// 400 for requests we cannot use, 502 when the model call itself failed.
#[must_use]
pub fn error_status(err: &Error) -> StatusCode {
    match err {
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        Error::Provider(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `{"error": <message>, "type": <kind>}`.
#[must_use]
pub fn error_body(err: &Error) -> Value {
    json!({
        "error": err.to_string(),
        "type": error_type(err),
    })
}

fn error_type(err: &Error) -> &'static str {
    match err {
        Error::EmptyPrompt => "empty_prompt",
        Error::NoContent => "no_content",
        Error::Session(_) => "invalid_session",
        Error::Provider(e) => classify_error(e).as_str(),
        Error::External { .. } => ProviderErrorKind::Unknown.as_str(),
    }
}

/// Data line for a failed stream.
#[must_use]
pub fn stream_error_data(message: &str) -> String {
    format!("{STREAM_ERROR_PREFIX}{message}")
}
