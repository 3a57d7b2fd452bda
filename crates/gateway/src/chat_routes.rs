//! `/api/claude*` endpoints.
//!
//! Every route resolves its session from the optional `x-session-key`
//! header, falling back to the configured default session.

use std::convert::Infallible;

use {
    axum::{
        Json,
        extract::{Multipart, State, multipart::Field},
        http::{HeaderMap, StatusCode},
        response::{
            IntoResponse, Response,
            sse::{Event, KeepAlive, Sse},
        },
    },
    futures::StreamExt,
    relay_chat::{Error, ReplyChunk, UploadArtifact},
    relay_sessions::SessionKey,
    serde::Deserialize,
    serde_json::json,
    tracing::{debug, warn},
};

use crate::{
    chat_error::{error_body, error_status, stream_error_data},
    server::AppState,
};

pub const SESSION_HEADER: &str = "x-session-key";

/// Multipart field carrying the prompt text. Every other field with a
/// filename is an upload.
const PROMPT_FIELD: &str = "prompt";

#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    #[serde(default)]
    pub prompt: String,
}

fn error_response(err: &Error) -> Response {
    (error_status(err), Json(error_body(err))).into_response()
}

fn resolve_session(state: &AppState, headers: &HeaderMap) -> Result<SessionKey, Response> {
    let Some(value) = headers.get(SESSION_HEADER) else {
        return Ok(state.gateway.default_session.clone());
    };
    let Ok(raw) = value.to_str() else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "session key is not valid ASCII", "type": "invalid_session" })),
        )
            .into_response());
    };
    SessionKey::parse(raw.trim()).map_err(|e| error_response(&e.into()))
}

/// `POST /api/claude`
pub async fn prompt_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PromptRequest>,
) -> Response {
    let key = match resolve_session(&state, &headers) {
        Ok(key) => key,
        Err(resp) => return resp,
    };

    match state.gateway.chat.submit_prompt(&key, &req.prompt).await {
        Ok(reply) => Json(json!({ "reply": reply })).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `POST /api/claude/stream`
///
/// One `data:` event per fragment; a failure is a single
/// `data: ERROR: <message>` event, after which the stream closes.
pub async fn stream_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PromptRequest>,
) -> Response {
    let key = match resolve_session(&state, &headers) {
        Ok(key) => key,
        Err(resp) => return resp,
    };
    if req.prompt.trim().is_empty() {
        return error_response(&Error::EmptyPrompt);
    }

    debug!(session = %key, "opening reply stream");
    let events = state
        .gateway
        .chat
        .submit_prompt_streaming(key, req.prompt)
        .map(|chunk| {
            let data = match chunk {
                ReplyChunk::Fragment(text) => text,
                ReplyChunk::Error(message) => stream_error_data(&message),
            };
            Ok::<_, Infallible>(Event::default().data(sse_safe(&data)))
        });

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// SSE frames are line based; bare carriage returns would end a line early.
fn sse_safe(data: &str) -> String {
    data.replace("\r\n", "\n").replace('\r', "\n")
}

/// `POST /api/claude/upload`
pub async fn upload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let key = match resolve_session(&state, &headers) {
        Ok(key) => key,
        Err(resp) => return resp,
    };

    let mut prompt = String::new();
    let mut artifacts = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!(session = %key, error = %e, "rejecting malformed upload");
                return (e.status(), Json(json!({ "error": e.body_text() }))).into_response();
            },
        };

        let name = field.name().unwrap_or_default().to_string();
        if name == PROMPT_FIELD && field.file_name().is_none() {
            match field.text().await {
                Ok(text) => prompt = text,
                Err(e) => {
                    return (e.status(), Json(json!({ "error": e.body_text() }))).into_response();
                },
            }
            continue;
        }

        match read_artifact(field).await {
            Ok(Some(artifact)) => artifacts.push(artifact),
            Ok(None) => debug!(field = %name, "ignoring non-file form field"),
            Err(e) => {
                return (e.status(), Json(json!({ "error": e.body_text() }))).into_response();
            },
        }
    }

    debug!(session = %key, uploads = artifacts.len(), "upload received");
    let reply = state
        .gateway
        .chat
        .submit_with_attachments(&key, prompt, artifacts)
        .await;

    match reply.outcome {
        Ok(text) => Json(json!({
            "reply": text,
            "processedFilenames": reply.processed_filenames,
        }))
        .into_response(),
        Err(e) => {
            let mut body = error_body(&e);
            body["processedFilenames"] = json!(reply.processed_filenames);
            (error_status(&e), Json(body)).into_response()
        },
    }
}

async fn read_artifact(
    field: Field<'_>,
) -> Result<Option<UploadArtifact>, axum::extract::multipart::MultipartError> {
    let Some(filename) = field.file_name().map(sanitize_filename) else {
        return Ok(None);
    };
    let declared = field.content_type().map(str::to_string);
    let bytes = field.bytes().await?;
    Ok(Some(UploadArtifact::new(filename, declared, bytes.to_vec())))
}

/// `POST /api/claude/reset`
pub async fn reset_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let key = match resolve_session(&state, &headers) {
        Ok(key) => key,
        Err(resp) => return resp,
    };
    state.gateway.chat.reset_conversation(&key).await;
    Json(json!({ "ok": true })).into_response()
}

/// Keep the final path component and drop control characters.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let sanitized: String = base.chars().filter(|c| !c.is_control()).collect();
    // Strip leading dots to prevent hidden files / traversal remnants.
    let sanitized = sanitized.trim().trim_start_matches('.');
    if sanitized.is_empty() {
        "upload".to_string()
    } else {
        sanitized.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_readable_names() {
        assert_eq!(sanitize_filename("Q3 report.pdf"), "Q3 report.pdf");
        assert_eq!(sanitize_filename("C:\\Users\\me\\notes.txt"), "notes.txt");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
    }

    #[test]
    fn carriage_returns_become_newlines() {
        assert_eq!(sse_safe("a\r\nb\rc\nd"), "a\nb\nc\nd");
    }

    #[test]
    fn sanitize_strips_hidden_and_empty() {
        assert_eq!(sanitize_filename(".env"), "env");
        assert_eq!(sanitize_filename("dir/"), "upload");
        assert_eq!(sanitize_filename("a\u{0}b\n.txt"), "ab.txt");
    }
}
