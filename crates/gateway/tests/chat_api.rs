#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for the `/api/claude*` routes.

use std::{
    collections::VecDeque,
    net::SocketAddr,
    pin::Pin,
    sync::{Arc, Mutex},
};

use {
    async_trait::async_trait,
    serde_json::{Value, json},
    tokio::net::TcpListener,
    tokio_stream::Stream,
};

use {
    relay_agents::{CompletionResponse, GenerationParams, LlmProvider, StreamEvent, Usage},
    relay_config::RelayConfig,
    relay_gateway::{GatewayState, build_gateway_app},
    relay_sessions::{SessionKey, Turn},
};

enum Script {
    Reply(&'static str),
    Fail(&'static str),
    Stream(Vec<&'static str>, Option<&'static str>),
}

#[derive(Default)]
struct ScriptedProvider {
    script: Mutex<VecDeque<Script>>,
    seen: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedProvider {
    fn next(&self, turns: &[Turn]) -> Script {
        self.seen.lock().unwrap().push(turns.to_vec());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Reply("ok"))
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn id(&self) -> &str {
        "scripted-model"
    }

    async fn complete(
        &self,
        turns: &[Turn],
        _params: &GenerationParams,
    ) -> relay_agents::Result<CompletionResponse> {
        match self.next(turns) {
            Script::Reply(text) => Ok(CompletionResponse {
                text: text.to_string(),
                usage: Usage::default(),
            }),
            Script::Fail(msg) => Err(relay_agents::Error::Http {
                provider: "scripted",
                status: 401,
                body: msg.to_string(),
            }),
            Script::Stream(..) => Err(relay_agents::Error::message("unexpected stream script")),
        }
    }

    fn stream(
        &self,
        turns: Vec<Turn>,
        _params: GenerationParams,
    ) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send + '_>> {
        let script = self.next(&turns);
        Box::pin(async_stream::stream! {
            match script {
                Script::Reply(text) => {
                    yield StreamEvent::Delta(text.to_string());
                    yield StreamEvent::Done(Usage::default());
                }
                Script::Fail(msg) => yield StreamEvent::Error(msg.to_string()),
                Script::Stream(fragments, failure) => {
                    for f in fragments {
                        yield StreamEvent::Delta(f.to_string());
                    }
                    match failure {
                        Some(msg) => yield StreamEvent::Error(msg.to_string()),
                        None => yield StreamEvent::Done(Usage::default()),
                    }
                }
            }
        })
    }
}

struct TestServer {
    base: String,
    state: Arc<GatewayState>,
    provider: Arc<ScriptedProvider>,
    client: reqwest::Client,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn turns(&self, session: &str) -> usize {
        let key = SessionKey::parse(session).unwrap();
        self.state.chat.transcript(&key).await.len()
    }
}

async fn start_server(script: Vec<Script>) -> TestServer {
    start_server_with(RelayConfig::default(), script).await
}

async fn start_server_with(config: RelayConfig, script: Vec<Script>) -> TestServer {
    let provider = Arc::new(ScriptedProvider {
        script: Mutex::new(script.into()),
        seen: Mutex::default(),
    });
    let state = GatewayState::new(config, provider.clone()).unwrap();
    let app = build_gateway_app(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://{addr}"),
        state,
        provider,
        client: reqwest::Client::new(),
    }
}

fn data_lines(body: &str) -> Vec<&str> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect()
}

#[tokio::test]
async fn health_reports_version_and_model() {
    let server = start_server(vec![]).await;
    let body: Value = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["model"], "scripted-model");
}

#[tokio::test]
async fn prompt_round_trip_appends_two_turns() {
    let server = start_server(vec![Script::Reply("Hi! How can I help?")]).await;
    let resp = server
        .client
        .post(server.url("/api/claude"))
        .json(&json!({ "prompt": "Hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "reply": "Hi! How can I help?" }));
    assert_eq!(server.turns("main").await, 2);
}

#[tokio::test]
async fn empty_prompt_is_bad_request() {
    let server = start_server(vec![]).await;
    let resp = server
        .client
        .post(server.url("/api/claude"))
        .json(&json!({ "prompt": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "prompt is empty");
    assert!(server.provider.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn rejection_then_reset_then_success() {
    let server = start_server(vec![
        Script::Fail("invalid x-api-key"),
        Script::Reply("all good"),
    ])
    .await;

    let resp = server
        .client
        .post(server.url("/api/claude"))
        .json(&json!({ "prompt": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("invalid x-api-key"));
    assert_eq!(body["type"], "auth_error");
    assert_eq!(server.turns("main").await, 0);

    let reset: Value = server
        .client
        .post(server.url("/api/claude/reset"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reset, json!({ "ok": true }));

    let resp = server
        .client
        .post(server.url("/api/claude"))
        .json(&json!({ "prompt": "hi again" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(server.turns("main").await, 2);
}

#[tokio::test]
async fn session_header_isolates_conversations() {
    let server = start_server(vec![]).await;
    for session in ["tab-1", "tab-1", "tab-2"] {
        let resp = server
            .client
            .post(server.url("/api/claude"))
            .header("x-session-key", session)
            .json(&json!({ "prompt": "ping" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }
    assert_eq!(server.turns("tab-1").await, 4);
    assert_eq!(server.turns("tab-2").await, 2);
    assert_eq!(server.turns("main").await, 0);
}

#[tokio::test]
async fn rotating_session_keys_stay_within_cap() {
    let mut config = RelayConfig::default();
    config.chat.max_sessions = 4;
    let server = start_server_with(config, vec![]).await;

    for i in 0..10 {
        let resp = server
            .client
            .post(server.url("/api/claude"))
            .header("x-session-key", format!("rotating-{i}"))
            .json(&json!({ "prompt": "ping" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert!(server.state.chat.sessions().len() <= 4);
    }
    assert_eq!(server.turns("rotating-9").await, 2);

    for i in 6..10 {
        server
            .client
            .post(server.url("/api/claude/reset"))
            .header("x-session-key", format!("rotating-{i}"))
            .send()
            .await
            .unwrap();
    }
    assert!(server.state.chat.sessions().is_empty());
}

#[tokio::test]
async fn invalid_session_header_is_bad_request() {
    let server = start_server(vec![]).await;
    let resp = server
        .client
        .post(server.url("/api/claude"))
        .header("x-session-key", "../../etc")
        .json(&json!({ "prompt": "ping" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn stream_emits_one_event_per_fragment() {
    let server = start_server(vec![Script::Stream(vec!["Hel", "lo", "!"], None)]).await;
    let resp = server
        .client
        .post(server.url("/api/claude/stream"))
        .json(&json!({ "prompt": "Hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(
        resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let body = resp.text().await.unwrap();
    assert_eq!(data_lines(&body), vec!["Hel", "lo", "!"]);
    assert_eq!(server.turns("main").await, 2);
    let key = SessionKey::parse("main").unwrap();
    let transcript = server.state.chat.transcript(&key).await;
    assert_eq!(transcript.turns()[1], Turn::assistant("Hello!"));
}

#[tokio::test]
async fn stream_failure_is_error_event_and_rolls_back() {
    let server = start_server(vec![Script::Stream(
        vec!["a", "b", "c"],
        Some("HTTP 529: overloaded"),
    )])
    .await;
    let body = server
        .client
        .post(server.url("/api/claude/stream"))
        .json(&json!({ "prompt": "Hi" }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert_eq!(data_lines(&body), vec![
        "a",
        "b",
        "c",
        "ERROR: HTTP 529: overloaded"
    ]);
    assert_eq!(server.turns("main").await, 0);
}

#[tokio::test]
async fn upload_text_file_with_empty_prompt() {
    let server = start_server(vec![Script::Reply("read it")]).await;
    let notes = "meeting notes\n".repeat(800);
    let form = reqwest::multipart::Form::new()
        .text("prompt", "")
        .part(
            "files",
            reqwest::multipart::Part::bytes(notes.into_bytes())
                .file_name("notes.txt")
                .mime_str("text/plain")
                .unwrap(),
        );

    let resp = server
        .client
        .post(server.url("/api/claude/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["reply"], "read it");
    assert_eq!(body["processedFilenames"], json!(["notes.txt"]));

    let sent = server.provider.seen.lock().unwrap().last().cloned().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].content.len(), 1);
    assert!(
        sent[0].content[0]
            .as_text()
            .unwrap()
            .starts_with("[File: notes.txt]\n")
    );
}

#[tokio::test]
async fn upload_failure_reports_processed_filenames() {
    let server = start_server(vec![Script::Fail("bad key")]).await;
    let form = reqwest::multipart::Form::new()
        .text("prompt", "compare these")
        .part(
            "files",
            reqwest::multipart::Part::bytes(b"a,b\n1,2".to_vec()).file_name("data.csv"),
        )
        .part(
            "files",
            reqwest::multipart::Part::bytes(b"\x00\x01".to_vec()).file_name("blob.bin"),
        );

    let resp = server
        .client
        .post(server.url("/api/claude/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("bad key"));
    assert_eq!(body["processedFilenames"], json!(["data.csv", "blob.bin"]));
    assert_eq!(server.turns("main").await, 0);
}

#[tokio::test]
async fn upload_with_nothing_usable_is_bad_request() {
    let server = start_server(vec![]).await;
    let form = reqwest::multipart::Form::new().part(
        "files",
        reqwest::multipart::Part::bytes(b"not an image".to_vec())
            .file_name("photo.png")
            .mime_str("image/png")
            .unwrap(),
    );

    let resp = server
        .client
        .post(server.url("/api/claude/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "no_content");
    assert_eq!(body["processedFilenames"], json!([]));
    assert!(server.provider.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn upload_over_body_limit_is_rejected() {
    let mut config = RelayConfig::default();
    config.media.max_upload_bytes = 1024;
    let server = start_server_with(config, vec![]).await;
    let form = reqwest::multipart::Form::new().part(
        "files",
        reqwest::multipart::Part::bytes(vec![b'x'; 8 * 1024]).file_name("big.txt"),
    );

    let resp = server
        .client
        .post(server.url("/api/claude/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 413);
    assert!(server.provider.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cors_allows_configured_origin() {
    let server = start_server(vec![]).await;
    let resp = server
        .client
        .request(reqwest::Method::OPTIONS, server.url("/api/claude"))
        .header("origin", "http://localhost:3000")
        .header("access-control-request-method", "POST")
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.headers()["access-control-allow-origin"],
        "http://localhost:3000"
    );
}
