use std::pin::Pin;

use {
    async_trait::async_trait,
    futures::StreamExt,
    relay_sessions::{ContentSegment, Turn},
    secrecy::{ExposeSecret, Secret},
    tokio_stream::Stream,
    tracing::{debug, trace, warn},
};

use crate::{
    error::{Error, Result},
    model::{CompletionResponse, GenerationParams, LlmProvider, StreamEvent, Usage},
};

const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    api_key: Secret<String>,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: Secret<String>, model: String, base_url: String) -> Self {
        Self {
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn request_body(
        &self,
        turns: &[Turn],
        params: &GenerationParams,
        stream: bool,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "messages": to_anthropic_messages(turns),
        });
        if stream {
            body["stream"] = serde_json::Value::Bool(true);
        }
        body
    }

    fn post(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
    }
}

/// Convert transcript turns to Anthropic message objects.
///
/// Single-text turns are sent as a plain string; anything else becomes a
/// content block array with base64 image sources.
fn to_anthropic_messages(turns: &[Turn]) -> Vec<serde_json::Value> {
    turns
        .iter()
        .map(|turn| {
            let role = turn.role.as_str();
            if let [ContentSegment::Text { text }] = turn.content.as_slice() {
                return serde_json::json!({"role": role, "content": text});
            }
            let blocks: Vec<serde_json::Value> = turn
                .content
                .iter()
                .map(|segment| match segment {
                    ContentSegment::Text { text } => {
                        serde_json::json!({"type": "text", "text": text})
                    },
                    ContentSegment::Image { media_type, data } => {
                        serde_json::json!({
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": media_type,
                                "data": data,
                            }
                        })
                    },
                })
                .collect();
            serde_json::json!({"role": role, "content": blocks})
        })
        .collect()
}

/// Raw SSE bytes waiting for a complete `\n\n`-terminated block.
///
/// Decoding only whole blocks keeps multibyte characters intact when the
/// network splits them across chunks.
#[derive(Debug, Default)]
struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    fn next_block(&mut self) -> Option<String> {
        let end = self.pending.windows(2).position(|w| w == b"\n\n")?;
        let block: Vec<u8> = self.pending.drain(..end + 2).collect();
        Some(String::from_utf8_lossy(&block[..end]).into_owned())
    }
}

fn parse_usage(u: &serde_json::Value) -> Usage {
    Usage {
        input_tokens: u["input_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: u["output_tokens"].as_u64().unwrap_or(0) as u32,
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn id(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        turns: &[Turn],
        params: &GenerationParams,
    ) -> Result<CompletionResponse> {
        let body = self.request_body(turns, params, false);

        debug!(
            model = %self.model,
            turns = turns.len(),
            max_tokens = params.max_tokens,
            "anthropic complete request"
        );
        trace!(body = %serde_json::to_string(&body).unwrap_or_default(), "anthropic request body");

        let http_resp = self.post(&body).send().await?;

        let status = http_resp.status();
        if !status.is_success() {
            let body_text = http_resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body_text, "anthropic API error");
            return Err(Error::Http {
                provider: PROVIDER,
                status: status.as_u16(),
                body: body_text,
            });
        }

        let resp = http_resp
            .json::<serde_json::Value>()
            .await
            .map_err(|e| Error::Malformed(e.to_string()))?;
        trace!(response = %resp, "anthropic raw response");

        let Some(content) = resp["content"].as_array() else {
            return Err(Error::Malformed("missing content array".into()));
        };

        let text = content
            .iter()
            .filter(|b| b["type"].as_str() == Some("text"))
            .filter_map(|b| b["text"].as_str())
            .collect::<String>();

        Ok(CompletionResponse {
            text,
            usage: parse_usage(&resp["usage"]),
        })
    }

    #[allow(clippy::collapsible_if)]
    fn stream(
        &self,
        turns: Vec<Turn>,
        params: GenerationParams,
    ) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send + '_>> {
        Box::pin(async_stream::stream! {
            let body = self.request_body(&turns, &params, true);

            debug!(
                model = %self.model,
                turns = turns.len(),
                max_tokens = params.max_tokens,
                "anthropic stream request"
            );
            trace!(body = %serde_json::to_string(&body).unwrap_or_default(), "anthropic stream request body");

            let resp = match self.post(&body).send().await {
                Ok(r) => {
                    if let Err(e) = r.error_for_status_ref() {
                        let status = e.status().map(|s| s.as_u16()).unwrap_or(0);
                        let body_text = r.text().await.unwrap_or_default();
                        warn!(status, body = %body_text, "anthropic stream API error");
                        yield StreamEvent::Error(format!("HTTP {status}: {body_text}"));
                        return;
                    }
                    r
                }
                Err(e) => {
                    yield StreamEvent::Error(Error::from(e).to_string());
                    return;
                }
            };

            let mut byte_stream = resp.bytes_stream();
            let mut buf = SseBuffer::default();
            let mut usage = Usage::default();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield StreamEvent::Error(Error::from(e).to_string());
                        return;
                    }
                };
                buf.push(&chunk);

                while let Some(block) = buf.next_block() {
                    for line in block.lines() {
                        if let Some(data) = line.strip_prefix("data: ") {
                            let Ok(evt) = serde_json::from_str::<serde_json::Value>(data) else {
                                trace!(data, "skipping unparseable SSE data");
                                continue;
                            };
                            match evt["type"].as_str().unwrap_or("") {
                                "message_start" => {
                                    let u = &evt["message"]["usage"];
                                    if let Some(v) = u["input_tokens"].as_u64() {
                                        usage.input_tokens = v as u32;
                                    }
                                }
                                "content_block_delta" => {
                                    let delta = &evt["delta"];
                                    if delta["type"].as_str() == Some("text_delta") {
                                        if let Some(text) = delta["text"].as_str() {
                                            if !text.is_empty() {
                                                yield StreamEvent::Delta(text.to_string());
                                            }
                                        }
                                    }
                                }
                                "message_delta" => {
                                    if let Some(v) = evt["usage"]["output_tokens"].as_u64() {
                                        usage.output_tokens = v as u32;
                                    }
                                }
                                "message_stop" => {
                                    yield StreamEvent::Done(usage);
                                    return;
                                }
                                "error" => {
                                    let kind = evt["error"]["type"].as_str().unwrap_or("error");
                                    let msg = evt["error"]["message"]
                                        .as_str()
                                        .unwrap_or("unknown error");
                                    yield StreamEvent::Error(format!("{kind}: {msg}"));
                                    return;
                                }
                                _ => {}
                            }
                        }
                    }
                }
            }

            yield StreamEvent::Error("stream ended before message_stop".into());
        })
    }
}
