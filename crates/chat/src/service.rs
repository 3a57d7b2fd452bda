//! Model gateway: every call appends a user turn, asks the model, and either
//! commits the reply or retracts the user turn.

use std::{pin::Pin, sync::Arc};

use {
    futures::StreamExt,
    relay_agents::{GenerationParams, LlmProvider, StreamEvent},
    relay_sessions::{SessionKey, SessionRegistry, Transcript, Turn},
    tokio::sync::OwnedMutexGuard,
    tokio_stream::Stream,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    normalize::{Normalizer, UploadArtifact},
};

/// Item of a streamed reply. An `Error` is always the last item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyChunk {
    Fragment(String),
    Error(String),
}

pub type ReplyStream = Pin<Box<dyn Stream<Item = ReplyChunk> + Send + 'static>>;

/// Result of an upload submission. Filenames are reported whichever way the
/// model call went.
#[derive(Debug)]
pub struct AttachmentReply {
    pub outcome: Result<String>,
    pub processed_filenames: Vec<String>,
}

/// A user turn appended under the session lock and not yet answered.
///
/// Dropping it without [`PendingTurn::commit`] removes the user turn again,
/// which also covers cancelled futures and dropped streams.
struct PendingTurn {
    transcript: OwnedMutexGuard<Transcript>,
    committed: bool,
}

impl PendingTurn {
    fn begin(mut transcript: OwnedMutexGuard<Transcript>, turn: Turn) -> Self {
        transcript.append(turn);
        Self {
            transcript,
            committed: false,
        }
    }

    fn snapshot(&self) -> Vec<Turn> {
        self.transcript.snapshot()
    }

    fn commit(mut self, reply: String) {
        self.transcript.append(Turn::assistant(reply));
        self.committed = true;
    }
}

impl Drop for PendingTurn {
    fn drop(&mut self) {
        if !self.committed && self.transcript.pop_last().is_some() {
            debug!(turns = self.transcript.len(), "rolled back unanswered user turn");
        }
    }
}

pub struct ChatService {
    provider: Arc<dyn LlmProvider>,
    sessions: Arc<SessionRegistry>,
    normalizer: Arc<Normalizer>,
    params: GenerationParams,
}

impl ChatService {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        sessions: Arc<SessionRegistry>,
        normalizer: Normalizer,
        params: GenerationParams,
    ) -> Self {
        Self {
            provider,
            sessions,
            normalizer: Arc::new(normalizer),
            params,
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Current transcript of a session (empty if it was never used).
    pub async fn transcript(&self, key: &SessionKey) -> Transcript {
        match self.sessions.get(key) {
            Some(session) => session.snapshot().await,
            None => Transcript::new(),
        }
    }

    /// Send a text prompt and wait for the whole reply.
    pub async fn submit_prompt(&self, key: &SessionKey, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(Error::EmptyPrompt);
        }
        self.submit_turn(key, Turn::user_text(text)).await
    }

    /// Send a text prompt and stream the reply.
    ///
    /// The session stays locked until the stream finishes or is dropped.
    /// The reply is committed only once the provider reports completion.
    pub fn submit_prompt_streaming(&self, key: SessionKey, text: String) -> ReplyStream {
        let provider = Arc::clone(&self.provider);
        let sessions = Arc::clone(&self.sessions);
        let params = self.params.clone();

        Box::pin(async_stream::stream! {
            if text.trim().is_empty() {
                yield ReplyChunk::Error(Error::EmptyPrompt.to_string());
                return;
            }

            let session = sessions.get_or_create(&key);
            let pending = PendingTurn::begin(session.lock().await, Turn::user_text(text));
            let snapshot = pending.snapshot();
            debug!(session = %key, turns = snapshot.len(), "streaming prompt");

            let mut upstream = provider.stream(snapshot, params);
            let mut buffer = String::new();
            let mut fragments = 0usize;

            while let Some(event) = upstream.next().await {
                match event {
                    StreamEvent::Delta(text) => {
                        buffer.push_str(&text);
                        fragments += 1;
                        yield ReplyChunk::Fragment(text);
                    }
                    StreamEvent::Done(usage) => {
                        info!(
                            session = %key,
                            fragments,
                            input_tokens = usage.input_tokens,
                            output_tokens = usage.output_tokens,
                            "streamed reply committed"
                        );
                        pending.commit(buffer);
                        return;
                    }
                    StreamEvent::Error(message) => {
                        warn!(session = %key, fragments, error = %message, "streamed reply failed");
                        drop(pending);
                        yield ReplyChunk::Error(message);
                        return;
                    }
                }
            }

            warn!(session = %key, fragments, "provider stream ended without completion");
            drop(pending);
            yield ReplyChunk::Error("model stream ended unexpectedly".to_string());
        })
    }

    /// Normalize uploads off the async executor and send them with the
    /// prompt as one user turn.
    pub async fn submit_with_attachments(
        &self,
        key: &SessionKey,
        prompt: String,
        artifacts: Vec<UploadArtifact>,
    ) -> AttachmentReply {
        let normalizer = Arc::clone(&self.normalizer);
        let count = artifacts.len();
        let content =
            match tokio::task::spawn_blocking(move || normalizer.normalize(&prompt, artifacts))
                .await
            {
                Ok(content) => content,
                Err(e) => {
                    return AttachmentReply {
                        outcome: Err(Error::external("upload normalization failed", e)),
                        processed_filenames: Vec::new(),
                    };
                },
            };

        debug!(
            session = %key,
            uploads = count,
            processed = content.processed.len(),
            segments = content.segments.len(),
            "attachments normalized"
        );

        if content.segments.is_empty() {
            return AttachmentReply {
                outcome: Err(Error::NoContent),
                processed_filenames: content.processed,
            };
        }

        let outcome = self.submit_turn(key, Turn::user(content.segments)).await;
        AttachmentReply {
            outcome,
            processed_filenames: content.processed,
        }
    }

    /// Forget everything said in a session.
    pub async fn reset_conversation(&self, key: &SessionKey) {
        self.sessions.reset(key).await;
        info!(session = %key, "conversation reset");
    }

    async fn submit_turn(&self, key: &SessionKey, turn: Turn) -> Result<String> {
        let session = self.sessions.get_or_create(key);
        let pending = PendingTurn::begin(session.lock().await, turn);
        let snapshot = pending.snapshot();
        debug!(session = %key, turns = snapshot.len(), "submitting prompt");

        match self.provider.complete(&snapshot, &self.params).await {
            Ok(resp) => {
                info!(
                    session = %key,
                    input_tokens = resp.usage.input_tokens,
                    output_tokens = resp.usage.output_tokens,
                    "reply committed"
                );
                pending.commit(resp.text.clone());
                Ok(resp.text)
            },
            Err(e) => {
                warn!(session = %key, error = %e, "model call failed, rolling back");
                drop(pending);
                Err(e.into())
            },
        }
    }
}
