//! Request-level control flow for one chat turn.
//!
//! ```text
//! validate ─> persist user turn ─> assemble transcript ─┬─> complete ──────────> persist assistant ─> reply
//!                                                      └─> complete_streaming ─> forward fragments
//!                                                                                 ─> persist assistant ─> done
//! ```
//!
//! The user turn is written before the completion call starts and is never
//! rolled back. The assistant turn is written only after the call has fully
//! completed (or its stream fully drained), whether or not the caller is
//! still listening.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use super::db::StoreHandle;
use super::models::{ChatMessage, NewTurn, StreamFrame};
use super::relay::{CompletionRelay, FragmentStream};
use super::transcript;
use crate::errors::ChatError;

/// Frames for one streamed turn. Ends after `Done`, or without it on failure.
pub type TurnStream = BoxStream<'static, StreamFrame>;

#[derive(Clone)]
pub struct TurnOrchestrator {
    store: StoreHandle,
    relay: Arc<dyn CompletionRelay>,
}

impl TurnOrchestrator {
    pub fn new(store: StoreHandle, relay: Arc<dyn CompletionRelay>) -> Self {
        Self { store, relay }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Buffered turn: returns the whole assistant answer once it is stored.
    pub async fn reply(&self, session_id: &str, message: &str) -> Result<String, ChatError> {
        let messages = self.prepare(session_id, message).await?;

        let answer = self.relay.complete(&messages).await.inspect_err(|e| {
            warn!(session_id, error = %e, "Completion failed");
        })?;

        let stored = self
            .store
            .append(NewTurn::assistant(session_id, answer.as_str()))
            .await?;
        info!(session_id, turn_id = stored.id, chars = answer.len(), "Assistant turn stored");
        Ok(answer)
    }

    /// Streamed turn. Validation, the user-turn write and transcript assembly
    /// happen before this returns, so their errors reach the caller as a
    /// normal error. The completion call then runs in its own task; failures
    /// from there on end the stream without `Done`. Dropping the returned
    /// stream does not cancel the call: it is drained and its answer stored.
    pub async fn reply_streaming(&self, session_id: &str, message: &str) -> Result<TurnStream, ChatError> {
        let messages = self.prepare(session_id, message).await?;

        let state = StreamState {
            store: self.store.clone(),
            session_id: session_id.to_string(),
            phase: Phase::Dispatch {
                relay: self.relay.clone(),
                messages,
            },
        };
        let mut frames = futures::stream::unfold(state, StreamState::advance).boxed();

        // One frame in flight: a slow caller still holds back the upstream pull.
        let (tx, rx) = mpsc::channel(1);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            let mut attached = true;
            while let Some(frame) = frames.next().await {
                if attached && tx.send(frame).await.is_err() {
                    attached = false;
                    debug!(%session_id, "Caller went away; draining completion to store the answer");
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    /// Validate, persist the user turn, and build the transcript to send.
    async fn prepare(&self, session_id: &str, message: &str) -> Result<Vec<ChatMessage>, ChatError> {
        if message.is_empty() {
            return Err(ChatError::Validation("Message is required".into()));
        }

        let persisted = self.store.append(NewTurn::user(session_id, message)).await?;
        let history = self.store.history(session_id).await?;
        let messages = transcript::assemble(&history, &persisted, message);
        debug!(
            session_id,
            turn_id = persisted.id,
            transcript_len = messages.len(),
            model = self.relay.model(),
            "User turn stored, transcript assembled"
        );
        Ok(messages)
    }
}

enum Phase {
    Dispatch {
        relay: Arc<dyn CompletionRelay>,
        messages: Vec<ChatMessage>,
    },
    Relaying {
        fragments: FragmentStream,
        answer: String,
        count: usize,
    },
    Finished,
}

struct StreamState {
    store: StoreHandle,
    session_id: String,
    phase: Phase,
}

impl StreamState {
    async fn advance(mut self) -> Option<(StreamFrame, Self)> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Finished) {
                Phase::Dispatch { relay, messages } => match relay.complete_streaming(&messages).await {
                    Ok(fragments) => {
                        self.phase = Phase::Relaying {
                            fragments,
                            answer: String::new(),
                            count: 0,
                        };
                    }
                    Err(e) => {
                        warn!(session_id = %self.session_id, error = %e, "Completion stream failed to start");
                        return None;
                    }
                },
                Phase::Relaying {
                    mut fragments,
                    mut answer,
                    count,
                } => match fragments.next().await {
                    Some(Ok(fragment)) => {
                        answer.push_str(&fragment);
                        self.phase = Phase::Relaying {
                            fragments,
                            answer,
                            count: count + 1,
                        };
                        return Some((StreamFrame::content(fragment), self));
                    }
                    Some(Err(e)) => {
                        warn!(
                            session_id = %self.session_id,
                            fragments = count,
                            error = %e,
                            "Completion stream interrupted; partial answer discarded"
                        );
                        return None;
                    }
                    None => {
                        drop(fragments);
                        return match self
                            .store
                            .append(NewTurn::assistant(self.session_id.as_str(), answer.as_str()))
                            .await
                        {
                            Ok(stored) => {
                                info!(
                                    session_id = %self.session_id,
                                    turn_id = stored.id,
                                    fragments = count,
                                    chars = answer.len(),
                                    "Streamed assistant turn stored"
                                );
                                Some((StreamFrame::done(), self))
                            }
                            Err(e) => {
                                error!(session_id = %self.session_id, error = %e, "Failed to store streamed answer");
                                None
                            }
                        };
                    }
                },
                Phase::Finished => return None,
            }
        }
    }
}
