//! Reply streaming
//!
//! [`StreamController`] consumes one streamed reply: deltas are appended to
//! the conversation as they arrive, assistant text is cut into sentences,
//! and each sentence is written to the speech sink while the rest of the
//! reply is still in flight.
//!
//! ```text
//! Idle ─▶ AwaitingFirstDelta ─▶ StreamingAssistantTurn ─▶ Flushing ─▶ Idle
//! ```
//!
//! The sink is opened lazily on the first speakable chunk and closed once
//! after the stream ends, whether it finished normally or not.

use std::sync::Arc;

use futures::StreamExt;

use crate::chat::{ChatProvider, Delta};
use crate::conversation::{Conversation, Role};
use crate::voice::{Sanitizer, SpeechSink, TextChunker};
use crate::{Error, Result};

/// Where the controller is within a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No reply in progress
    Idle,
    /// Request sent, nothing received yet
    AwaitingFirstDelta,
    /// Appending to the reply turn
    StreamingAssistantTurn,
    /// Stream over; speaking what is left and closing the sink
    Flushing,
}

/// Summary of a finished reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    /// Full assistant text as recorded in the conversation
    pub text: String,
    /// Chunks handed to the speech sink
    pub chunks_spoken: usize,
}

/// Per-reply speech bookkeeping
struct Speech {
    chunker: TextChunker,
    spoken: usize,
    /// Set once the sink failed to open; no further chunks are attempted
    failure: Option<Error>,
}

/// Streams replies into a conversation and out through a speech sink
pub struct StreamController<S> {
    chat: Arc<dyn ChatProvider>,
    sink: S,
    sanitizer: Arc<Sanitizer>,
    state: StreamState,
}

impl<S: SpeechSink> StreamController<S> {
    /// Create a controller
    pub fn new(chat: Arc<dyn ChatProvider>, sink: S, sanitizer: Arc<Sanitizer>) -> Self {
        Self {
            chat,
            sink,
            sanitizer,
            state: StreamState::Idle,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    /// The speech sink
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Stream a reply to `conversation`, whose last turn is the user's
    ///
    /// Every delta is recorded even if speech fails. On a transport
    /// failure or a stream that ends without a finish signal, buffered text
    /// is still spoken, the sink is closed, and
    /// [`Error::RemoteStream`] is returned with the partial reply kept.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails, the stream ends abnormally, or
    /// the speech sink cannot be started
    pub async fn respond(&mut self, conversation: &mut Conversation) -> Result<Reply> {
        self.state = StreamState::AwaitingFirstDelta;

        let mut stream = match self.chat.stream(conversation.turns()).await {
            Ok(stream) => stream,
            Err(e) => {
                self.state = StreamState::Idle;
                return Err(e);
            }
        };

        let reply_start = conversation.len();
        let mut speech = Speech {
            chunker: TextChunker::new(Arc::clone(&self.sanitizer)),
            spoken: 0,
            failure: None,
        };
        let mut outcome = Err(Error::RemoteStream(
            "stream ended without a finish signal".to_string(),
        ));

        while let Some(item) = stream.next().await {
            let delta = match item {
                Ok(delta) => delta,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            };

            let finished = delta.finished;
            if let Err(e) = self.apply(delta, conversation, reply_start, &mut speech).await {
                outcome = Err(e);
                break;
            }
            if finished {
                outcome = Ok(());
                break;
            }
        }
        drop(stream);

        self.state = StreamState::Flushing;
        if let Some(chunk) = speech.chunker.flush() {
            self.speak(chunk, &mut speech).await;
        }
        let closed = self.close_sink().await;
        self.state = StreamState::Idle;

        if let Err(e) = &outcome {
            tracing::warn!(error = %e, "reply stream ended abnormally");
        }
        outcome?;
        if let Some(e) = speech.failure {
            return Err(e);
        }
        closed?;

        let text = if conversation.len() > reply_start {
            conversation.last_message_text().unwrap_or_default().to_string()
        } else {
            String::new()
        };
        tracing::debug!(chunks = speech.spoken, chars = text.len(), "reply complete");

        Ok(Reply {
            text,
            chunks_spoken: speech.spoken,
        })
    }

    /// Request a whole reply, record it, then speak it in one go
    ///
    /// # Errors
    ///
    /// Returns error if the request or speech fails; the reply is recorded
    /// before speech is attempted
    pub async fn respond_blocking(&mut self, conversation: &mut Conversation) -> Result<Reply> {
        self.state = StreamState::AwaitingFirstDelta;
        let turn = self.chat.complete(conversation.turns()).await;
        self.state = StreamState::Idle;

        let turn = turn?;
        conversation.add_message(turn.role, turn.content.clone());

        if turn.role != Role::Assistant {
            return Ok(Reply {
                text: turn.content,
                chunks_spoken: 0,
            });
        }

        self.sink.vocalize_blocking(&turn.content).await?;
        Ok(Reply {
            text: turn.content,
            chunks_spoken: 1,
        })
    }

    /// Speak `text` on its own, outside any reply
    ///
    /// # Errors
    ///
    /// Returns error if the speech sink fails
    pub async fn say(&self, text: &str) -> Result<()> {
        self.sink.vocalize_blocking(text).await
    }

    /// Close the sink if a reply was interrupted mid-stream
    ///
    /// # Errors
    ///
    /// Returns error if the sink fails to close cleanly
    pub async fn shutdown(&mut self) -> Result<()> {
        self.state = StreamState::Idle;
        self.close_sink().await
    }

    async fn apply(
        &mut self,
        delta: Delta,
        conversation: &mut Conversation,
        reply_start: usize,
        speech: &mut Speech,
    ) -> Result<()> {
        if let Some(role) = delta.role {
            conversation.add_message(role, "");
            if role == Role::Assistant {
                self.state = StreamState::StreamingAssistantTurn;
            }
        }

        let Some(content) = delta.content else {
            return Ok(());
        };

        // content with no role marker yet opens an assistant turn
        if conversation.len() == reply_start {
            conversation.add_message(Role::Assistant, "");
            self.state = StreamState::StreamingAssistantTurn;
        }
        conversation.append_to_last(&content)?;

        if conversation.current_role() == Some(Role::Assistant) {
            if let Some(chunk) = speech.chunker.feed(&content) {
                self.speak(chunk, speech).await;
            }
        }
        Ok(())
    }

    async fn speak(&mut self, chunk: String, speech: &mut Speech) {
        if chunk.trim().is_empty() || speech.failure.is_some() {
            return;
        }

        if !self.sink.is_open() {
            if let Err(e) = self.sink.open().await {
                tracing::error!(error = %e, "speech unavailable for the rest of this reply");
                speech.failure = Some(e);
                return;
            }
        }

        match self.sink.write_chunk(&chunk).await {
            Ok(()) => speech.spoken += 1,
            Err(e) => {
                // a broken pipe is restarted for the next chunk
                tracing::warn!(error = %e, "dropping chunk after pipeline write failure");
                if let Err(e) = self.sink.close().await {
                    tracing::debug!(error = %e, "pipeline close after write failure");
                }
            }
        }
    }

    async fn close_sink(&mut self) -> Result<()> {
        if self.sink.is_open() {
            self.sink.close().await
        } else {
            Ok(())
        }
    }
}

impl<S> std::fmt::Debug for StreamController<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamController")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
