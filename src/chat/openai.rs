//! OpenAI-compatible chat completions client

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::sse::{SseDecoder, SseEvent};
use super::{ChatProvider, Delta, DeltaStream};
use crate::conversation::{Role, Turn};
use crate::{Error, Result};

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model identifier
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Buffered deltas between the network reader and the consumer
const DELTA_CHANNEL_CAPACITY: usize = 64;

/// Chat completions client carrying its own credentials
///
/// Credentials live on the client value and travel with it; there is no
/// process-wide key.
pub struct ChatClient {
    http: reqwest::Client,
    api_key: SecretString,
    organization: Option<String>,
    model: String,
    base_url: String,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("organization", &self.organization)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    /// Create a client for `model`
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Result<Self> {
        if api_key.expose_secret().trim().is_empty() {
            return Err(Error::Config("OpenAI API key required".to_string()));
        }

        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            organization: None,
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Bill requests to `organization`
    #[must_use]
    pub fn with_organization(mut self, organization: Option<String>) -> Self {
        self.organization = organization.filter(|o| !o.trim().is_empty());
        self
    }

    /// Point at a different API root (proxies, local servers)
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Model identifier sent with every request
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn send(&self, turns: &[Turn], stream: bool) -> Result<reqwest::Response> {
        let request = ChatRequest {
            model: &self.model,
            messages: turns,
            stream,
        };

        tracing::debug!(model = %self.model, turns = turns.len(), stream, "chat completion request");

        let mut builder = self
            .http
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose_secret())
            .json(&request);
        if let Some(organization) = &self.organization {
            builder = builder.header("OpenAI-Organization", organization);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!(error = %e, "chat completion request failed");
            e
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat completion API error");
            return Err(Error::Chat(format!("API error {status}: {body}")));
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for ChatClient {
    async fn complete(&self, turns: &[Turn]) -> Result<Turn> {
        let response: CompletionResponse = self.send(turns, false).await?.json().await?;

        let message = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Chat("completion had no choices".to_string()))?
            .message;

        Ok(Turn::new(
            message.role.unwrap_or(Role::Assistant),
            message.content.unwrap_or_default(),
        ))
    }

    async fn stream(&self, turns: &[Turn]) -> Result<DeltaStream> {
        let response = self.send(turns, true).await?;
        let (tx, rx) = mpsc::channel(DELTA_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        for event in decoder.push(&chunk) {
                            if !forward(&tx, event).await {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "completion stream interrupted");
                        let _ = tx.send(Err(Error::RemoteStream(e.to_string()))).await;
                        return;
                    }
                }
            }

            if let Some(event) = decoder.finish() {
                forward(&tx, event).await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Translate one SSE event and send it on; false once the receiver is gone
async fn forward(tx: &mpsc::Sender<Result<Delta>>, event: SseEvent) -> bool {
    let item = match event {
        SseEvent::Done => Ok(Delta::finish()),
        SseEvent::Data(payload) => match parse_stream_payload(&payload) {
            Ok(Some(delta)) => Ok(delta),
            Ok(None) => return true,
            Err(e) => Err(e),
        },
    };
    tx.send(item).await.is_ok()
}

/// Parse one `data:` payload of a streamed completion
///
/// Returns `Ok(None)` for payloads that carry nothing for the conversation.
fn parse_stream_payload(payload: &str) -> Result<Option<Delta>> {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(payload) {
        return Err(Error::RemoteStream(envelope.error.message));
    }

    let chunk: StreamChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::warn!(error = %e, payload, "skipping unparseable stream payload");
            return Ok(None);
        }
    };

    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(None);
    };

    let delta = Delta {
        role: choice.delta.role,
        content: choice.delta.content.filter(|c| !c.is_empty()),
        finished: choice.finish_reason.is_some(),
    };

    if delta == Delta::default() {
        Ok(None)
    } else {
        Ok(Some(delta))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    role: Option<Role>,
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    role: Option<Role>,
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}
