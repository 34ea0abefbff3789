//! Remote chat completion
//!
//! The assistant only needs two things from a completion service: a whole
//! reply, or the same reply as a stream of [`Delta`] events. Anything that
//! can do both implements [`ChatProvider`].

mod openai;
pub mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

pub use openai::{ChatClient, DEFAULT_BASE_URL, DEFAULT_MODEL};

use crate::Result;
use crate::conversation::{Role, Turn};

/// One incremental piece of a streamed reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    /// Role marker; starts a new turn
    pub role: Option<Role>,
    /// Text to append to the current turn
    pub content: Option<String>,
    /// Terminal marker; nothing further belongs to this reply
    pub finished: bool,
}

impl Delta {
    /// A role marker with no content
    #[must_use]
    pub const fn role(role: Role) -> Self {
        Self {
            role: Some(role),
            content: None,
            finished: false,
        }
    }

    /// A content fragment
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            role: None,
            content: Some(text.into()),
            finished: false,
        }
    }

    /// The terminal marker
    #[must_use]
    pub const fn finish() -> Self {
        Self {
            role: None,
            content: None,
            finished: true,
        }
    }
}

/// Stream of reply deltas; an `Err` item means the transport failed
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<Delta>> + Send>>;

/// A chat completion service
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Request one complete reply to `turns`
    async fn complete(&self, turns: &[Turn]) -> Result<Turn>;

    /// Request a streamed reply to `turns`
    async fn stream(&self, turns: &[Turn]) -> Result<DeltaStream>;
}
