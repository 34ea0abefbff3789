//! Error types for BoneGPT

use thiserror::Error;

/// Result type alias for BoneGPT operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in BoneGPT
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be resolved (missing credential, bad file)
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone capture error
    #[error("capture error: {0}")]
    Capture(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Chat completion request rejected or malformed
    #[error("chat error: {0}")]
    Chat(String),

    /// Completion stream failed or ended without a finish signal
    #[error("remote stream error: {0}")]
    RemoteStream(String),

    /// A pipeline stage could not be launched
    #[error("failed to spawn {stage} stage: {source}")]
    PipelineSpawn {
        /// Stage name (synthesis, effects, playback)
        stage: &'static str,
        /// Underlying spawn failure
        #[source]
        source: std::io::Error,
    },

    /// Writing to or waiting on a pipeline stage failed
    #[error("pipeline io error: {0}")]
    PipelineIo(#[source] std::io::Error),

    /// Pipeline write attempted with no open pipeline
    #[error("audio pipeline is not open")]
    PipelineNotOpen,

    /// Pipeline open attempted while one is already open
    #[error("audio pipeline is already open")]
    PipelineAlreadyOpen,

    /// Append attempted on a conversation with no turns
    #[error("conversation has no turns to append to")]
    EmptyConversation,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether the error ends the process rather than the current cycle
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
