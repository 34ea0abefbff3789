//! BoneGPT - a talking skeleton voice assistant
//!
//! This library provides the building blocks of the assistant:
//! - Microphone capture, phrase detection and speech recognition
//! - Streamed chat completions recorded into a resettable conversation
//! - Sentence chunking and sanitization of reply text
//! - A synthesis → effects → playback subprocess pipeline
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      InputLoop                       │
//! │  Listener ─▶ control words / idle reset ─▶ user turn │
//! └──────────────────────────┬───────────────────────────┘
//!                            │
//! ┌──────────────────────────▼───────────────────────────┐
//! │                   StreamController                   │
//! │  ChatProvider deltas ─▶ Conversation                 │
//! │                     └─▶ TextChunker ─▶ SpeechSink    │
//! └──────────────────────────┬───────────────────────────┘
//!                            │
//! ┌──────────────────────────▼───────────────────────────┐
//! │                    AudioPipeline                     │
//! │     synthesis  ─▶  effects  ─▶  playback             │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod assistant;
pub mod banner;
pub mod chat;
pub mod config;
pub mod controller;
pub mod conversation;
pub mod error;
pub mod input;
pub mod voice;

pub use assistant::Assistant;
pub use config::{Config, Overrides};
pub use conversation::{Conversation, PromptTemplate, Role, Turn};
pub use error::{Error, Result};
