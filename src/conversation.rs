//! Conversation history
//!
//! The live [`Conversation`] is an ordered list of [`Turn`]s seeded from a
//! separately owned [`PromptTemplate`]. Resetting clones the template back in,
//! so nothing appended to the live history can leak into the seed.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default system prompt when no seed file is configured
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are BoneGPT, a spooky but friendly skeleton \
voice assistant. Your replies are spoken aloud, so keep them short, conversational, and \
free of markdown, lists, or code.";

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions to the model
    System,
    /// The person talking to the assistant
    User,
    /// The model's reply
    Assistant,
}

impl Role {
    /// Wire name of the role
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who spoke
    pub role: Role,
    /// What was said; grows in place while a reply streams in
    pub content: String,
}

impl Turn {
    /// Create a turn
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Seed turns a conversation starts from and resets to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptTemplate {
    turns: Vec<Turn>,
}

impl PromptTemplate {
    /// Create a template from seed turns
    #[must_use]
    pub const fn new(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    /// Load a template from a JSON array of `{role, content}` objects
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not a valid turn list
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read prompt file {}: {e}", path.display()))
        })?;
        let template: Self = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("failed to parse prompt file {}: {e}", path.display()))
        })?;

        tracing::debug!(
            path = %path.display(),
            turns = template.turns.len(),
            "loaded prompt template"
        );
        Ok(template)
    }

    /// Seed turns
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(vec![Turn::new(Role::System, DEFAULT_SYSTEM_PROMPT)])
    }
}

/// Live conversation plus the template it resets to
#[derive(Debug, Clone)]
pub struct Conversation {
    turns: Vec<Turn>,
    template: PromptTemplate,
}

impl Conversation {
    /// Start a conversation from a template
    #[must_use]
    pub fn new(template: PromptTemplate) -> Self {
        Self {
            turns: template.turns.clone(),
            template,
        }
    }

    /// Append a new turn
    pub fn add_message(&mut self, role: Role, text: impl Into<String>) {
        self.turns.push(Turn::new(role, text));
    }

    /// Extend the content of the most recent turn in place
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyConversation`] if there is no turn to extend
    pub fn append_to_last(&mut self, text: &str) -> Result<()> {
        let last = self.turns.last_mut().ok_or(Error::EmptyConversation)?;
        last.content.push_str(text);
        Ok(())
    }

    /// Role of the most recent turn
    #[must_use]
    pub fn current_role(&self) -> Option<Role> {
        self.turns.last().map(|t| t.role)
    }

    /// Content of the most recent turn
    #[must_use]
    pub fn last_message_text(&self) -> Option<&str> {
        self.turns.last().map(|t| t.content.as_str())
    }

    /// Replace the live history with a fresh copy of the template
    pub fn reset(&mut self) {
        self.turns = self.template.turns.clone();
        tracing::debug!(turns = self.turns.len(), "conversation reset");
    }

    /// Drop the oldest turns after the template prefix so at most
    /// `max_turns` follow it
    ///
    /// Returns the number of turns removed.
    pub fn trim_history(&mut self, max_turns: usize) -> usize {
        let prefix = self.template_prefix_len();
        let history = self.turns.len() - prefix;
        if history <= max_turns {
            return 0;
        }

        let excess = history - max_turns;
        self.turns.drain(prefix..prefix + excess);
        tracing::debug!(removed = excess, kept = max_turns, "trimmed conversation history");
        excess
    }

    /// All live turns in order
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The template this conversation resets to
    #[must_use]
    pub const fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Number of live turns
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether there are no live turns
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Length of the leading run of turns still identical to the template
    fn template_prefix_len(&self) -> usize {
        self.turns
            .iter()
            .zip(&self.template.turns)
            .take_while(|(live, seed)| live == seed)
            .count()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new(PromptTemplate::default())
    }
}
