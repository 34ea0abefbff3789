//! The listen → respond cycle
//!
//! Each cycle waits for one utterance. Silence and unintelligible audio
//! count toward an idle threshold that resets the conversation; control
//! words clear memory or quit; anything else is sent to the model.

use std::future::Future;

use crate::conversation::{Conversation, Role};
use crate::controller::{Reply, StreamController};
use crate::voice::{Listener, Recognition, SpeechSink};
use crate::Result;

/// Idle cycles before the conversation is reset
pub const DEFAULT_IDLE_THRESHOLD: u32 = 5;

/// Spoken after a clear command
pub const CLEARED_MESSAGE: &str = "Memory cleared.";

/// Spoken before quitting
pub const FAREWELL_MESSAGE: &str = "Goodbye.";

/// Counts consecutive cycles with no usable input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleTracker {
    count: u32,
    threshold: u32,
}

impl IdleTracker {
    /// Reset after `threshold` idle cycles; 0 never resets
    #[must_use]
    pub const fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold,
        }
    }

    /// Record an idle cycle; true when the threshold is reached
    ///
    /// Reaching the threshold zeroes the counter, so the next reset needs
    /// another full run of idle cycles.
    pub const fn record_idle(&mut self) -> bool {
        if self.threshold == 0 {
            return false;
        }

        self.count += 1;
        if self.count >= self.threshold {
            self.count = 0;
            true
        } else {
            false
        }
    }

    /// Record usable input
    pub const fn record_input(&mut self) {
        self.count = 0;
    }

    /// Consecutive idle cycles so far
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Configured threshold
    #[must_use]
    pub const fn threshold(&self) -> u32 {
        self.threshold
    }
}

impl Default for IdleTracker {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_THRESHOLD)
    }
}

/// Reserved utterances handled without the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Restore the conversation to its prompt
    Clear,
    /// End the session
    Quit,
}

impl ControlCommand {
    /// Match an utterance against the control words
    ///
    /// Case and trailing punctuation are ignored ("Quit." is a quit), since
    /// recognizers punctuate single words.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let word = text
            .trim()
            .trim_end_matches(|c: char| c.is_ascii_punctuation())
            .to_lowercase();

        match word.as_str() {
            "clear" => Some(Self::Clear),
            "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// What one cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing usable heard; `reset` is true if the idle threshold was hit
    Idle {
        /// Whether the conversation was reset
        reset: bool,
    },
    /// Memory cleared by command
    Cleared,
    /// Quit requested
    Quit,
    /// The model answered
    Replied(Reply),
    /// The reply failed; the loop carries on
    Failed,
}

/// Settings for [`InputLoop`]
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    /// Stream replies rather than waiting for whole ones
    pub stream: bool,
    /// Idle cycles before reset (0 disables)
    pub idle_threshold: u32,
    /// Keep at most this many turns beyond the prompt
    pub max_history_turns: Option<usize>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            stream: true,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            max_history_turns: None,
        }
    }
}

/// Drives listen → respond cycles against one conversation
pub struct InputLoop<L, S> {
    listener: L,
    controller: StreamController<S>,
    conversation: Conversation,
    idle: IdleTracker,
    settings: LoopSettings,
}

impl<L: Listener, S: SpeechSink> InputLoop<L, S> {
    /// Create a loop
    pub fn new(
        listener: L,
        controller: StreamController<S>,
        conversation: Conversation,
        settings: LoopSettings,
    ) -> Self {
        Self {
            listener,
            controller,
            conversation,
            idle: IdleTracker::new(settings.idle_threshold),
            settings,
        }
    }

    /// The conversation so far
    #[must_use]
    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Idle counter
    #[must_use]
    pub const fn idle(&self) -> &IdleTracker {
        &self.idle
    }

    /// The reply controller
    #[must_use]
    pub const fn controller(&self) -> &StreamController<S> {
        &self.controller
    }

    /// Run one listen → respond cycle
    ///
    /// Reply failures are logged and reported as [`CycleOutcome::Failed`].
    ///
    /// # Errors
    ///
    /// Returns error only if the input device fails
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        match self.listener.listen().await? {
            Recognition::Timeout | Recognition::Unrecognized => Ok(self.on_idle()),
            Recognition::Recognized(text) => Ok(self.on_utterance(text).await),
        }
    }

    /// Submit typed text as if it had been heard
    ///
    /// # Errors
    ///
    /// Returns error if the reply fails
    pub async fn submit(&mut self, text: &str) -> Result<Reply> {
        self.idle.record_input();
        self.conversation.add_message(Role::User, text);
        self.reply().await
    }

    /// Run cycles until quit, an input device failure, or `shutdown`
    /// resolves
    ///
    /// An interrupted reply still has its pipeline closed.
    ///
    /// # Errors
    ///
    /// Returns error if the input device fails or the pipeline cannot be
    /// closed
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let outcome = tokio::select! {
                outcome = self.run_cycle() => Some(outcome),
                () = &mut shutdown => None,
            };

            match outcome {
                Some(Ok(CycleOutcome::Quit)) => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!(error = %e, "input device failed");
                    self.controller.shutdown().await?;
                    return Err(e);
                }
                None => {
                    tracing::info!("interrupted");
                    break;
                }
            }
        }

        self.controller.shutdown().await
    }

    /// Run until quit or Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if the input device fails
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    fn on_idle(&mut self) -> CycleOutcome {
        let reset = self.idle.record_idle();
        if reset {
            tracing::info!(
                threshold = self.idle.threshold(),
                "idle threshold reached, resetting conversation"
            );
            self.conversation.reset();
        } else {
            tracing::debug!(idle = self.idle.count(), "no input");
        }
        CycleOutcome::Idle { reset }
    }

    async fn on_utterance(&mut self, text: String) -> CycleOutcome {
        tracing::info!(text = %text, "heard");

        match ControlCommand::parse(&text) {
            Some(ControlCommand::Clear) => {
                self.idle.record_input();
                self.conversation.reset();
                tracing::info!("conversation cleared");
                self.acknowledge(CLEARED_MESSAGE).await;
                CycleOutcome::Cleared
            }
            Some(ControlCommand::Quit) => {
                self.acknowledge(FAREWELL_MESSAGE).await;
                CycleOutcome::Quit
            }
            None => {
                self.idle.record_input();
                self.conversation.add_message(Role::User, text);
                match self.reply().await {
                    Ok(reply) => CycleOutcome::Replied(reply),
                    Err(e) => {
                        tracing::error!(error = %e, "reply failed");
                        CycleOutcome::Failed
                    }
                }
            }
        }
    }

    async fn reply(&mut self) -> Result<Reply> {
        let result = if self.settings.stream {
            self.controller.respond(&mut self.conversation).await
        } else {
            self.controller.respond_blocking(&mut self.conversation).await
        };

        if let Some(max) = self.settings.max_history_turns {
            let dropped = self.conversation.trim_history(max);
            if dropped > 0 {
                tracing::debug!(dropped, "trimmed conversation history");
            }
        }

        result
    }

    async fn acknowledge(&self, message: &str) {
        if let Err(e) = self.controller.say(message).await {
            tracing::warn!(error = %e, "failed to speak acknowledgement");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_idles_reset_once() {
        let mut idle = IdleTracker::new(5);

        let resets: Vec<bool> = (0..5).map(|_| idle.record_idle()).collect();
        assert_eq!(resets, [false, false, false, false, true]);
        assert_eq!(idle.count(), 0);
    }

    #[test]
    fn input_before_threshold_zeroes_counter() {
        let mut idle = IdleTracker::new(5);
        for _ in 0..4 {
            assert!(!idle.record_idle());
        }
        assert_eq!(idle.count(), 4);

        idle.record_input();
        assert_eq!(idle.count(), 0);
        assert!(!idle.record_idle());
    }

    #[test]
    fn zero_threshold_never_resets() {
        let mut idle = IdleTracker::new(0);
        assert!((0..100).all(|_| !idle.record_idle()));
    }

    #[test]
    fn control_words_ignore_case_and_punctuation() {
        assert_eq!(ControlCommand::parse("clear"), Some(ControlCommand::Clear));
        assert_eq!(ControlCommand::parse(" Clear. "), Some(ControlCommand::Clear));
        assert_eq!(ControlCommand::parse("QUIT!"), Some(ControlCommand::Quit));
        assert_eq!(ControlCommand::parse("exit"), Some(ControlCommand::Quit));
    }

    #[test]
    fn sentences_are_not_commands() {
        assert_eq!(ControlCommand::parse("clear the table"), None);
        assert_eq!(ControlCommand::parse("please quit"), None);
        assert_eq!(ControlCommand::parse(""), None);
    }
}
