//! Assistant wiring
//!
//! Builds the chat client, speech pipeline, recognizer and listener from a
//! resolved [`Config`] and runs them.

use std::sync::Arc;

use secrecy::ExposeSecret;

use crate::chat::{ChatClient, ChatProvider};
use crate::config::{Config, OpenAiConfig, SttConfig};
use crate::controller::{Reply, StreamController};
use crate::conversation::{Conversation, Role};
use crate::input::{InputLoop, LoopSettings};
use crate::voice::{
    AudioPipeline, DeepgramRecognizer, LocalRecognizer, Microphone, MicrophoneListener,
    Sanitizer, SpeechRecognizer, SpeechSink, SttProvider, WhisperRecognizer,
};
use crate::{Error, Result};

/// The voice assistant
pub struct Assistant {
    config: Config,
    sanitizer: Arc<Sanitizer>,
}

impl Assistant {
    /// Create an assistant from resolved configuration
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sanitizer: Arc::new(Sanitizer::default()),
        }
    }

    /// The configuration in use
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Listen and answer until quit or Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if the chat client, recognizer or microphone cannot be
    /// set up, or the microphone fails mid-session
    pub async fn run(self) -> Result<()> {
        self.config.warn_missing_programs();

        let chat = build_chat(&self.config.openai)?;
        let recognizer = build_recognizer(&self.config.stt)?;
        let microphone = Microphone::open()?;
        tracing::info!(
            device = microphone.device_name(),
            stt = recognizer.name(),
            model = chat.model(),
            "assistant ready"
        );

        let listener = MicrophoneListener::new(microphone, recognizer, self.config.listen.clone());
        let mut input = InputLoop::new(
            listener,
            self.controller(Arc::new(chat)),
            self.conversation(),
            self.loop_settings(),
        );

        input.run().await
    }

    /// Send one typed message and speak the reply
    ///
    /// # Errors
    ///
    /// Returns error if the chat client cannot be built or the reply fails
    pub async fn chat_once(&self, text: &str) -> Result<Reply> {
        let chat = build_chat(&self.config.openai)?;
        let mut controller = self.controller(Arc::new(chat));
        let mut conversation = self.conversation();
        conversation.add_message(Role::User, text);

        if self.config.openai.stream {
            controller.respond(&mut conversation).await
        } else {
            controller.respond_blocking(&mut conversation).await
        }
    }

    /// Speak `text` through the pipeline
    ///
    /// # Errors
    ///
    /// Returns error if the pipeline cannot be spawned
    pub async fn say(&self, text: &str) -> Result<()> {
        self.config.warn_missing_programs();
        self.pipeline().vocalize_blocking(text).await
    }

    fn pipeline(&self) -> AudioPipeline {
        AudioPipeline::new(self.config.pipeline.clone(), Arc::clone(&self.sanitizer))
    }

    fn controller(&self, chat: Arc<dyn ChatProvider>) -> StreamController<AudioPipeline> {
        StreamController::new(chat, self.pipeline(), Arc::clone(&self.sanitizer))
    }

    fn conversation(&self) -> Conversation {
        Conversation::new(self.config.conversation.prompt.clone())
    }

    const fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            stream: self.config.openai.stream,
            idle_threshold: self.config.conversation.idle_threshold,
            max_history_turns: self.config.conversation.max_history_turns,
        }
    }
}

/// Build the chat client for `config`
///
/// # Errors
///
/// Returns error if the API key is empty
pub fn build_chat(config: &OpenAiConfig) -> Result<ChatClient> {
    let key = secrecy::SecretString::from(config.api_key.expose_secret().to_string());
    Ok(ChatClient::new(key, config.model.clone())?
        .with_organization(config.organization.clone())
        .with_base_url(config.base_url.clone()))
}

/// Build the configured speech recognizer
///
/// # Errors
///
/// Returns error if the provider is missing its key or command
pub fn build_recognizer(config: &SttConfig) -> Result<Box<dyn SpeechRecognizer>> {
    let key = || {
        config
            .api_key
            .as_ref()
            .map(|k| secrecy::SecretString::from(k.expose_secret().to_string()))
            .ok_or_else(|| Error::Config(format!("{} requires an API key", config.provider)))
    };

    let recognizer: Box<dyn SpeechRecognizer> = match config.provider {
        SttProvider::Whisper => Box::new(WhisperRecognizer::new(
            key()?,
            config.model.clone(),
            config.language.clone(),
        )?),
        SttProvider::Deepgram => Box::new(DeepgramRecognizer::new(
            key()?,
            config.model.clone(),
            config.language.clone(),
        )?),
        SttProvider::Local => {
            let command = config
                .command
                .clone()
                .ok_or_else(|| Error::Config("local STT requires a command".to_string()))?;
            Box::new(LocalRecognizer::new(command))
        }
    };
    Ok(recognizer)
}
