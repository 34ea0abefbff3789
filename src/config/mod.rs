//! Configuration management for BoneGPT
//!
//! Values are resolved with precedence CLI > environment > config file >
//! default. Credentials are held as [`SecretString`] and never logged.

pub mod file;

use std::path::PathBuf;

use secrecy::SecretString;

use crate::chat::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::conversation::PromptTemplate;
use crate::input::DEFAULT_IDLE_THRESHOLD;
use crate::voice::{
    DEFAULT_DEEPGRAM_MODEL, DEFAULT_WHISPER_MODEL, ListenSettings, PipelineConfig, StageCommand,
    SttProvider,
};
use crate::{Error, Result};

use self::file::ConfigFile;

/// Values given on the command line
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    /// Explicit config file; must exist when given
    pub config_path: Option<PathBuf>,
    /// JSON prompt file
    pub prompt_path: Option<PathBuf>,
    pub api_key: Option<String>,
    pub organization: Option<String>,
    pub stt_provider: Option<SttProvider>,
    pub model: Option<String>,
    /// Request whole replies instead of streams
    pub no_stream: bool,
}

/// BoneGPT configuration
#[derive(Debug)]
pub struct Config {
    /// Chat completion service
    pub openai: OpenAiConfig,
    /// Speech recognition
    pub stt: SttConfig,
    /// Speech output stages
    pub pipeline: PipelineConfig,
    /// Listening parameters
    pub listen: ListenSettings,
    /// Conversation behavior
    pub conversation: ConversationConfig,
    /// Config file that was loaded, if any
    pub config_path: Option<PathBuf>,
}

/// Chat completion settings
#[derive(Debug)]
pub struct OpenAiConfig {
    pub api_key: SecretString,
    pub organization: Option<String>,
    pub model: String,
    pub base_url: String,
    /// Stream replies sentence by sentence
    pub stream: bool,
}

/// Speech recognition settings
#[derive(Debug)]
pub struct SttConfig {
    pub provider: SttProvider,
    pub model: String,
    /// Key for the remote providers
    pub api_key: Option<SecretString>,
    pub language: Option<String>,
    /// Program for the local provider
    pub command: Option<StageCommand>,
}

/// Conversation settings
#[derive(Debug)]
pub struct ConversationConfig {
    /// Consecutive idle cycles before reset (0 disables)
    pub idle_threshold: u32,
    /// Keep at most this many turns beyond the prompt
    pub max_history_turns: Option<usize>,
    /// Seed turns restored on every reset
    pub prompt: PromptTemplate,
}

impl Config {
    /// Load configuration from the CLI overrides, process environment and
    /// config file
    ///
    /// # Errors
    ///
    /// Returns error if a required credential is missing or a config or
    /// prompt file cannot be read
    pub fn load(overrides: &Overrides) -> Result<Self> {
        let (fc, path) = match &overrides.config_path {
            Some(path) => (file::load_config_file(path)?, Some(path.clone())),
            None => match file::config_file_path().filter(|p| p.exists()) {
                Some(path) => (file::load_config_file(&path)?, Some(path)),
                None => (ConfigFile::default(), None),
            },
        };

        let mut config = Self::resolve(fc, overrides, |key| std::env::var(key).ok())?;
        config.config_path = path;
        Ok(config)
    }

    /// Resolve configuration from explicit sources
    ///
    /// `env` looks up an environment variable by name.
    ///
    /// # Errors
    ///
    /// Returns error if a required credential is missing or the prompt
    /// file cannot be read
    pub fn resolve<F>(fc: ConfigFile, overrides: &Overrides, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        // CLI > env > toml
        let api_key = overrides
            .api_key
            .clone()
            .or_else(|| env("OPENAI_API_KEY"))
            .or(fc.openai.api_key)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(
                    "no OpenAI API key: pass --api-key, set OPENAI_API_KEY, or set api_key in [openai]"
                        .to_string(),
                )
            })?;

        let organization = overrides
            .organization
            .clone()
            .or_else(|| env("OPENAI_ORGANIZATION"))
            .or(fc.openai.organization);

        let model = overrides
            .model
            .clone()
            .or_else(|| env("BONEGPT_MODEL"))
            .or(fc.openai.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let base_url = env("OPENAI_BASE_URL")
            .or(fc.openai.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let stream = !overrides.no_stream && fc.openai.stream.unwrap_or(true);

        let stt = resolve_stt(fc.stt, overrides.stt_provider, &api_key, &env)?;

        let voice_model = env("BONEGPT_VOICE_MODEL")
            .map(PathBuf::from)
            .or(fc.voice.model_path)
            .unwrap_or_else(file::default_voice_model_path);
        let mut pipeline = PipelineConfig::with_voice_model(&voice_model);
        if let Some(stage) = fc.voice.synthesis {
            pipeline.synthesis = stage;
        }
        if let Some(stage) = fc.voice.effects {
            pipeline.effects = stage;
        }
        if let Some(stage) = fc.voice.playback {
            pipeline.playback = stage;
        }

        let prompt = match overrides
            .prompt_path
            .clone()
            .or(fc.conversation.prompt_file)
        {
            Some(path) => PromptTemplate::from_json_file(&path)?,
            None => PromptTemplate::default(),
        };

        let conversation = ConversationConfig {
            idle_threshold: fc
                .conversation
                .idle_threshold
                .unwrap_or(DEFAULT_IDLE_THRESHOLD),
            max_history_turns: fc.conversation.max_history_turns,
            prompt,
        };

        tracing::debug!(
            model = %model,
            base_url = %base_url,
            stream,
            stt = %stt.provider,
            "configuration resolved"
        );

        Ok(Self {
            openai: OpenAiConfig {
                api_key: SecretString::from(api_key),
                organization,
                model,
                base_url,
                stream,
            },
            stt,
            pipeline,
            listen: fc.listen,
            conversation,
            config_path: None,
        })
    }

    /// Warn about stage programs missing from `PATH`
    ///
    /// Only a warning: the stages are not needed until the first reply.
    pub fn warn_missing_programs(&self) {
        for program in self.pipeline.missing_programs() {
            tracing::warn!(program, "speech stage program not found on PATH");
        }
    }
}

fn resolve_stt<F>(
    fc: file::SttFileConfig,
    provider: Option<SttProvider>,
    openai_key: &str,
    env: F,
) -> Result<SttConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let provider = provider.or(fc.provider).unwrap_or_default();

    let (model, api_key) = match provider {
        SttProvider::Whisper => {
            let key = fc.api_key.unwrap_or_else(|| openai_key.to_string());
            (DEFAULT_WHISPER_MODEL, Some(key))
        }
        SttProvider::Deepgram => {
            let key = env("DEEPGRAM_API_KEY").or(fc.api_key).ok_or_else(|| {
                Error::Config(
                    "Deepgram selected but no key: set DEEPGRAM_API_KEY or api_key in [stt]"
                        .to_string(),
                )
            })?;
            (DEFAULT_DEEPGRAM_MODEL, Some(key))
        }
        SttProvider::Local => {
            if fc.command.is_none() {
                return Err(Error::Config(
                    "local STT selected but no command in [stt]".to_string(),
                ));
            }
            ("", None)
        }
    };

    Ok(SttConfig {
        provider,
        model: fc.model.unwrap_or_else(|| model.to_string()),
        api_key: api_key.map(SecretString::from),
        language: fc.language,
        command: fc.command,
    })
}
