//! TOML configuration file loading
//!
//! Supports `~/.config/bonegpt/config.toml` as a persistent config source.
//! Every field is optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::voice::{ListenSettings, StageCommand, SttProvider};
use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// Chat completion service
    #[serde(default)]
    pub openai: OpenAiFileConfig,

    /// Speech recognition
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Speech output pipeline
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Listening parameters; absent keys keep their defaults
    #[serde(default)]
    pub listen: ListenSettings,

    /// Conversation behavior
    #[serde(default)]
    pub conversation: ConversationFileConfig,
}

/// Chat completion settings
#[derive(Debug, Default, Deserialize)]
pub struct OpenAiFileConfig {
    pub api_key: Option<String>,
    pub organization: Option<String>,
    /// Model identifier (e.g. "gpt-4o-mini")
    pub model: Option<String>,
    /// API root for OpenAI-compatible servers
    pub base_url: Option<String>,
    /// Stream replies (default true)
    pub stream: Option<bool>,
}

/// Speech recognition settings
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    pub provider: Option<SttProvider>,
    /// Provider model (e.g. "whisper-1", "nova-2")
    pub model: Option<String>,
    /// Provider key; Whisper falls back to the `OpenAI` key
    pub api_key: Option<String>,
    /// Language hint (e.g. "en")
    pub language: Option<String>,
    /// Program for the local provider
    pub command: Option<StageCommand>,
}

/// Speech output settings
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Voice model for the default synthesis stage
    pub model_path: Option<PathBuf>,
    /// Replace the synthesis stage
    pub synthesis: Option<StageCommand>,
    /// Replace the effects stage
    pub effects: Option<StageCommand>,
    /// Replace the playback stage
    pub playback: Option<StageCommand>,
}

/// Conversation settings
#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    /// Consecutive idle cycles before the conversation resets (0 disables)
    pub idle_threshold: Option<u32>,
    /// Keep at most this many turns beyond the prompt
    pub max_history_turns: Option<usize>,
    /// JSON prompt file
    pub prompt_file: Option<PathBuf>,
}

/// Load a config file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("failed to read config file {}: {e}", path.display()))
    })?;

    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/bonegpt/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("bonegpt").join("config.toml"))
}

/// Return the default voice model path: `~/.local/share/bonegpt/voice.onnx`
#[must_use]
pub fn default_voice_model_path() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from("voice.onnx"),
        |d| d.data_dir().join("bonegpt").join("voice.onnx"),
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config: ConfigFile = toml::from_str("").unwrap();

        assert!(config.openai.api_key.is_none());
        assert!(config.stt.provider.is_none());
        assert_eq!(config.listen.phrase_start_timeout, Duration::from_secs(3));
    }

    #[test]
    fn parses_every_section() {
        let config: ConfigFile = toml::from_str(
            r#"
            [openai]
            model = "gpt-4o-mini"
            stream = false

            [stt]
            provider = "local"
            command = { program = "whisper-cli", args = ["-f", "{input}"] }

            [voice]
            model_path = "/voices/bones.onnx"
            playback = { program = "paplay", args = ["--raw"] }

            [listen]
            pause_ms = 1200

            [conversation]
            idle_threshold = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.openai.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(config.openai.stream, Some(false));
        assert_eq!(config.stt.provider, Some(SttProvider::Local));
        assert_eq!(config.stt.command.unwrap().args, ["-f", "{input}"]);
        assert_eq!(config.voice.playback.unwrap().program, "paplay");
        assert_eq!(config.listen.pause, Duration::from_millis(1200));
        assert_eq!(config.conversation.idle_threshold, Some(0));
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = load_config_file(Path::new("/nonexistent/bonegpt.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn invalid_toml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[openai\nmodel = ").unwrap();

        assert!(matches!(load_config_file(&path), Err(Error::Toml(_))));
    }
}
