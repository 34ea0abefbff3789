//! Speech-to-text (STT) providers
//!
//! Each provider implements [`SpeechRecognizer`]; one is chosen at startup
//! from [`SttProvider`] and used for the life of the process.

use std::process::Stdio;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::process::Command;

use super::pipeline::StageCommand;
use crate::{Error, Result};

/// Placeholder in a local command's arguments replaced by the WAV path
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Default Whisper API model
pub const DEFAULT_WHISPER_MODEL: &str = "whisper-1";

/// Default Deepgram model
pub const DEFAULT_DEEPGRAM_MODEL: &str = "nova-2";

/// Available STT backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SttProvider {
    /// `OpenAI` Whisper transcription API
    #[default]
    Whisper,
    /// Deepgram transcription API
    Deepgram,
    /// Local command (e.g. whisper.cpp) reading a WAV file
    Local,
}

impl std::fmt::Display for SttProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Whisper => "whisper",
            Self::Deepgram => "deepgram",
            Self::Local => "local",
        })
    }
}

/// Turns recorded speech into text
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &'static str;

    /// Transcribe WAV bytes; an empty string means nothing intelligible
    async fn recognize(&self, wav: &[u8]) -> Result<String>;
}

/// Response from `OpenAI` Whisper transcription API
#[derive(Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// `OpenAI` Whisper API recognizer
pub struct WhisperRecognizer {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    language: Option<String>,
}

impl WhisperRecognizer {
    /// Create a Whisper recognizer
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString, model: String, language: Option<String>) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            language,
        })
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperRecognizer {
    fn name(&self) -> &'static str {
        "whisper"
    }

    async fn recognize(&self, wav: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting Whisper transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await?;
        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

/// Deepgram API recognizer
pub struct DeepgramRecognizer {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    language: Option<String>,
}

impl DeepgramRecognizer {
    /// Create a Deepgram recognizer
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString, model: String, language: Option<String>) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            language,
        })
    }

    fn url(&self) -> String {
        let mut url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true",
            self.model
        );
        if let Some(language) = &self.language {
            url.push_str("&language=");
            url.push_str(language);
        }
        url
    }
}

#[async_trait]
impl SpeechRecognizer for DeepgramRecognizer {
    fn name(&self) -> &'static str {
        "deepgram"
    }

    async fn recognize(&self, wav: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting Deepgram transcription");

        let response = self
            .client
            .post(self.url())
            .header(
                "Authorization",
                format!("Token {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "audio/wav")
            .body(wav.to_vec())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await?;
        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default();

        tracing::debug!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

/// Recognizer backed by a local program
///
/// The WAV is written to a temporary file whose path replaces
/// [`INPUT_PLACEHOLDER`] in the arguments (or is appended when the
/// placeholder is absent). The program's stdout is the transcript.
pub struct LocalRecognizer {
    command: StageCommand,
}

impl LocalRecognizer {
    /// Create a local recognizer
    #[must_use]
    pub const fn new(command: StageCommand) -> Self {
        Self { command }
    }

    fn args_for(&self, input: &str) -> Vec<String> {
        let mut args: Vec<String> = self
            .command
            .args
            .iter()
            .map(|arg| arg.replace(INPUT_PLACEHOLDER, input))
            .collect();
        if !self.command.args.iter().any(|a| a.contains(INPUT_PLACEHOLDER)) {
            args.push(input.to_string());
        }
        args
    }
}

#[async_trait]
impl SpeechRecognizer for LocalRecognizer {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn recognize(&self, wav: &[u8]) -> Result<String> {
        let file = tempfile::Builder::new()
            .prefix("bonegpt-")
            .suffix(".wav")
            .tempfile()?;
        tokio::fs::write(file.path(), wav).await?;

        let input = file.path().display().to_string();
        tracing::debug!(program = %self.command.program, input = %input, "running local STT");

        let output = Command::new(&self.command.program)
            .args(self.args_for(&input))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Stt(format!("failed to run {}: {e}", self.command.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Stt(format!(
                "{} exited with {}: {}",
                self.command.program,
                output.status,
                stderr.trim()
            )));
        }

        let transcript = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::debug!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whisper_requires_key() {
        let err = WhisperRecognizer::new(SecretString::from(String::new()), "whisper-1".into(), None);
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn deepgram_url_includes_language() {
        let recognizer = DeepgramRecognizer::new(
            SecretString::from("dg-key".to_string()),
            "nova-2".into(),
            Some("en".into()),
        )
        .unwrap();
        assert_eq!(
            recognizer.url(),
            "https://api.deepgram.com/v1/listen?model=nova-2&punctuate=true&language=en"
        );
    }

    #[test]
    fn local_args_substitute_placeholder() {
        let recognizer = LocalRecognizer::new(StageCommand::new(
            "whisper-cli",
            ["-m", "model.bin", "-f", "{input}", "-nt"],
        ));
        assert_eq!(
            recognizer.args_for("/tmp/a.wav"),
            ["-m", "model.bin", "-f", "/tmp/a.wav", "-nt"]
        );
    }

    #[test]
    fn local_args_append_input_without_placeholder() {
        let recognizer = LocalRecognizer::new(StageCommand::new("transcribe", ["--quiet"]));
        assert_eq!(recognizer.args_for("/tmp/a.wav"), ["--quiet", "/tmp/a.wav"]);
    }

    #[tokio::test]
    async fn local_recognizer_reads_stdout() {
        let recognizer = LocalRecognizer::new(StageCommand::new(
            "sh",
            ["-c", "test -s \"$1\" && echo '  hello bones  '", "sh", "{input}"],
        ));

        let transcript = recognizer.recognize(b"RIFF fake wav").await.unwrap();
        assert_eq!(transcript, "hello bones");
    }

    #[tokio::test]
    async fn local_recognizer_reports_failure() {
        let recognizer = LocalRecognizer::new(StageCommand::new("sh", ["-c", "exit 3", "sh"]));

        let err = recognizer.recognize(b"RIFF").await.unwrap_err();
        assert!(matches!(err, Error::Stt(_)));
    }

    #[test]
    fn provider_parses_lowercase() {
        let provider: SttProvider = serde_json::from_str("\"deepgram\"").unwrap();
        assert_eq!(provider, SttProvider::Deepgram);
        assert_eq!(SttProvider::Local.to_string(), "local");
    }
}
