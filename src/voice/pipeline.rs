//! Speech output through a chain of subprocesses
//!
//! ```text
//! text lines ─▶ synthesis ─▶ effects ─▶ playback ─▶ speakers
//!             (voice model)  (filter graph)
//! ```
//!
//! Every stage speaks raw PCM (s16le, 22050 Hz, mono) to the next over an OS
//! pipe, so byte order is preserved end to end and a slow playback stage
//! throttles synthesis through pipe backpressure. Stages are spawned directly
//! from argument vectors; no shell is involved.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};

use super::sanitize::Sanitizer;
use crate::{Error, Result};

/// Sample rate of the PCM stream between stages
pub const PCM_SAMPLE_RATE: u32 = 22_050;

/// Default effect graph: frequency shift, echo, sub-bass boost and phaser on
/// a wet copy, mixed back over an attenuated dry copy, then gain and tempo
pub const DEFAULT_FILTER_GRAPH: &str = "asplit[dry][wet];\
[wet]afreqshift=shift=-120,aecho=0.8:0.85:40|80:0.35|0.25,bass=g=6:f=100,\
aphaser=in_gain=0.6:out_gain=0.8:delay=3:decay=0.5:speed=0.6[fx];\
[dry]volume=0.35[d];\
[fx][d]amix=inputs=2,volume=1.6,atempo=0.92";

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StageCommand {
    /// Executable name or path
    pub program: String,
    /// Arguments passed verbatim
    #[serde(default)]
    pub args: Vec<String>,
}

impl StageCommand {
    /// Create a stage command
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).kill_on_drop(true);
        cmd
    }
}

/// The three stage commands of a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Text lines in, raw PCM out
    pub synthesis: StageCommand,
    /// Raw PCM in, filtered raw PCM out
    pub effects: StageCommand,
    /// Raw PCM in, audio device out
    pub playback: StageCommand,
}

impl PipelineConfig {
    /// Piper synthesis with `voice_model`, ffmpeg effects, aplay playback
    #[must_use]
    pub fn with_voice_model(voice_model: &Path) -> Self {
        let rate = PCM_SAMPLE_RATE.to_string();
        let rate = rate.as_str();

        Self {
            synthesis: StageCommand::new(
                "piper",
                [
                    "--model".to_string(),
                    voice_model.display().to_string(),
                    "--output-raw".to_string(),
                ],
            ),
            effects: StageCommand::new(
                "ffmpeg",
                [
                    "-hide_banner",
                    "-loglevel",
                    "error",
                    "-f",
                    "s16le",
                    "-ar",
                    rate,
                    "-ac",
                    "1",
                    "-i",
                    "pipe:0",
                    "-filter_complex",
                    DEFAULT_FILTER_GRAPH,
                    "-f",
                    "s16le",
                    "-ar",
                    rate,
                    "-ac",
                    "1",
                    "pipe:1",
                ],
            ),
            playback: StageCommand::new(
                "aplay",
                ["-q", "-t", "raw", "-f", "S16_LE", "-r", rate, "-c", "1"],
            ),
        }
    }

    /// Stage programs that cannot be found on `PATH`
    #[must_use]
    pub fn missing_programs(&self) -> Vec<&str> {
        [&self.synthesis, &self.effects, &self.playback]
            .into_iter()
            .map(|stage| stage.program.as_str())
            .filter(|program| which::which(program).is_err())
            .collect()
    }
}

/// Destination for spoken text
///
/// The streaming path opens once per reply, writes chunks in order, and
/// closes when the reply ends. `vocalize_blocking` speaks one complete
/// utterance on its own transient chain.
#[async_trait]
pub trait SpeechSink: Send {
    /// Whether a streaming chain is open
    fn is_open(&self) -> bool;

    /// Start a streaming chain
    async fn open(&mut self) -> Result<()>;

    /// Queue one utterance on the open chain
    async fn write_chunk(&mut self, text: &str) -> Result<()>;

    /// Signal end of input and wait for every stage to finish
    async fn close(&mut self) -> Result<()>;

    /// Speak `text` start to finish and return once playback ends
    async fn vocalize_blocking(&self, text: &str) -> Result<()>;
}

/// Live handles for one open chain
struct StageChain {
    input: ChildStdin,
    synthesis: Child,
    effects: Child,
    playback: Child,
}

impl StageChain {
    async fn spawn(config: &PipelineConfig) -> Result<Self> {
        let mut synthesis = spawn_stage(
            "synthesis",
            &config.synthesis,
            Stdio::piped(),
            Stdio::piped(),
        )?;

        let synthesis_out = match pipe_stdout(&mut synthesis) {
            Ok(stdio) => stdio,
            Err(e) => {
                abort_stages(&mut [&mut synthesis]).await;
                return Err(e);
            }
        };
        let mut effects = match spawn_stage("effects", &config.effects, synthesis_out, Stdio::piped()) {
            Ok(child) => child,
            Err(e) => {
                abort_stages(&mut [&mut synthesis]).await;
                return Err(e);
            }
        };

        let effects_out = match pipe_stdout(&mut effects) {
            Ok(stdio) => stdio,
            Err(e) => {
                abort_stages(&mut [&mut synthesis, &mut effects]).await;
                return Err(e);
            }
        };
        let mut playback = match spawn_stage("playback", &config.playback, effects_out, Stdio::null()) {
            Ok(child) => child,
            Err(e) => {
                abort_stages(&mut [&mut synthesis, &mut effects]).await;
                return Err(e);
            }
        };

        let Some(input) = synthesis.stdin.take() else {
            abort_stages(&mut [&mut synthesis, &mut effects, &mut playback]).await;
            return Err(Error::PipelineIo(std::io::Error::other(
                "synthesis stdin was not captured",
            )));
        };

        tracing::debug!(
            synthesis = ?synthesis.id(),
            effects = ?effects.id(),
            playback = ?playback.id(),
            "audio pipeline spawned"
        );

        Ok(Self {
            input,
            synthesis,
            effects,
            playback,
        })
    }

    async fn write_line(&mut self, text: &str) -> Result<()> {
        let line = format!("{}\n", text.replace(['\n', '\r'], " "));
        self.input
            .write_all(line.as_bytes())
            .await
            .map_err(Error::PipelineIo)?;
        self.input.flush().await.map_err(Error::PipelineIo)
    }

    /// Close synthesis input, then reap synthesis, effects and playback in order
    async fn finish(self) -> Result<()> {
        let Self {
            input,
            synthesis,
            effects,
            playback,
        } = self;
        drop(input);

        let mut first_error = None;
        for (stage, mut child) in [
            ("synthesis", synthesis),
            ("effects", effects),
            ("playback", playback),
        ] {
            match child.wait().await {
                Ok(status) if status.success() => {
                    tracing::trace!(stage, "stage exited");
                }
                Ok(status) => {
                    tracing::warn!(stage, %status, "stage exited with failure status");
                }
                Err(e) => {
                    tracing::warn!(stage, error = %e, "failed to wait for stage");
                    if first_error.is_none() {
                        first_error = Some(Error::PipelineIo(e));
                    }
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    fn ids(&self) -> Option<[u32; 3]> {
        Some([self.synthesis.id()?, self.effects.id()?, self.playback.id()?])
    }
}

fn spawn_stage(
    stage: &'static str,
    command: &StageCommand,
    stdin: Stdio,
    stdout: Stdio,
) -> Result<Child> {
    command
        .command()
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| {
            tracing::error!(stage, program = %command.program, error = %source, "stage spawn failed");
            Error::PipelineSpawn { stage, source }
        })
}

fn pipe_stdout(child: &mut Child) -> Result<Stdio> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::PipelineIo(std::io::Error::other("stage stdout was not captured")))?;
    stdout.try_into().map_err(Error::PipelineIo)
}

/// Kill and reap stages spawned before a later stage failed
async fn abort_stages(children: &mut [&mut Child]) {
    for child in children.iter_mut() {
        if let Err(e) = child.start_kill() {
            tracing::debug!(error = %e, "stage already gone during rollback");
        }
        if let Err(e) = child.wait().await {
            tracing::debug!(error = %e, "failed to reap stage during rollback");
        }
    }
}

/// Synthesis → effects → playback subprocess chain
pub struct AudioPipeline {
    config: PipelineConfig,
    sanitizer: Arc<Sanitizer>,
    chain: Option<StageChain>,
}

impl AudioPipeline {
    /// Create a closed pipeline
    #[must_use]
    pub const fn new(config: PipelineConfig, sanitizer: Arc<Sanitizer>) -> Self {
        Self {
            config,
            sanitizer,
            chain: None,
        }
    }

    /// Process ids of the open stages, in chain order
    #[must_use]
    pub fn stage_ids(&self) -> Option<[u32; 3]> {
        self.chain.as_ref().and_then(StageChain::ids)
    }
}

#[async_trait]
impl SpeechSink for AudioPipeline {
    fn is_open(&self) -> bool {
        self.chain.is_some()
    }

    async fn open(&mut self) -> Result<()> {
        if self.chain.is_some() {
            return Err(Error::PipelineAlreadyOpen);
        }

        self.chain = Some(StageChain::spawn(&self.config).await?);
        tracing::debug!("audio pipeline opened");
        Ok(())
    }

    async fn write_chunk(&mut self, text: &str) -> Result<()> {
        let chain = self.chain.as_mut().ok_or(Error::PipelineNotOpen)?;
        tracing::trace!(text, "writing chunk to synthesis");
        chain.write_line(text).await
    }

    async fn close(&mut self) -> Result<()> {
        let Some(chain) = self.chain.take() else {
            return Ok(());
        };

        let result = chain.finish().await;
        tracing::debug!("audio pipeline closed");
        result
    }

    async fn vocalize_blocking(&self, text: &str) -> Result<()> {
        let text = self.sanitizer.sanitize(text);
        if text.is_empty() {
            return Ok(());
        }

        tracing::debug!(text, "vocalizing");
        let mut chain = StageChain::spawn(&self.config).await?;
        if let Err(e) = chain.write_line(&text).await {
            // still reap the stages before reporting
            if let Err(reap) = chain.finish().await {
                tracing::debug!(error = %reap, "failed to reap stages after write failure");
            }
            return Err(e);
        }
        chain.finish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_wires_voice_model_into_synthesis() {
        let config = PipelineConfig::with_voice_model(Path::new("/voices/bones.onnx"));

        assert_eq!(config.synthesis.program, "piper");
        assert_eq!(
            config.synthesis.args,
            ["--model", "/voices/bones.onnx", "--output-raw"]
        );
        assert!(config.effects.args.iter().any(|a| a == DEFAULT_FILTER_GRAPH));
        assert!(config.playback.args.iter().any(|a| a == "22050"));
    }

    #[test]
    fn filter_graph_covers_every_effect() {
        for filter in ["afreqshift", "aecho", "bass", "aphaser", "amix", "volume", "atempo"] {
            assert!(DEFAULT_FILTER_GRAPH.contains(filter), "missing {filter}");
        }
    }

    #[test]
    fn missing_programs_reports_unknown_binaries() {
        let config = PipelineConfig {
            synthesis: StageCommand::new("bonegpt-no-such-synth", Vec::<String>::new()),
            effects: StageCommand::new("bonegpt-no-such-fx", Vec::<String>::new()),
            playback: StageCommand::new("bonegpt-no-such-play", Vec::<String>::new()),
        };

        assert_eq!(
            config.missing_programs(),
            ["bonegpt-no-such-synth", "bonegpt-no-such-fx", "bonegpt-no-such-play"]
        );
    }

    #[test]
    fn stage_command_deserializes_without_args() {
        let stage: StageCommand = toml::from_str(r#"program = "espeak""#).unwrap();
        assert_eq!(stage, StageCommand::new("espeak", Vec::<String>::new()));
    }
}
