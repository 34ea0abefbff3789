//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use bonegpt::chat::{ChatProvider, Delta, DeltaStream};
use bonegpt::voice::{Listener, PipelineConfig, Recognition, SpeechSink, StageCommand};
use bonegpt::{Error, Result, Role, Turn};

/// Chat provider that replays a fixed script
pub struct ScriptedChat {
    deltas: Mutex<Vec<Result<Delta>>>,
    reply: Option<String>,
    pub requests: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedChat {
    /// Stream `deltas` on the next `stream` call
    pub fn streaming(deltas: Vec<Result<Delta>>) -> Arc<Self> {
        Arc::new(Self {
            deltas: Mutex::new(deltas),
            reply: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Answer `complete` calls with `reply`
    pub fn blocking(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            deltas: Mutex::new(Vec::new()),
            reply: Some(reply.to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// The standard well-behaved stream for `fragments`
    pub fn reply(fragments: &[&str]) -> Arc<Self> {
        let mut deltas = vec![Ok(Delta::role(Role::Assistant))];
        deltas.extend(fragments.iter().map(|f| Ok(Delta::content(*f))));
        deltas.push(Ok(Delta::finish()));
        Self::streaming(deltas)
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    async fn complete(&self, turns: &[Turn]) -> Result<Turn> {
        self.requests.lock().unwrap().push(turns.to_vec());
        self.reply
            .clone()
            .map(|text| Turn::new(Role::Assistant, text))
            .ok_or_else(|| Error::Chat("no scripted reply".to_string()))
    }

    async fn stream(&self, turns: &[Turn]) -> Result<DeltaStream> {
        self.requests.lock().unwrap().push(turns.to_vec());
        let deltas = std::mem::take(&mut *self.deltas.lock().unwrap());
        Ok(Box::pin(futures::stream::iter(deltas)))
    }
}

/// Chat provider whose request always fails
pub struct FailingChat;

#[async_trait]
impl ChatProvider for FailingChat {
    async fn complete(&self, _turns: &[Turn]) -> Result<Turn> {
        Err(Error::Chat("API error 500".to_string()))
    }

    async fn stream(&self, _turns: &[Turn]) -> Result<DeltaStream> {
        Err(Error::Chat("API error 500".to_string()))
    }
}

/// Chat provider that streams a few deltas, then never finishes
pub struct StallingChat {
    deltas: Mutex<Vec<Result<Delta>>>,
}

impl StallingChat {
    /// Stall after opening a `role` turn with `fragments`
    pub fn after(role: Role, fragments: &[&str]) -> Arc<Self> {
        let mut deltas = vec![Ok(Delta::role(role))];
        deltas.extend(fragments.iter().map(|f| Ok(Delta::content(*f))));
        Arc::new(Self {
            deltas: Mutex::new(deltas),
        })
    }
}

#[async_trait]
impl ChatProvider for StallingChat {
    async fn complete(&self, _turns: &[Turn]) -> Result<Turn> {
        std::future::pending().await
    }

    async fn stream(&self, _turns: &[Turn]) -> Result<DeltaStream> {
        let deltas = std::mem::take(&mut *self.deltas.lock().unwrap());
        Ok(Box::pin(
            futures::stream::iter(deltas).chain(futures::stream::pending()),
        ))
    }
}

/// Something that happened to a [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Open,
    Write(String),
    Close,
    Vocalize(String),
}

/// Speech sink that records every call
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
    open: bool,
    fail_open: bool,
    failing_writes: Arc<Mutex<usize>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose `open` always fails like a missing stage program
    pub fn unspawnable() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    /// A sink whose next `count` writes fail with a broken pipe
    pub fn with_failing_writes(count: usize) -> Self {
        Self {
            failing_writes: Arc::new(Mutex::new(count)),
            ..Self::default()
        }
    }

    /// Shared handle onto the event log
    pub fn log(&self) -> Arc<Mutex<Vec<SinkEvent>>> {
        Arc::clone(&self.events)
    }

    fn record(&self, event: SinkEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl SpeechSink for RecordingSink {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn open(&mut self) -> Result<()> {
        if self.open {
            return Err(Error::PipelineAlreadyOpen);
        }
        if self.fail_open {
            return Err(Error::PipelineSpawn {
                stage: "synthesis",
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "piper not found"),
            });
        }
        self.open = true;
        self.record(SinkEvent::Open);
        Ok(())
    }

    async fn write_chunk(&mut self, text: &str) -> Result<()> {
        if !self.open {
            return Err(Error::PipelineNotOpen);
        }
        {
            let mut failing = self.failing_writes.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(Error::PipelineIo(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "broken pipe",
                )));
            }
        }
        self.record(SinkEvent::Write(text.to_string()));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.record(SinkEvent::Close);
        }
        Ok(())
    }

    async fn vocalize_blocking(&self, text: &str) -> Result<()> {
        self.record(SinkEvent::Vocalize(text.to_string()));
        Ok(())
    }
}

/// Listener that replays a fixed sequence of recognitions, then quits
pub struct ScriptedListener {
    script: VecDeque<Result<Recognition>>,
}

impl ScriptedListener {
    pub fn new(script: Vec<Recognition>) -> Self {
        Self {
            script: script.into_iter().map(Ok).collect(),
        }
    }

    pub fn with_results(script: Vec<Result<Recognition>>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

#[async_trait(?Send)]
impl Listener for ScriptedListener {
    async fn listen(&mut self) -> Result<Recognition> {
        self.script
            .pop_front()
            .unwrap_or_else(|| Ok(Recognition::Recognized("quit".to_string())))
    }
}

/// Listener that never hears anything
pub struct SilentForever;

#[async_trait(?Send)]
impl Listener for SilentForever {
    async fn listen(&mut self) -> Result<Recognition> {
        std::future::pending().await
    }
}

pub fn heard(text: &str) -> Recognition {
    Recognition::Recognized(text.to_string())
}

/// Pipeline whose stages are plain `cat`, with playback written to `output`
pub fn cat_pipeline(output: &std::path::Path) -> PipelineConfig {
    PipelineConfig {
        synthesis: StageCommand::new("cat", Vec::<String>::new()),
        effects: StageCommand::new("cat", Vec::<String>::new()),
        playback: StageCommand::new(
            "sh",
            [
                "-c".to_string(),
                "cat >> \"$1\"".to_string(),
                "sh".to_string(),
                output.display().to_string(),
            ],
        ),
    }
}
