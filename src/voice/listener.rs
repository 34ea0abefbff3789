//! One listening attempt: calibrate, capture a phrase, recognize it

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::capture::{Microphone, SAMPLE_RATE, samples_to_wav};
use super::phrase::{ListenSettings, PhraseDetector, PhraseState, calibrate_threshold};
use super::stt::SpeechRecognizer;
use crate::Result;

/// How often captured samples are handed to the phrase detector
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of one listening attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    /// Speech was captured and transcribed
    Recognized(String),
    /// Speech was captured but nothing usable came back
    Unrecognized,
    /// No speech started in time
    Timeout,
}

/// Source of user utterances
///
/// Not `Send`: the microphone stream is tied to the thread that opened it.
#[async_trait(?Send)]
pub trait Listener {
    /// Wait for one utterance
    ///
    /// Recognition failures are reported as [`Recognition::Unrecognized`];
    /// an `Err` means the input device itself failed.
    async fn listen(&mut self) -> Result<Recognition>;
}

/// Microphone listener backed by a [`SpeechRecognizer`]
pub struct MicrophoneListener {
    microphone: Microphone,
    recognizer: Box<dyn SpeechRecognizer>,
    settings: ListenSettings,
}

impl MicrophoneListener {
    /// Listen on `microphone`, transcribing with `recognizer`
    #[must_use]
    pub fn new(
        microphone: Microphone,
        recognizer: Box<dyn SpeechRecognizer>,
        settings: ListenSettings,
    ) -> Self {
        Self {
            microphone,
            recognizer,
            settings,
        }
    }

    async fn capture_phrase(&mut self) -> Result<Option<Vec<f32>>> {
        let ambient = self.microphone.record(self.settings.calibration).await?;
        let threshold = calibrate_threshold(&ambient, &self.settings);
        tracing::debug!(threshold, "calibrated for ambient noise");

        let mut detector = PhraseDetector::new(threshold, SAMPLE_RATE, &self.settings);
        let started = Instant::now();
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            detector.process(&self.microphone.drain());
            match detector.check_deadline(started.elapsed()) {
                PhraseState::Waiting | PhraseState::Speaking => {}
                PhraseState::TimedOut => return Ok(None),
                PhraseState::Complete => return Ok(Some(detector.take_phrase())),
            }
        }
    }
}

#[async_trait(?Send)]
impl Listener for MicrophoneListener {
    async fn listen(&mut self) -> Result<Recognition> {
        let Some(phrase) = self.capture_phrase().await? else {
            tracing::debug!("listening timed out");
            return Ok(Recognition::Timeout);
        };

        let wav = samples_to_wav(&phrase, SAMPLE_RATE)?;
        match self.recognizer.recognize(&wav).await {
            Ok(text) => Ok(recognition_from_transcript(&text)),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    provider = self.recognizer.name(),
                    "could not understand audio"
                );
                Ok(Recognition::Unrecognized)
            }
        }
    }
}

/// Classify a transcript; blank transcripts count as unrecognized
#[must_use]
pub fn recognition_from_transcript(text: &str) -> Recognition {
    let text = text.trim();
    if text.is_empty() {
        Recognition::Unrecognized
    } else {
        Recognition::Recognized(text.to_string())
    }
}
