//! Energy-based phrase detection
//!
//! The ambient level measured during calibration sets the speech
//! threshold. A phrase starts at the first block above it and ends after a
//! run of quiet blocks (or the time limit). No speech before the start
//! timeout means the cycle timed out.
//!
//! Both limits are counted in received samples, so a device that stops
//! delivering audio would never reach them. [`PhraseDetector::check_deadline`]
//! enforces the same limits against wall-clock time.

use std::time::Duration;

use serde::Deserialize;

/// Slack allowed on top of the configured limits before wall-clock expiry
const DEADLINE_MARGIN: Duration = Duration::from_secs(1);

/// Listening parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenSettings {
    /// Ambient noise sampling before each phrase
    #[serde(with = "millis", rename = "calibration_ms")]
    pub calibration: Duration,
    /// Give up if speech has not started within this window
    #[serde(with = "millis", rename = "phrase_start_timeout_ms")]
    pub phrase_start_timeout: Duration,
    /// Longest phrase recorded
    #[serde(with = "millis", rename = "phrase_time_limit_ms")]
    pub phrase_time_limit: Duration,
    /// Quiet needed to end a phrase
    #[serde(with = "millis", rename = "pause_ms")]
    pub pause: Duration,
    /// Threshold as a multiple of the ambient level
    pub energy_ratio: f32,
    /// Threshold floor for very quiet rooms
    pub min_energy: f32,
}

impl Default for ListenSettings {
    fn default() -> Self {
        Self {
            calibration: Duration::from_millis(500),
            phrase_start_timeout: Duration::from_secs(3),
            phrase_time_limit: Duration::from_secs(5),
            pause: Duration::from_millis(800),
            energy_ratio: 1.5,
            min_energy: 0.01,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Where the detector is within a phrase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhraseState {
    /// Nothing above threshold yet
    Waiting,
    /// Recording a phrase
    Speaking,
    /// Phrase ended by a pause or the time limit
    Complete,
    /// No speech before the start timeout
    TimedOut,
}

/// Segments one phrase out of a stream of sample blocks
#[derive(Debug)]
pub struct PhraseDetector {
    threshold: f32,
    start_timeout: usize,
    time_limit: usize,
    pause: usize,
    start_deadline: Duration,
    phrase_deadline: Duration,
    state: PhraseState,
    waited: usize,
    silence: usize,
    phrase: Vec<f32>,
}

impl PhraseDetector {
    /// Create a detector for audio at `sample_rate`
    #[must_use]
    pub fn new(threshold: f32, sample_rate: u32, settings: &ListenSettings) -> Self {
        Self {
            threshold,
            start_timeout: duration_samples(settings.phrase_start_timeout, sample_rate),
            time_limit: duration_samples(settings.phrase_time_limit, sample_rate),
            pause: duration_samples(settings.pause, sample_rate),
            start_deadline: settings.phrase_start_timeout + DEADLINE_MARGIN,
            phrase_deadline: settings.phrase_start_timeout
                + settings.phrase_time_limit
                + DEADLINE_MARGIN,
            state: PhraseState::Waiting,
            waited: 0,
            silence: 0,
            phrase: Vec::new(),
        }
    }

    /// Feed the next block of samples
    pub fn process(&mut self, samples: &[f32]) -> PhraseState {
        let energy = calculate_energy(samples);
        let is_speech = energy > self.threshold;

        match self.state {
            PhraseState::Waiting => {
                if is_speech {
                    tracing::trace!(energy, "phrase started");
                    self.state = PhraseState::Speaking;
                    self.phrase.extend_from_slice(samples);
                } else {
                    self.waited += samples.len();
                    if self.waited >= self.start_timeout {
                        tracing::trace!("no speech before start timeout");
                        self.state = PhraseState::TimedOut;
                    }
                }
            }
            PhraseState::Speaking => {
                self.phrase.extend_from_slice(samples);
                if is_speech {
                    self.silence = 0;
                } else {
                    self.silence += samples.len();
                }

                if self.phrase.len() >= self.time_limit {
                    self.phrase.truncate(self.time_limit);
                    self.state = PhraseState::Complete;
                } else if self.silence >= self.pause {
                    self.state = PhraseState::Complete;
                }

                if self.state == PhraseState::Complete {
                    tracing::debug!(samples = self.phrase.len(), "phrase complete");
                }
            }
            PhraseState::Complete | PhraseState::TimedOut => {}
        }

        self.state
    }

    /// Apply the wall-clock limits after `elapsed` time listening
    ///
    /// Waiting past the start timeout times out. A phrase still running past
    /// the combined limits completes with whatever was recorded.
    pub fn check_deadline(&mut self, elapsed: Duration) -> PhraseState {
        match self.state {
            PhraseState::Waiting if elapsed >= self.start_deadline => {
                tracing::warn!(?elapsed, "microphone delivered no speech before deadline");
                self.state = PhraseState::TimedOut;
            }
            PhraseState::Speaking if elapsed >= self.phrase_deadline => {
                tracing::warn!(
                    ?elapsed,
                    samples = self.phrase.len(),
                    "microphone stalled mid-phrase"
                );
                self.state = PhraseState::Complete;
            }
            _ => {}
        }

        self.state
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> PhraseState {
        self.state
    }

    /// Take the recorded phrase
    pub fn take_phrase(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.phrase)
    }
}

/// Speech threshold for a room whose ambient samples are `ambient`
#[must_use]
pub fn calibrate_threshold(ambient: &[f32], settings: &ListenSettings) -> f32 {
    (calculate_energy(ambient) * settings.energy_ratio).max(settings.min_energy)
}

/// RMS energy of a block of samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[allow(clippy::cast_possible_truncation)]
fn duration_samples(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_millis() * u128::from(sample_rate) / 1000) as usize
}
