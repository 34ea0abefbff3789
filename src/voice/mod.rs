//! Voice input and output
//!
//! Input: microphone capture, phrase detection and speech recognition.
//! Output: text sanitization, sentence chunking and the subprocess audio
//! pipeline.

mod capture;
mod chunker;
mod listener;
mod phrase;
mod pipeline;
mod sanitize;
mod stt;

pub use capture::{Microphone, SAMPLE_RATE, samples_to_wav};
pub use chunker::{SENTENCE_TERMINALS, TextChunker};
pub use listener::{Listener, MicrophoneListener, Recognition, recognition_from_transcript};
pub use phrase::{
    ListenSettings, PhraseDetector, PhraseState, calculate_energy, calibrate_threshold,
};
pub use pipeline::{
    AudioPipeline, DEFAULT_FILTER_GRAPH, PCM_SAMPLE_RATE, PipelineConfig, SpeechSink, StageCommand,
};
pub use sanitize::{Sanitizer, sanitize};
pub use stt::{
    DEFAULT_DEEPGRAM_MODEL, DEFAULT_WHISPER_MODEL, DeepgramRecognizer, INPUT_PLACEHOLDER,
    LocalRecognizer, SpeechRecognizer, SttProvider, WhisperRecognizer,
};
