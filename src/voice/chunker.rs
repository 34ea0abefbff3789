//! Sentence chunking for streamed replies
//!
//! Fragments accumulate until one arrives carrying `.`, `!` or `?`; the whole
//! pending buffer is then sanitized and handed back as a single speakable
//! chunk. Only the newest fragment is inspected, since providers tend to
//! attach punctuation to the token that ends a sentence.

use std::sync::Arc;

use super::sanitize::Sanitizer;

/// Characters that end a speakable chunk
pub const SENTENCE_TERMINALS: [char; 3] = ['.', '!', '?'];

/// Accumulates streamed text and emits sentence-sized chunks
#[derive(Debug, Clone)]
pub struct TextChunker {
    sanitizer: Arc<Sanitizer>,
    pending: Vec<String>,
}

impl TextChunker {
    /// Create a chunker that sanitizes with `sanitizer`
    #[must_use]
    pub const fn new(sanitizer: Arc<Sanitizer>) -> Self {
        Self {
            sanitizer,
            pending: Vec::new(),
        }
    }

    /// Buffer `fragment`; return the sanitized buffer if it ends a sentence
    pub fn feed(&mut self, fragment: &str) -> Option<String> {
        self.pending.push(fragment.to_string());

        if fragment.contains(SENTENCE_TERMINALS) {
            Some(self.drain())
        } else {
            None
        }
    }

    /// Emit whatever is still buffered once the stream is over
    ///
    /// Whitespace-only residue is discarded rather than spoken.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.iter().all(|f| f.trim().is_empty()) {
            self.pending.clear();
            return None;
        }

        Some(self.drain())
    }

    /// Whether nothing is buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn drain(&mut self) -> String {
        let joined = self.pending.concat();
        self.pending.clear();
        self.sanitizer.sanitize(&joined)
    }
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(Arc::new(Sanitizer::default()))
    }
}
