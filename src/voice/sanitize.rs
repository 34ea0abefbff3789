//! Text rewriting before synthesis
//!
//! Two tables drive the rewrite, both matched case-insensitively:
//!
//! - word rules replace a whole whitespace-delimited token once one trailing
//!   punctuation character is set aside, and put that character back
//! - substring rules replace text anywhere, ignoring word boundaries
//!
//! The substring table also neutralizes characters that would break the
//! one-utterance-per-line protocol of the synthesis stage (line breaks) or a
//! quoted command line (quotes, backticks, `$`, backslashes).

use std::sync::LazyLock;

use regex::{NoExpand, Regex, RegexBuilder};

/// Whole-word pronunciation fixes
const WORD_RULES: &[(&str, &str)] = &[
    ("mwahaha", "mu-ha-ha"),
    ("muahaha", "mu-ha-ha"),
    ("bwahaha", "bu-ha-ha"),
    ("ai", "A I"),
    ("gpt", "G P T"),
    ("api", "A P I"),
    ("cli", "C L I"),
    ("lol", "ha ha"),
    ("hmm", "hum"),
    ("ok", "okay"),
    ("e.g", "for example"),
    ("i.e", "that is"),
    ("etc", "et cetera"),
];

/// Rewrites applied anywhere in the text
const SUBSTRING_RULES: &[(&str, &str)] = &[
    ("chatgpt", "chat G P T"),
    ("openai", "open A I"),
    ("bonegpt", "bone G P T"),
    ("\r\n", " "),
    ("\n", " "),
    ("\r", " "),
    ("\t", " "),
    ("\"", ""),
    ("`", ""),
    ("$", ""),
    ("\\", " "),
    ("*", ""),
    ("#", ""),
    ("&", " and "),
];

static DEFAULT_SANITIZER: LazyLock<Sanitizer> = LazyLock::new(Sanitizer::default);

/// Sanitize text with the built-in rule tables
#[must_use]
pub fn sanitize(text: &str) -> String {
    DEFAULT_SANITIZER.sanitize(text)
}

/// Table-driven text rewriter
#[derive(Debug, Clone)]
pub struct Sanitizer {
    words: Vec<(String, String)>,
    substrings: Vec<(Regex, String)>,
}

impl Sanitizer {
    /// Build a sanitizer from word and substring tables
    ///
    /// Word keys are compared lowercase; substring keys are matched
    /// literally, ignoring case.
    ///
    /// # Panics
    ///
    /// Never in practice: every pattern is an escaped literal.
    #[must_use]
    pub fn new(words: &[(&str, &str)], substrings: &[(&str, &str)]) -> Self {
        let words = words
            .iter()
            .map(|(from, to)| (from.to_lowercase(), (*to).to_string()))
            .collect();

        let substrings = substrings
            .iter()
            .map(|(from, to)| {
                let pattern = RegexBuilder::new(&regex::escape(from))
                    .case_insensitive(true)
                    .build()
                    .expect("escaped literal is a valid pattern");
                (pattern, (*to).to_string())
            })
            .collect();

        Self { words, substrings }
    }

    /// Rewrite `text` for the synthesis stage
    ///
    /// Word rules run first on the original tokens, then substring rules on
    /// the result. Interior spacing is preserved; the output is trimmed.
    #[must_use]
    pub fn sanitize(&self, text: &str) -> String {
        let mut out = self.replace_words(text);

        for (pattern, replacement) in &self.substrings {
            if pattern.is_match(&out) {
                out = pattern
                    .replace_all(&out, NoExpand(replacement))
                    .into_owned();
            }
        }

        out.trim().to_string()
    }

    fn replace_words(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while !rest.is_empty() {
            let space_len = rest.len() - rest.trim_start().len();
            out.push_str(&rest[..space_len]);
            rest = &rest[space_len..];

            let token_len = rest.find(char::is_whitespace).unwrap_or(rest.len());
            let token = &rest[..token_len];
            out.push_str(&self.replace_token(token));
            rest = &rest[token_len..];
        }

        out
    }

    fn replace_token(&self, token: &str) -> String {
        let (word, trailing) = match token.char_indices().last() {
            Some((idx, c)) if c.is_ascii_punctuation() => token.split_at(idx),
            _ => (token, ""),
        };

        let lower = word.to_lowercase();
        self.words
            .iter()
            .find(|(from, _)| *from == lower)
            .map_or_else(|| token.to_string(), |(_, to)| format!("{to}{trailing}"))
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(WORD_RULES, SUBSTRING_RULES)
    }
}
