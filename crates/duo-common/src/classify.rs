//! Payload classification.
//!
//! The relay never parses message semantics. It looks at each inbound chunk
//! twice: once to see whether the whole chunk is the control phrase, and once
//! to sniff a media type from the leading bytes. Clients use the same code to
//! decide how to render what they receive.

use crate::types::DEFAULT_CONTROL_PHRASE;
use infer::MatcherType;
use regex::bytes::Regex;
use thiserror::Error;

/// Errors raised while building a classifier.
#[derive(Error, Debug)]
pub enum ClassifyError {
    /// The control phrase was empty.
    #[error("control phrase must not be empty")]
    EmptyPhrase,
    /// The control phrase contained non-word characters.
    #[error("control phrase must contain only word characters, got {0:?}")]
    InvalidPhrase(String),
    /// The phrase pattern failed to compile.
    #[error("control phrase pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Content tag derived from a single inbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// A textual format the sniffer recognised (HTML, XML, shell script).
    Text,
    /// Audio data (WAV, MP3, OGG, FLAC, ...).
    Audio,
    /// Anything else, including plain chat text the sniffer cannot tell apart.
    File,
    /// The reserved shutdown phrase.
    Control,
}

impl PayloadKind {
    /// Short lowercase label, used for logs and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
            Self::File => "file",
            Self::Control => "control",
        }
    }

    /// Whether fan-out for this payload runs in its own task instead of
    /// inline on the sender's read loop.
    #[must_use]
    pub fn relays_detached(self) -> bool {
        matches!(self, Self::Audio)
    }
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides what kind of payload a chunk of bytes is.
///
/// Implementations must be total: anything they cannot place is
/// [`PayloadKind::File`].
pub trait Classifier: Send + Sync {
    /// Classify one inbound chunk.
    fn classify(&self, payload: &[u8]) -> PayloadKind;
}

/// Case-insensitive matcher for a control phrase padded by non-word characters.
///
/// `"  catastrophe!!"` matches `CATASTROPHE`; `"catastrophes"` and
/// `"_catastrophe"` do not.
#[derive(Debug, Clone)]
pub struct ControlPhrase {
    phrase: String,
    pattern: Regex,
}

impl ControlPhrase {
    /// Build a matcher for `phrase`.
    ///
    /// # Errors
    ///
    /// Returns an error if the phrase is empty or contains non-word characters.
    pub fn new(phrase: &str) -> Result<Self, ClassifyError> {
        if phrase.is_empty() {
            return Err(ClassifyError::EmptyPhrase);
        }
        if !phrase.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(ClassifyError::InvalidPhrase(phrase.to_string()));
        }
        let pattern = Regex::new(&format!(r"(?i)^\W*{}\W*$", regex::escape(phrase)))?;
        Ok(Self {
            phrase: phrase.to_string(),
            pattern,
        })
    }

    /// The literal token this matcher looks for.
    #[must_use]
    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// Returns `true` if the whole payload is the phrase plus optional padding.
    #[must_use]
    pub fn matches(&self, payload: &[u8]) -> bool {
        self.pattern.is_match(payload)
    }
}

/// Classifier that checks the control phrase and then sniffs magic bytes.
#[derive(Debug, Clone)]
pub struct SniffingClassifier {
    control: ControlPhrase,
}

impl SniffingClassifier {
    /// Create a classifier watching for the given control phrase.
    #[must_use]
    pub fn new(control: ControlPhrase) -> Self {
        Self { control }
    }

    /// Create a classifier watching for [`DEFAULT_CONTROL_PHRASE`].
    ///
    /// # Errors
    ///
    /// Never fails for the built-in phrase; the `Result` mirrors [`ControlPhrase::new`].
    pub fn with_default_phrase() -> Result<Self, ClassifyError> {
        ControlPhrase::new(DEFAULT_CONTROL_PHRASE).map(Self::new)
    }

    /// The control phrase matcher in use.
    #[must_use]
    pub fn control(&self) -> &ControlPhrase {
        &self.control
    }
}

impl Classifier for SniffingClassifier {
    fn classify(&self, payload: &[u8]) -> PayloadKind {
        if self.control.matches(payload) {
            return PayloadKind::Control;
        }
        sniff(payload)
    }
}

/// Sniff a media type from the leading bytes. Inconclusive → [`PayloadKind::File`].
#[must_use]
pub fn sniff(payload: &[u8]) -> PayloadKind {
    match infer::get(payload).map(|kind| kind.matcher_type()) {
        Some(MatcherType::Audio) => PayloadKind::Audio,
        Some(MatcherType::Text) => PayloadKind::Text,
        _ => PayloadKind::File,
    }
}
