//! Error taxonomy for the presentation pipeline
//!
//! Each component raises only its own kind:
//! - `ParseError` - malformed or incomplete input, never retried
//! - `GenerationError` - markup validation or generative service failures
//! - `ConversionError` - toolchain failures after the internal retry
//! - `StorageError` - persistence and workspace failures
//!
//! The workflow wraps them in `WorkflowError` together with the failing stage.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::brain::ProviderError;
use crate::markup::Violation;
use crate::workflow::Stage;

/// Diagnostics from the toolchain are capped to this many bytes
pub const DIAGNOSTIC_BUDGET: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("conversation is empty")]
    EmptyConversation,

    #[error("turn {turn} is missing its {field}")]
    MissingText { turn: usize, field: &'static str },

    #[error("turn {turn} references unknown chart '{chart_id}'")]
    UnknownChart { turn: usize, chart_id: String },

    #[error("chart id '{0}' is used by more than one chart")]
    DuplicateChartId(String),

    #[error("chart '{chart_id}' is associated with more than one slide")]
    ChartAssociatedTwice { chart_id: String },

    #[error("chart '{chart_id}' points at turn {turn}, but the conversation has {turns} turns")]
    ChartTurnOutOfRange {
        chart_id: String,
        turn: usize,
        turns: usize,
    },

    #[error("chart '{chart_id}' has no slide association")]
    UnassociatedChart { chart_id: String },

    #[error("chart #{position} has an invalid image encoding: {reason}")]
    InvalidChartEncoding { position: usize, reason: String },

    #[error("invalid request payload: {0}")]
    InvalidPayload(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("slide {slide}: generative service failed after {attempts} attempt(s): {source}")]
    Service {
        slide: usize,
        attempts: usize,
        #[source]
        source: ProviderError,
    },

    #[error("slide {slide}: markup rejected after {attempts} attempt(s): {}", summarize(.violations))]
    InvalidMarkup {
        slide: usize,
        attempts: usize,
        violations: Vec<Violation>,
    },

    #[error("slide {slide}: spec kind {kind} cannot be rendered here")]
    UnsupportedSlide { slide: usize, kind: String },

    #[error("generation task failed: {0}")]
    TaskFailed(String),

    #[error("generation cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("failed to stage conversion input: {0}")]
    Staging(#[source] std::io::Error),

    #[error("slide {slide} is missing placeholder '{token}'")]
    UnresolvedPlaceholder { slide: usize, token: String },

    #[error("slide {slide} references chart '{chart_id}' with no binary in the manifest")]
    MissingChartBinary { slide: usize, chart_id: String },

    #[error("failed to launch conversion toolchain: {0}")]
    Launch(#[source] std::io::Error),

    #[error("conversion toolchain failed after {attempts} attempt(s) ({outcome})")]
    ToolchainFailed {
        attempts: usize,
        outcome: String,
        diagnostics: String,
    },

    #[error("conversion toolchain exited cleanly but produced no output at {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("failed to read conversion output: {0}")]
    ReadOutput(#[source] std::io::Error),

    #[error("conversion cancelled")]
    Cancelled,
}

impl ConversionError {
    /// Toolchain diagnostics, if this failure carries any
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            ConversionError::ToolchainFailed { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to prepare workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("failed to write artifact '{filename}': {source}")]
    Write {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no free filename for '{0}'")]
    NameExhausted(String),

    #[error("invalid artifact identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("artifact '{0}' not found")]
    NotFound(String),
}

/// Any component failure, kind preserved
#[derive(Debug, thiserror::Error)]
pub enum DeckError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl DeckError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeckError::Parse(_) => ErrorKind::Parse,
            DeckError::Generation(_) => ErrorKind::Generation,
            DeckError::Conversion(_) => ErrorKind::Conversion,
            DeckError::Storage(_) => ErrorKind::Storage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Parse,
    Generation,
    Conversion,
    Storage,
}

impl ErrorKind {
    /// `true` when the caller has to fix their input
    #[inline]
    #[must_use]
    pub fn is_client_error(self) -> bool {
        matches!(self, ErrorKind::Parse)
    }

    /// Generic message safe to hand to the caller
    pub fn public_message(self) -> &'static str {
        match self {
            ErrorKind::Parse => "The request could not be turned into slides. Check the conversation and assets.",
            ErrorKind::Generation => "Slide content could not be generated. Try again later.",
            ErrorKind::Conversion => "The presentation file could not be built. Try again later.",
            ErrorKind::Storage => "The presentation could not be saved. Try again later.",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Parse => write!(f, "ParseError"),
            ErrorKind::Generation => write!(f, "GenerationError"),
            ErrorKind::Conversion => write!(f, "ConversionError"),
            ErrorKind::Storage => write!(f, "StorageError"),
        }
    }
}

/// A component failure annotated with the stage it came from
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed: {source}")]
pub struct WorkflowError {
    pub stage: Stage,
    #[source]
    pub source: DeckError,
}

impl WorkflowError {
    pub fn new(stage: Stage, source: impl Into<DeckError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

/// Cap diagnostics at `DIAGNOSTIC_BUDGET` bytes on a char boundary
pub fn truncate_diagnostics(text: &str) -> String {
    let text = text.trim();
    if text.len() <= DIAGNOSTIC_BUDGET {
        return text.to_string();
    }
    let mut end = DIAGNOSTIC_BUDGET;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… [truncated {} bytes]", &text[..end], text.len() - end)
}

fn summarize(violations: &[Violation]) -> String {
    let shown: Vec<String> = violations.iter().take(3).map(|v| v.to_string()).collect();
    if violations.len() > shown.len() {
        format!("{} (+{} more)", shown.join("; "), violations.len() - shown.len())
    } else {
        shown.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_preserved_through_wrapping() {
        let err = WorkflowError::new(Stage::Convert, ConversionError::Cancelled);
        assert_eq!(err.kind(), ErrorKind::Conversion);
        assert!(err.to_string().starts_with("convert stage failed"));
    }

    #[test]
    fn only_parse_errors_are_client_errors() {
        assert!(ErrorKind::Parse.is_client_error());
        assert!(!ErrorKind::Generation.is_client_error());
        assert!(!ErrorKind::Conversion.is_client_error());
        assert!(!ErrorKind::Storage.is_client_error());
    }

    #[test]
    fn diagnostics_are_truncated_on_char_boundary() {
        let long = "é".repeat(DIAGNOSTIC_BUDGET);
        let out = truncate_diagnostics(&long);
        assert!(out.contains("[truncated"));
        assert!(out.len() < long.len());

        assert_eq!(truncate_diagnostics("  short  "), "short");
    }

    #[test]
    fn public_message_never_leaks_diagnostics() {
        let err = ConversionError::ToolchainFailed {
            attempts: 2,
            outcome: "exit code 1".to_string(),
            diagnostics: "secret stack trace".to_string(),
        };
        assert_eq!(err.diagnostics(), Some("secret stack trace"));
        assert!(!ErrorKind::Conversion.public_message().contains("secret"));
        assert!(!err.to_string().contains("secret"));
    }
}
