//! Output records and progress reporting

use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalized document handed to downstream processing.
///
/// Built fresh for every cursor step; the caller owns it outright.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Document identifier (always present)
    pub id: String,
    /// Document text, empty when the source document has none
    pub text: String,
    /// Document language, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl DocumentRecord {
    /// Create a record without a language
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            language: None,
        }
    }

    /// Builder: set the language
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Snapshot of a cursor's position.
///
/// `total` is `None` when the source could not be counted. When present it
/// is an estimate taken at open time and must not be treated as exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: u64,
    pub total: Option<u64>,
}

impl Progress {
    pub fn new(completed: u64, total: Option<u64>) -> Self {
        Self { completed, total }
    }

    /// True when the denominator is unknown
    pub fn is_indeterminate(&self) -> bool {
        self.total.is_none()
    }

    /// Completed fraction in `[0, 1]`, or `None` when indeterminate.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            None => None,
            Some(0) => Some(1.0),
            Some(total) => Some((self.completed as f64 / total as f64).min(1.0)),
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.total {
            Some(total) => write!(f, "{}/{}", self.completed, total),
            None => write!(f, "{}/?", self.completed),
        }
    }
}
