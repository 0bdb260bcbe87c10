//! Core source framework
//!
//! Defines the trait every storage backend implements.

use crate::Result;
use crate::config::{BackendKind, ReaderConfig};

/// A source document after server-side projection.
///
/// Each slot is `None` when the source document lacks the mapped field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDocument {
    id: Option<String>,
    text: Option<String>,
    language: Option<String>,
}

impl RawDocument {
    pub fn new(id: Option<String>, text: Option<String>, language: Option<String>) -> Self {
        Self { id, text, language }
    }

    /// Shorthand for a document carrying id and text
    pub fn with_text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(Some(id.into()), Some(text.into()), None)
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Split into owned slots
    pub fn into_parts(self) -> (Option<String>, Option<String>, Option<String>) {
        (self.id, self.text, self.language)
    }
}

/// Trait for document backends
///
/// A source is opened (connection made, query validated) by its own
/// constructor. After that it is a forward-only stream:
/// 1. `count` estimates the number of matching documents
/// 2. `fetch` pulls the next document in ascending id order
/// 3. `close` releases the connection
pub trait DocumentSource {
    /// Backend name (for logging and display)
    fn backend_name(&self) -> &str;

    /// Count matching documents, already capped by the configured maximum.
    fn count(&mut self) -> Result<u64>;

    /// Pull the next document, or `None` once the result is exhausted.
    fn fetch(&mut self) -> Result<Option<RawDocument>>;

    /// Release the underlying connection. Called at most once by the cursor.
    fn close(&mut self) -> Result<()>;
}

/// Open the backend named by the configuration
pub fn open_source(config: &ReaderConfig) -> Result<Box<dyn DocumentSource>> {
    match config.backend {
        BackendKind::Sql => Ok(Box::new(super::sql::SqlSource::open(config)?)),
        BackendKind::Mongo => Ok(Box::new(super::mongo::MongoSource::open(config)?)),
    }
}
