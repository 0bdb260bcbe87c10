//! Document cursor - the uniform pull-based view over any source
//!
//! ```text
//! open(config) ─▶ has_next() ─▶ next() ─▶ ... ─▶ close()
//!                     │            └─ completed += 1
//!                     └─ peeks one document ahead
//! ```
//!
//! Mapping policy applied to every raw document:
//! - missing id → `Error::Mapping`, and the cursor yields nothing further
//! - missing text → empty text
//! - a configured language override replaces any per-document language

use crate::config::ReaderConfig;
use crate::record::{DocumentRecord, Progress};
use crate::source::{open_source, DocumentSource, RawDocument};
use crate::{Error, Result};

/// Position bookkeeping for an open cursor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorState {
    /// Documents handed out so far
    pub completed: u64,
    /// Estimated number of documents, `None` if counting failed
    pub total: Option<u64>,
}

/// Pull-based cursor over a document source.
///
/// Single-threaded: the caller alternates `has_next` / `next` on one
/// thread. `close` may be called at any point, any number of times.
pub struct DocumentCursor {
    source: Option<Box<dyn DocumentSource>>,
    backend: String,
    lookahead: Option<Result<RawDocument>>,
    exhausted: bool,
    state: CursorState,
    language: Option<String>,
}

impl DocumentCursor {
    /// Validate the configuration, connect, count and start the query
    pub fn open(config: &ReaderConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!("Opening {} reader on {}", config.backend.as_str(), config.target());
        let source = open_source(config)?;
        Ok(Self::from_source(source, config.language.clone()))
    }

    /// Wrap an already-open source.
    ///
    /// Counting is best effort: a failure leaves the total indeterminate.
    pub fn from_source(mut source: Box<dyn DocumentSource>, language: Option<String>) -> Self {
        let total = match source.count() {
            Ok(total) => Some(total),
            Err(e) => {
                tracing::warn!("Could not count documents, progress total unknown: {}", e);
                None
            }
        };
        tracing::debug!("{} source opened, estimated total {:?}", source.backend_name(), total);

        Self {
            backend: source.backend_name().to_string(),
            source: Some(source),
            lookahead: None,
            exhausted: false,
            state: CursorState { completed: 0, total },
            language,
        }
    }

    /// Whether another document is available. Never consumes one.
    ///
    /// A fetch error counts as "available" so the next `next()` call
    /// reports it.
    pub fn has_next(&mut self) -> bool {
        if self.lookahead.is_some() {
            return true;
        }
        if self.exhausted {
            return false;
        }
        let Some(source) = self.source.as_mut() else {
            return false;
        };
        match source.fetch() {
            Ok(Some(document)) => self.lookahead = Some(Ok(document)),
            Ok(None) => self.exhausted = true,
            Err(e) => {
                // One error ends the stream; there is no retry
                self.exhausted = true;
                self.lookahead = Some(Err(e));
            }
        }
        self.lookahead.is_some()
    }

    /// Advance by one document and map it into a record
    pub fn next_record(&mut self) -> Result<DocumentRecord> {
        if !self.has_next() {
            return Err(Error::CursorExhausted);
        }
        let raw = self.lookahead.take().ok_or(Error::CursorExhausted)??;
        let record = match self.map_document(raw) {
            Ok(record) => record,
            Err(e) => {
                // A document without an id ends the stream
                self.exhausted = true;
                return Err(e);
            }
        };
        self.state.completed += 1;
        tracing::debug!("Read document {}", record.id);
        Ok(record)
    }

    fn map_document(&self, raw: RawDocument) -> Result<DocumentRecord> {
        let (id, text, language) = raw.into_parts();
        let id = id.ok_or_else(|| {
            Error::Mapping(format!(
                "document {} from {} source has no id",
                self.state.completed + 1,
                self.backend
            ))
        })?;

        Ok(DocumentRecord {
            id,
            text: text.unwrap_or_default(),
            language: self.language.clone().or(language),
        })
    }

    pub fn progress(&self) -> Progress {
        Progress::new(self.state.completed, self.state.total)
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn backend_name(&self) -> &str {
        &self.backend
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }

    /// Release the source. Later calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        self.lookahead = None;
        self.exhausted = true;
        match self.source.take() {
            Some(mut source) => {
                tracing::info!("Closing {} reader after {} documents", self.backend, self.state.completed);
                source.close()
            }
            None => Ok(()),
        }
    }
}

impl Iterator for DocumentCursor {
    type Item = Result<DocumentRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.has_next() {
            Some(self.next_record())
        } else {
            None
        }
    }
}

impl Drop for DocumentCursor {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Error closing {} reader: {}", self.backend, e);
        }
    }
}
