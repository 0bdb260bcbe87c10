//! # Collection Reader - document cursors for annotation pipelines
//!
//! Streams documents out of an external store and hands them, one at a
//! time, to a host processing pipeline.
//!
//! Collection Reader provides:
//! - A uniform pull-based cursor (`has_next` / `next` / `progress` / `close`)
//! - A relational backend (SQLite via `rusqlite`) with keyset pagination
//! - A MongoDB backend built on aggregation pipelines, with an in-memory
//!   fallback for servers that cannot stream aggregation results
//! - A driver that feeds documents to a consumer and reports progress

pub mod record;
pub mod config;
pub mod source;
pub mod cursor;
pub mod collection;
pub mod output;
pub mod ui;

// Re-exports for convenient access
pub use record::{DocumentRecord, Progress};
pub use config::{BackendKind, FieldMapping, ReaderConfig};
pub use cursor::{CursorState, DocumentCursor};
pub use collection::{run_collection, CollectionReader, DocumentConsumer, RunSummary};
pub use source::{DocumentSource, RawDocument};

/// Result type alias for Collection Reader operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Collection Reader operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Cursor exhausted: next() called with no remaining documents")]
    CursorExhausted,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
