//! Document Sources - the backends a cursor pulls from
//!
//! Every backend projects its native rows or documents into the same
//! canonical `RawDocument` shape (id, text, language slots), ordered by id.
//! Mapping policy (required id, empty text, language override) lives in
//! the cursor, never in a backend.
//!
//! - `sql`: SQLite tables or arbitrary SELECT statements, paged by id
//! - `mongo`: MongoDB aggregation pipelines
//! - `memory`: a materialized result set (legacy fallback, tests)

pub mod framework;
pub mod memory;
pub mod sql;
pub mod mongo;

pub use framework::{DocumentSource, RawDocument, open_source};
pub use memory::MaterializedSource;
pub use sql::SqlSource;
pub use mongo::MongoSource;
