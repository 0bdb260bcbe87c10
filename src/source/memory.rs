//! Materialized source: a result set held entirely in memory

use std::collections::VecDeque;

use crate::Result;
use super::framework::{DocumentSource, RawDocument};

/// Serves documents from an in-memory queue.
///
/// Used when a store can only return its whole result at once. The
/// documents are served in the order given; callers hand them over
/// already sorted.
pub struct MaterializedSource {
    name: String,
    total: u64,
    documents: VecDeque<RawDocument>,
}

impl MaterializedSource {
    pub fn new(name: impl Into<String>, documents: impl IntoIterator<Item = RawDocument>) -> Self {
        let documents: VecDeque<RawDocument> = documents.into_iter().collect();
        Self {
            name: name.into(),
            total: documents.len() as u64,
            documents,
        }
    }

    /// Documents not yet fetched
    pub fn remaining(&self) -> usize {
        self.documents.len()
    }
}

impl DocumentSource for MaterializedSource {
    fn backend_name(&self) -> &str {
        &self.name
    }

    fn count(&mut self) -> Result<u64> {
        Ok(self.total)
    }

    fn fetch(&mut self) -> Result<Option<RawDocument>> {
        Ok(self.documents.pop_front())
    }

    fn close(&mut self) -> Result<()> {
        self.documents.clear();
        Ok(())
    }
}
