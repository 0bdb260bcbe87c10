//! Host-side contract: readers, consumers and the loop that joins them

use std::time::{Duration, Instant};

use crate::cursor::DocumentCursor;
use crate::record::{DocumentRecord, Progress};
use crate::Result;

/// The capability set a host pipeline drives a reader through
pub trait CollectionReader {
    /// Whether another document is available
    fn has_next(&mut self) -> bool;

    /// Take the next document. Callers check `has_next` first.
    fn get_next(&mut self) -> Result<DocumentRecord>;

    fn progress(&self) -> Progress;

    /// Release resources; safe to call repeatedly and mid-iteration
    fn close(&mut self) -> Result<()>;
}

impl CollectionReader for DocumentCursor {
    fn has_next(&mut self) -> bool {
        DocumentCursor::has_next(self)
    }

    fn get_next(&mut self) -> Result<DocumentRecord> {
        self.next_record()
    }

    fn progress(&self) -> Progress {
        DocumentCursor::progress(self)
    }

    fn close(&mut self) -> Result<()> {
        DocumentCursor::close(self)
    }
}

/// Per-document processing step on the host side
pub trait DocumentConsumer {
    fn process(&mut self, record: DocumentRecord) -> Result<()>;
}

impl<F> DocumentConsumer for F
where
    F: FnMut(DocumentRecord) -> Result<()>,
{
    fn process(&mut self, record: DocumentRecord) -> Result<()> {
        self(record)
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub documents: u64,
    pub elapsed: Duration,
}

/// Feed every document from `reader` to `consumer`.
///
/// The reader is closed whether the run completes or aborts; the first
/// error (reader, consumer, or close) is returned.
pub fn run_collection<R, C, P>(reader: &mut R, consumer: &mut C, mut on_progress: P) -> Result<RunSummary>
where
    R: CollectionReader + ?Sized,
    C: DocumentConsumer + ?Sized,
    P: FnMut(Progress),
{
    let started = Instant::now();
    let outcome = drive(reader, consumer, &mut on_progress);
    let closed = reader.close();

    let documents = outcome?;
    closed?;

    let summary = RunSummary {
        documents,
        elapsed: started.elapsed(),
    };
    tracing::info!("Processed {} documents in {:?}", summary.documents, summary.elapsed);
    Ok(summary)
}

fn drive<R, C, P>(reader: &mut R, consumer: &mut C, on_progress: &mut P) -> Result<u64>
where
    R: CollectionReader + ?Sized,
    C: DocumentConsumer + ?Sized,
    P: FnMut(Progress),
{
    let mut documents = 0;
    while reader.has_next() {
        let record = reader.get_next()?;
        consumer.process(record)?;
        documents += 1;
        on_progress(reader.progress());
    }
    Ok(documents)
}
