//! The state of one submitted batch.
//!
//! A [`BatchRun`] is written only by the orchestrator's worker, through a
//! [`BatchRunWriter`]. Everybody else gets a [`BatchRunReader`], which hands
//! out copies.

use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::{
    prelude::*,
    queues::work::{ExtractionResult, ExtractionStatus, FailureReason},
};

/// Overall progress of a batch.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BatchProgress {
    /// Number of documents in the batch.
    pub total: usize,
    /// Documents whose processing has started.
    pub started: usize,
    /// Documents with a terminal result.
    pub finished: usize,
}

impl BatchProgress {
    /// Does every document have a terminal result?
    pub fn is_complete(&self) -> bool {
        self.finished == self.total
    }
}

/// Final tally for a batch.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct BatchSummary {
    /// The batch ID.
    pub batch_id: Uuid,
    /// Number of documents in the batch.
    pub total: usize,
    /// Documents with text.
    pub succeeded: usize,
    /// Documents where OCR found no text.
    pub empty: usize,
    /// Documents that failed, including cancelled documents.
    pub failed: usize,
    /// Documents that were cancelled before they were processed.
    pub cancelled: usize,
}

/// Ordered results for a batch, filled in as documents finish.
#[derive(Clone, Debug)]
pub struct BatchRun {
    batch_id: Uuid,
    slots: Vec<(String, Option<ExtractionResult>)>,
    started: usize,
}

impl BatchRun {
    /// Create an empty run for the given document IDs.
    pub fn new(batch_id: Uuid, document_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            batch_id,
            slots: document_ids.into_iter().map(|id| (id, None)).collect(),
            started: 0,
        }
    }

    /// The batch ID.
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Document IDs, in submission order.
    pub fn document_ids(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|(id, _)| id.as_str())
    }

    /// The result for the document at `index`, if it has finished.
    pub fn result(&self, index: usize) -> Option<&ExtractionResult> {
        self.slots.get(index).and_then(|(_, result)| result.as_ref())
    }

    /// All finished results, in submission order.
    pub fn results(&self) -> impl Iterator<Item = &ExtractionResult> {
        self.slots.iter().filter_map(|(_, result)| result.as_ref())
    }

    /// Current progress.
    pub fn progress(&self) -> BatchProgress {
        BatchProgress {
            total: self.slots.len(),
            started: self.started,
            finished: self.results().count(),
        }
    }

    /// Count up our results.
    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            batch_id: self.batch_id,
            total: self.slots.len(),
            succeeded: 0,
            empty: 0,
            failed: 0,
            cancelled: 0,
        };
        for result in self.results() {
            match &result.status {
                ExtractionStatus::Success => summary.succeeded += 1,
                ExtractionStatus::Empty => summary.empty += 1,
                ExtractionStatus::Failed { reason, .. } => {
                    summary.failed += 1;
                    if *reason == FailureReason::Cancelled {
                        summary.cancelled += 1;
                    }
                }
            }
        }
        summary
    }
}

/// Write access to a shared [`BatchRun`]. Only the worker holds one.
pub(crate) struct BatchRunWriter {
    run: Arc<RwLock<BatchRun>>,
}

impl BatchRunWriter {
    /// Create a new writer, and a reader for the same run.
    pub(crate) fn new(run: BatchRun) -> (Self, BatchRunReader) {
        let run = Arc::new(RwLock::new(run));
        let reader = BatchRunReader { run: run.clone() };
        (Self { run }, reader)
    }

    /// Record that the document at `index` has started.
    pub(crate) fn mark_started(&self, index: usize) {
        let mut run = self.run.write().expect("lock poisoned");
        run.started += 1;
        trace!(index, started = run.started, "Document started");
    }

    /// Record the terminal result for the document at `index`.
    ///
    /// Each slot is written once. Later writes are ignored.
    pub(crate) fn record(&self, index: usize, result: ExtractionResult) {
        let mut run = self.run.write().expect("lock poisoned");
        match run.slots.get_mut(index) {
            Some((_, slot @ None)) => *slot = Some(result),
            Some((id, Some(_))) => warn!(index, id = %id, "Ignoring second result for document"),
            None => warn!(index, "Ignoring result for unknown document"),
        }
    }

    /// Summarize the run.
    pub(crate) fn summary(&self) -> BatchSummary {
        self.run.read().expect("lock poisoned").summary()
    }
}

/// Read-only access to a shared [`BatchRun`].
#[derive(Clone)]
pub struct BatchRunReader {
    run: Arc<RwLock<BatchRun>>,
}

impl BatchRunReader {
    /// A copy of the run as it is right now.
    pub fn snapshot(&self) -> BatchRun {
        self.run.read().expect("lock poisoned").clone()
    }

    /// Current progress.
    pub fn progress(&self) -> BatchProgress {
        self.run.read().expect("lock poisoned").progress()
    }
}
