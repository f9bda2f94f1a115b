//! Batch processing on a dedicated worker.
//!
//! The OCR engine and translation service are not reentrant, so only one
//! task ever talks to them: the worker spawned by [`BatchOrchestrator::new`].
//! Callers submit batches and post-processing requests through a bounded
//! queue, and get results back over channels. Submitting never waits for
//! the worker.
//!
//! Within a batch, documents are processed one at a time, in submission
//! order. Each document produces a [`BatchEvent::Started`] event followed by a
//! [`BatchEvent::Finished`] event, and the batch ends with a single
//! [`BatchEvent::Completed`]. Documents skipped because of a
//! [`BatchCanceller`] still get both events, so a result is never seen before
//! its start.

use std::{
    any::Any,
    fmt,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::{
    FutureExt as _, StreamExt as _,
    channel::{mpsc, oneshot},
};
use tokio::sync::mpsc as queue;
use uuid::Uuid;

use crate::{
    async_utils::JoinWorker,
    language::RecognitionLanguage,
    pipeline::DocumentPipeline,
    postprocess::{self, PostProcessRequest, PostProcessResult, translate::Translator},
    prelude::*,
    preprocess::{PreprocessParams, SourceImage},
    queues::{
        run::{BatchRun, BatchRunReader, BatchRunWriter, BatchSummary},
        work::{ExtractionResult, ExtractionStatus},
    },
};

/// How many batches may wait for the worker by default.
pub const DEFAULT_QUEUE_DEPTH: usize = 4;

/// Notifications about a batch, in the order they happen.
#[derive(Clone, Debug, PartialEq)]
pub enum BatchEvent {
    /// We've started processing a document.
    Started { index: usize, document_id: String },
    /// A document has a terminal result.
    Finished {
        index: usize,
        result: ExtractionResult,
    },
    /// Every document has a terminal result.
    Completed { summary: BatchSummary },
}

/// Returned by [`BatchOrchestrator::submit`] when too many batches are
/// already waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchQueueFull;

impl fmt::Display for BatchQueueFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch queue is full, wait for a running batch to finish")
    }
}

impl std::error::Error for BatchQueueFull {}

/// A batch waiting for, or being processed by, the worker.
struct BatchJob {
    batch_id: Uuid,
    documents: Vec<SourceImage>,
    language: RecognitionLanguage,
    params: PreprocessParams,
    run: BatchRunWriter,
    events: mpsc::UnboundedSender<BatchEvent>,
    cancelled: Arc<AtomicBool>,
}

impl BatchJob {
    /// Send an event, if anybody is still listening.
    fn emit(&self, event: BatchEvent) {
        if self.events.unbounded_send(event).is_err() {
            trace!(batch_id = %self.batch_id, "Batch event receiver was dropped");
        }
    }
}

/// Requests handled by the worker.
enum WorkerRequest {
    Batch(BatchJob),
    PostProcess {
        request: PostProcessRequest,
        tx: oneshot::Sender<PostProcessResult>,
    },
}

/// A handle for submitting work to the batch worker.
///
/// This can be cloned cheaply. When every clone has been dropped, the worker
/// finishes any queued batches and exits.
#[derive(Clone)]
pub struct BatchOrchestrator {
    tx: queue::Sender<WorkerRequest>,
}

impl BatchOrchestrator {
    /// Spawn a worker which owns `pipeline` and `translator`.
    ///
    /// Up to `queue_depth` requests may wait while the worker is busy.
    pub fn new(
        pipeline: DocumentPipeline,
        translator: Arc<dyn Translator>,
        queue_depth: usize,
    ) -> (Self, JoinWorker) {
        let (tx, mut rx) = queue::channel::<WorkerRequest>(queue_depth.max(1));
        let worker = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                match request {
                    WorkerRequest::Batch(job) => run_batch(&pipeline, job).await,
                    WorkerRequest::PostProcess { request, tx } => {
                        let result = postprocess::process(translator.as_ref(), request).await;
                        if tx.send(result).is_err() {
                            debug!("Post-processing result receiver was dropped");
                        }
                    }
                }
            }
            debug!("Batch queue closed, worker exiting");
            Ok(())
        });
        (Self { tx }, JoinWorker::from_handle(worker))
    }

    /// Queue a batch of documents. Returns immediately.
    ///
    /// Fails with [`BatchQueueFull`] if the queue has no room.
    pub fn submit(
        &self,
        documents: Vec<SourceImage>,
        language: RecognitionLanguage,
        params: PreprocessParams,
    ) -> Result<BatchHandle> {
        let batch_id = Uuid::new_v4();
        let run = BatchRun::new(batch_id, documents.iter().map(|doc| doc.id.clone()));
        let (writer, reader) = BatchRunWriter::new(run);
        let (events_tx, events_rx) = mpsc::unbounded();
        let cancelled = Arc::new(AtomicBool::new(false));
        let document_count = documents.len();

        let job = BatchJob {
            batch_id,
            documents,
            language,
            params,
            run: writer,
            events: events_tx,
            cancelled: cancelled.clone(),
        };
        match self.tx.try_send(WorkerRequest::Batch(job)) {
            Ok(()) => {}
            Err(queue::error::TrySendError::Full(_)) => return Err(BatchQueueFull.into()),
            Err(queue::error::TrySendError::Closed(_)) => {
                return Err(anyhow!("batch worker has stopped"));
            }
        }
        info!(%batch_id, documents = document_count, "Submitted batch");
        Ok(BatchHandle {
            batch_id,
            events: events_rx,
            run: reader,
            canceller: BatchCanceller { cancelled },
        })
    }

    /// Run a post-processing operator on the worker, and wait for the
    /// result.
    pub async fn post_process(&self, request: PostProcessRequest) -> Result<PostProcessResult> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(WorkerRequest::PostProcess { request, tx })
            .await
            .map_err(|_| anyhow!("batch worker has stopped"))?;
        rx.await.context("batch worker dropped post-processing request")
    }
}

/// Process every document in a batch.
#[instrument(level = "debug", skip_all, fields(batch_id = %job.batch_id))]
async fn run_batch(pipeline: &DocumentPipeline, job: BatchJob) {
    for (index, doc) in job.documents.iter().enumerate() {
        job.run.mark_started(index);
        job.emit(BatchEvent::Started {
            index,
            document_id: doc.id.clone(),
        });

        if job.cancelled.load(Ordering::SeqCst) {
            debug!(index, id = %doc.id, "Skipping document in cancelled batch");
            let result = ExtractionResult::without_text(&doc.id, ExtractionStatus::cancelled());
            job.run.record(index, result.clone());
            job.emit(BatchEvent::Finished { index, result });
            continue;
        }

        let result = AssertUnwindSafe(pipeline.run(doc, job.language, job.params))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let err = anyhow!("document processing panicked: {}", panic_message(panic.as_ref()));
                error!(index, id = %doc.id, "{}", err);
                ExtractionResult::without_text(&doc.id, ExtractionStatus::engine_fault(&err))
            });
        job.run.record(index, result.clone());
        job.emit(BatchEvent::Finished { index, result });
    }

    let summary = job.run.summary();
    info!(
        succeeded = summary.succeeded,
        empty = summary.empty,
        failed = summary.failed,
        "Batch complete"
    );
    job.emit(BatchEvent::Completed { summary });
}

/// Get a printable message out of a panic payload.
fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

/// Cancels the not-yet-started documents of a batch.
#[derive(Clone, Debug)]
pub struct BatchCanceller {
    cancelled: Arc<AtomicBool>,
}

impl BatchCanceller {
    /// Ask the worker to skip every document it has not started yet. The
    /// document in progress, if any, runs to completion.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// A submitted batch.
pub struct BatchHandle {
    batch_id: Uuid,
    events: mpsc::UnboundedReceiver<BatchEvent>,
    run: BatchRunReader,
    canceller: BatchCanceller,
}

impl BatchHandle {
    /// The batch ID.
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Read-only view of the batch's results so far.
    pub fn run(&self) -> &BatchRunReader {
        &self.run
    }

    /// Wait for the next event. Returns `None` after [`BatchEvent::Completed`].
    pub async fn next_event(&mut self) -> Option<BatchEvent> {
        self.events.next().await
    }

    /// Get a canceller which can be handed to another task.
    pub fn canceller(&self) -> BatchCanceller {
        self.canceller.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::Semaphore;

    use super::*;
    use crate::{
        language::LanguageDetector,
        ocr::{EngineMode, OcrEngine, RecognizeRequest, tests::ScriptedEngine},
        postprocess::{Operation, PostProcessFailureKind, translate::tests::FakeTranslator},
        preprocess::{
            NormalizedImage,
            tests::{blank_png, gradient_png},
        },
        queues::work::FailureReason,
    };

    const TEXT: &str = "This is a perfectly ordinary English sentence from a scanned page.";

    /// Blocks every call until the test hands out permits.
    struct GatedEngine {
        gate: Semaphore,
    }

    #[async_trait]
    impl OcrEngine for GatedEngine {
        async fn recognize(
            &self,
            _image: &NormalizedImage,
            _request: &RecognizeRequest,
        ) -> Result<String> {
            self.gate.acquire().await?.forget();
            Ok(TEXT.to_owned())
        }
    }

    /// Panics on the first call only.
    struct PanicsOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OcrEngine for PanicsOnce {
        async fn recognize(
            &self,
            _image: &NormalizedImage,
            _request: &RecognizeRequest,
        ) -> Result<String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("engine exploded");
            }
            Ok(TEXT.to_owned())
        }
    }

    fn orchestrator(
        engine: Arc<dyn OcrEngine>,
        translator: Arc<dyn Translator>,
        queue_depth: usize,
    ) -> (BatchOrchestrator, JoinWorker) {
        let pipeline = DocumentPipeline::new(engine, LanguageDetector::default(), EngineMode::Lstm);
        BatchOrchestrator::new(pipeline, translator, queue_depth)
    }

    fn doc(id: &str, bytes: Vec<u8>) -> SourceImage {
        SourceImage::from_bytes(id, bytes)
    }

    async fn collect_events(handle: &mut BatchHandle) -> Vec<BatchEvent> {
        let mut events = vec![];
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }
        events
    }

    fn finished(events: &[BatchEvent]) -> Vec<&ExtractionResult> {
        events
            .iter()
            .filter_map(|event| match event {
                BatchEvent::Finished { result, .. } => Some(result),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn one_corrupt_document_does_not_spoil_the_batch() {
        let (orchestrator, worker) = orchestrator(
            Arc::new(ScriptedEngine::returning(TEXT)),
            Arc::new(FakeTranslator::new(true)),
            DEFAULT_QUEUE_DEPTH,
        );
        let mut handle = orchestrator
            .submit(
                vec![
                    doc("one.png", gradient_png()),
                    doc("two.png", b"\x89PNG but not really".to_vec()),
                    doc("three.png", gradient_png()),
                ],
                RecognitionLanguage::English,
                PreprocessParams::default(),
            )
            .unwrap();
        let events = collect_events(&mut handle).await;

        let results = finished(&events);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status, ExtractionStatus::Success);
        assert_eq!(
            results[1].status.failure_reason(),
            Some(FailureReason::InvalidImage)
        );
        assert_eq!(results[2].status, ExtractionStatus::Success);
        assert_eq!(results[2].detected_language, "en");

        match events.last() {
            Some(BatchEvent::Completed { summary }) => {
                assert_eq!(summary.batch_id, handle.batch_id());
                assert_eq!((summary.succeeded, summary.failed), (2, 1));
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(handle.run().progress().is_complete());
        assert_eq!(handle.run().snapshot().results().count(), 3);

        drop(orchestrator);
        worker.join().await.unwrap();
    }

    #[tokio::test]
    async fn documents_start_before_they_finish() {
        let (orchestrator, _worker) = orchestrator(
            Arc::new(ScriptedEngine::returning(TEXT)),
            Arc::new(FakeTranslator::new(true)),
            DEFAULT_QUEUE_DEPTH,
        );
        let mut handle = orchestrator
            .submit(
                vec![
                    doc("a.png", gradient_png()),
                    doc("b.png", blank_png()),
                    doc("c.png", gradient_png()),
                ],
                RecognitionLanguage::English,
                PreprocessParams::default(),
            )
            .unwrap();
        let events = collect_events(&mut handle).await;

        // Strictly alternating, in submission order.
        assert_eq!(events.len(), 7);
        for index in 0..3 {
            match (&events[2 * index], &events[2 * index + 1]) {
                (
                    BatchEvent::Started {
                        index: started, ..
                    },
                    BatchEvent::Finished {
                        index: finished, ..
                    },
                ) => {
                    assert_eq!((*started, *finished), (index, index));
                }
                other => panic!("unexpected events: {other:?}"),
            }
        }
        // Blank pages are kept, with their own status.
        assert_eq!(finished(&events)[1].status, ExtractionStatus::Empty);
    }

    #[tokio::test]
    async fn panics_are_captured_per_document() {
        let (orchestrator, _worker) = orchestrator(
            Arc::new(PanicsOnce {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(FakeTranslator::new(true)),
            DEFAULT_QUEUE_DEPTH,
        );
        let mut handle = orchestrator
            .submit(
                vec![doc("a.png", gradient_png()), doc("b.png", gradient_png())],
                RecognitionLanguage::English,
                PreprocessParams::default(),
            )
            .unwrap();
        let events = collect_events(&mut handle).await;
        let results = finished(&events);
        match &results[0].status {
            ExtractionStatus::Failed { reason, error } => {
                assert_eq!(*reason, FailureReason::EngineFault);
                assert!(error.contains("engine exploded"), "{error}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(results[1].status, ExtractionStatus::Success);
    }

    #[tokio::test]
    async fn cancelled_documents_start_before_their_result() {
        let engine = Arc::new(GatedEngine {
            gate: Semaphore::new(0),
        });
        let (orchestrator, _worker) = orchestrator(
            engine.clone(),
            Arc::new(FakeTranslator::new(true)),
            DEFAULT_QUEUE_DEPTH,
        );
        let mut handle = orchestrator
            .submit(
                vec![
                    doc("a.png", gradient_png()),
                    doc("b.png", gradient_png()),
                    doc("c.png", gradient_png()),
                ],
                RecognitionLanguage::English,
                PreprocessParams::default(),
            )
            .unwrap();

        // Wait until the first document is in the engine, then cancel.
        assert!(matches!(
            handle.next_event().await,
            Some(BatchEvent::Started { index: 0, .. })
        ));
        handle.canceller().cancel();
        engine.gate.add_permits(10);

        let events = collect_events(&mut handle).await;
        let mut started = vec![0];
        for event in &events {
            match event {
                BatchEvent::Started { index, .. } => started.push(*index),
                BatchEvent::Finished { index, .. } => {
                    assert!(started.contains(index), "result before start: {events:?}")
                }
                BatchEvent::Completed { .. } => {}
            }
        }
        assert_eq!(started, [0, 1, 2]);
        let results = finished(&events);
        assert_eq!(results[0].status, ExtractionStatus::Success);
        assert_eq!(results[1].status.failure_reason(), Some(FailureReason::Cancelled));
        assert_eq!(results[2].status.failure_reason(), Some(FailureReason::Cancelled));
        match events.last() {
            Some(BatchEvent::Completed { summary }) => assert_eq!(summary.cancelled, 2),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_queue_rejects_new_batches() {
        let engine = Arc::new(GatedEngine {
            gate: Semaphore::new(0),
        });
        let (orchestrator, _worker) = orchestrator(
            engine.clone(),
            Arc::new(FakeTranslator::new(true)),
            1,
        );
        let submit = |id: &str| {
            orchestrator.submit(
                vec![doc(id, gradient_png())],
                RecognitionLanguage::English,
                PreprocessParams::default(),
            )
        };

        // The worker is busy with the first batch, the second one waits in
        // the queue, and there's no room for a third.
        let mut first = submit("first.png").unwrap();
        assert!(matches!(
            first.next_event().await,
            Some(BatchEvent::Started { .. })
        ));
        let mut second = submit("second.png").unwrap();
        let err = submit("third.png").err().expect("queue should be full");
        assert!(err.downcast_ref::<BatchQueueFull>().is_some(), "{err:?}");

        // Batches run in submission order.
        engine.gate.add_permits(10);
        let first_events = collect_events(&mut first).await;
        assert_eq!(finished(&first_events)[0].document_id, "first.png");
        let second_events = collect_events(&mut second).await;
        assert_eq!(finished(&second_events)[0].status, ExtractionStatus::Success);
    }

    #[tokio::test]
    async fn post_processing_runs_on_the_worker() {
        let (orchestrator, worker) = orchestrator(
            Arc::new(ScriptedEngine::returning(TEXT)),
            Arc::new(FakeTranslator::new(false)),
            DEFAULT_QUEUE_DEPTH,
        );
        let request = |operation| PostProcessRequest {
            document_id: Some("a.png".to_owned()),
            text: "The quick brown fox jumps over the lazy dog.".to_owned(),
            operation,
        };

        let translated = orchestrator
            .post_process(request(Operation::Translate {
                target: "fr".to_owned(),
            }))
            .await
            .unwrap();
        assert_eq!(
            translated.into_result().unwrap_err().kind,
            PostProcessFailureKind::TranslationUnavailable
        );

        let summary = orchestrator
            .post_process(request(Operation::Summarize))
            .await
            .unwrap();
        assert!(summary.into_result().unwrap().contains("lazy dog"));

        let keywords = orchestrator
            .post_process(request(Operation::Keywords))
            .await
            .unwrap();
        assert!(keywords.into_result().unwrap().starts_with("The, quick"));

        drop(orchestrator);
        worker.join().await.unwrap();
    }
}
