//! Concurrent fetch-and-normalize pipeline.
//!
//! Tickers are processed in consecutive batches; within a batch a bounded
//! set of workers pulls tickers off a shared queue and runs
//! fetch -> normalize -> derive end-to-end for each one. Batch N+1 only
//! starts once batch N has drained, which bounds in-flight connections
//! and gives the caller a natural progress boundary.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use futures::future::try_join_all;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    analysis,
    api::{FetchError, RecordSource},
    cleaner,
    models::{FetchMode, NormalizedRecord, RecordStatus, ResultOrder},
};

/// Progress update emitted while the pipeline runs.
///
/// The core never prints; CLI or exporter layers subscribe to these
/// events and render them however they like.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    TickerStarted {
        worker_id: usize,
        ticker: String,
    },
    TickerCompleted {
        worker_id: usize,
        ticker: String,
        status: RecordStatus,
    },
    TickerFailed {
        worker_id: usize,
        ticker: String,
        error: FetchError,
    },
    BatchCompleted {
        batch_index: usize,
        total_batches: usize,
        records: usize,
        failures: usize,
    },
}

/// A ticker whose fetch exhausted the retry budget.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerFailure {
    pub ticker: String,
    pub error: FetchError,
}

/// Final outcome of one pipeline run: one entry per input ticker, either
/// a normalized record or a failure, never both and never neither.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub records: Vec<NormalizedRecord>,
    pub failures: Vec<TickerFailure>,
    /// True when the whole first batch failed with timeout/network
    /// errors, which points at the source being unreachable rather than
    /// at bad tickers.
    pub source_unreachable: bool,
}

impl RunResult {
    pub fn total(&self) -> usize {
        self.records.len() + self.failures.len()
    }
}

/// Optional knobs for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub order: ResultOrder,
    /// Checked at batch boundaries; in-flight tickers finish their work.
    pub cancel: CancellationToken,
    pub progress: Option<broadcast::Sender<ProgressEvent>>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            order: ResultOrder::default(),
            cancel: CancellationToken::new(),
            progress: None,
        }
    }
}

/// Thread-safe store the workers publish into.
///
/// A single mutex guards the backing vectors, so every append is atomic
/// with respect to the others and `snapshot` never observes a partial
/// append.
pub struct ResultAggregator {
    inner: Mutex<AggregatorInner>,
    order: ResultOrder,
}

#[derive(Default)]
struct AggregatorInner {
    records: Vec<(usize, NormalizedRecord)>,
    failures: Vec<(usize, TickerFailure)>,
}

impl ResultAggregator {
    pub fn new(order: ResultOrder) -> Self {
        Self {
            inner: Mutex::new(AggregatorInner::default()),
            order,
        }
    }

    pub fn append_record(&self, input_index: usize, record: NormalizedRecord) {
        let mut inner = self.inner.lock().unwrap();
        inner.records.push((input_index, record));
    }

    pub fn append_failure(&self, input_index: usize, ticker: String, error: FetchError) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures.push((input_index, TickerFailure { ticker, error }));
    }

    pub fn counts(&self) -> (usize, usize) {
        let inner = self.inner.lock().unwrap();
        (inner.records.len(), inner.failures.len())
    }

    /// Consistent view of everything appended so far. Taken after all
    /// workers have joined, it holds exactly one entry per input ticker.
    pub fn snapshot(&self) -> RunResult {
        let inner = self.inner.lock().unwrap();
        let mut records = inner.records.clone();
        let mut failures = inner.failures.clone();
        drop(inner);

        if self.order == ResultOrder::ByInput {
            records.sort_by_key(|(index, _)| *index);
            failures.sort_by_key(|(index, _)| *index);
        }

        RunResult {
            records: records.into_iter().map(|(_, r)| r).collect(),
            failures: failures.into_iter().map(|(_, f)| f).collect(),
            source_unreachable: false,
        }
    }
}

/// Run the full pipeline over `tickers`.
///
/// Fails only on configuration validation; per-ticker fetch errors and
/// per-field normalization problems are contained in the returned
/// `RunResult`.
pub async fn run_pipeline(
    source: Arc<dyn RecordSource>,
    tickers: Vec<String>,
    mode: FetchMode,
    options: PipelineOptions,
) -> Result<RunResult> {
    let (worker_count, batch_size) = mode.validated()?;

    let total = tickers.len();
    let total_batches = total.div_ceil(batch_size).max(1);
    info!(
        "starting pipeline: {} tickers, {} workers, batches of {}",
        total, worker_count, batch_size
    );

    let aggregator = Arc::new(ResultAggregator::new(options.order));
    let indexed: Vec<(usize, String)> = tickers.into_iter().enumerate().collect();
    let mut source_unreachable = false;

    for (batch_index, batch) in indexed.chunks(batch_size).enumerate() {
        if options.cancel.is_cancelled() {
            warn!(
                "stop requested; skipping remaining batches ({} tickers unprocessed)",
                total - batch_index * batch_size
            );
            break;
        }

        run_batch(
            Arc::clone(&source),
            Arc::clone(&aggregator),
            batch,
            worker_count,
            options.progress.as_ref(),
        )
        .await?;

        let (records, failures) = aggregator.counts();
        info!(
            "batch {}/{} done: {} records, {} failures so far",
            batch_index + 1,
            total_batches,
            records,
            failures
        );
        if let Some(sender) = options.progress.as_ref() {
            let _ = sender.send(ProgressEvent::BatchCompleted {
                batch_index,
                total_batches,
                records,
                failures,
            });
        }

        // A first batch that failed wholesale on timeouts/network errors
        // points at systemic unreachability rather than bad tickers.
        if batch_index == 0 && failures == batch.len() {
            let all_transient = aggregator
                .snapshot()
                .failures
                .iter()
                .all(|f| f.error.is_retryable());
            if all_transient {
                source_unreachable = true;
                warn!(
                    "every ticker of the first batch failed with timeout/network errors; \
                     the source may be unreachable"
                );
            }
        }
    }

    let mut result = aggregator.snapshot();
    result.source_unreachable = source_unreachable;
    Ok(result)
}

/// Drain one batch through up to `worker_count` concurrent workers.
async fn run_batch(
    source: Arc<dyn RecordSource>,
    aggregator: Arc<ResultAggregator>,
    batch: &[(usize, String)],
    worker_count: usize,
    progress: Option<&broadcast::Sender<ProgressEvent>>,
) -> Result<()> {
    let queue = Arc::new(Mutex::new(VecDeque::from(batch.to_vec())));

    let mut handles = Vec::new();
    for worker_id in 0..worker_count.min(batch.len()) {
        let queue = Arc::clone(&queue);
        let source = Arc::clone(&source);
        let aggregator = Arc::clone(&aggregator);
        let progress = progress.cloned();

        handles.push(tokio::spawn(async move {
            worker_loop(worker_id, queue, source, aggregator, progress).await;
        }));
    }

    try_join_all(handles).await?;

    Ok(())
}

/// One worker: take the next ticker off the queue, run
/// fetch -> normalize -> derive, publish, repeat until the queue drains.
/// No fetch or normalize state is shared across tickers.
async fn worker_loop(
    worker_id: usize,
    queue: Arc<Mutex<VecDeque<(usize, String)>>>,
    source: Arc<dyn RecordSource>,
    aggregator: Arc<ResultAggregator>,
    progress: Option<broadcast::Sender<ProgressEvent>>,
) {
    loop {
        let next = queue.lock().unwrap().pop_front();
        let Some((input_index, ticker)) = next else {
            break;
        };

        if let Some(sender) = progress.as_ref() {
            let _ = sender.send(ProgressEvent::TickerStarted {
                worker_id,
                ticker: ticker.clone(),
            });
        }

        match source.fetch_record(&ticker).await {
            Ok(raw) => {
                let mut record = cleaner::normalize(&raw);
                record.earnings_yield = analysis::earnings_yield(&record);

                info!(
                    "worker {}: {} done ({} fields, {:?})",
                    worker_id,
                    ticker,
                    record.len(),
                    record.status
                );
                if let Some(sender) = progress.as_ref() {
                    let _ = sender.send(ProgressEvent::TickerCompleted {
                        worker_id,
                        ticker: ticker.clone(),
                        status: record.status,
                    });
                }

                aggregator.append_record(input_index, record);
            }
            Err(error) => {
                warn!("worker {}: {} failed: {}", worker_id, ticker, error);
                if let Some(sender) = progress.as_ref() {
                    let _ = sender.send(ProgressEvent::TickerFailed {
                        worker_id,
                        ticker: ticker.clone(),
                        error: error.clone(),
                    });
                }

                aggregator.append_failure(input_index, ticker, error);
            }
        }
    }
}
