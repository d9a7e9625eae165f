//! Run coordination: worker pool, idempotency gate, rate-limited execution.
//!
//! Rows flow through a bounded queue into a fixed pool of workers. Each
//! worker validates, checks the fingerprint index, renders, waits for the
//! rate limiter, and executes. The observer is invoked exactly once per
//! dequeued row; cancellation stops workers between rows and turns in-flight
//! requests into `canceled` outcomes.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::{Duration, Instant},
};

use anyhow::Result;
use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinSet};

use crate::{
    cancel::CancelToken,
    client::{HttpExecutor, Outcome},
    fingerprint,
    limiter::RateLimiter,
    reader::RawRow,
    request::RequestSpec,
    schema::Schema,
    template::Renderer,
    validator::{NormalizedRow, ValidationReport, Validator},
};

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub concurrency: usize,
    pub rate_per_second: Option<f64>,
    pub timeout: Duration,
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
    pub duration: Duration,
}

/// Receives exactly one call per dequeued row. `outcome` is `None` for rows
/// that failed validation or were skipped by the idempotency index.
#[async_trait]
pub trait RowObserver: Send + Sync {
    async fn on_row(&self, row_number: u64, report: &ValidationReport, outcome: Option<&Outcome>);
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

pub struct Runner {
    spec: Arc<RequestSpec>,
    validator: Validator,
    renderer: Renderer,
    executor: HttpExecutor,
    limiter: Option<RateLimiter>,
    index: RwLock<HashSet<String>>,
    concurrency: usize,
    cancel: CancelToken,
}

impl Runner {
    pub fn new(
        schema: Arc<Schema>,
        spec: Arc<RequestSpec>,
        config: &RunConfig,
        cancel: CancelToken,
    ) -> Result<Self> {
        let validator = Validator::new(schema)?;
        let renderer = Renderer::new(&spec)?;
        let executor = HttpExecutor::new(spec.clone(), config.timeout, config.max_retries);
        let limiter = config.rate_per_second.map(RateLimiter::new);
        Ok(Self {
            spec,
            validator,
            renderer,
            executor,
            limiter,
            index: RwLock::new(HashSet::new()),
            concurrency: config.concurrency.max(1),
            cancel,
        })
    }

    /// Seeds the idempotency index, typically from a prior run's `sent.csv`.
    pub fn preload_fingerprints(&self, fingerprints: impl IntoIterator<Item = String>) {
        self.index
            .write()
            .unwrap_or_else(|err| err.into_inner())
            .extend(fingerprints);
    }

    pub async fn run(
        self: Arc<Self>,
        rows: mpsc::Receiver<RawRow>,
        observer: Arc<dyn RowObserver>,
    ) -> RunResult {
        let started = Instant::now();
        let counters = Arc::new(Counters::default());
        let rows = Arc::new(tokio::sync::Mutex::new(rows));
        let mut workers = JoinSet::new();
        for _ in 0..self.concurrency {
            let runner = Arc::clone(&self);
            let rows = Arc::clone(&rows);
            let observer = Arc::clone(&observer);
            let counters = Arc::clone(&counters);
            workers.spawn(async move {
                loop {
                    let task = {
                        let mut queue = rows.lock().await;
                        tokio::select! {
                            biased;
                            _ = runner.cancel.cancelled() => None,
                            task = queue.recv() => task,
                        }
                    };
                    let Some(task) = task else { break };
                    runner.process(task, observer.as_ref(), &counters).await;
                }
            });
        }
        while workers.join_next().await.is_some() {}
        RunResult {
            total: counters.total.load(Ordering::Relaxed),
            success: counters.success.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
            duration: started.elapsed(),
        }
    }

    async fn process(&self, task: RawRow, observer: &dyn RowObserver, counters: &Counters) {
        counters.total.fetch_add(1, Ordering::Relaxed);
        let row_number = task.row_number;

        let report = self.validator.validate(row_number, &task.columns);
        if !report.valid {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            observer.on_row(row_number, &report, None).await;
            return;
        }

        let fingerprint = fingerprint::compute(&self.spec, &report.data);
        if self.seen(&fingerprint) {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            observer.on_row(row_number, &report, None).await;
            return;
        }

        let request_id = format!("req_{row_number}_{}", &fingerprint[..12]);
        let normalized = NormalizedRow {
            row_number,
            data: report.data.clone(),
            fingerprint: fingerprint.clone(),
        };
        let rendered = match self.renderer.render(&normalized) {
            Ok(rendered) => rendered,
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                let outcome =
                    Outcome::template_failure(&request_id, &fingerprint, err.to_string());
                observer.on_row(row_number, &report, Some(&outcome)).await;
                return;
            }
        };

        if let Some(limiter) = &self.limiter {
            if !limiter.acquire(&self.cancel).await {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                let outcome = Outcome::canceled(&request_id, &fingerprint);
                observer.on_row(row_number, &report, Some(&outcome)).await;
                return;
            }
        }

        let outcome = self.executor.execute(&self.cancel, &rendered, &request_id).await;
        if outcome.success {
            self.index
                .write()
                .unwrap_or_else(|err| err.into_inner())
                .insert(fingerprint);
            counters.success.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        observer.on_row(row_number, &report, Some(&outcome)).await;
    }

    fn seen(&self, fingerprint: &str) -> bool {
        self.index
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .contains(fingerprint)
    }
}
