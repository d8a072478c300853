// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The drain loop: pops records from a [`RecordSource`] and pushes them
//! through the [`Pipeline`].
//!
//! # Iteration
//!
//! ```text
//!         pop
//!          │
//!    ┌─────┴──────┐
//!    v            v
//!  Empty       HasRecord
//!    │            │ classify, flush first if medium,
//!    │            │ prepare, append, flush if ready
//!    │ flush if ready, idle += 1
//!    │ idle == threshold: idle = 0, sleep
//!    v
//!  Polling
//! ```
//!
//! The idle sleep never outlasts a pending batch's time bound: with records
//! waiting, the loop wakes when the batch falls due and flushes it on the
//! next empty poll.
//!
//! Errors never stop the loop. A failed iteration is reported, the pending
//! batch is flushed and the source connection is dropped so the next pop
//! reconnects. A failing source is polled at most once per idle sleep.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::Aggregator;
use crate::config::PipelineConfig;
use crate::dead_letter::AbandonPolicy;
use crate::error::{DecodeError, DrainError, SourceError};
use crate::flusher::{FlushOutcome, Flusher};
use crate::intake::{LogSink, LogTarget};
use crate::object_store::ObjectStore;
use crate::overflow::{OverflowHandler, SizeTier};
use crate::source::RecordSource;

/// Counters kept over the lifetime of a [`Pipeline`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub records_received: u64,
    pub records_delivered: u64,
    pub records_abandoned: u64,
    pub batches_delivered: u64,
    pub batches_abandoned: u64,
    pub records_redirected: u64,
    pub decode_errors: u64,
    pub source_errors: u64,
}

/// Batch state plus the components that act on it.
pub struct Pipeline {
    aggregator: Aggregator,
    flusher: Flusher,
    overflow: OverflowHandler,
    stats: PipelineStats,
}

impl Pipeline {
    #[must_use]
    pub fn new(aggregator: Aggregator, flusher: Flusher, overflow: OverflowHandler) -> Self {
        Pipeline {
            aggregator,
            flusher,
            overflow,
            stats: PipelineStats::default(),
        }
    }

    /// Wires the aggregator, flusher and overflow handler from configuration.
    /// `store` is shared by large-record redirection and dead-lettering.
    #[must_use]
    pub fn from_config(
        config: &PipelineConfig,
        sink: Arc<dyn LogSink>,
        target: LogTarget,
        store: Option<Arc<dyn ObjectStore>>,
    ) -> Self {
        let abandon = AbandonPolicy::from_config(config, store.clone());
        Pipeline::new(
            Aggregator::from_config(config),
            Flusher::new(sink, target, config.max_send_attempts, abandon),
            OverflowHandler::new(store),
        )
    }

    /// Runs one popped payload through the overflow handler into the batch.
    pub async fn ingest(&mut self, raw: &Bytes) -> Result<(), DecodeError> {
        self.stats.records_received += 1;
        let tier = SizeTier::classify(raw.len());
        if tier == SizeTier::Medium {
            debug!(
                "DRAIN | {} byte record, flushing pending batch first",
                raw.len()
            );
            self.force_flush().await;
        }

        if let Some(record) = self.overflow.prepare(tier, raw).await? {
            if tier == SizeTier::Large {
                self.stats.records_redirected += 1;
            }
            self.aggregator.append(record);
        }
        self.flush_if_ready().await;
        Ok(())
    }

    /// Flushes only when a batch threshold has been reached.
    pub async fn flush_if_ready(&mut self) -> FlushOutcome {
        if self.aggregator.is_flush_ready() {
            self.force_flush().await
        } else {
            FlushOutcome::Skipped
        }
    }

    /// Flushes whatever is pending, regardless of thresholds.
    pub async fn force_flush(&mut self) -> FlushOutcome {
        let records = self.aggregator.len() as u64;
        let outcome = self.flusher.flush(&mut self.aggregator).await;
        match outcome {
            FlushOutcome::Skipped => {}
            FlushOutcome::Delivered => {
                self.stats.batches_delivered += 1;
                self.stats.records_delivered += records;
            }
            FlushOutcome::Abandoned => {
                self.stats.batches_abandoned += 1;
                self.stats.records_abandoned += records;
            }
        }
        outcome
    }

    #[must_use]
    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    #[must_use]
    pub fn flusher(&self) -> &Flusher {
        &self.flusher
    }

    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        self.stats
    }
}

/// What a single iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A record was popped and accepted.
    Record,
    /// The source was empty.
    Empty,
    /// The source was empty for enough consecutive polls; the caller should
    /// back off before polling again.
    Idle,
    /// A popped record could not be decoded and was dropped.
    Dropped,
    /// The source failed; the caller should back off before polling again.
    Failed,
}

pub struct DrainLoop<S: RecordSource> {
    source: S,
    pipeline: Pipeline,
    /// Consecutive empty polls.
    idle_polls: u32,
    idle_polls_before_sleep: u32,
    idle_sleep: Duration,
    flush_on_shutdown: bool,
}

impl<S: RecordSource> DrainLoop<S> {
    #[must_use]
    pub fn new(source: S, pipeline: Pipeline, config: &PipelineConfig) -> Self {
        DrainLoop {
            source,
            pipeline,
            idle_polls: 0,
            idle_polls_before_sleep: config.idle_polls_before_sleep.max(1),
            idle_sleep: config.idle_sleep,
            flush_on_shutdown: config.flush_on_shutdown,
        }
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    #[must_use]
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn idle_polls(&self) -> u32 {
        self.idle_polls
    }

    /// Runs one iteration. Never sleeps; see [`Step::Idle`].
    pub async fn step(&mut self) -> Step {
        let popped = self.source.pop().await;
        self.handle(popped).await
    }

    /// How long to wait after a [`Step::Idle`] or [`Step::Failed`]: the idle
    /// sleep, cut short when a pending batch falls due sooner.
    #[must_use]
    pub fn backoff(&self) -> Duration {
        match self.pipeline.aggregator.time_until_due_at(Instant::now()) {
            Some(due) => self.idle_sleep.min(due),
            None => self.idle_sleep,
        }
    }

    async fn handle(&mut self, popped: Result<Option<Bytes>, SourceError>) -> Step {
        match self.process(popped).await {
            Ok(step) => step,
            Err(err) => {
                let step = match &err {
                    DrainError::Decode(e) => {
                        self.pipeline.stats.decode_errors += 1;
                        warn!("DRAIN | Dropping undecodable record: {e}");
                        Step::Dropped
                    }
                    DrainError::Source(e) => {
                        self.pipeline.stats.source_errors += 1;
                        error!("DRAIN | Record source failed: {e}");
                        Step::Failed
                    }
                };
                self.pipeline.force_flush().await;
                self.source.reset_connection();
                step
            }
        }
    }

    async fn process(
        &mut self,
        popped: Result<Option<Bytes>, SourceError>,
    ) -> Result<Step, DrainError> {
        match popped? {
            Some(raw) => {
                self.idle_polls = 0;
                self.pipeline.ingest(&raw).await?;
                Ok(Step::Record)
            }
            None => {
                self.pipeline.flush_if_ready().await;
                self.idle_polls += 1;
                if self.idle_polls >= self.idle_polls_before_sleep {
                    self.idle_polls = 0;
                    return Ok(Step::Idle);
                }
                Ok(Step::Empty)
            }
        }
    }

    /// Drains until `cancel` fires, then performs the shutdown flush and
    /// returns the final counters.
    ///
    /// Cancellation interrupts a pending pop or a backoff sleep, never a
    /// flush.
    pub async fn run(mut self, cancel: CancellationToken) -> PipelineStats {
        info!("DRAIN | Drain loop started");
        loop {
            let popped = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                popped = self.source.pop() => popped,
            };

            let step = self.handle(popped).await;
            if matches!(step, Step::Idle | Step::Failed) {
                let backoff = self.backoff();
                debug!("DRAIN | {step:?}, sleeping {backoff:?}");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(backoff) => {}
                }
            }
        }

        if self.flush_on_shutdown && !self.pipeline.aggregator.is_empty() {
            info!(
                "DRAIN | Flushing {} pending records before shutdown",
                self.pipeline.aggregator.len()
            );
            self.pipeline.force_flush().await;
        }
        let stats = self.pipeline.stats();
        info!("DRAIN | Drain loop stopped: {stats:?}");
        stats
    }
}
