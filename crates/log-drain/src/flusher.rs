// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of accumulated batches with bounded retry.
//!
//! # Delivery Cycle
//!
//! ```text
//!   Aggregator
//!       │ drain
//!       v
//!   ┌─────────────┐   Ok   ┌───────────┐
//!   │  LogSink    │ ─────> │ Delivered │
//!   │   send      │        └───────────┘
//!   └──────┬──────┘
//!          │ Err
//!          v
//!   ┌─────────────┐  no    (send again)
//!   │ attempts ≥  │ ─────>
//!   │    max?     │
//!   └──────┬──────┘
//!          │ yes
//!          v
//!   ┌─────────────┐
//!   │  Abandoned  │ (abandon policy)
//!   └─────────────┘
//! ```
//!
//! A flush cycle always ends with the aggregator empty and its flush clock
//! restarted, whether the batch was delivered or abandoned. The cycle runs in
//! the drain loop's task, so no record is popped while a flush is retrying.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::aggregator::Aggregator;
use crate::dead_letter::AbandonPolicy;
use crate::intake::{LogGroup, LogSink, LogTarget};

/// Result of one flush cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The aggregator was empty; nothing was sent.
    Skipped,
    Delivered,
    /// Every attempt failed and the batch went to the abandon policy.
    Abandoned,
}

pub struct Flusher {
    sink: Arc<dyn LogSink>,
    target: LogTarget,
    max_attempts: u32,
    /// Failed sends of the batch currently being flushed. Zero between cycles.
    attempts: u32,
    abandon: AbandonPolicy,
}

impl Flusher {
    /// `max_attempts` is clamped to at least one send per cycle.
    #[must_use]
    pub fn new(
        sink: Arc<dyn LogSink>,
        target: LogTarget,
        max_attempts: u32,
        abandon: AbandonPolicy,
    ) -> Self {
        Flusher {
            sink,
            target,
            max_attempts: max_attempts.max(1),
            attempts: 0,
            abandon,
        }
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub fn target(&self) -> &LogTarget {
        &self.target
    }

    /// Sends the aggregator's batch, retrying up to the attempt budget.
    pub async fn flush(&mut self, aggregator: &mut Aggregator) -> FlushOutcome {
        if aggregator.is_empty() {
            return FlushOutcome::Skipped;
        }
        let batch = aggregator.drain();

        loop {
            let time = Instant::now();
            self.attempts += 1;
            let group = LogGroup {
                target: &self.target,
                records: &batch.records,
            };

            match self.sink.send(group).await {
                Ok(()) => {
                    debug!(
                        "DRAIN | Flushed {} records ({} bytes) in {} ms after {} attempts",
                        batch.len(),
                        batch.aggregate_size,
                        time.elapsed().as_millis(),
                        self.attempts
                    );
                    self.attempts = 0;
                    aggregator.mark_flushed();
                    return FlushOutcome::Delivered;
                }
                Err(e) => {
                    warn!(
                        "DRAIN | Failed to send {} records (attempt {}/{}): {e}",
                        batch.len(),
                        self.attempts,
                        self.max_attempts
                    );
                    if self.attempts >= self.max_attempts {
                        let attempts = std::mem::replace(&mut self.attempts, 0);
                        self.abandon.abandon(batch, attempts).await;
                        aggregator.mark_flushed();
                        return FlushOutcome::Abandoned;
                    }
                }
            }
        }
    }
}
