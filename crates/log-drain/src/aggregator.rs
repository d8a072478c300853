// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batch accumulation for delivery to the ingestion service.
//!
//! # Batching Strategy
//!
//! Converted records are accumulated in arrival order until one of three
//! conditions makes the batch ready to flush:
//! 1. **Size limit**: the summed serialized size reaches 2 MiB
//! 2. **Count limit**: the batch holds 4095 records
//! 3. **Time limit**: the batch is non-empty and 300 ms have passed since the
//!    last flush
//!
//! Readiness is checked after each append, so a batch may overshoot the size
//! limit by at most one record. Records larger than 1 MiB never reach the
//! aggregator without first forcing a flush (see
//! [`crate::overflow::SizeTier::Medium`]).
//!
//! # Flush Clock
//!
//! The time of the last flush starts at construction and is only moved by
//! [`Aggregator::mark_flushed`], which the flusher calls after every delivery
//! or abandonment. It uses [`tokio::time::Instant`] so tests can drive it
//! with a paused clock.

use std::time::Duration;
use tokio::time::Instant;

use crate::config::PipelineConfig;
use crate::constants;
use crate::record::ConvertedRecord;

/// An ordered batch removed from the aggregator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub records: Vec<ConvertedRecord>,
    /// Sum of [`ConvertedRecord::serialized_size`] over `records`.
    pub aggregate_size: usize,
}

impl Batch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Accumulates converted records until a flush condition holds.
///
/// # Example
///
/// ```rust
/// use log_drain::aggregator::Aggregator;
/// use log_drain::record::{decode, ConvertedRecord};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut aggregator = Aggregator::default();
/// let record = ConvertedRecord::from_record(decode(br#"{"message":"hi"}"#).unwrap()).unwrap();
/// aggregator.append(record);
///
/// assert_eq!(aggregator.len(), 1);
/// let batch = aggregator.drain();
/// assert_eq!(batch.len(), 1);
/// assert!(aggregator.is_empty());
/// # }
/// ```
#[derive(Debug)]
pub struct Aggregator {
    records: Vec<ConvertedRecord>,

    /// Running sum of the serialized sizes of `records`.
    aggregate_size: usize,

    last_flush: Instant,

    /// Flush once `aggregate_size` reaches this many bytes.
    max_batch_bytes: usize,

    /// Flush once the batch holds this many records.
    max_batch_entries: usize,

    /// Flush a non-empty batch once this much time has passed since the last
    /// flush.
    flush_interval: Duration,
}

impl Default for Aggregator {
    /// Creates an aggregator with the ingestion service limits: 2 MiB,
    /// 4095 records and 300 ms.
    fn default() -> Self {
        Aggregator::new(
            constants::MAX_BATCH_BYTES,
            constants::MAX_BATCH_ENTRIES,
            constants::FLUSH_INTERVAL,
        )
    }
}

impl Aggregator {
    #[must_use]
    pub fn new(max_batch_bytes: usize, max_batch_entries: usize, flush_interval: Duration) -> Self {
        Aggregator {
            records: Vec::new(),
            aggregate_size: 0,
            last_flush: Instant::now(),
            max_batch_bytes,
            max_batch_entries,
            flush_interval,
        }
    }

    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Aggregator::new(
            config.max_batch_bytes,
            config.max_batch_entries,
            config.flush_interval,
        )
    }

    /// Appends `record` at the end of the batch.
    pub fn append(&mut self, record: ConvertedRecord) {
        self.aggregate_size += record.serialized_size();
        self.records.push(record);
    }

    /// Whether any flush condition holds at the current time.
    #[must_use]
    pub fn is_flush_ready(&self) -> bool {
        self.is_flush_ready_at(Instant::now())
    }

    #[must_use]
    pub fn is_flush_ready_at(&self, now: Instant) -> bool {
        if self.records.is_empty() {
            return false;
        }
        self.aggregate_size >= self.max_batch_bytes
            || self.records.len() >= self.max_batch_entries
            || now.saturating_duration_since(self.last_flush) >= self.flush_interval
    }

    /// How long until a pending batch becomes time-ready. `None` when the
    /// batch is empty; zero when it is already due.
    #[must_use]
    pub fn time_until_due_at(&self, now: Instant) -> Option<Duration> {
        if self.records.is_empty() {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.last_flush);
        Some(self.flush_interval.saturating_sub(elapsed))
    }

    /// Removes the whole batch, leaving the aggregator empty.
    ///
    /// The flush clock is not touched; see [`Aggregator::mark_flushed`].
    pub fn drain(&mut self) -> Batch {
        Batch {
            records: std::mem::take(&mut self.records),
            aggregate_size: std::mem::replace(&mut self.aggregate_size, 0),
        }
    }

    /// Discards the batch.
    pub fn reset(&mut self) {
        self.records.clear();
        self.aggregate_size = 0;
    }

    /// Restarts the flush clock.
    pub fn mark_flushed(&mut self) {
        self.last_flush = Instant::now();
    }

    #[must_use]
    pub fn last_flush(&self) -> Instant {
        self.last_flush
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn aggregate_size(&self) -> usize {
        self.aggregate_size
    }

    #[must_use]
    pub fn records(&self) -> &[ConvertedRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{decode, EventTime};
    use serde_json::json;

    fn record(message: &str) -> ConvertedRecord {
        let contents = decode(json!({ "message": message }).to_string().as_bytes()).unwrap();
        ConvertedRecord::with_time(contents, EventTime { secs: 1, nanos: 0 }).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_tracks_size_and_order() {
        let mut aggregator = Aggregator::default();
        let first = record("first");
        let second = record("second");
        let expected = first.serialized_size() + second.serialized_size();

        aggregator.append(first.clone());
        aggregator.append(second.clone());

        assert_eq!(aggregator.len(), 2);
        assert_eq!(aggregator.aggregate_size(), expected);
        assert_eq!(aggregator.records(), &[first, second]);
        assert!(!aggregator.is_flush_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_is_never_ready() {
        let aggregator = Aggregator::default();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!aggregator.is_flush_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_interval() {
        let mut aggregator = Aggregator::default();
        aggregator.append(record("hello"));

        tokio::time::advance(Duration::from_millis(299)).await;
        assert!(!aggregator.is_flush_ready());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(aggregator.is_flush_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_flushed_restarts_clock() {
        let mut aggregator = Aggregator::default();
        aggregator.append(record("hello"));
        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(aggregator.is_flush_ready());

        aggregator.mark_flushed();
        assert!(!aggregator.is_flush_ready());
        assert!(aggregator.is_flush_ready_at(aggregator.last_flush() + Duration::from_millis(300)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_at_entry_limit() {
        let mut aggregator = Aggregator::default();
        for _ in 0..constants::MAX_BATCH_ENTRIES - 1 {
            aggregator.append(record("x"));
        }
        assert!(!aggregator.is_flush_ready());

        aggregator.append(record("x"));
        assert_eq!(aggregator.len(), 4095);
        assert!(aggregator.is_flush_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_at_byte_limit() {
        let mut aggregator = Aggregator::default();
        let half = record(&"x".repeat(constants::MIB));
        let size = half.serialized_size();
        assert!(size > constants::MIB && size < constants::MAX_BATCH_BYTES);

        aggregator.append(half.clone());
        assert!(!aggregator.is_flush_ready());

        aggregator.append(half);
        assert_eq!(aggregator.aggregate_size(), 2 * size);
        assert!(aggregator.is_flush_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_exactly_at_byte_limit() {
        let single = record("hello");
        let mut aggregator = Aggregator::new(single.serialized_size(), 100, Duration::from_secs(60));
        aggregator.append(single);
        assert!(aggregator.is_flush_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_exactly_at_default_byte_limit() {
        let mut aggregator = Aggregator::default();
        // `{"message":""}` is 14 bytes
        let one_mib = record(&"x".repeat(constants::MIB - 14));
        assert_eq!(one_mib.serialized_size(), constants::MIB);

        aggregator.append(one_mib.clone());
        assert!(!aggregator.is_flush_ready());

        aggregator.append(one_mib);
        assert_eq!(aggregator.aggregate_size(), constants::MAX_BATCH_BYTES);
        assert!(aggregator.is_flush_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_until_due() {
        let mut aggregator = Aggregator::default();
        assert_eq!(aggregator.time_until_due_at(Instant::now()), None);

        aggregator.append(record("a"));
        tokio::time::advance(Duration::from_millis(120)).await;
        assert_eq!(
            aggregator.time_until_due_at(Instant::now()),
            Some(Duration::from_millis(180))
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(aggregator.time_until_due_at(Instant::now()), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_empties_without_touching_clock() {
        let mut aggregator = Aggregator::default();
        let before = aggregator.last_flush();
        aggregator.append(record("a"));
        aggregator.append(record("b"));
        tokio::time::advance(Duration::from_millis(10)).await;

        let batch = aggregator.drain();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.records[0].contents()["message"], json!("a"));
        assert_eq!(batch.records[1].contents()["message"], json!("b"));
        assert!(batch.aggregate_size > 0);
        assert!(aggregator.is_empty());
        assert_eq!(aggregator.aggregate_size(), 0);
        assert_eq!(aggregator.last_flush(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_discards() {
        let mut aggregator = Aggregator::default();
        aggregator.append(record("a"));
        aggregator.reset();
        assert!(aggregator.is_empty());
        assert_eq!(aggregator.aggregate_size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_from_config() {
        let config = PipelineConfig {
            max_batch_entries: 2,
            ..PipelineConfig::default()
        };
        let mut aggregator = Aggregator::from_config(&config);
        aggregator.append(record("a"));
        assert!(!aggregator.is_flush_ready());
        aggregator.append(record("b"));
        assert!(aggregator.is_flush_ready());
    }
}
