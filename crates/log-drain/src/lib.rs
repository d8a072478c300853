// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Log Drain
//!
//! Drains serialized log records from a Redis list and forwards them, batched,
//! to a log-ingestion service. Records too large for the ingestion service are
//! redirected to an object store and replaced by a redacted stub.
//!
//! ## Pipeline
//!
//! ```text
//!   RecordSource (Redis LPOP)
//!          │
//!          v
//!   ┌─────────────────┐
//!   │ OverflowHandler │ (size tiers, redaction, object store)
//!   └────────┬────────┘
//!            v
//!   ┌─────────────────┐
//!   │   Aggregator    │ (2 MiB / 4095 records / 300 ms)
//!   └────────┬────────┘
//!            v
//!   ┌─────────────────┐
//!   │     Flusher     │ (bounded retry, abandon policy)
//!   └─────────────────┘
//! ```
//!
//! Everything runs inside a single task driven by [`drain::DrainLoop`]; a
//! flush blocks the next pop, so the in-flight batch never needs a lock.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]

/// Batch accumulation under size, count and time bounds
pub mod aggregator;

/// Environment-driven configuration
pub mod config;

/// Size thresholds and pipeline defaults
pub mod constants;

/// Abandon policy for batches that exhausted their send attempts
pub mod dead_letter;

/// The drain loop and the pipeline state it owns
pub mod drain;

/// Error taxonomy shared by the pipeline components
pub mod error;

/// Delivery of batches with bounded retry
pub mod flusher;

/// Ingestion service client
pub mod intake;

/// Custom tracing formatter
pub mod logger;

/// Object store client
pub mod object_store;

/// Size-tier classification and large-record redirection
pub mod overflow;

/// Decoded and converted log records
pub mod record;

/// Minimal RESP2 client used by the Redis source
pub mod resp;

/// Record sources
pub mod source;
