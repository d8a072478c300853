// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Size thresholds and pipeline defaults.
//!
//! The byte limits classify every record popped from the queue into one of
//! three tiers and bound the size of a single ingestion request:
//!
//! - **Small** records (`<= 1 MiB`) are batched as-is.
//! - **Medium** records (`1 MiB < size <= 3 MiB`) force a flush of the pending
//!   batch before they are appended.
//! - **Large** records (`> 3 MiB`) are uploaded to the object store and
//!   replaced in the batch by a redacted stub.

use std::time::Duration;

/// One mebibyte.
pub const MIB: usize = 1_024 * 1_024;

/// Upper bound (inclusive) of the small tier, and the per-field limit above
/// which `context`, `extra` and `message` are redacted from large records.
pub const SMALL_RECORD_MAX_BYTES: usize = MIB;

/// Upper bound (inclusive) of the medium tier.
pub const MEDIUM_RECORD_MAX_BYTES: usize = 3 * MIB;

/// Aggregate batch size at which a flush is triggered.
pub const MAX_BATCH_BYTES: usize = 2 * MIB;

/// Number of records at which a flush is triggered.
///
/// The ingestion service accepts at most 4096 entries per request; flushing
/// at 4095 keeps the batch strictly under that limit.
pub const MAX_BATCH_ENTRIES: usize = 4095;

/// Maximum age of a non-empty batch, measured from the previous flush.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(300);

/// Send attempts per flush cycle before a batch is abandoned.
pub const MAX_SEND_ATTEMPTS: u32 = 3;

/// Consecutive empty polls before the drain loop sleeps.
pub const IDLE_POLLS_BEFORE_SLEEP: u32 = 3;

/// How long the drain loop sleeps once the idle threshold is reached.
pub const IDLE_SLEEP: Duration = Duration::from_secs(1);

/// Fields replaced by [`REDACTED_PLACEHOLDER`] when they exceed
/// [`SMALL_RECORD_MAX_BYTES`] inside a large record.
pub const SIZE_SENSITIVE_FIELDS: [&str; 3] = ["context", "extra", "message"];

/// Replacement value for redacted fields.
pub const REDACTED_PLACEHOLDER: &str = "too long to send to oss";

/// `message` value set on a large record whose upload failed.
pub const OVERFLOW_FAILED_MESSAGE: &str = "long log send to oss failed";

/// Field carrying the object id of an uploaded large record.
pub const OVERFLOW_OBJECT_FIELD: &str = "ossObject";

/// Field carrying the failure detail of a failed upload.
pub const OVERFLOW_EXCEPTION_FIELD: &str = "ossException";

/// Field read as the record's event time, in (fractional) epoch seconds.
pub const EVENT_TIME_FIELD: &str = "microTime";

/// Suffix appended to object ids to form object-store keys.
pub const OBJECT_KEY_SUFFIX: &str = ".log";
