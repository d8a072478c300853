// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Size-tier classification of popped records and redirection of large
//! records to the object store.
//!
//! # Tiers
//!
//! | Tier | Raw size | Handling |
//! |---|---|---|
//! | [`SizeTier::Empty`] | `0` | nothing is appended |
//! | [`SizeTier::Small`] | `<= 1 MiB` | decoded as-is |
//! | [`SizeTier::Medium`] | `<= 3 MiB` | the pending batch is flushed first, then decoded as-is |
//! | [`SizeTier::Large`] | `> 3 MiB` | oversized fields redacted, original uploaded |
//!
//! The medium-tier flush is performed by the drain loop, which owns the
//! flusher; this module only reports the tier.
//!
//! A failed upload never drops the record: it is delivered with a diagnostic
//! in place of the object reference.

use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::constants::{
    MEDIUM_RECORD_MAX_BYTES, OBJECT_KEY_SUFFIX, OVERFLOW_EXCEPTION_FIELD,
    OVERFLOW_FAILED_MESSAGE, OVERFLOW_OBJECT_FIELD, REDACTED_PLACEHOLDER, SIZE_SENSITIVE_FIELDS,
    SMALL_RECORD_MAX_BYTES,
};
use crate::error::{DecodeError, StorageError};
use crate::object_store::ObjectStore;
use crate::record::{decode, ConvertedRecord, LogRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeTier {
    Empty,
    Small,
    Medium,
    Large,
}

impl SizeTier {
    #[must_use]
    pub fn classify(raw_len: usize) -> Self {
        match raw_len {
            0 => SizeTier::Empty,
            len if len <= SMALL_RECORD_MAX_BYTES => SizeTier::Small,
            len if len <= MEDIUM_RECORD_MAX_BYTES => SizeTier::Medium,
            _ => SizeTier::Large,
        }
    }
}

/// Generates a collision-resistant object id: a UUIDv7 (millisecond
/// timestamp followed by random bits) in lowercase hex without hyphens.
#[must_use]
pub fn generate_object_id() -> String {
    Uuid::now_v7().simple().to_string()
}

pub struct OverflowHandler {
    store: Option<Arc<dyn ObjectStore>>,
}

impl OverflowHandler {
    /// `store` is `None` when no usable object store is configured; large
    /// records are then delivered degraded.
    #[must_use]
    pub fn new(store: Option<Arc<dyn ObjectStore>>) -> Self {
        OverflowHandler { store }
    }

    #[must_use]
    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Classifies and converts `raw` in one step.
    ///
    /// Callers batching records must flush their pending batch when the tier
    /// is [`SizeTier::Medium`]; use [`SizeTier::classify`] and
    /// [`OverflowHandler::prepare`] separately to do so.
    pub async fn classify_and_prepare(
        &self,
        raw: &Bytes,
    ) -> Result<Option<ConvertedRecord>, DecodeError> {
        self.prepare(SizeTier::classify(raw.len()), raw).await
    }

    /// Converts `raw` according to its tier. Returns `None` for empty payloads.
    pub async fn prepare(
        &self,
        tier: SizeTier,
        raw: &Bytes,
    ) -> Result<Option<ConvertedRecord>, DecodeError> {
        match tier {
            SizeTier::Empty => Ok(None),
            SizeTier::Small | SizeTier::Medium => {
                ConvertedRecord::from_record(decode(raw)?).map(Some)
            }
            SizeTier::Large => {
                let record = self.redirect(decode(raw)?, raw).await;
                ConvertedRecord::from_record(record).map(Some)
            }
        }
    }

    async fn redirect(&self, mut record: LogRecord, raw: &Bytes) -> LogRecord {
        let redacted = redact_oversized_fields(&mut record);
        debug!(
            "DRAIN | Redirecting {} byte record to object store, redacted fields: {:?}",
            raw.len(),
            redacted
        );

        let id = generate_object_id();
        match self.upload(&id, raw.clone()).await {
            Ok(()) => {
                record.insert(OVERFLOW_OBJECT_FIELD.to_string(), Value::String(id));
            }
            Err(err) => {
                warn!("DRAIN | Failed to store large record, delivering it degraded: {err}");
                record.insert(
                    "message".to_string(),
                    Value::String(OVERFLOW_FAILED_MESSAGE.to_string()),
                );
                record.insert(
                    OVERFLOW_EXCEPTION_FIELD.to_string(),
                    Value::String(err.to_string()),
                );
            }
        }
        record
    }

    async fn upload(&self, id: &str, body: Bytes) -> Result<(), StorageError> {
        let Some(store) = &self.store else {
            return Err(StorageError::Unavailable);
        };
        let key = format!("{id}{OBJECT_KEY_SUFFIX}");
        store.put(&key, body).await
    }
}

/// Replaces each size-sensitive field longer than 1 MiB with the placeholder
/// and returns the names of the replaced fields.
///
/// Strings are measured by their byte length, other values by the length of
/// their JSON encoding.
pub fn redact_oversized_fields(record: &mut LogRecord) -> Vec<&'static str> {
    let mut redacted = Vec::new();
    for field in SIZE_SENSITIVE_FIELDS {
        let Some(value) = record.get_mut(field) else {
            continue;
        };
        if field_len(value) > SMALL_RECORD_MAX_BYTES {
            *value = Value::String(REDACTED_PLACEHOLDER.to_string());
            redacted.push(field);
        }
    }
    redacted
}

fn field_len(value: &Value) -> usize {
    match value {
        Value::String(s) => s.len(),
        other => serde_json::to_vec(other).map(|v| v.len()).unwrap_or(0),
    }
}
