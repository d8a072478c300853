// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log records as they move through the pipeline.
//!
//! A payload popped from the queue is decoded into a [`LogRecord`] (a JSON
//! object), optionally redacted by the overflow handler, and then converted
//! into a [`ConvertedRecord`] carrying its event time and serialized size.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::constants::EVENT_TIME_FIELD;
use crate::error::DecodeError;

/// A decoded log record: field name to JSON value.
pub type LogRecord = Map<String, Value>;

/// Decodes a queue payload into a [`LogRecord`].
///
/// The payload must be a JSON object; anything else is a [`DecodeError`].
pub fn decode(raw: &[u8]) -> Result<LogRecord, DecodeError> {
    match serde_json::from_slice::<Value>(raw)? {
        Value::Object(record) => Ok(record),
        Value::Null => Err(DecodeError::NotAnObject("null")),
        Value::Bool(_) => Err(DecodeError::NotAnObject("a boolean")),
        Value::Number(_) => Err(DecodeError::NotAnObject("a number")),
        Value::String(_) => Err(DecodeError::NotAnObject("a string")),
        Value::Array(_) => Err(DecodeError::NotAnObject("an array")),
    }
}

/// Event time of a record, in seconds and nanoseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventTime {
    pub secs: u64,
    pub nanos: u32,
}

impl EventTime {
    #[must_use]
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    /// Parses a `microTime` value: fractional epoch seconds, either as a JSON
    /// number or as a numeric string. Precision is kept to the microsecond.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let secs = match value {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        let micros = (secs * 1_000_000.0).round();
        if micros > u64::MAX as f64 {
            return None;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let micros = micros as u64;
        Some(Self::from(UNIX_EPOCH + Duration::from_micros(micros)))
    }
}

impl From<SystemTime> for EventTime {
    fn from(time: SystemTime) -> Self {
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            secs: since_epoch.as_secs(),
            nanos: since_epoch.subsec_nanos(),
        }
    }
}

/// A record prepared for delivery.
///
/// The serialized size is computed once, when the record is converted, and is
/// what the aggregator sums into its running byte total.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedRecord {
    time: EventTime,
    contents: LogRecord,
    serialized_size: usize,
}

impl ConvertedRecord {
    /// Converts a decoded record, reading its event time from `microTime` and
    /// falling back to the current time.
    pub fn from_record(contents: LogRecord) -> Result<Self, DecodeError> {
        let time = contents
            .get(EVENT_TIME_FIELD)
            .and_then(EventTime::from_value)
            .unwrap_or_else(EventTime::now);
        Self::with_time(contents, time)
    }

    pub fn with_time(contents: LogRecord, time: EventTime) -> Result<Self, DecodeError> {
        let serialized_size = serde_json::to_vec(&contents)?.len();
        Ok(Self {
            time,
            contents,
            serialized_size,
        })
    }

    #[must_use]
    pub fn time(&self) -> EventTime {
        self.time
    }

    #[must_use]
    pub fn contents(&self) -> &LogRecord {
        &self.contents
    }

    /// Byte length of the JSON encoding of the field mapping.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        self.serialized_size
    }
}

/// Serializes as the field mapping plus `__time__` / `__time_ns__`, the shape
/// posted to the ingestion service and written to dead-letter objects.
impl Serialize for ConvertedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.contents.len() + 2))?;
        map.serialize_entry("__time__", &self.time.secs)?;
        map.serialize_entry("__time_ns__", &self.time.nanos)?;
        for (key, value) in &self.contents {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
