// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Errors raised by the drain pipeline.
//!
//! Only [`ConfigError`] is fatal, and only at startup. Everything else is
//! absorbed by the component that raised it or by the drain loop:
//!
//! | Error | Effect |
//! |---|---|
//! | [`DecodeError`] | the record is dropped |
//! | [`StorageError`] | the large record is delivered degraded |
//! | [`SinkError`] | counted toward the send-attempt cap |
//! | [`SourceError`] | the queue connection is torn down |

use std::error::Error as StdError;

/// A popped payload could not be turned into a log record.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed log record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("log record must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Writing to the object store failed.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("oss client invalid.")]
    Unavailable,

    #[error("invalid object store endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("failed to build object store client: {0}")]
    Client(#[source] object_store::Error),

    #[error("failed to store {key}: {source}")]
    Put {
        key: String,
        source: object_store::Error,
    },

    #[error("failed to encode object: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Sending a batch to the ingestion service failed.
///
/// Both variants are handled identically by the flusher: each one counts as a
/// spent attempt.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("ingestion service rejected the batch with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("ingestion transport error: {0}")]
    Transport(#[source] Box<dyn StdError + Send + Sync>),
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        SinkError::Transport(Box::new(err))
    }
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Transport(Box::new(err))
    }
}

/// The record source failed.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    UnknownCommand(String),

    #[error("server error {0}")]
    Server(String),

    #[error("parse frame failed, {0}")]
    Parse(String),

    #[error("unexpected frame type")]
    UnexpectedFrame,
}

impl From<std::num::ParseIntError> for SourceError {
    fn from(err: std::num::ParseIntError) -> Self {
        SourceError::Parse(err.to_string())
    }
}

#[cfg(test)]
impl PartialEq for SourceError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SourceError::Io(a), SourceError::Io(b)) => a.kind() == b.kind(),
            (SourceError::UnknownCommand(a), SourceError::UnknownCommand(b)) => a == b,
            (SourceError::Server(a), SourceError::Server(b)) => a == b,
            (SourceError::Parse(a), SourceError::Parse(b)) => a == b,
            (SourceError::UnexpectedFrame, SourceError::UnexpectedFrame) => true,
            _ => false,
        }
    }
}

/// Startup configuration is missing or malformed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// An error escaping a single drain-loop iteration.
#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Source(#[from] SourceError),
}
