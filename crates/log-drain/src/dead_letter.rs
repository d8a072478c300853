// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! What happens to a batch whose send attempts are exhausted.

use bytes::Bytes;
use std::sync::Arc;
use tracing::{error, warn};

use crate::aggregator::Batch;
use crate::config::{AbandonPolicyKind, PipelineConfig};
use crate::error::StorageError;
use crate::object_store::ObjectStore;
use crate::overflow::generate_object_id;

/// How an abandoned batch is accounted for. Every abandonment is reported at
/// error level whatever the policy.
#[derive(Clone)]
pub enum AbandonPolicy {
    Drop,
    /// Writes the batch as a JSON array to `{prefix}/{id}.json`.
    DeadLetter {
        store: Arc<dyn ObjectStore>,
        prefix: String,
    },
}

impl std::fmt::Debug for AbandonPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbandonPolicy::Drop => f.write_str("Drop"),
            AbandonPolicy::DeadLetter { prefix, .. } => f
                .debug_struct("DeadLetter")
                .field("prefix", prefix)
                .finish_non_exhaustive(),
        }
    }
}

impl AbandonPolicy {
    /// Dead-lettering needs an object store; without one the policy falls
    /// back to [`AbandonPolicy::Drop`].
    #[must_use]
    pub fn from_config(config: &PipelineConfig, store: Option<Arc<dyn ObjectStore>>) -> Self {
        match (config.abandon_policy, store) {
            (AbandonPolicyKind::Drop, _) => AbandonPolicy::Drop,
            (AbandonPolicyKind::DeadLetter, Some(store)) => AbandonPolicy::DeadLetter {
                store,
                prefix: config.dead_letter_prefix.clone(),
            },
            (AbandonPolicyKind::DeadLetter, None) => {
                warn!("DRAIN | Dead-letter policy requested without an object store, abandoned batches will be dropped");
                AbandonPolicy::Drop
            }
        }
    }

    /// Disposes of `batch` after `attempts` failed sends.
    pub async fn abandon(&self, batch: Batch, attempts: u32) {
        match self {
            AbandonPolicy::Drop => {
                error!(
                    "DRAIN | Dropping batch of {} records ({} bytes) after {attempts} failed attempts",
                    batch.len(),
                    batch.aggregate_size
                );
            }
            AbandonPolicy::DeadLetter { store, prefix } => {
                let key = dead_letter_key(prefix);
                match write_dead_letter(store.as_ref(), &key, &batch).await {
                    Ok(()) => error!(
                        "DRAIN | Abandoned batch of {} records after {attempts} failed attempts, written to {key}",
                        batch.len()
                    ),
                    Err(err) => error!(
                        "DRAIN | Abandoned batch of {} records after {attempts} failed attempts, dead letter failed: {err}",
                        batch.len()
                    ),
                }
            }
        }
    }
}

fn dead_letter_key(prefix: &str) -> String {
    let id = generate_object_id();
    if prefix.is_empty() {
        format!("{id}.json")
    } else {
        format!("{prefix}/{id}.json")
    }
}

async fn write_dead_letter(
    store: &dyn ObjectStore,
    key: &str,
    batch: &Batch,
) -> Result<(), StorageError> {
    let body = serde_json::to_vec(&batch.records)?;
    store.put(key, Bytes::from(body)).await
}
