// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Object store client used for oversized records and dead letters.
//!
//! [`OssStore`] talks to any S3-compatible service through the
//! `object_store` crate's S3 client, which signs every request with the
//! configured access key. The bucket is fixed when the client is built;
//! callers only name object keys.

use ::object_store::aws::AmazonS3Builder;
use ::object_store::path::Path;
use ::object_store::{ClientOptions, DynObjectStore, ObjectStore as _, PutPayload, RetryConfig};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::ObjectStoreConfig;
use crate::error::StorageError;

/// Uploads are made inline by the drain loop, so a store that keeps failing
/// is only retried briefly before the record is delivered degraded.
const MAX_PUT_RETRIES: usize = 2;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, body: Bytes) -> Result<(), StorageError>;
}

/// An S3-compatible bucket.
#[derive(Debug, Clone)]
pub struct OssStore {
    inner: Arc<DynObjectStore>,
}

impl OssStore {
    /// Wraps an already built store, for example
    /// `object_store::memory::InMemory`.
    #[must_use]
    pub fn new(inner: Arc<DynObjectStore>) -> Self {
        OssStore { inner }
    }

    /// Builds a client for `config.bucket` at `config.endpoint`.
    ///
    /// Returns [`StorageError::Unavailable`] when no endpoint is configured.
    pub fn from_config(config: &ObjectStoreConfig, timeout: Duration) -> Result<Self, StorageError> {
        let Some(raw_endpoint) = config.endpoint.as_deref() else {
            return Err(StorageError::Unavailable);
        };
        let endpoint = parse_endpoint(raw_endpoint)?;

        let mut builder = AmazonS3Builder::new()
            .with_endpoint(raw_endpoint.trim_end_matches('/'))
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key)
            .with_secret_access_key(&config.access_secret)
            .with_virtual_hosted_style_request(config.virtual_hosted_style)
            .with_allow_http(endpoint.scheme() == "http")
            .with_client_options(ClientOptions::new().with_timeout(timeout))
            .with_retry(RetryConfig {
                max_retries: MAX_PUT_RETRIES,
                retry_timeout: timeout,
                ..RetryConfig::default()
            });
        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }

        let store = builder.build().map_err(StorageError::Client)?;
        Ok(OssStore::new(Arc::new(store)))
    }
}

#[async_trait]
impl ObjectStore for OssStore {
    async fn put(&self, key: &str, body: Bytes) -> Result<(), StorageError> {
        let size = body.len();
        self.inner
            .put(&Path::from(key), PutPayload::from(body))
            .await
            .map_err(|source| StorageError::Put {
                key: key.to_string(),
                source,
            })?;
        debug!("DRAIN | Stored {size} bytes at {key}");
        Ok(())
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, StorageError> {
    let url = Url::parse(raw).map_err(|err| StorageError::InvalidEndpoint {
        endpoint: raw.to_string(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(StorageError::InvalidEndpoint {
            endpoint: raw.to_string(),
            reason: format!("unsupported scheme {scheme}"),
        }),
    }
}
