// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ingestion service client.
//!
//! A batch is sent as a single log group: one request carrying every record of
//! the batch in arrival order.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Serialize;
use std::io::Write;
use std::time::Duration;
use tracing::debug;
use zstd::stream::write::Encoder;

use crate::config::IntakeConfig;
use crate::error::SinkError;
use crate::record::ConvertedRecord;

const API_VERSION: &str = "0.6.0";

/// Project, log store and topic a batch is delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTarget {
    pub project: String,
    pub store: String,
    pub topic: String,
}

impl From<&IntakeConfig> for LogTarget {
    fn from(config: &IntakeConfig) -> Self {
        LogTarget {
            project: config.project.clone(),
            store: config.log_store.clone(),
            topic: config.topic.clone(),
        }
    }
}

/// One ingestion request.
#[derive(Debug, Clone, Copy)]
pub struct LogGroup<'a> {
    pub target: &'a LogTarget,
    pub records: &'a [ConvertedRecord],
}

#[derive(Serialize)]
struct LogGroupBody<'a> {
    #[serde(rename = "__topic__")]
    topic: &'a str,
    #[serde(rename = "__logs__")]
    logs: &'a [ConvertedRecord],
}

impl LogGroup<'_> {
    /// JSON body of the ingestion request.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&LogGroupBody {
            topic: &self.target.topic,
            logs: self.records,
        })
    }
}

#[async_trait]
pub trait LogSink: Send + Sync {
    /// Delivers every record of `group` in one call.
    async fn send(&self, group: LogGroup<'_>) -> Result<(), SinkError>;
}

/// Posts log groups to `{endpoint}/logstores/{store}/logs` over HTTP.
#[derive(Debug, Clone)]
pub struct IntakeClient {
    client: reqwest::Client,
    endpoint: String,
    access_key: String,
    access_secret: String,
    use_compression: bool,
    compression_level: i32,
}

impl IntakeClient {
    pub fn new(config: &IntakeConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-log-apiversion", HeaderValue::from_static(API_VERSION));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(IntakeClient {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            access_key: config.access_key.clone(),
            access_secret: config.access_secret.clone(),
            use_compression: config.use_compression,
            compression_level: config.compression_level,
        })
    }

    fn url(&self, target: &LogTarget) -> String {
        format!("{}/logstores/{}/logs", self.endpoint, target.store)
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
        let mut encoder = Encoder::new(Vec::new(), self.compression_level)?;
        encoder.write_all(data)?;
        encoder.finish()
    }
}

#[async_trait]
impl LogSink for IntakeClient {
    async fn send(&self, group: LogGroup<'_>) -> Result<(), SinkError> {
        let raw = group
            .to_json()
            .map_err(|err| SinkError::Transport(Box::new(err)))?;
        let raw_size = raw.len();

        let mut req = self
            .client
            .post(self.url(group.target))
            .basic_auth(&self.access_key, Some(&self.access_secret))
            .header("x-log-project", &group.target.project)
            .header("x-log-bodyrawsize", raw_size);

        let body = if self.use_compression {
            req = req.header("x-log-compresstype", "zstd");
            self.encode(&raw)?
        } else {
            raw
        };

        let resp = req.body(body).send().await?;
        let status = resp.status();
        if status.is_success() {
            debug!(
                "DRAIN | Delivered {} records ({raw_size} bytes) to {}/{}",
                group.records.len(),
                group.target.project,
                group.target.store
            );
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(SinkError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
