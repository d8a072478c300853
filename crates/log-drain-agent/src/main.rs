// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use log_drain::{
    config::Config,
    drain::{DrainLoop, Pipeline},
    intake::{IntakeClient, LogTarget},
    logger,
    object_store::{ObjectStore, OssStore},
    source::RedisSource,
};

const DEFAULT_LOG_LEVEL: &str = "info";
const ENV_FILE: &str = ".env";

#[tokio::main]
pub async fn main() -> ExitCode {
    // must run before the environment is read
    let env_file = load_env_file(Path::new(ENV_FILE));
    let config = Config::from_env();

    let log_level = config
        .as_ref()
        .map_or(DEFAULT_LOG_LEVEL, |c| c.log_level.as_str())
        .to_lowercase();
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter(&log_level))
        .event_format(logger::Formatter)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("LOG_DRAIN | ERROR | setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }
    debug!("DRAIN | Logging subsystem enabled");
    report_env_file(&env_file);

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("DRAIN | Error reading log drain configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let sink = match IntakeClient::new(&config.intake, config.http_timeout) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("DRAIN | Error creating ingestion client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let store: Option<Arc<dyn ObjectStore>> =
        match OssStore::from_config(&config.object_store, config.http_timeout) {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!(
                    "DRAIN | Object store disabled, large records will be delivered degraded: {e}"
                );
                None
            }
        };

    let pipeline = Pipeline::from_config(
        &config.pipeline,
        sink,
        LogTarget::from(&config.intake),
        store,
    );
    info!(
        "DRAIN | Draining redis list {} at {}:{} into {}/{}",
        config.redis.list_key,
        config.redis.host,
        config.redis.port,
        config.intake.project,
        config.intake.log_store
    );
    let drain = DrainLoop::new(
        RedisSource::new(config.redis.clone()),
        pipeline,
        &config.pipeline,
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    let stats = drain.run(cancel).await;
    info!(
        "DRAIN | Log drain stopped, delivered {} records in {} batches, abandoned {} records",
        stats.records_delivered, stats.batches_delivered, stats.records_abandoned
    );
    ExitCode::SUCCESS
}

/// Silences the HTTP stack below the requested level, falling back to
/// `info` when the level does not parse.
fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(format!("h2=off,hyper=off,rustls=off,{log_level}")).unwrap_or_else(|_| {
        EnvFilter::new(format!("h2=off,hyper=off,rustls=off,{DEFAULT_LOG_LEVEL}"))
    })
}

/// Exports the variables in `path` without overriding ones already set.
/// Returns `None` when there is no such file.
fn load_env_file(path: &Path) -> Result<Option<PathBuf>, dotenvy::Error> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(Some(path.to_path_buf())),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

fn report_env_file(env_file: &Result<Option<PathBuf>, dotenvy::Error>) {
    match env_file {
        Ok(Some(path)) => debug!("DRAIN | Loaded environment from {}", path.display()),
        Ok(None) => {}
        Err(e) => warn!("DRAIN | Ignoring unreadable env file: {e}"),
    }
}

/// Cancels `cancel` on SIGINT, or SIGTERM on unix.
async fn shutdown_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                warn!("DRAIN | Unable to listen for SIGTERM: {e}");
                wait_for_ctrl_c().await;
                cancel.cancel();
                return;
            }
        };
        tokio::select! {
            () = wait_for_ctrl_c() => {}
            _ = terminate.recv() => info!("DRAIN | Received SIGTERM, shutting down"),
        }
    }
    #[cfg(not(unix))]
    wait_for_ctrl_c().await;

    cancel.cancel();
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("DRAIN | Received SIGINT, shutting down"),
        Err(e) => {
            error!("DRAIN | Unable to listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    }
}
