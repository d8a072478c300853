// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Record sources feeding the drain loop.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use tracing::debug;

use crate::config::RedisConfig;
use crate::error::SourceError;
use crate::resp::Connection;

/// A FIFO queue of serialized log records.
#[async_trait]
pub trait RecordSource: Send {
    /// Pops the oldest record, or `None` when the queue is empty. Must not
    /// block waiting for a record to arrive.
    async fn pop(&mut self) -> Result<Option<Bytes>, SourceError>;

    /// Tears down the underlying connection; the next `pop` reconnects.
    fn reset_connection(&mut self);
}

/// Pops records from a Redis list with `LPOP`.
///
/// The connection is opened lazily on the first pop and after every
/// [`RecordSource::reset_connection`].
#[derive(Debug)]
pub struct RedisSource {
    config: RedisConfig,
    conn: Option<Connection>,
}

impl RedisSource {
    #[must_use]
    pub fn new(config: RedisConfig) -> Self {
        RedisSource { config, conn: None }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn connect(config: &RedisConfig) -> Result<Connection, SourceError> {
        debug!(
            "DRAIN | Connecting to redis at {}:{} (db {})",
            config.host, config.port, config.database
        );
        let mut conn = Connection::connect((config.host.as_str(), config.port)).await?;
        if let Some(password) = &config.password {
            conn.execute::<()>(&[b"AUTH", password.as_bytes()]).await?;
        }
        if config.database != 0 {
            let database = config.database.to_string();
            conn.execute::<()>(&[b"SELECT", database.as_bytes()]).await?;
        }
        Ok(conn)
    }
}

#[async_trait]
impl RecordSource for RedisSource {
    async fn pop(&mut self) -> Result<Option<Bytes>, SourceError> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => Self::connect(&self.config).await?,
        };
        let conn = self.conn.insert(conn);
        conn.execute::<Option<Bytes>>(&[b"LPOP", self.config.list_key.as_bytes()])
            .await
    }

    fn reset_connection(&mut self) {
        if self.conn.take().is_some() {
            debug!("DRAIN | Redis connection dropped");
        }
    }
}

/// An in-process queue, useful for embedding the pipeline behind another
/// transport and for tests.
#[derive(Debug, Default)]
pub struct MemorySource {
    records: VecDeque<Bytes>,
    resets: usize,
}

impl MemorySource {
    pub fn new<I, B>(records: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        MemorySource {
            records: records.into_iter().map(Into::into).collect(),
            resets: 0,
        }
    }

    pub fn push(&mut self, record: impl Into<Bytes>) {
        self.records.push_back(record.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of times [`RecordSource::reset_connection`] was called.
    #[must_use]
    pub fn resets(&self) -> usize {
        self.resets
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn pop(&mut self) -> Result<Option<Bytes>, SourceError> {
        Ok(self.records.pop_front())
    }

    fn reset_connection(&mut self) {
        self.resets += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn redis_config(port: u16) -> RedisConfig {
        RedisConfig {
            host: "127.0.0.1".to_string(),
            port,
            password: Some("secret".to_string()),
            database: 2,
            list_key: "logs".to_string(),
        }
    }

    async fn read_command(socket: &mut tokio::net::TcpStream) -> Vec<u8> {
        let mut buf = vec![0u8; 512];
        let n = socket.read(&mut buf).await.unwrap();
        buf.truncate(n);
        buf
    }

    #[tokio::test]
    async fn test_redis_source_handshake_and_pop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            assert_eq!(
                read_command(&mut socket).await,
                b"*2\r\n$4\r\nAUTH\r\n$6\r\nsecret\r\n"
            );
            socket.write_all(b"+OK\r\n").await.unwrap();

            assert_eq!(
                read_command(&mut socket).await,
                b"*2\r\n$6\r\nSELECT\r\n$1\r\n2\r\n"
            );
            socket.write_all(b"+OK\r\n").await.unwrap();

            assert_eq!(
                read_command(&mut socket).await,
                b"*2\r\n$4\r\nLPOP\r\n$4\r\nlogs\r\n"
            );
            socket
                .write_all(b"$16\r\n{\"message\":\"hi\"}\r\n")
                .await
                .unwrap();

            read_command(&mut socket).await;
            socket.write_all(b"$-1\r\n").await.unwrap();
        });

        let mut source = RedisSource::new(redis_config(port));
        assert!(!source.is_connected());

        let record = source.pop().await.unwrap();
        assert_eq!(record, Some(Bytes::from_static(b"{\"message\":\"hi\"}")));
        assert!(source.is_connected());

        assert_eq!(source.pop().await.unwrap(), None);

        source.reset_connection();
        assert!(!source.is_connected());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_redis_source_auth_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_command(&mut socket).await;
            socket
                .write_all(b"-WRONGPASS invalid username-password pair\r\n")
                .await
                .unwrap();
        });

        let mut source = RedisSource::new(redis_config(port));
        let err = source.pop().await.unwrap_err();
        assert!(matches!(err, SourceError::Server(_)));
        assert!(!source.is_connected());
    }

    #[tokio::test]
    async fn test_redis_source_connection_refused() {
        // bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut source = RedisSource::new(redis_config(port));
        assert!(matches!(source.pop().await, Err(SourceError::Io(_))));
    }

    #[tokio::test]
    async fn test_memory_source_is_fifo() {
        let mut source = MemorySource::new(vec!["a", "b"]);
        source.push("c");

        assert_eq!(source.pop().await.unwrap(), Some(Bytes::from("a")));
        assert_eq!(source.pop().await.unwrap(), Some(Bytes::from("b")));
        assert_eq!(source.pop().await.unwrap(), Some(Bytes::from("c")));
        assert_eq!(source.pop().await.unwrap(), None);

        source.reset_connection();
        assert_eq!(source.resets(), 1);
    }
}
