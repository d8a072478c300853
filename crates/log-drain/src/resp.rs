// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Minimal RESP2 client: just enough of the Redis protocol to authenticate,
//! select a database and pop from a list.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::SourceError;

#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    buf: BytesMut,
}

impl Connection {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, SourceError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(4096),
        })
    }

    /// Sends one command and waits for its reply.
    pub async fn execute<T>(&mut self, args: &[&[u8]]) -> Result<T, SourceError>
    where
        T: FromFrame,
    {
        self.stream.write_all(&encode_command(args)).await?;

        self.buf.clear();
        loop {
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Err(SourceError::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }

            match Frame::parse(&self.buf)? {
                Some(Frame::Error(err)) => {
                    if err.starts_with("ERR unknown command") {
                        return Err(SourceError::UnknownCommand(err.to_string()));
                    }
                    return Err(SourceError::Server(err.to_string()));
                }
                Some(frame) => return T::from_frame(frame),
                // need more data
                None => continue,
            }
        }
    }
}

/// Encodes a command as a RESP array of bulk strings.
#[must_use]
pub fn encode_command(args: &[&[u8]]) -> Bytes {
    let mut buf = BytesMut::with_capacity(64);
    buf.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        buf.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.extend_from_slice(arg);
        buf.extend_from_slice(b"\r\n");
    }
    buf.freeze()
}

/// A RESP2 frame.
#[cfg_attr(test, derive(PartialEq))]
#[derive(Clone, Debug)]
pub enum Frame<'a> {
    Simple(&'a str),
    Error(&'a str),
    Integer(i64),
    Bulk(&'a [u8]),
    Null,
    Array(Vec<Frame<'a>>),
}

impl Frame<'_> {
    /// Parses one frame from the start of `buf`, borrowing from it.
    ///
    /// Returns `Ok(None)` when `buf` holds an incomplete frame.
    ///
    /// https://redis.io/docs/latest/develop/reference/protocol-spec/
    #[inline]
    pub fn parse(buf: &[u8]) -> Result<Option<Frame<'_>>, SourceError> {
        Frame::parse_with_pos(buf, &mut 0)
    }

    fn parse_with_pos<'a>(
        buf: &'a [u8],
        pos: &mut usize,
    ) -> Result<Option<Frame<'a>>, SourceError> {
        // the shortest frame is `:0\r\n`
        if buf.len() < *pos + 4 {
            return Ok(None);
        }

        let typ = buf[*pos];
        *pos += 1;

        let Some(line) = read_line(buf, pos) else {
            return Ok(None);
        };

        match typ {
            b'+' => Ok(Some(Frame::Simple(utf8(line)?))),
            b'-' => Ok(Some(Frame::Error(utf8(line)?))),
            b':' => Ok(Some(Frame::Integer(utf8(line)?.parse::<i64>()?))),
            b'$' => {
                if line == b"-1" {
                    return Ok(Some(Frame::Null));
                }
                let len = utf8(line)?.parse::<usize>()?;
                if buf.len() < *pos + len + 2 {
                    return Ok(None);
                }
                let data = &buf[*pos..*pos + len];
                *pos += len + 2;
                Ok(Some(Frame::Bulk(data)))
            }
            b'*' => {
                if line == b"-1" {
                    return Ok(Some(Frame::Null));
                }
                let len = utf8(line)?.parse::<usize>()?;
                let mut frames = Vec::with_capacity(len);
                for _ in 0..len {
                    match Frame::parse_with_pos(buf, pos)? {
                        Some(frame) => frames.push(frame),
                        None => return Ok(None),
                    }
                }
                Ok(Some(Frame::Array(frames)))
            }
            _ => Err(SourceError::UnexpectedFrame),
        }
    }
}

#[inline]
fn read_line<'a>(buf: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    let start = *pos;
    let len = buf[start..]
        .windows(2)
        .position(|window| window == b"\r\n")?;
    *pos += len + 2;
    Some(&buf[start..start + len])
}

fn utf8(bytes: &[u8]) -> Result<&str, SourceError> {
    std::str::from_utf8(bytes).map_err(|err| SourceError::Parse(err.to_string()))
}

pub trait FromFrame: Sized {
    fn from_frame(frame: Frame) -> Result<Self, SourceError>;
}

impl FromFrame for () {
    fn from_frame(_: Frame) -> Result<(), SourceError> {
        Ok(())
    }
}

impl FromFrame for String {
    fn from_frame(frame: Frame) -> Result<Self, SourceError> {
        match frame {
            Frame::Simple(s) => Ok(s.to_string()),
            Frame::Bulk(b) => Ok(utf8(b)?.to_string()),
            _ => Err(SourceError::UnexpectedFrame),
        }
    }
}

impl FromFrame for Option<Bytes> {
    fn from_frame(frame: Frame) -> Result<Self, SourceError> {
        match frame {
            Frame::Bulk(b) => Ok(Some(Bytes::copy_from_slice(b))),
            Frame::Null => Ok(None),
            _ => Err(SourceError::UnexpectedFrame),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn parse() {
        for (input, expected) in [
            ("+OK\r\n", Ok(Some(Frame::Simple("OK")))),
            ("+OK\r", Ok(None)),
            ("+OK", Ok(None)),
            ("+", Ok(None)),
            (
                "-ERR unknown command 'asdf'\r\n",
                Ok(Some(Frame::Error("ERR unknown command 'asdf'"))),
            ),
            (":1000\r\n", Ok(Some(Frame::Integer(1000)))),
            ("$5\r\nhello\r\n", Ok(Some(Frame::Bulk(b"hello")))),
            ("$5\r\nhel", Ok(None)),
            ("$0\r\n\r\n", Ok(Some(Frame::Bulk(b"")))),
            ("$-1\r\n", Ok(Some(Frame::Null))),
            ("*-1\r\n", Ok(Some(Frame::Null))),
            ("*0\r\n", Ok(Some(Frame::Array(vec![])))),
            (
                "*2\r\n$5\r\nhello\r\n:7\r\n",
                Ok(Some(Frame::Array(vec![
                    Frame::Bulk(b"hello"),
                    Frame::Integer(7),
                ]))),
            ),
            ("*2\r\n$5\r\nhello\r\n", Ok(None)),
            ("?what\r\n", Err(SourceError::UnexpectedFrame)),
        ] {
            let got = Frame::parse(input.as_bytes());
            assert_eq!(got, expected, "incorrect input: {:?}", input);
        }
    }

    #[test]
    fn bulk_frames_may_contain_crlf() {
        let got = Frame::parse(b"$4\r\na\r\nb\r\n").unwrap();
        assert_eq!(got, Some(Frame::Bulk(b"a\r\nb")));
    }

    #[test]
    fn encode() {
        let encoded = encode_command(&[b"LPOP", b"RedisMonolog"]);
        assert_eq!(&encoded[..], b"*2\r\n$4\r\nLPOP\r\n$12\r\nRedisMonolog\r\n");
    }

    #[test]
    fn option_bytes_from_frame() {
        assert_eq!(
            Option::<Bytes>::from_frame(Frame::Bulk(b"x")).unwrap(),
            Some(Bytes::from_static(b"x"))
        );
        assert_eq!(Option::<Bytes>::from_frame(Frame::Null).unwrap(), None);
        assert!(Option::<Bytes>::from_frame(Frame::Integer(1)).is_err());
    }

    #[tokio::test]
    async fn execute_against_fake_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 256];
            let n = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"*2\r\n$4\r\nLPOP\r\n$1\r\nq\r\n");
            // reply split across two writes
            socket.write_all(b"$5\r\nhe").await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            socket.write_all(b"llo\r\n").await.unwrap();

            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0);
            socket.write_all(b"-WRONGTYPE bad key\r\n").await.unwrap();
        });

        let mut conn = Connection::connect(addr).await.unwrap();
        let popped: Option<Bytes> = conn.execute(&[b"LPOP", b"q"]).await.unwrap();
        assert_eq!(popped, Some(Bytes::from_static(b"hello")));

        let err = conn
            .execute::<Option<Bytes>>(&[b"LPOP", b"q"])
            .await
            .unwrap_err();
        assert_eq!(err, SourceError::Server("WRONGTYPE bad key".to_string()));

        server.await.unwrap();
    }
}
