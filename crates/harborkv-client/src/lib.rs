//! Async client for the harborkv wire protocol. Covers the request/reply
//! flow plus a dedicated subscriber mode for pub/sub streams.

use bytes::BytesMut;
use harborkv_proto::{encode_argv, read_value, ProtoError, Resp};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, ToSocketAddrs};

const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

pub struct Client {
    stream: TcpStream,
    buf: BytesMut,
}

impl Client {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ProtoError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(4096),
        })
    }

    /// Send one command and return its reply verbatim.
    pub async fn command<S: AsRef<str>>(&mut self, argv: &[S]) -> Result<Resp, ProtoError> {
        let frame = encode_argv(argv);
        self.stream.write_all(&frame).await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Resp, ProtoError> {
        match read_value(&mut self.stream, MAX_FRAME_BYTES, &mut self.buf).await? {
            Some((value, _raw)) => Ok(value),
            None => Err(ProtoError::Malformed("server closed the connection")),
        }
    }

    fn expect_ok(reply: Resp) -> Result<(), ProtoError> {
        match reply {
            Resp::Simple(_) => Ok(()),
            other => Err(ProtoError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    pub async fn auth(&mut self, password: &str) -> Result<(), ProtoError> {
        Self::expect_ok(self.command(&["AUTH", password]).await?)
    }

    pub async fn auth_user(&mut self, username: &str, password: &str) -> Result<(), ProtoError> {
        Self::expect_ok(self.command(&["AUTH", username, password]).await?)
    }

    pub async fn set(&mut self, key: &str, value: &str) -> Result<(), ProtoError> {
        Self::expect_ok(self.command(&["SET", key, value]).await?)
    }

    pub async fn get(&mut self, key: &str) -> Result<Option<String>, ProtoError> {
        match self.command(&["GET", key]).await? {
            Resp::Bulk(b) => Ok(Some(
                String::from_utf8(b.to_vec()).map_err(|_| ProtoError::InvalidUtf8)?,
            )),
            Resp::Null => Ok(None),
            other => Err(ProtoError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    pub async fn del(&mut self, key: &str) -> Result<i64, ProtoError> {
        match self.command(&["DEL", key]).await? {
            Resp::Integer(n) => Ok(n),
            other => Err(ProtoError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    pub async fn publish(&mut self, channel: &str, message: &str) -> Result<i64, ProtoError> {
        match self.command(&["PUBLISH", channel, message]).await? {
            Resp::Integer(n) => Ok(n),
            other => Err(ProtoError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    /// Enter subscriber mode. The returned stream yields pushed messages;
    /// the subscription confirmations are consumed here.
    pub async fn subscribe<S: AsRef<str>>(
        mut self,
        channels: &[S],
        with_pattern: bool,
    ) -> Result<Subscriber, ProtoError> {
        let command = if with_pattern { "PSUBSCRIBE" } else { "SUBSCRIBE" };
        let mut argv = vec![command.to_string()];
        argv.extend(channels.iter().map(|c| c.as_ref().to_string()));
        let reply = self.command(&argv).await?;
        match reply {
            Resp::Simple(_) | Resp::Array(_) => Ok(Subscriber {
                stream: self.stream,
                buf: self.buf,
            }),
            other => Err(ProtoError::UnexpectedReply(format!("{other:?}"))),
        }
    }
}

/// A connection in subscriber mode.
pub struct Subscriber {
    stream: TcpStream,
    buf: BytesMut,
}

/// One pushed message: the channel name or pattern it matched, plus the
/// payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub label: String,
    pub payload: String,
}

impl Subscriber {
    /// Wait for the next `[message, label, payload]` push frame.
    pub async fn next_message(&mut self) -> Result<Message, ProtoError> {
        loop {
            let value = match read_value(&mut self.stream, MAX_FRAME_BYTES, &mut self.buf).await? {
                Some((value, _raw)) => value,
                None => return Err(ProtoError::Malformed("server closed the connection")),
            };
            let Resp::Array(items) = &value else {
                continue;
            };
            if items.len() != 3 {
                continue;
            }
            let (Resp::Bulk(kind), Resp::Bulk(label), Resp::Bulk(payload)) =
                (&items[0], &items[1], &items[2])
            else {
                continue;
            };
            if kind.as_ref() != b"message" {
                continue;
            }
            return Ok(Message {
                label: String::from_utf8(label.to_vec()).map_err(|_| ProtoError::InvalidUtf8)?,
                payload: String::from_utf8(payload.to_vec())
                    .map_err(|_| ProtoError::InvalidUtf8)?,
            });
        }
    }
}
