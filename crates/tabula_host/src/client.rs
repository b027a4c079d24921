//! Protocol client for a plugin's RPC port.
//!
//! Calls are issued one at a time over a single connection. A call that
//! times out or breaks mid-frame leaves the connection in an unknown state,
//! so it is dropped and the next call reconnects.

use std::net::SocketAddr;
use std::time::Duration;

use tabula_protocol::error::ProtocolError;
use tabula_protocol::{
    read_message, write_message, DiscoverRequest, DiscoverResponse, ErrorPayload, Message, OpCode,
    PublishRecord, PublishRequest, PublishSummary, Schema,
};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::debug;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("{call} timed out after {timeout:?}")]
    Timeout {
        call: &'static str,
        timeout: Duration,
    },

    #[error("Plugin error: {0}")]
    Remote(ErrorPayload),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, ClientError>;

pub struct PluginClient {
    addr: SocketAddr,
    stream: Option<TcpStream>,
    next_call_id: u64,
}

impl PluginClient {
    /// Connect to `addr`, giving up after `connect_timeout`.
    pub async fn connect(addr: SocketAddr, connect_timeout: Duration) -> Result<Self> {
        let mut client = Self {
            addr,
            stream: None,
            next_call_id: 1,
        };
        timeout(connect_timeout, client.ensure_connected())
            .await
            .map_err(|_| ClientError::Timeout {
                call: "connect",
                timeout: connect_timeout,
            })??;
        Ok(client)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn ensure_connected(&mut self) -> Result<&mut TcpStream> {
        if self.stream.is_none() {
            debug!("Connecting to plugin at {}", self.addr);
            let stream = TcpStream::connect(self.addr)
                .await
                .map_err(|source| ClientError::Connect {
                    addr: self.addr,
                    source,
                })?;
            stream.set_nodelay(true).map_err(ProtocolError::from)?;
            self.stream = Some(stream);
        }
        match self.stream.as_mut() {
            Some(stream) => Ok(stream),
            None => Err(ProtocolError::ConnectionClosed.into()),
        }
    }

    fn call_id(&mut self) -> u64 {
        let id = self.next_call_id;
        self.next_call_id += 1;
        id
    }

    /// Ask the plugin which schemas live behind `pattern`.
    pub async fn discover(&mut self, pattern: &str, deadline: Duration) -> Result<Vec<Schema>> {
        let call_id = self.call_id();
        let request = DiscoverRequest {
            pattern: pattern.to_string(),
        };

        let result = timeout(deadline, async {
            let stream = self.ensure_connected().await?;
            write_message(stream, &Message::json(OpCode::Discover, call_id, &request)?).await?;
            let reply = read_reply(stream, call_id).await?;
            match reply.opcode() {
                OpCode::Schemas => Ok(reply.decode::<DiscoverResponse>()?.schemas),
                OpCode::Err => Err(ClientError::Remote(reply.decode()?)),
                other => Err(ProtocolError::UnexpectedFrame {
                    expected: "Schemas",
                    got: other,
                }
                .into()),
            }
        })
        .await;

        match result {
            Ok(Ok(schemas)) => Ok(schemas),
            Ok(Err(e)) => {
                if !matches!(e, ClientError::Remote(_)) {
                    self.stream = None;
                }
                Err(e)
            }
            Err(_) => {
                self.stream = None;
                Err(ClientError::Timeout {
                    call: "discover",
                    timeout: deadline,
                })
            }
        }
    }

    /// Start a publish call. The whole stream must finish within `deadline`,
    /// which is also sent to the plugin.
    pub async fn publish(
        &mut self,
        pattern: &str,
        schema: Schema,
        deadline: Duration,
    ) -> Result<RecordStream<'_>> {
        let call_id = self.call_id();
        let request = PublishRequest {
            pattern: pattern.to_string(),
            schema,
            deadline_ms: Some(deadline.as_millis() as u64),
        };
        let until = Instant::now() + deadline;

        let sent = timeout_at(until, async {
            let stream = self.ensure_connected().await?;
            write_message(stream, &Message::json(OpCode::Publish, call_id, &request)?).await?;
            Ok::<_, ClientError>(())
        })
        .await;

        match sent {
            Ok(Ok(())) => Ok(RecordStream {
                client: self,
                call_id,
                until,
                timeout: deadline,
                summary: None,
                finished: false,
            }),
            Ok(Err(e)) => {
                self.stream = None;
                Err(e)
            }
            Err(_) => {
                self.stream = None;
                Err(ClientError::Timeout {
                    call: "publish",
                    timeout: deadline,
                })
            }
        }
    }
}

/// Server-streamed records of one publish call.
pub struct RecordStream<'a> {
    client: &'a mut PluginClient,
    call_id: u64,
    until: Instant,
    timeout: Duration,
    summary: Option<PublishSummary>,
    finished: bool,
}

impl RecordStream<'_> {
    /// Next record, or `None` after a normal end of stream.
    pub async fn next(&mut self) -> Result<Option<PublishRecord>> {
        if self.finished {
            return Ok(None);
        }

        let result = match self.client.stream.as_mut() {
            Some(stream) => timeout_at(self.until, read_reply(stream, self.call_id)).await,
            None => Ok(Err(ProtocolError::ConnectionClosed.into())),
        };

        let frame = match result {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => return Err(self.abort(e)),
            Err(_) => {
                let e = ClientError::Timeout {
                    call: "publish",
                    timeout: self.timeout,
                };
                return Err(self.abort(e));
            }
        };

        match frame.opcode() {
            OpCode::Record => match frame.decode() {
                Ok(record) => Ok(Some(record)),
                Err(e) => Err(self.abort(e.into())),
            },
            OpCode::EndOfStream => {
                self.finished = true;
                self.summary = Some(frame.decode()?);
                Ok(None)
            }
            OpCode::Err => {
                // Err is a clean terminator; the connection stays usable
                self.finished = true;
                Err(ClientError::Remote(frame.decode()?))
            }
            other => Err(self.abort(
                ProtocolError::UnexpectedFrame {
                    expected: "Record",
                    got: other,
                }
                .into(),
            )),
        }
    }

    /// Trailer of a completed stream.
    pub fn summary(&self) -> Option<PublishSummary> {
        self.summary
    }

    fn abort(&mut self, error: ClientError) -> ClientError {
        self.finished = true;
        self.client.stream = None;
        error
    }
}

impl Drop for RecordStream<'_> {
    fn drop(&mut self) {
        // Unread frames would be mistaken for replies to the next call
        if !self.finished {
            self.client.stream = None;
        }
    }
}

async fn read_reply(stream: &mut TcpStream, call_id: u64) -> Result<Message> {
    let reply = read_message(stream)
        .await?
        .ok_or(ProtocolError::ConnectionClosed)?;
    if reply.call_id() != call_id {
        return Err(ProtocolError::CallIdMismatch {
            expected: call_id,
            got: reply.call_id(),
        }
        .into());
    }
    Ok(reply)
}
