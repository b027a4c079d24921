//! Plugin RPC server
//!
//! Design principles:
//! - Listener bound before anything is printed, so the handshake port is live
//! - run() consumes self and returns once the cancellation token fires
//! - One task per connection; calls on a connection are served in order
//! - Every Publish call ends with exactly one EndOfStream or Err frame

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tabula_protocol::error::ProtocolError;
use tabula_protocol::{
    read_message, write_message, CancellationToken, DiscoverRequest, DiscoverResponse, ErrorKind,
    ErrorPayload, Message, OpCode, PublishRequest,
};
use tokio::io::AsyncWrite;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::PluginConfig;
use crate::discovery::DiscoveryEngine;
use crate::publisher::{PublishEvent, Publisher};

/// Time connections get to flush their final frames after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Shared handler state, one per process.
#[derive(Debug)]
struct Handlers {
    discovery: DiscoveryEngine,
    publisher: Publisher,
}

pub struct PluginServer {
    listener: TcpListener,
    handlers: Arc<Handlers>,
    cancel: CancellationToken,
}

impl PluginServer {
    /// Bind the listener. Nothing is served until [`run`](Self::run).
    pub async fn bind(config: &PluginConfig, cancel: CancellationToken) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", config.bind_addr))?;

        let handlers = Handlers {
            discovery: DiscoveryEngine::new(config.inference.clone(), config.source),
            publisher: Publisher::new(config.inference.clone(), config.source),
        };

        Ok(Self {
            listener,
            handlers: Arc::new(handlers),
            cancel,
        })
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self
            .listener
            .local_addr()
            .context("Listener has no local address")?
            .port())
    }

    /// Accept connections until cancelled.
    pub async fn run(self) -> Result<()> {
        info!("Serving on {}", self.listener.local_addr()?);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("Cancellation requested, closing listener");
                    break;
                }

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("Accepted connection from {}", peer);
                            let handlers = self.handlers.clone();
                            let cancel = self.cancel.clone();
                            connections.spawn(async move {
                                if let Err(e) = handle_connection(stream, handlers, cancel).await {
                                    if e.is_disconnect() {
                                        debug!("Connection from {} dropped: {}", peer, e);
                                    } else {
                                        warn!("Connection from {} failed: {}", peer, e);
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept failed: {}", e);
                        }
                    }
                }

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connection task panicked: {}", e);
                    }
                }
            }
        }

        // In-flight calls see the token and write their Err frames
        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("Aborting {} connection(s) after grace period", connections.len());
            connections.abort_all();
        }
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    handlers: Arc<Handlers>,
    cancel: CancellationToken,
) -> std::result::Result<(), ProtocolError> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            msg = read_message(&mut reader) => msg?,
        };
        let Some(msg) = msg else {
            return Ok(());
        };

        let call_id = msg.call_id();
        match msg.opcode() {
            OpCode::Discover => handle_discover(&mut writer, &handlers, call_id, &msg).await?,
            OpCode::Publish => {
                handle_publish(&mut writer, &handlers, &cancel, call_id, &msg).await?
            }
            other => {
                warn!("Unhandled opcode: {:?}", other);
                send_error(
                    &mut writer,
                    call_id,
                    ErrorKind::BadRequest,
                    format!("Unexpected opcode {:?}", other),
                )
                .await?;
            }
        }
    }
}

async fn handle_discover(
    writer: &mut OwnedWriteHalf,
    handlers: &Handlers,
    call_id: u64,
    msg: &Message,
) -> std::result::Result<(), ProtocolError> {
    let request: DiscoverRequest = match msg.decode() {
        Ok(request) => request,
        Err(e) => {
            return send_error(writer, call_id, ErrorKind::BadRequest, e.to_string()).await;
        }
    };
    info!("DISCOVER {} '{}'", call_id, request.pattern);

    match handlers.discovery.discover(&request.pattern).await {
        Ok(schemas) => {
            info!("DISCOVER {} -> {} schema(s)", call_id, schemas.len());
            send_message(writer, OpCode::Schemas, call_id, &DiscoverResponse { schemas }).await
        }
        Err(e) => {
            warn!("DISCOVER {} failed: {}", call_id, e);
            send_error(writer, call_id, e.kind(), e.to_string()).await
        }
    }
}

async fn handle_publish(
    writer: &mut OwnedWriteHalf,
    handlers: &Handlers,
    cancel: &CancellationToken,
    call_id: u64,
    msg: &Message,
) -> std::result::Result<(), ProtocolError> {
    let request: PublishRequest = match msg.decode() {
        Ok(request) => request,
        Err(e) => {
            return send_error(writer, call_id, ErrorKind::BadRequest, e.to_string()).await;
        }
    };
    info!(
        "PUBLISH {} '{}' ({} file(s))",
        call_id,
        request.schema.name,
        request.schema.settings.len()
    );

    let deadline = request
        .deadline_ms
        .map(|ms| Instant::now() + Duration::from_millis(ms));
    let mut events = handlers
        .publisher
        .stream(request, cancel.clone(), deadline);

    while let Some(event) = events.recv().await {
        match event {
            PublishEvent::Record(record) => {
                send_message(writer, OpCode::Record, call_id, &record).await?;
            }
            PublishEvent::End(summary) => {
                info!(
                    "PUBLISH {} done: {} record(s), {} skipped",
                    call_id, summary.records, summary.skipped_rows
                );
                return send_message(writer, OpCode::EndOfStream, call_id, &summary).await;
            }
            PublishEvent::Failed(e) => {
                warn!("PUBLISH {} failed: {}", call_id, e);
                return send_error(writer, call_id, e.kind(), e.to_string()).await;
            }
        }
    }

    // The producer always sends a terminal event unless it panicked
    send_error(
        writer,
        call_id,
        ErrorKind::Internal,
        "Publish stream ended without a terminator",
    )
    .await
}

async fn send_message<W, T>(
    writer: &mut W,
    opcode: OpCode,
    call_id: u64,
    payload: &T,
) -> std::result::Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let msg = Message::json(opcode, call_id, payload)?;
    write_message(writer, &msg).await
}

async fn send_error<W>(
    writer: &mut W,
    call_id: u64,
    kind: ErrorKind,
    message: impl Into<String>,
) -> std::result::Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    send_message(writer, OpCode::Err, call_id, &ErrorPayload::new(kind, message)).await
}
