// SPDX-License-Identifier: Apache-2.0

//! TCP server that streams tailed lines to clients.
//!
//! # Protocol
//!
//! Newline-delimited JSON, see [`protocol`].
//!
//! Client → Server:
//! - `subscribe` - Name the file to follow. Sent once.
//!
//! Server → Client:
//! - `options` - Greeting sent on connect
//! - `backlog` - Buffered lines, sent once after subscribing
//! - `line` - One live line
//! - `heartbeat` - Keep-alive
//! - `error` / `closed` - Final message before the server closes the socket

pub mod error;
pub mod protocol;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::select;
use tokio::task::JoinSet;
use tokio::time::{Instant, interval_at, timeout};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info, warn};

use crate::listener::Listener;
use crate::tail::{CloseReason, Subscription, TailEvent, TailRouter};

pub use error::{Result, ServerError};
pub use protocol::{ClientMessage, ServerMessage};

/// How long open connections get to finish after cancellation
const CONNECTION_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Server configuration
#[derive(Debug, Clone)]
pub struct TailServerConfig {
    /// Lines the client should keep on screen, sent in the greeting
    pub lines: usize,
    /// Interval between heartbeats on an idle subscription
    pub heartbeat_interval: Duration,
    /// Maximum size of the subscribe message
    pub max_request_size: usize,
}

impl Default for TailServerConfig {
    fn default() -> Self {
        Self {
            lines: 2000,
            heartbeat_interval: Duration::from_secs(30),
            max_request_size: 64 * 1024,
        }
    }
}

impl TailServerConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.heartbeat_interval.is_zero() {
            return Err("heartbeat interval must be positive".to_string());
        }
        if self.max_request_size == 0 {
            return Err("max request size must be positive".to_string());
        }
        Ok(())
    }
}

pub struct TailServer {
    router: Arc<TailRouter>,
    config: TailServerConfig,
}

impl TailServer {
    pub fn new(router: Arc<TailRouter>, config: TailServerConfig) -> Self {
        Self { router, config }
    }

    /// Accept connections until `cancel` fires, then wait briefly for open
    /// connections to say goodbye.
    pub async fn serve(
        self,
        listener: Listener,
        cancel: CancellationToken,
    ) -> std::result::Result<(), BoxError> {
        self.config.validate()?;
        let addr = listener.bound_address()?;
        let mut incoming = listener.into_stream()?;
        info!(endpoint = %addr, "Tail server listening");

        let mut connections = JoinSet::new();
        loop {
            select! {
                _ = cancel.cancelled() => break,
                conn = incoming.next() => match conn {
                    Some(Ok(stream)) => {
                        let router = Arc::clone(&self.router);
                        let config = self.config.clone();
                        let cancel = cancel.clone();
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, router, config, cancel).await {
                                debug!(error = %e, "Client connection ended");
                            }
                        });
                    }
                    Some(Err(e)) => error!(error = %e, "Failed to accept connection"),
                    None => break,
                },
                Some(res) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = res {
                        warn!(error = %e, "Connection task failed");
                    }
                },
            }
        }

        let open = connections.len();
        let drained = timeout(CONNECTION_DRAIN_TIMEOUT, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(open, "Connections did not close in time, aborting");
            connections.abort_all();
        }

        info!("Tail server stopped");
        Ok(())
    }
}

async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, msg: &ServerMessage) -> Result<()> {
    writer.write_all(&msg.encode()?).await?;
    Ok(())
}

/// Read one newline-terminated request. Returns None on EOF before any byte.
async fn read_request(
    reader: &mut BufReader<OwnedReadHalf>,
    max_request_size: usize,
) -> Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(max_request_size as u64)
        .read_until(b'\n', &mut buf)
        .await?;

    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') && n == max_request_size {
        return Err(ServerError::Protocol(format!(
            "request exceeds {} bytes",
            max_request_size
        )));
    }
    Ok(Some(buf))
}

async fn handle_connection(
    stream: TcpStream,
    router: Arc<TailRouter>,
    config: TailServerConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let peer = stream.peer_addr()?;
    debug!(%peer, "New tail client connected");

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    write_message(&mut writer, &ServerMessage::Options { lines: config.lines }).await?;

    let request = select! {
        _ = cancel.cancelled() => return Ok(()),
        request = read_request(&mut reader, config.max_request_size) => request,
    };
    let Some(request) = request? else {
        debug!(%peer, "Client closed before subscribing");
        return Ok(());
    };

    let namespace = match ClientMessage::decode(&request) {
        Ok(ClientMessage::Subscribe { namespace }) => namespace,
        Err(e) => {
            let message = e.to_string();
            write_message(&mut writer, &ServerMessage::Error { message }).await?;
            return Err(e);
        }
    };

    // Opening and seeding a new file is blocking work
    let subscribed = {
        let router = Arc::clone(&router);
        tokio::task::spawn_blocking(move || router.subscribe(namespace)).await?
    };
    let mut subscription = match subscribed {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(%peer, error = %e, "Subscription rejected");
            let message = e.to_string();
            write_message(&mut writer, &ServerMessage::Error { message }).await?;
            return Ok(());
        }
    };

    let id = subscription.id;
    let result = stream_subscription(
        &mut subscription,
        &mut reader,
        &mut writer,
        &config,
        &cancel,
    )
    .await;

    router.unsubscribe(id);
    debug!(%peer, subscriber_id = %id, "Tail client disconnected");
    result
}

async fn stream_subscription<W: AsyncWrite + Unpin>(
    subscription: &mut Subscription,
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut W,
    config: &TailServerConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let namespace = subscription.namespace.clone();

    let backlog = ServerMessage::Backlog {
        namespace: namespace.clone(),
        lines: std::mem::take(&mut subscription.backlog),
    };
    write_message(writer, &backlog).await?;

    let mut heartbeat = interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    let mut scratch = [0u8; 1024];

    loop {
        select! {
            _ = cancel.cancelled() => {
                let closed = ServerMessage::Closed { reason: CloseReason::Shutdown };
                return write_message(writer, &closed).await;
            },
            event = subscription.events.next() => match event {
                Some(TailEvent::Line(line)) => {
                    let msg = ServerMessage::Line { namespace: namespace.clone(), line };
                    write_message(writer, &msg).await?;
                }
                Some(TailEvent::Closed(reason)) => {
                    return write_message(writer, &ServerMessage::Closed { reason }).await;
                }
                None => {
                    let closed = ServerMessage::Closed { reason: CloseReason::Shutdown };
                    return write_message(writer, &closed).await;
                }
            },
            _ = heartbeat.tick() => {
                write_message(writer, &ServerMessage::Heartbeat).await?;
            },
            // Clients send nothing after subscribing; reading only detects EOF
            n = reader.read(&mut scratch) => {
                if n? == 0 {
                    return Ok(());
                }
            },
        }
    }
}
