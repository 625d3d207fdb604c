use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use shared::protocol::OutboundMessage;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{error::SyncError, types::ConnectionStatus};

const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// One inbound text frame, undecoded.
    Frame(String),
    /// The server closed the socket.
    Closed { reason: Option<String> },
    Errored(String),
}

pub type EventStream = UnboundedReceiverStream<ConnectionEvent>;

enum Outbound {
    Frame(String),
    Close,
}

pub struct ConnectionManager {
    url: Url,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    status: watch::Receiver<ConnectionStatus>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Opens the socket and starts the reader/writer task. The returned stream
    /// ends once the socket is gone.
    pub async fn open(url: &Url) -> Result<(Self, EventStream)> {
        info!(%url, "ws: connecting");
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {url}"))?;
        info!(%url, "ws: connected");

        let (status_tx, status) = watch::channel(ConnectionStatus::Open);
        let status_tx = Arc::new(status_tx);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(
            ws_stream,
            outbound_rx,
            events_tx,
            Arc::clone(&status_tx),
        ));

        Ok((
            Self {
                url: url.clone(),
                outbound: Some(outbound_tx),
                status_tx,
                status,
                task: Some(task),
            },
            UnboundedReceiverStream::new(events_rx),
        ))
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Queues one frame for the writer. Fails without queueing anything when
    /// the socket is not open.
    pub fn send(&self, frame: &OutboundMessage) -> Result<(), SyncError> {
        if !self.status().is_open() {
            return Err(SyncError::NotConnected);
        }
        let outbound = self.outbound.as_ref().ok_or(SyncError::NotConnected)?;
        let text = frame
            .encode()
            .map_err(|err| SyncError::TransportError(err.to_string()))?;
        outbound
            .send(Outbound::Frame(text))
            .map_err(|_| SyncError::TransportClosed)
    }

    /// Sends a close frame and waits briefly for the socket task to finish.
    /// The task is aborted if it does not finish in time.
    pub async fn close(&mut self) {
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(Outbound::Close);
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                warn!(url = %self.url, "ws: close timed out; aborting socket task");
                task.abort();
            }
        }
        transition(&self.status_tx, ConnectionStatus::Closed);
        debug!(url = %self.url, "ws: connection released");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        transition(&self.status_tx, ConnectionStatus::Closed);
    }
}

fn transition(status: &watch::Sender<ConnectionStatus>, next: ConnectionStatus) {
    status.send_if_modified(|current| {
        if current.can_transition_to(next) {
            *current = next;
            true
        } else {
            false
        }
    });
}

async fn run_socket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    status: Arc<watch::Sender<ConnectionStatus>>,
) {
    let (mut writer, mut reader) = ws_stream.split();

    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(Outbound::Frame(text)) => {
                    if let Err(err) = writer.send(WsMessage::Text(text)).await {
                        warn!("ws: write failed: {err}");
                        transition(&status, ConnectionStatus::Errored);
                        let _ = events.send(ConnectionEvent::Errored(err.to_string()));
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    if let Err(err) = writer.send(WsMessage::Close(None)).await {
                        debug!("ws: close frame not delivered: {err}");
                    }
                    transition(&status, ConnectionStatus::Closed);
                    break;
                }
            },
            inbound = reader.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => {
                    if events.send(ConnectionEvent::Frame(text)).is_err() {
                        debug!("ws: event receiver dropped; stopping reader");
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let reason = frame
                        .map(|frame| frame.reason.to_string())
                        .filter(|reason| !reason.is_empty());
                    info!(?reason, "ws: server closed connection");
                    transition(&status, ConnectionStatus::Closed);
                    let _ = events.send(ConnectionEvent::Closed { reason });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("ws: read failed: {err}");
                    transition(&status, ConnectionStatus::Errored);
                    let _ = events.send(ConnectionEvent::Errored(err.to_string()));
                    break;
                }
                None => {
                    info!("ws: stream ended");
                    transition(&status, ConnectionStatus::Closed);
                    let _ = events.send(ConnectionEvent::Closed { reason: None });
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
