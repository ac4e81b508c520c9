//! WebSocket connection loop.
//!
//! Each connection gets a writer task that owns the sink and a reader loop
//! that parses client requests. The reader never awaits a generation, so a
//! `stop` can arrive while one is streaming.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use palaver_core::{ClientRequest, ProtocolError, SessionId};
use palaver_telemetry::names;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::MIN_TIMER_PERIOD;
use crate::coordinator::StreamCoordinator;
use crate::socket::{CLOSE_NORMAL, ClientSocket};

/// Control line sent once a stop request has taken effect.
pub const STOPPED_NOTICE: &str = "[SYSTEM] Generation stopped";

/// How long the writer gets to flush a close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-connection settings.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionOptions {
    /// Outbound frames buffered before senders wait.
    pub outbound_buffer: usize,
    /// Interval between server pings.
    pub ping_interval: Duration,
}

/// Drive one accepted WebSocket until it closes.
#[instrument(skip_all, fields(session_id = %id))]
pub async fn run_ws_session(
    ws: WebSocket,
    id: SessionId,
    coordinator: Arc<StreamCoordinator>,
    options: ConnectionOptions,
) {
    let (sink, mut stream) = ws.split();
    let (tx, rx) = mpsc::channel(options.outbound_buffer.max(1));
    let socket = Arc::new(ClientSocket::new(id.clone(), tx));
    let writer = spawn_writer(sink, rx, socket.clone(), options.ping_interval);

    let registry = coordinator.registry().clone();
    if !registry.connect(socket.clone()).await {
        finish_writer(writer).await;
        return;
    }

    loop {
        let message = tokio::select! {
            biased;
            () = socket.closed() => break,
            message = stream.next() => message,
        };
        let text = match message {
            Some(Ok(Message::Text(text))) => text.to_string(),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!("ignoring non-UTF-8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(error = %e, "websocket receive failed");
                break;
            }
        };
        handle_message(&coordinator, &socket, &text).await;
    }

    socket.mark_disconnected();
    let _ = registry.release(&socket).await;
    histogram!(names::WS_CONNECTION_DURATION_SECONDS).record(socket.age().as_secs_f64());
    info!(frames_sent = socket.frames_sent(), "websocket closed");
    finish_writer(writer).await;
}

/// Act on one text frame from the client.
pub async fn handle_message(coordinator: &StreamCoordinator, socket: &Arc<ClientSocket>, text: &str) {
    match ClientRequest::parse(text) {
        Err(e) => {
            counter!(names::PROTOCOL_ERRORS_TOTAL, "kind" => protocol_error_kind(&e)).increment(1);
            debug!(error = %e, "rejected client message");
            let _ = socket.send_text(format!("Error: {e}")).await;
        }
        Ok(ClientRequest::Stop) => {
            let _ = coordinator.stop(&socket.id).await;
            let _ = socket.send_text(STOPPED_NOTICE).await;
        }
        Ok(ClientRequest::Chat(request)) => {
            if let Err(e) = coordinator.generate(&socket.id, request).await {
                warn!(error = %e, "could not start generation");
                let _ = socket.send_text(format!("Error: {e}")).await;
            }
        }
    }
}

fn protocol_error_kind(error: &ProtocolError) -> &'static str {
    match error {
        ProtocolError::InvalidJson(_) => "invalid_json",
        ProtocolError::InvalidRequest(_) => "invalid_request",
        ProtocolError::UnknownCommand(_) => "unknown_command",
    }
}

/// Forward queued frames and pings to the sink; send the close frame when the socket closes.
fn spawn_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<String>,
    socket: Arc<ClientSocket>,
    ping_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval.max(MIN_TIMER_PERIOD));
        let _ = ping.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                biased;
                () = socket.closed() => {
                    let (code, reason) = socket.close_frame().unwrap_or((CLOSE_NORMAL, String::new()));
                    let frame = Message::Close(Some(CloseFrame { code, reason: reason.into() }));
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.send(frame)).await;
                    break;
                }
                message = rx.recv() => {
                    let Some(text) = message else { break };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                    tracing::trace!(session_id = %socket.id, "sent ping");
                }
            }
        }

        socket.mark_disconnected();
    })
}

async fn finish_writer(writer: JoinHandle<()>) {
    let abort = writer.abort_handle();
    if tokio::time::timeout(CLOSE_TIMEOUT, writer).await.is_err() {
        abort.abort();
    }
}
