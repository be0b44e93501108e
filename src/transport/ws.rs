//! WebSocket transport with auto-reconnection and keep-alive
//!
//! Frames are JSON invocation envelopes (`{"target": ..., "arguments":
//! [...]}`); WebSocket framing and the upgrade handshake belong to
//! `tokio-tungstenite`. After the first successful connect the background
//! task reconnects on its own with exponential backoff, firing the
//! registered open/close handlers around every session.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use super::{
    CloseEvent, CloseHandler, EventHandler, OpenHandler, StreamTransport, TransportError,
};
use crate::config::TransportOptions;

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Invocation envelope shared with the hub servers
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    target: String,
    #[serde(default)]
    arguments: Vec<Value>,
}

/// Commands accepted by the connection task
enum WsCommand {
    Invoke {
        frame: WireMessage,
        ack: oneshot::Sender<Result<(), TransportError>>,
    },
    Close,
}

enum SessionEnd {
    /// Close was requested (or the transport handle was dropped)
    Closed,
    /// The connection dropped and should be re-established
    Dropped,
}

/// WebSocket-backed [`StreamTransport`]
pub struct WebSocketTransport {
    options: TransportOptions,
    event_handlers: Arc<DashMap<String, EventHandler>>,
    open_handlers: Arc<Mutex<Vec<OpenHandler>>>,
    close_handlers: Arc<Mutex<Vec<CloseHandler>>>,
    command_tx: Mutex<Option<mpsc::UnboundedSender<WsCommand>>>,
}

impl WebSocketTransport {
    pub fn new(options: TransportOptions) -> Self {
        Self {
            options,
            event_handlers: Arc::new(DashMap::new()),
            open_handlers: Arc::new(Mutex::new(Vec::new())),
            close_handlers: Arc::new(Mutex::new(Vec::new())),
            command_tx: Mutex::new(None),
        }
    }

    /// The reconnect/keep-alive options this transport runs with.
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }
}

#[async_trait::async_trait]
impl StreamTransport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        url::Url::parse(url)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        {
            let mut slot = self
                .command_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            // Replacing the sender ends any previous connection task.
            *slot = Some(command_tx);
        }

        let task_url = url.to_string();
        let options = self.options.clone();
        let handlers = Arc::clone(&self.event_handlers);
        let open_handlers = Arc::clone(&self.open_handlers);
        let close_handlers = Arc::clone(&self.close_handlers);

        tokio::spawn(async move {
            connection_task(
                task_url,
                options,
                handlers,
                open_handlers,
                close_handlers,
                command_rx,
                ready_tx,
            )
            .await;
        });

        ready_rx.await.map_err(|_| {
            TransportError::Connect("connection task exited before the handshake".to_string())
        })?
    }

    async fn close(&self) {
        let sender = self
            .command_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(WsCommand::Close);
        }
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<(), TransportError> {
        let sender = self
            .command_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(TransportError::NotConnected)?;

        let (ack_tx, ack_rx) = oneshot::channel();
        sender
            .send(WsCommand::Invoke {
                frame: WireMessage {
                    target: method.to_string(),
                    arguments: args,
                },
                ack: ack_tx,
            })
            .map_err(|_| TransportError::NotConnected)?;

        ack_rx.await.map_err(|_| TransportError::NotConnected)?
    }

    fn on_event(&self, name: &str, handler: EventHandler) {
        self.event_handlers.insert(name.to_string(), handler);
    }

    fn on_open(&self, handler: OpenHandler) {
        self.open_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    fn on_close(&self, handler: CloseHandler) {
        self.close_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }
}

/// Main connection task with auto-reconnection
async fn connection_task(
    url: String,
    options: TransportOptions,
    handlers: Arc<DashMap<String, EventHandler>>,
    open_handlers: Arc<Mutex<Vec<OpenHandler>>>,
    close_handlers: Arc<Mutex<Vec<CloseHandler>>>,
    mut command_rx: mpsc::UnboundedReceiver<WsCommand>,
    ready_tx: oneshot::Sender<Result<(), TransportError>>,
) {
    let mut ready_tx = Some(ready_tx);
    let mut attempts: u32 = 0;
    let mut backoff = reconnect_backoff(&options);

    loop {
        match run_session(
            &url,
            &options,
            &handlers,
            &open_handlers,
            &mut command_rx,
            &mut ready_tx,
        )
        .await
        {
            Ok(SessionEnd::Closed) => {
                info!("WebSocket connection closed");
                fire_close(&close_handlers, CloseEvent { retrying: false });
                return;
            }
            Ok(SessionEnd::Dropped) => {
                attempts = 0;
                backoff = reconnect_backoff(&options);
            }
            Err(err) => {
                if let Some(tx) = ready_tx.take() {
                    // Initial handshake failure is the caller's to handle.
                    let _ = tx.send(Err(err));
                    return;
                }
                attempts += 1;
                warn!(error = %err, attempt = attempts, "Reconnect attempt failed");
            }
        }

        if options.max_attempts > 0 && attempts >= options.max_attempts {
            error!("Maximum reconnection attempts reached");
            fire_close(&close_handlers, CloseEvent { retrying: false });
            return;
        }

        fire_close(&close_handlers, CloseEvent { retrying: true });

        let delay = backoff.next_backoff().unwrap_or(MAX_RECONNECT_DELAY);
        debug!(delay = ?delay, "Reconnecting after delay");
        if !reject_commands_during_delay(delay, &mut command_rx).await {
            return;
        }
    }
}

/// Connect and run one WebSocket session until it ends
async fn run_session(
    url: &str,
    options: &TransportOptions,
    handlers: &DashMap<String, EventHandler>,
    open_handlers: &Mutex<Vec<OpenHandler>>,
    command_rx: &mut mpsc::UnboundedReceiver<WsCommand>,
    ready_tx: &mut Option<oneshot::Sender<Result<(), TransportError>>>,
) -> Result<SessionEnd, TransportError> {
    let (ws_stream, response) = connect_async(url).await.map_err(map_ws_error)?;
    debug!(status = ?response.status(), "WebSocket handshake complete");

    let (mut write, mut read) = ws_stream.split();

    if let Some(tx) = ready_tx.take() {
        let _ = tx.send(Ok(()));
    }
    fire_open(open_handlers);

    let keep_alive = Duration::from_secs(options.keep_alive_interval_secs.max(1));
    let mut heartbeat = interval(keep_alive);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last_pong = Instant::now();
    let pong_timeout = keep_alive * 2;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, handlers);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            return Ok(SessionEnd::Dropped);
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket closed by server");
                        return Ok(SessionEnd::Dropped);
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        return Ok(SessionEnd::Dropped);
                    }
                    None => {
                        warn!("WebSocket stream ended");
                        return Ok(SessionEnd::Dropped);
                    }
                    _ => {
                        // Ignore other frame types
                    }
                }
            }

            cmd = command_rx.recv() => {
                match cmd {
                    Some(WsCommand::Invoke { frame, ack }) => {
                        let result = send_frame(&mut write, &frame).await;
                        let failed = result.is_err();
                        let _ = ack.send(result);
                        if failed {
                            return Ok(SessionEnd::Dropped);
                        }
                    }
                    Some(WsCommand::Close) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(SessionEnd::Closed);
                    }
                }
            }

            _ = heartbeat.tick() => {
                if last_pong.elapsed() > pong_timeout {
                    warn!("Heartbeat timeout - no pong received");
                    return Ok(SessionEnd::Dropped);
                }
                if write.send(Message::Ping(vec![].into())).await.is_err() {
                    return Ok(SessionEnd::Dropped);
                }
            }
        }
    }
}

fn handle_frame(text: &str, handlers: &DashMap<String, EventHandler>) {
    let frame: WireMessage = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Dropping unparseable frame");
            return;
        }
    };

    let handler = handlers.get(&frame.target).map(|entry| entry.value().clone());
    match handler {
        Some(handler) => handler(frame.arguments),
        None => debug!(target = %frame.target, "No handler registered for event"),
    }
}

async fn send_frame<S>(write: &mut S, frame: &WireMessage) -> Result<(), TransportError>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = serde_json::to_string(frame)
        .map_err(|e| TransportError::Send(e.to_string()))?;
    write
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| TransportError::Send(e.to_string()))
}

/// Waits out a reconnect delay, failing any invocations issued meanwhile.
///
/// Returns `false` when the command channel is gone and the task should end.
async fn reject_commands_during_delay(
    delay: Duration,
    command_rx: &mut mpsc::UnboundedReceiver<WsCommand>,
) -> bool {
    let sleep = sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = command_rx.recv() => {
                match cmd {
                    Some(WsCommand::Invoke { ack, .. }) => {
                        let _ = ack.send(Err(TransportError::NotConnected));
                    }
                    Some(WsCommand::Close) | None => return false,
                }
            }
        }
    }
}

fn reconnect_backoff(options: &TransportOptions) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_secs(options.reconnect_interval_secs.max(1)),
        max_interval: MAX_RECONNECT_DELAY,
        max_elapsed_time: None,
        ..Default::default()
    }
}

fn map_ws_error(error: WsError) -> TransportError {
    match error {
        WsError::Http(response) => TransportError::Handshake {
            status: response.status().as_u16(),
        },
        other => TransportError::Connect(other.to_string()),
    }
}

fn fire_open(handlers: &Mutex<Vec<OpenHandler>>) {
    let handlers: Vec<OpenHandler> = handlers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .cloned()
        .collect();
    for handler in handlers {
        handler();
    }
}

fn fire_close(handlers: &Mutex<Vec<CloseHandler>>, event: CloseEvent) {
    let handlers: Vec<CloseHandler> = handlers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .cloned()
        .collect();
    for handler in handlers {
        handler(event);
    }
}
