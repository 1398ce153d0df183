//! WebSocket stream channels.
//!
//! Each tracked task owns up to two streams (workflow events and streamed
//! code). A channel dials its endpoint, feeds every decoded frame into the
//! task store, and reconnects on a fixed interval when the connection drops.
//! The reconnect budget resets on every successful connect; once it is spent
//! the channel announces itself as down and stays closed. A task reaching a
//! settled status closes its channels on purpose instead of retrying.
//! Outbound text is best-effort: it goes out only while a socket is open and
//! is dropped otherwise, never queued across reconnects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use tether_core::{StoreEvent, StoreInput, TaskStore};
use tether_wire::{decode_frame, StreamEndpoint};

use crate::config::ClientConfig;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    interval: Duration,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            attempt: 0,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.reconnect_max_attempts, config.reconnect_interval)
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(self.interval)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Handle to one running stream task.
pub struct StreamHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
    outbound: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
}

impl StreamHandle {
    /// Best-effort outbound text. Returns whether the message was handed to
    /// an open socket; without one the message is dropped, not queued.
    pub fn send(&self, text: &str) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        self.outbound.send(text.to_string()).is_ok()
    }

    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

pub fn spawn_stream(
    endpoint: StreamEndpoint,
    url: String,
    store: Arc<TaskStore>,
    policy: ReconnectPolicy,
) -> StreamHandle {
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
    let connected = Arc::new(AtomicBool::new(false));
    let task = tokio::spawn(run_stream(
        endpoint,
        url,
        store,
        policy,
        stop_rx,
        outbound_rx,
        connected.clone(),
    ));
    StreamHandle {
        stop_tx: Some(stop_tx),
        task: Some(task),
        outbound: outbound_tx,
        connected,
    }
}

async fn run_stream(
    endpoint: StreamEndpoint,
    url: String,
    store: Arc<TaskStore>,
    mut policy: ReconnectPolicy,
    mut stop_rx: oneshot::Receiver<()>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    connected: Arc<AtomicBool>,
) {
    let mut live = store.live();

    'outer: loop {
        if !*live.borrow() {
            break;
        }

        let dialed = tokio::select! {
            _ = &mut stop_rx => break 'outer,
            result = connect_async(&url) => result,
        };

        match dialed {
            Ok((ws_stream, _)) => {
                policy.reset();
                connected.store(true, Ordering::SeqCst);
                store.bus().publish(StoreEvent::ChannelConnected { endpoint });
                info!(stream = endpoint.as_str(), "stream connected");

                let (mut write, mut read) = ws_stream.split();

                loop {
                    tokio::select! {
                        _ = &mut stop_rx => {
                            let _ = write.send(Message::Close(None)).await;
                            break 'outer;
                        }
                        changed = live.changed() => {
                            if changed.is_err() || !*live.borrow() {
                                let _ = write.send(Message::Close(None)).await;
                                break 'outer;
                            }
                        }
                        out = outbound_rx.recv() => {
                            match out {
                                Some(text) => {
                                    if write.send(Message::Text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                // Handle dropped without stop(); nobody owns
                                // this stream anymore.
                                None => {
                                    let _ = write.send(Message::Close(None)).await;
                                    break 'outer;
                                }
                            }
                        }
                        msg = read.next() => {
                            let text = match msg {
                                Some(Ok(Message::Text(t))) => t,
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Err(err)) => {
                                    warn!(stream = endpoint.as_str(), %err, "stream read failed");
                                    break;
                                }
                                _ => continue,
                            };
                            match decode_frame(&text) {
                                Ok(frame) => {
                                    store.apply(StoreInput::Frame(frame)).await;
                                }
                                Err(err) => {
                                    warn!(stream = endpoint.as_str(), %err, "dropping malformed frame");
                                }
                            }
                        }
                    }
                }

                connected.store(false, Ordering::SeqCst);
                while outbound_rx.try_recv().is_ok() {}
            }
            Err(err) => {
                warn!(stream = endpoint.as_str(), %err, "stream connect failed");
            }
        }

        // Fell out of an open connection or a failed dial. A settled task
        // closes its streams server-side, so only retry while still live.
        if !*live.borrow() {
            break;
        }
        match policy.next_delay() {
            Some(delay) => {
                store.bus().publish(StoreEvent::ChannelLost {
                    endpoint,
                    attempt: policy.attempt(),
                });
                debug!(
                    stream = endpoint.as_str(),
                    attempt = policy.attempt(),
                    "reconnecting after {delay:?}"
                );
                let sleep = tokio::time::sleep(delay);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = &mut stop_rx => break 'outer,
                        changed = live.changed() => {
                            if changed.is_err() || !*live.borrow() {
                                break 'outer;
                            }
                        }
                        _ = &mut sleep => break,
                    }
                }
            }
            None => {
                store.bus().publish(StoreEvent::ChannelDown { endpoint });
                warn!(stream = endpoint.as_str(), "reconnect attempts exhausted");
                break 'outer;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    debug!(stream = endpoint.as_str(), "stream task stopped");
}
