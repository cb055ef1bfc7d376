//! Duplex channel to one runtime process.
//!
//! Outbound actions get a fresh correlation identifier and a pending entry;
//! a background reader task processes inbound frames strictly in arrival
//! order, completing the matching pending entry for replies and handing
//! events to the [`EventRouter`].
//!
//! # Thread Safety
//!
//! Encoded frames are queued to a single writer task, which writes each one
//! whole before taking the next. The pending table is only touched by
//! `send_action` (insert / abandon) and the reader task (complete / drain),
//! never held across an await.
//!
//! # Limitations
//!
//! There is no per-action timeout. A caller that wraps `send_action` in its
//! own timeout abandons only the reply wait: the frame is still written in
//! full and a late reply is dropped.

use super::protocol::{read_frame, write_frame, ActionRequest, CorrelationId, FrameKind, InboundFrame};
use super::router::EventRouter;
use crate::error::{RelayError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Waiter {
    action: String,
    tx: oneshot::Sender<Result<Value>>,
}

#[derive(Default)]
struct PendingTable {
    waiters: HashMap<CorrelationId, Waiter>,
    closed: bool,
}

fn lock(table: &Mutex<PendingTable>) -> MutexGuard<'_, PendingTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reject every outstanding request and refuse new ones.
fn close_pending(table: &Mutex<PendingTable>) -> usize {
    let drained: Vec<Waiter> = {
        let mut table = lock(table);
        table.closed = true;
        table.waiters.drain().map(|(_, waiter)| waiter).collect()
    };
    let count = drained.len();
    for waiter in drained {
        let _ = waiter.tx.send(Err(RelayError::ConnectionClosed));
    }
    count
}

/// Removes the pending entry when the caller stops waiting, whether the
/// reply arrived or the future was dropped.
struct PendingGuard<'a> {
    table: &'a Mutex<PendingTable>,
    correlation_id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if lock(self.table).waiters.remove(&self.correlation_id).is_some() {
            debug!("Abandoned wait for correlation id {}", self.correlation_id);
        }
    }
}

enum Outbound {
    Frame(Vec<u8>),
    Shutdown,
}

/// Owns the channel to a running runtime.
pub struct TransportConnection {
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    pending: Arc<Mutex<PendingTable>>,
    next_id: AtomicU64,
    closed_rx: watch::Receiver<bool>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TransportConnection {
    /// Take ownership of `stream` and start the reader and writer tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<S>(stream: S, router: Arc<EventRouter>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let pending = Arc::new(Mutex::new(PendingTable::default()));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (closed_tx, closed_rx) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let reader_handle = tokio::spawn(Self::reader_loop(
            reader,
            Arc::clone(&pending),
            router,
            shutdown_rx,
            closed_tx,
        ));
        let writer_handle = tokio::spawn(Self::writer_loop(
            writer,
            outbound_rx,
            Arc::clone(&pending),
        ));

        Self {
            outbound_tx,
            pending,
            next_id: AtomicU64::new(1),
            closed_rx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            reader_handle: Mutex::new(Some(reader_handle)),
            writer_handle: Mutex::new(Some(writer_handle)),
        }
    }

    /// Send `action` and wait for its reply.
    ///
    /// Resolves exactly once: with the reply payload on a success frame,
    /// with `RelayError::Action` on an error frame, or with
    /// `RelayError::ConnectionClosed` if the channel ends first. Dropping
    /// the returned future only abandons the wait.
    pub async fn send_action(&self, action: &str, payload: Value) -> Result<Value> {
        let correlation_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = ActionRequest::new(action, payload, correlation_id);
        let bytes = serde_json::to_vec(&request)?;
        if u32::try_from(bytes.len()).is_err() {
            return Err(RelayError::Validation {
                field: "ipc_frame".to_string(),
                message: format!("IPC message size {} does not fit a frame", bytes.len()),
            });
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut table = lock(&self.pending);
            if table.closed {
                return Err(RelayError::ConnectionClosed);
            }
            table.waiters.insert(
                correlation_id,
                Waiter {
                    action: action.to_string(),
                    tx,
                },
            );
        }
        let _guard = PendingGuard {
            table: &self.pending,
            correlation_id,
        };

        if self.outbound_tx.send(Outbound::Frame(bytes)).is_err() {
            warn!("Failed to send action '{}': writer has stopped", action);
            return Err(RelayError::ConnectionClosed);
        }

        debug!("Queued '{}' with correlation id {}", action, correlation_id);

        rx.await.unwrap_or(Err(RelayError::ConnectionClosed))
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).waiters.len()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Wait until the channel has ended.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Close the channel, rejecting every pending request.
    ///
    /// Frames already queued are still written before the write half is
    /// shut down.
    pub async fn close(&self) {
        if let Some(tx) = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(());
        }
        let rejected = close_pending(&self.pending);
        if rejected > 0 {
            debug!("Rejected {} pending requests on close", rejected);
        }
        let _ = self.outbound_tx.send(Outbound::Shutdown);
        self.closed().await;
    }

    async fn writer_loop<W: AsyncWrite + Unpin>(
        mut writer: W,
        mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
        pending: Arc<Mutex<PendingTable>>,
    ) {
        while let Some(outbound) = outbound_rx.recv().await {
            match outbound {
                Outbound::Frame(bytes) => {
                    if let Err(e) = write_frame(&mut writer, &bytes).await {
                        warn!("Channel write failed: {}", e);
                        let rejected = close_pending(&pending);
                        if rejected > 0 {
                            warn!("Rejected {} pending requests after write failure", rejected);
                        }
                        break;
                    }
                }
                Outbound::Shutdown => break,
            }
        }
        let _ = writer.shutdown().await;
        debug!("Transport writer stopped");
    }

    async fn reader_loop<R: AsyncRead + Unpin>(
        mut reader: R,
        pending: Arc<Mutex<PendingTable>>,
        router: Arc<EventRouter>,
        mut shutdown_rx: oneshot::Receiver<()>,
        closed_tx: watch::Sender<bool>,
    ) {
        loop {
            let frame = tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!("Transport reader shutting down");
                    break;
                }
                result = read_frame(&mut reader) => {
                    match result {
                        Ok(Some(frame)) => frame,
                        Ok(None) => {
                            info!("Runtime closed the channel");
                            break;
                        }
                        Err(e) => {
                            warn!("Channel read failed: {}", e);
                            break;
                        }
                    }
                }
            };

            Self::handle_frame(&frame, &pending, &router);
        }

        let rejected = close_pending(&pending);
        if rejected > 0 {
            warn!("Connection ended with {} requests still pending", rejected);
        }
        let _ = closed_tx.send(true);
    }

    fn handle_frame(frame: &[u8], pending: &Mutex<PendingTable>, router: &EventRouter) {
        let inbound: InboundFrame = match serde_json::from_slice(frame) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("Skipping malformed frame: {}", e);
                return;
            }
        };

        match inbound.kind() {
            FrameKind::Reply {
                correlation_id,
                outcome,
            } => {
                let waiter = lock(pending).waiters.remove(&correlation_id);
                match waiter {
                    Some(Waiter { action, tx }) => {
                        let result = outcome.map_err(|message| RelayError::Action {
                            action,
                            message,
                        });
                        let _ = tx.send(result);
                    }
                    None => {
                        warn!(
                            "Dropping reply for unknown correlation id {}",
                            correlation_id
                        );
                    }
                }
            }
            FrameKind::Event(event) => {
                let delivered = router.dispatch(&event);
                debug!(
                    "Event {}/{} from {} delivered to {} listeners",
                    event.topic, event.event_type, event.source, delivered
                );
            }
            FrameKind::Unrecognized => {
                warn!("Skipping frame that is neither a reply nor an event");
            }
        }
    }
}

impl Drop for TransportConnection {
    fn drop(&mut self) {
        close_pending(&self.pending);
        for slot in [&self.reader_handle, &self.writer_handle] {
            if let Some(handle) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                handle.abort();
            }
        }
    }
}
