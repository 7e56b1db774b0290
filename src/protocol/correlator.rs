//! Request/response demultiplexing over the shared host channel.
//!
//! The [`Correlator`] owns the single registration table that maps
//! correlation ids to pending requests. A background dispatch task inspects
//! every inbound message: progress messages are forwarded to the matching
//! handle's progress stream without resolving it; the first terminal message
//! removes the table entry and resolves the handle exactly once; anything
//! arriving for an id that is no longer registered is dropped. That drop is
//! the sole mechanism by which a cancelled or timed-out request cannot
//! resurrect stale state.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::task;

use miette::Diagnostic;
use thiserror::Error;

use super::wire::{CorrelationId, InboundEnvelope, OutboundEnvelope, ReplyPayload, RequestPayload};
use crate::progress::ProgressUpdate;

/// Error raised when the host side of the channel has gone away.
#[derive(Debug, Error, Diagnostic)]
pub enum ChannelError {
    #[error("host channel closed")]
    #[diagnostic(
        code(flowsmith::protocol::channel_closed),
        help("The editor host has shut down or the channel was torn down. Reload the editor.")
    )]
    Closed,
}

struct PendingRequest {
    terminal: oneshot::Sender<ReplyPayload>,
    progress: flume::Sender<ProgressUpdate>,
}

type PendingTable = Arc<Mutex<FxHashMap<CorrelationId, PendingRequest>>>;

/// Demultiplexer for all host-async operations.
///
/// Construct one per channel pair; requires a running tokio runtime, since
/// the inbound dispatch loop is spawned on creation.
pub struct Correlator {
    outbound: flume::Sender<OutboundEnvelope>,
    pending: PendingTable,
    listener: Mutex<Option<ListenerState>>,
}

struct ListenerState {
    shutdown_tx: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

impl Correlator {
    /// Wire a correlator onto the shared channel pair.
    pub fn new(
        outbound: flume::Sender<OutboundEnvelope>,
        inbound: flume::Receiver<InboundEnvelope>,
    ) -> Self {
        let pending: PendingTable = Arc::new(Mutex::new(FxHashMap::default()));
        let table = Arc::clone(&pending);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = task::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    recv = inbound.recv_async() => match recv {
                        Err(_) => break, // host side closed
                        Ok(envelope) => dispatch(&table, envelope),
                    }
                }
            }
        });

        Self {
            outbound,
            pending,
            listener: Mutex::new(Some(ListenerState {
                shutdown_tx,
                handle,
            })),
        }
    }

    /// Dispatch a request with the default budget for its kind.
    pub fn send(&self, payload: RequestPayload) -> Result<RequestHandle, ChannelError> {
        let budget = payload.kind().default_budget();
        self.send_with_budget(payload, budget)
    }

    /// Dispatch a request with an explicit timeout budget.
    ///
    /// Registers the request before the envelope leaves, so a reply can
    /// never race the registration.
    pub fn send_with_budget(
        &self,
        payload: RequestPayload,
        budget: Duration,
    ) -> Result<RequestHandle, ChannelError> {
        let correlation_id = CorrelationId::generate();
        let kind = payload.kind();
        let (terminal_tx, terminal_rx) = oneshot::channel();
        let (progress_tx, progress_rx) = flume::unbounded();

        self.pending.lock().insert(
            correlation_id.clone(),
            PendingRequest {
                terminal: terminal_tx,
                progress: progress_tx,
            },
        );

        let envelope = OutboundEnvelope {
            correlation_id: correlation_id.clone(),
            payload,
        };
        if self.outbound.send(envelope).is_err() {
            self.pending.lock().remove(&correlation_id);
            return Err(ChannelError::Closed);
        }
        tracing::debug!(
            correlation_id = %correlation_id,
            kind = ?kind,
            budget_ms = budget.as_millis() as u64,
            "dispatched host request"
        );

        Ok(RequestHandle {
            correlation_id,
            deadline: tokio::time::Instant::now() + budget,
            terminal: terminal_rx,
            progress: progress_rx,
            pending: Arc::clone(&self.pending),
            outbound: self.outbound.clone(),
            resolved: false,
        })
    }

    /// Number of requests currently awaiting a terminal message.
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    /// Stop the inbound dispatch task. Outstanding handles resolve as
    /// [`Resolution::ChannelClosed`] once their terminal sender drops.
    pub async fn shutdown(&self) {
        let state = self.listener.lock().take();
        if let Some(state) = state {
            let _ = state.shutdown_tx.send(());
            let _ = state.handle.await;
        }
        self.pending.lock().clear();
    }
}

impl Drop for Correlator {
    fn drop(&mut self) {
        if let Some(state) = self.listener.lock().take() {
            let _ = state.shutdown_tx.send(());
            state.handle.abort();
        }
    }
}

fn dispatch(table: &PendingTable, envelope: InboundEnvelope) {
    let Some(correlation_id) = envelope.correlation_id else {
        tracing::trace!(payload = ?envelope.payload, "unsolicited host push");
        return;
    };
    match envelope.payload {
        ReplyPayload::RefineProgress(update) => {
            let guard = table.lock();
            match guard.get(&correlation_id) {
                Some(entry) => {
                    let _ = entry.progress.send(update);
                }
                None => tracing::trace!(
                    correlation_id = %correlation_id,
                    "dropping progress for unregistered correlation id"
                ),
            }
        }
        ReplyPayload::StatusUpdate { message } => {
            tracing::trace!(correlation_id = %correlation_id, %message, "host status update");
        }
        payload => {
            let entry = table.lock().remove(&correlation_id);
            match entry {
                Some(entry) => {
                    // Exactly-once: the entry is gone before the handle sees
                    // the payload, so a duplicate terminal finds nothing.
                    let _ = entry.terminal.send(payload);
                }
                None => tracing::trace!(
                    correlation_id = %correlation_id,
                    "dropping terminal for resolved or unknown correlation id"
                ),
            }
        }
    }
}

/// How a request finished.
#[derive(Debug)]
pub enum Resolution {
    /// A terminal message arrived within budget.
    Reply(ReplyPayload),
    /// No terminal message within the budget; the registration was removed,
    /// so any late terminal is ignored.
    TimedOut,
    /// The correlator or channel was torn down underneath the request.
    ChannelClosed,
}

/// One event observed while awaiting a request.
#[derive(Debug)]
pub enum RequestEvent {
    Progress(ProgressUpdate),
    Resolved(Resolution),
}

/// Awaitable handle for one dispatched request.
///
/// Dropping the handle unregisters the request; any reply that arrives
/// afterwards is dropped by the dispatcher.
pub struct RequestHandle {
    correlation_id: CorrelationId,
    deadline: tokio::time::Instant,
    terminal: oneshot::Receiver<ReplyPayload>,
    progress: flume::Receiver<ProgressUpdate>,
    pending: PendingTable,
    outbound: flume::Sender<OutboundEnvelope>,
    resolved: bool,
}

impl RequestHandle {
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Send a cancellation notice tagged with this request's correlation id.
    ///
    /// Cooperative: the host may still be mid-execution; the request keeps
    /// awaiting its terminal message (normally a cancelled acknowledgement).
    pub fn cancel_notice(&self) -> Result<(), ChannelError> {
        self.outbound
            .send(OutboundEnvelope {
                correlation_id: self.correlation_id.clone(),
                payload: RequestPayload::CancelRefine,
            })
            .map_err(|_| ChannelError::Closed)
    }

    /// Await the next event for this request.
    ///
    /// Progress events drain before a queued terminal message, preserving
    /// the arrival-order guarantee. Must not be called again once it has
    /// returned [`RequestEvent::Resolved`].
    pub async fn next_event(&mut self) -> RequestEvent {
        if self.resolved {
            debug_assert!(false, "next_event called after resolution");
            return RequestEvent::Resolved(Resolution::ChannelClosed);
        }
        tokio::select! {
            biased;
            Ok(update) = self.progress.recv_async() => RequestEvent::Progress(update),
            result = &mut self.terminal => {
                self.resolved = true;
                RequestEvent::Resolved(match result {
                    Ok(payload) => Resolution::Reply(payload),
                    Err(_) => Resolution::ChannelClosed,
                })
            }
            _ = tokio::time::sleep_until(self.deadline) => {
                self.resolved = true;
                self.unregister();
                RequestEvent::Resolved(Resolution::TimedOut)
            }
        }
    }

    /// Await the terminal resolution, discarding progress events.
    pub async fn resolve(mut self) -> Resolution {
        loop {
            if let RequestEvent::Resolved(resolution) = self.next_event().await {
                return resolution;
            }
        }
    }

    fn unregister(&self) {
        self.pending.lock().remove(&self.correlation_id);
    }
}

impl Drop for RequestHandle {
    fn drop(&mut self) {
        self.unregister();
    }
}
