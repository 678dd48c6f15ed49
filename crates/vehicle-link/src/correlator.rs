//! Request/response correlation over the raw channel.
//!
//! # Design
//!
//! The channel carries no request ids, so the AP keeps at most one
//! acknowledgment-expecting request in flight. Callers that expect an ack
//! queue on a FIFO async lock; the holder arms a one-shot reply slot, tagged
//! with a fresh ticket and the request kind, *before* transmitting, so a reply
//! delivered synchronously from inside the transport's `send` is not lost.
//!
//! Replies are matched by kind. A reply for a kind nobody is waiting on is
//! dropped and counted. When a wait ends (reply, timeout, or the caller's
//! future being dropped) the slot is disarmed only if it still carries that
//! caller's ticket.
//!
//! Fire-and-forget sends skip the lock and the slot entirely.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::codec::{CommandRecord, MessageKind, encode};
use crate::error::ProtocolError;
use crate::gate::{ChannelGate, Transport};

struct PendingRequest {
    ticket: u64,
    kind: MessageKind,
    reply: oneshot::Sender<CommandRecord>,
}

/// Counters describing correlator activity since creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelatorStats {
    /// Frames handed to the transport.
    pub frames_sent: u64,
    /// Acked requests that completed with return code 0.
    pub acked: u64,
    /// Acked requests answered with a nonzero return code.
    pub rejected: u64,
    pub timeouts: u64,
    /// Responses that arrived with no matching waiter.
    pub unmatched_responses: u64,
}

pub struct Correlator {
    gate: ChannelGate,
    send_lock: tokio::sync::Mutex<()>,
    pending: Mutex<Option<PendingRequest>>,
    next_ticket: AtomicU64,
    frames_sent: AtomicU64,
    acked: AtomicU64,
    rejected: AtomicU64,
    timeouts: AtomicU64,
    unmatched: AtomicU64,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("gate", &self.gate)
            .field("awaiting", &self.awaiting())
            .finish_non_exhaustive()
    }
}

/// Disarms the pending slot for one ticket when dropped.
struct ArmedSlot<'a> {
    pending: &'a Mutex<Option<PendingRequest>>,
    ticket: u64,
}

impl Drop for ArmedSlot<'_> {
    fn drop(&mut self) {
        let mut slot = self.pending.lock();
        if slot.as_ref().is_some_and(|p| p.ticket == self.ticket) {
            *slot = None;
        }
    }
}

impl Correlator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            gate: ChannelGate::new(),
            send_lock: tokio::sync::Mutex::new(()),
            pending: Mutex::new(None),
            next_ticket: AtomicU64::new(1),
            frames_sent: AtomicU64::new(0),
            acked: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            unmatched: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn gate(&self) -> &ChannelGate {
        &self.gate
    }

    pub fn bind(&self, transport: Arc<dyn Transport>) {
        self.gate.bind(transport);
    }

    /// Unbind the channel and abandon any pending wait. The waiter observes
    /// [`ProtocolError::ChannelNotReady`].
    pub fn unbind(&self) -> bool {
        let was_bound = self.gate.unbind();
        if let Some(abandoned) = self.pending.lock().take() {
            tracing::debug!(
                kind = %abandoned.kind,
                ticket = abandoned.ticket,
                "abandoning pending request"
            );
        }
        was_bound
    }

    /// Kind of the request currently awaiting a reply, if any.
    #[must_use]
    pub fn awaiting(&self) -> Option<MessageKind> {
        self.pending.lock().as_ref().map(|p| p.kind)
    }

    /// Send `record`, optionally waiting up to `timeout` for its reply.
    pub async fn send(
        &self,
        record: &CommandRecord,
        expect_ack: bool,
        timeout: Duration,
    ) -> Result<(), ProtocolError> {
        if expect_ack {
            self.exchange(record, timeout).await.map(|_| ())
        } else {
            self.notify(record)
        }
    }

    /// Fire-and-forget transmit.
    pub fn notify(&self, record: &CommandRecord) -> Result<(), ProtocolError> {
        let transport = self.gate.ready_transport()?;
        self.transmit(transport.as_ref(), record)
    }

    /// Transmit `record` and wait for the matching reply.
    ///
    /// Returns the reply on return code 0.
    pub async fn exchange(
        &self,
        record: &CommandRecord,
        timeout: Duration,
    ) -> Result<CommandRecord, ProtocolError> {
        let kind = record.kind();
        let _turn = self.send_lock.lock().await;

        let transport = self.gate.ready_transport()?;
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        *self.pending.lock() = Some(PendingRequest {
            ticket,
            kind,
            reply: tx,
        });
        let _armed = ArmedSlot {
            pending: &self.pending,
            ticket,
        };
        tracing::trace!(kind = %kind, ticket, "reply slot armed");

        // An unbind between taking the transport and arming found no slot
        // to abandon.
        if !self.gate.is_ready() {
            return Err(ProtocolError::ChannelNotReady);
        }

        self.transmit(transport.as_ref(), record)?;

        let reply = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                tracing::debug!(kind = %kind, ticket, "wait abandoned, channel unbound");
                return Err(ProtocolError::ChannelNotReady);
            }
            Err(_) => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    kind = %kind,
                    ticket,
                    timeout_ms = timeout.as_millis() as u64,
                    "no reply from remote"
                );
                return Err(ProtocolError::Timeout {
                    kind,
                    waited: timeout,
                });
            }
        };

        match reply.retcode().unwrap_or(0) {
            0 => {
                self.acked.fetch_add(1, Ordering::Relaxed);
                Ok(reply)
            }
            code => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(kind = %kind, code, "remote rejected request");
                Err(ProtocolError::RemoteRejected { kind, code })
            }
        }
    }

    /// Hand a response-direction frame to the waiting caller.
    ///
    /// Returns whether a waiter took it. Safe to call from any context,
    /// including from inside [`Transport::send`].
    pub fn on_response_received(&self, record: CommandRecord) -> bool {
        let kind = record.kind();
        let waiter = self.pending.lock().take_if(|p| p.kind == kind);
        let Some(waiter) = waiter else {
            self.unmatched.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                kind = %kind,
                awaiting = ?self.awaiting(),
                "dropping unmatched response"
            );
            return false;
        };
        if waiter.reply.send(record).is_err() {
            self.unmatched.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(kind = %kind, ticket = waiter.ticket, "waiter gone before reply");
            return false;
        }
        true
    }

    #[must_use]
    pub fn stats(&self) -> CorrelatorStats {
        CorrelatorStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            unmatched_responses: self.unmatched.load(Ordering::Relaxed),
        }
    }

    fn transmit(
        &self,
        transport: &dyn Transport,
        record: &CommandRecord,
    ) -> Result<(), ProtocolError> {
        let frame = encode(record);
        // Count before the write: a synchronous reply may land inside it.
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        transport.send(&frame).map_err(|err| {
            tracing::warn!(kind = %record.kind(), error = %err, "transport send failed");
            ProtocolError::SendFailed(err)
        })
    }
}
