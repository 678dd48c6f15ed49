//! Channel readiness tracking.
//!
//! The gate owns the currently bound [`Transport`], if any. Senders ask the
//! gate for the transport on every send; an unbound or detached channel fails
//! fast instead of queuing.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{ProtocolError, TransportError};

/// Point-to-point message endpoint to the co-processor.
///
/// Delivery in the other direction is push-based: the owner of the
/// transport calls [`VehicleLink::handle_inbound`](crate::VehicleLink::handle_inbound)
/// with each received message.
pub trait Transport: Send + Sync {
    /// Transmit one frame. Must not block on a reply.
    fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Whether the endpoint is currently attached.
    fn is_attached(&self) -> bool {
        true
    }
}

#[derive(Default)]
pub struct ChannelGate {
    transport: RwLock<Option<Arc<dyn Transport>>>,
}

impl std::fmt::Debug for ChannelGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelGate")
            .field("bound", &self.transport.read().is_some())
            .finish()
    }
}

impl ChannelGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a transport, replacing any previous one.
    pub fn bind(&self, transport: Arc<dyn Transport>) {
        let replaced = self.transport.write().replace(transport).is_some();
        tracing::debug!(replaced, "channel bound");
    }

    /// Drop the bound transport. Returns whether one was bound.
    pub fn unbind(&self) -> bool {
        let was_bound = self.transport.write().take().is_some();
        if was_bound {
            tracing::debug!("channel unbound");
        }
        was_bound
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.transport
            .read()
            .as_ref()
            .is_some_and(|t| t.is_attached())
    }

    /// The bound transport if it is ready to send.
    pub fn ready_transport(&self) -> Result<Arc<dyn Transport>, ProtocolError> {
        match self.transport.read().as_ref() {
            Some(t) if t.is_attached() => Ok(Arc::clone(t)),
            _ => Err(ProtocolError::ChannelNotReady),
        }
    }
}
