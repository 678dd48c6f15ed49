//! Scripted in-process co-processor used by the integration tests.
#![allow(dead_code)]

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use vehicle_link::codec::{DeviceState, decode, encode};
use vehicle_link::hal::RecordingHal;
use vehicle_link::{
    Body, CommandRecord, Direction, Header, LinkConfig, MessageKind, Transport, TransportError,
    VehicleLink,
};

pub fn header() -> Header {
    LinkConfig::default().protocol.header()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    Received(MessageKind, Direction),
    Replied(MessageKind),
}

type Responder = dyn Fn(&CommandRecord) -> Option<CommandRecord> + Send + Sync;

pub struct ScriptedPeer {
    link: OnceLock<Weak<VehicleLink>>,
    responder: Box<Responder>,
    delay: Option<Duration>,
    log: Arc<Mutex<Vec<PeerEvent>>>,
    received: Mutex<Vec<CommandRecord>>,
}

impl ScriptedPeer {
    /// Peer that answers synchronously from inside `send`.
    pub fn immediate(
        responder: impl Fn(&CommandRecord) -> Option<CommandRecord> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::build(responder, None)
    }

    /// Peer that answers from a spawned task after `delay`.
    pub fn delayed(
        delay: Duration,
        responder: impl Fn(&CommandRecord) -> Option<CommandRecord> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::build(responder, Some(delay))
    }

    /// Peer that never answers.
    pub fn silent() -> Arc<Self> {
        Self::build(|_| None, None)
    }

    fn build(
        responder: impl Fn(&CommandRecord) -> Option<CommandRecord> + Send + Sync + 'static,
        delay: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new(Self {
            link: OnceLock::new(),
            responder: Box::new(responder),
            delay,
            log: Arc::new(Mutex::new(Vec::new())),
            received: Mutex::new(Vec::new()),
        })
    }

    /// Attach this peer to `link` as its transport.
    pub fn connect(self: &Arc<Self>, link: &Arc<VehicleLink>) {
        let _ = self.link.set(Arc::downgrade(link));
        link.attach(self.clone()).expect("attach");
    }

    /// Deliver a remote-initiated frame to the link.
    pub fn inject(&self, record: CommandRecord) {
        if let Some(link) = self.link.get().and_then(Weak::upgrade) {
            link.handle_inbound(&encode(&record));
        }
    }

    pub fn inject_raw(&self, bytes: &[u8]) {
        if let Some(link) = self.link.get().and_then(Weak::upgrade) {
            link.handle_inbound(bytes);
        }
    }

    pub fn log(&self) -> Vec<PeerEvent> {
        self.log.lock().clone()
    }

    pub fn received(&self) -> Vec<CommandRecord> {
        self.received.lock().clone()
    }

    pub fn received_kind(&self, kind: MessageKind) -> Vec<CommandRecord> {
        self.received()
            .into_iter()
            .filter(|r| r.kind() == kind)
            .collect()
    }
}

impl Transport for ScriptedPeer {
    fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        let record = decode(frame).map_err(|e| TransportError::Write(e.to_string()))?;
        self.log
            .lock()
            .push(PeerEvent::Received(record.kind(), record.direction));
        self.received.lock().push(record);

        let Some(reply) = (self.responder)(&record) else {
            return Ok(());
        };
        let bytes = encode(&reply);
        let link = self.link.get().cloned().unwrap_or_default();
        match self.delay {
            None => {
                self.log.lock().push(PeerEvent::Replied(reply.kind()));
                if let Some(link) = link.upgrade() {
                    link.handle_inbound(&bytes);
                }
            }
            Some(delay) => {
                let log = Arc::clone(&self.log);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    log.lock().push(PeerEvent::Replied(reply.kind()));
                    if let Some(link) = link.upgrade() {
                        link.handle_inbound(&bytes);
                    }
                });
            }
        }
        Ok(())
    }
}

/// Success reply for every request the AP sends that expects one.
pub fn accept_all(record: &CommandRecord) -> Option<CommandRecord> {
    accept_with(record, DeviceState::Free)
}

pub fn accept_with(record: &CommandRecord, device_state: DeviceState) -> Option<CommandRecord> {
    if record.direction != Direction::Request {
        return None;
    }
    let body = match record.body {
        Body::RegisterRequest { .. } => Body::RegisterResponse {
            retcode: 0,
            device_state,
        },
        Body::UnregisterRequest { .. } => Body::UnregisterResponse { retcode: 0 },
        Body::ControlRequest { control_id, .. } => Body::ControlResponse {
            retcode: 0,
            result: control_id,
        },
        Body::PowerReportRequest { .. } => Body::PowerReportResponse { retcode: 0 },
        Body::GetInfoRequest { .. } => Body::GetInfoResponse {
            retcode: 0,
            length: 4,
        },
        _ => return None,
    };
    Some(CommandRecord::response(record.header, record.client, body))
}

pub fn link_with_hal() -> (Arc<VehicleLink>, Arc<RecordingHal>) {
    link_with_config(LinkConfig::default())
}

pub fn link_with_config(config: LinkConfig) -> (Arc<VehicleLink>, Arc<RecordingHal>) {
    let hal = Arc::new(RecordingHal::new());
    let link = Arc::new(VehicleLink::new(config, hal.clone()));
    (link, hal)
}

/// A gear/HVAC/etc. state notification from the remote.
pub fn vstate(state_type: u16, value: u32, area: u8) -> CommandRecord {
    CommandRecord {
        header: header(),
        direction: Direction::Notification,
        client: 0,
        body: Body::VehicleStateRequest {
            state_type,
            value,
            area,
        },
    }
}
