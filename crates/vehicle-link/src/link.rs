//! The per-channel link handle.
//!
//! A [`VehicleLink`] ties one channel, one correlator, one arbiter and one
//! registration loop together. There is no process-wide instance; callers
//! hold the link (usually in an `Arc`) and pass it where it is needed.

use std::sync::Arc;

use async_trait::async_trait;

use crate::arbitration::{Arbiter, RegistrationState};
use crate::codec::{Body, CommandRecord, Header, decode};
use crate::config::LinkConfig;
use crate::correlator::{Correlator, CorrelatorStats};
use crate::error::{ProtocolError, Result};
use crate::gate::Transport;
use crate::hal::{ControlBackend, VehicleHal};
use crate::properties;
use crate::registrar::{RegistrationLoop, RegistrationOutcome, Registrar};

pub struct VehicleLink {
    config: LinkConfig,
    header: Header,
    correlator: Arc<Correlator>,
    arbiter: Arc<Arbiter>,
    registrar: Registrar,
}

impl std::fmt::Debug for VehicleLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VehicleLink")
            .field("header", &self.header)
            .field("correlator", &self.correlator)
            .field("arbiter", &self.arbiter)
            .field("registrar", &self.registrar)
            .finish()
    }
}

impl VehicleLink {
    #[must_use]
    pub fn new(config: LinkConfig, hal: Arc<dyn VehicleHal>) -> Self {
        let header = config.protocol.header();
        Self {
            header,
            correlator: Arc::new(Correlator::new()),
            arbiter: Arc::new(Arbiter::new(hal, header.category)),
            registrar: Registrar::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    fn request(&self, body: Body) -> CommandRecord {
        CommandRecord::request(self.header, self.config.client_id, body)
    }

    // -----------------------------------------------------------------------
    // Channel lifecycle
    // -----------------------------------------------------------------------

    /// Bind `transport` and announce the AP with a fire-and-forget INIT.
    pub fn attach(
        &self,
        transport: Arc<dyn Transport>,
    ) -> std::result::Result<(), ProtocolError> {
        self.correlator.bind(transport);
        let init = CommandRecord::request(self.header, 0, Body::Init);
        self.correlator.notify(&init).inspect_err(|err| {
            tracing::warn!(error = %err, "INIT not delivered");
        })?;
        tracing::info!(category = self.header.category, "vehicle channel attached");
        Ok(())
    }

    /// Unbind the channel. A pending acked send fails with `ChannelNotReady`.
    pub fn detach(&self) {
        if self.correlator.unbind() {
            tracing::info!("vehicle channel detached");
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.correlator.gate().is_ready()
    }

    /// Entry point for every message the transport delivers.
    pub fn handle_inbound(&self, bytes: &[u8]) {
        match decode(bytes) {
            Ok(record) => self.arbiter.dispatch(record, &self.correlator),
            Err(err) => {
                self.arbiter.note_malformed();
                tracing::warn!(error = %err, len = bytes.len(), "dropping malformed frame");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Outbound requests
    // -----------------------------------------------------------------------

    /// Push a HAL property change to the co-processor.
    ///
    /// Properties without a wire mapping succeed without sending anything.
    pub async fn set_control_commands(
        &self,
        property_id: u32,
        area: u32,
        value: u32,
    ) -> std::result::Result<(), ProtocolError> {
        let Some(control) = properties::resolve(property_id) else {
            tracing::debug!(
                property_id = format_args!("{property_id:#x}"),
                area,
                value,
                "property has no wire mapping"
            );
            return Ok(());
        };
        let wire_area = u8::try_from(area).unwrap_or_else(|_| {
            tracing::warn!(area, "area does not fit the wire index byte, truncating");
            area as u8
        });
        tracing::debug!(?control, area = wire_area, value, "sending control");
        let record = self.request(Body::ControlRequest {
            control_id: control.as_u16(),
            param: value,
            area: wire_area,
        });
        self.correlator
            .send(&record, true, self.config.send_timeout())
            .await
    }

    /// Like [`set_control_commands`](Self::set_control_commands), but failures
    /// are logged instead of returned.
    pub async fn submit_control(&self, property_id: u32, area: u32, value: u32) {
        if let Err(err) = self.set_control_commands(property_id, area, value).await {
            tracing::warn!(
                property_id = format_args!("{property_id:#x}"),
                area,
                value,
                error = %err,
                "control not applied"
            );
        }
    }

    /// Report the AP power state to the co-processor.
    pub async fn report_power_state(
        &self,
        power_state: u16,
        sub_state: u16,
    ) -> std::result::Result<(), ProtocolError> {
        let record = self.request(Body::PowerReportRequest {
            power_state,
            sub_state,
        });
        self.correlator
            .send(&record, true, self.config.send_timeout())
            .await
    }

    /// Query one info entry; returns the length the remote reports.
    pub async fn get_info(&self, info_index: u16) -> std::result::Result<u8, ProtocolError> {
        let record = self.request(Body::GetInfoRequest { info_index });
        let reply = self
            .correlator
            .exchange(&record, self.config.send_timeout())
            .await?;
        match reply.body {
            Body::GetInfoResponse { length, .. } => Ok(length),
            _ => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Start the background REGISTER loop. Returns `false` when a loop is
    /// already running, the link is not `Unregistered`, or there is no Tokio
    /// runtime to spawn on.
    pub fn trigger_registration(&self) -> bool {
        let run = RegistrationLoop {
            correlator: Arc::clone(&self.correlator),
            arbiter: Arc::clone(&self.arbiter),
            request: self.request(Body::RegisterRequest {
                partition_id: self.config.wire_partition_id(),
            }),
            timeout: self.config.send_timeout(),
            backoff: self.config.register_backoff(),
        };
        self.registrar.trigger(run)
    }

    /// Wait for the latest registration loop to finish and return its
    /// outcome. Dropping this future leaves the loop running and guarded.
    pub async fn wait_registration(&self) -> Option<RegistrationOutcome> {
        self.registrar.wait().await
    }

    /// Give the shared resources back. No-op unless registered.
    pub async fn unregister(&self) -> std::result::Result<(), ProtocolError> {
        if !self.arbiter.state().is_registered() {
            tracing::debug!(state = ?self.arbiter.state(), "unregister skipped");
            return Ok(());
        }
        let record = self.request(Body::UnregisterRequest { reason: 0 });
        self.correlator
            .send(&record, true, self.config.send_timeout())
            .await
    }

    #[must_use]
    pub fn registration_state(&self) -> RegistrationState {
        self.arbiter.state()
    }

    /// Stop the registration loop and detach the channel.
    pub async fn shutdown(&self) -> Option<RegistrationOutcome> {
        let outcome = self.registrar.shutdown().await;
        self.detach();
        outcome
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn correlator_stats(&self) -> CorrelatorStats {
        self.correlator.stats()
    }

    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.arbiter.dropped_frames()
    }
}

#[async_trait]
impl ControlBackend for VehicleLink {
    async fn set_control_commands(&self, property_id: u32, area: u32, value: u32) -> Result<()> {
        Self::set_control_commands(self, property_id, area, value)
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::hal::RecordingHal;
    use crate::properties::{HVAC_FAN_SPEED, WATCHDOG_ALIVE};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Capture {
        frames: Mutex<Vec<Vec<u8>>>,
    }

    impl Transport for Capture {
        fn send(&self, frame: &[u8]) -> std::result::Result<(), TransportError> {
            self.frames.lock().push(frame.to_vec());
            Ok(())
        }
    }

    fn link() -> VehicleLink {
        VehicleLink::new(LinkConfig::default(), Arc::new(RecordingHal::new()))
    }

    #[tokio::test]
    async fn control_without_channel_is_not_ready() {
        let link = link();
        let err = link
            .set_control_commands(HVAC_FAN_SPEED, 0, 3)
            .await
            .expect_err("unbound");
        assert_eq!(err, ProtocolError::ChannelNotReady);
    }

    #[tokio::test]
    async fn attach_sends_init() {
        let link = link();
        let capture = Arc::new(Capture::default());
        link.attach(capture.clone()).expect("attach");
        let frames = capture.frames.lock().clone();
        assert_eq!(frames.len(), 1);
        let init = decode(&frames[0]).expect("decode");
        assert_eq!(init.body, Body::Init);
        assert!(link.is_ready());
        link.detach();
        assert!(!link.is_ready());
    }

    #[tokio::test]
    async fn unmapped_property_sends_nothing() {
        let link = link();
        let capture = Arc::new(Capture::default());
        link.attach(capture.clone()).expect("attach");
        link.set_control_commands(WATCHDOG_ALIVE, 0, 1)
            .await
            .expect("silently accepted");
        assert_eq!(capture.frames.lock().len(), 1);
    }

    #[test]
    fn malformed_inbound_is_counted() {
        let link = link();
        link.handle_inbound(&[1, 2, 3]);
        assert_eq!(link.dropped_frames(), 1);
    }

    #[tokio::test]
    async fn unregister_when_unregistered_is_noop() {
        let link = link();
        link.unregister().await.expect("noop");
    }
}
