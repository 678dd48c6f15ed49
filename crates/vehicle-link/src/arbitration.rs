//! Resource arbitration between the AP and the co-processor.
//!
//! # Design
//!
//! The co-processor drives the shared camera/display path until the AP has
//! registered *and* the vehicle is out of reverse. A REGISTER success that
//! reports the remote as busy only latches `release_pending`; the actual
//! hand-off happens on the next gear DRIVE notification.
//!
//! Decisions are taken under the state lock and HAL calls are made after it
//! is dropped, so the HAL never runs with arbitration state locked and a
//! latch is consumed by exactly one frame.
//!
//! Every inbound frame is handled here. Nothing propagates back to the
//! delivery context: malformed or unexpected frames are logged and dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::codec::{Body, CommandRecord, DeviceState, Direction};
use crate::correlator::Correlator;
use crate::hal::{ExternalEvent, PropertyReport, VehicleHal};
use crate::properties::{self, ControlId, GEAR_DRIVE, GEAR_REVERSE};

/// Registration state of this AP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered { release_pending: bool },
}

impl RegistrationState {
    #[must_use]
    pub const fn is_registered(self) -> bool {
        matches!(self, Self::Registered { .. })
    }
}

enum GearAction {
    Release,
    Event(ExternalEvent),
    None,
}

pub struct Arbiter {
    state: Mutex<RegistrationState>,
    hal: Arc<dyn VehicleHal>,
    category: u8,
    dropped: AtomicU64,
}

impl std::fmt::Debug for Arbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arbiter")
            .field("state", &*self.state.lock())
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

impl Arbiter {
    /// `category` is the only frame category this arbiter accepts.
    pub fn new(hal: Arc<dyn VehicleHal>, category: u8) -> Self {
        Self {
            state: Mutex::new(RegistrationState::Unregistered),
            hal,
            category,
            dropped: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn state(&self) -> RegistrationState {
        *self.state.lock()
    }

    /// Frames dropped as malformed or unexpected.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Move to `Registering`. Refused unless currently `Unregistered`.
    pub fn begin_registration(&self) -> bool {
        let mut state = self.state.lock();
        if *state == RegistrationState::Unregistered {
            *state = RegistrationState::Registering;
            true
        } else {
            false
        }
    }

    /// A REGISTER attempt failed or timed out.
    pub fn registration_failed(&self) {
        let mut state = self.state.lock();
        if *state == RegistrationState::Registering {
            *state = RegistrationState::Unregistered;
        }
    }

    /// Dispatch one decoded inbound frame.
    ///
    /// Echo acknowledgments go out fire-and-forget through `correlator`, and
    /// responses are handed to its waiter after local state is updated.
    pub fn dispatch(&self, record: CommandRecord, correlator: &Correlator) {
        if record.header.category != self.category {
            self.drop_frame(&record, "foreign category");
            return;
        }

        if record.direction == Direction::Response {
            match record.body {
                Body::RegisterResponse {
                    retcode,
                    device_state,
                } => self.on_register_response(retcode, device_state),
                Body::UnregisterResponse { retcode } => self.on_unregister_response(retcode),
                Body::ControlResponse { result, .. } => {
                    tracing::debug!(result, "control response");
                }
                _ => {}
            }
            correlator.on_response_received(record);
            return;
        }

        match record.body {
            Body::BootReasonRequest { reason } => {
                tracing::info!(reason, "remote boot reason");
                Self::echo(&record, correlator);
            }
            Body::PowerControlRequest {
                power_state,
                time_postpone,
            } => {
                Self::echo(&record, correlator);
                self.hal.report_property(PropertyReport {
                    property: ControlId::PowerStateReq.as_u16(),
                    area: 0,
                    value: u32::from(power_state),
                    param: time_postpone,
                });
            }
            Body::VehicleStateRequest {
                state_type,
                value,
                area,
            } => {
                let Some(state_type) = ControlId::from_u16(state_type) else {
                    self.drop_frame(&record, "unknown state type");
                    return;
                };
                self.on_vehicle_state(state_type, area, value);
                Self::echo(&record, correlator);
            }
            _ => self.drop_frame(&record, "unexpected request from remote"),
        }
    }

    fn on_register_response(&self, retcode: u8, device_state: DeviceState) {
        if retcode != 0 {
            tracing::warn!(retcode, "register rejected by remote");
            return;
        }
        let release_now = {
            let mut state = self.state.lock();
            if state.is_registered() {
                tracing::debug!("duplicate register response ignored");
                return;
            }
            let release_now = device_state.is_free();
            *state = RegistrationState::Registered {
                release_pending: !release_now,
            };
            release_now
        };
        if release_now {
            tracing::info!("registered, remote resources free");
            self.hal.release_shared_resources();
            self.hal.signal_event(ExternalEvent::ApOwnsResources);
        } else {
            tracing::info!(?device_state, "registered, release deferred until drive");
        }
    }

    fn on_unregister_response(&self, retcode: u8) {
        if retcode != 0 {
            tracing::warn!(retcode, "unregister rejected by remote");
            return;
        }
        let was_registered = {
            let mut state = self.state.lock();
            let was = state.is_registered();
            *state = RegistrationState::Unregistered;
            was
        };
        if was_registered {
            tracing::info!("unregistered");
            self.hal.signal_event(ExternalEvent::ApReleasedResources);
        }
    }

    fn on_vehicle_state(&self, state_type: ControlId, area: u8, value: u32) {
        if state_type == ControlId::Gear {
            let action = {
                let mut state = self.state.lock();
                match *state {
                    RegistrationState::Registered {
                        release_pending: true,
                    } if value == GEAR_DRIVE => {
                        *state = RegistrationState::Registered {
                            release_pending: false,
                        };
                        GearAction::Release
                    }
                    RegistrationState::Registered { .. } if value == GEAR_DRIVE => {
                        GearAction::Event(ExternalEvent::DriveGear)
                    }
                    RegistrationState::Registered { .. } if value == GEAR_REVERSE => {
                        GearAction::Event(ExternalEvent::ReverseGear)
                    }
                    _ => GearAction::None,
                }
            };
            match action {
                GearAction::Release => {
                    tracing::info!("drive engaged, taking over shared resources");
                    self.hal.release_shared_resources();
                    self.hal.signal_event(ExternalEvent::ApOwnsResources);
                }
                GearAction::Event(event) => self.hal.signal_event(event),
                GearAction::None => {}
            }
        }
        properties::notify_inbound(self.hal.as_ref(), state_type, area, value);
    }

    fn echo(record: &CommandRecord, correlator: &Correlator) {
        let Some(ack) = record.echo_ack() else {
            return;
        };
        if let Err(err) = correlator.notify(&ack) {
            tracing::warn!(
                kind = %record.kind(),
                error = %err,
                "failed to acknowledge remote request"
            );
        }
    }

    fn drop_frame(&self, record: &CommandRecord, reason: &'static str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            kind = %record.kind(),
            direction = ?record.direction,
            category = record.header.category,
            reason,
            "dropping inbound frame"
        );
    }

    /// Count a frame that failed to decode.
    pub(crate) fn note_malformed(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Header;
    use crate::hal::RecordingHal;

    const HEADER: Header = Header {
        category: 8,
        major: 1,
        minor: 0,
    };

    fn setup() -> (Arc<RecordingHal>, Arbiter, Correlator) {
        let hal = Arc::new(RecordingHal::new());
        let arbiter = Arbiter::new(hal.clone(), HEADER.category);
        (hal, arbiter, Correlator::new())
    }

    fn register_reply(retcode: u8, device_state: DeviceState) -> CommandRecord {
        CommandRecord::response(
            HEADER,
            0,
            Body::RegisterResponse {
                retcode,
                device_state,
            },
        )
    }

    fn gear(value: u32) -> CommandRecord {
        CommandRecord {
            header: HEADER,
            direction: Direction::Notification,
            client: 0,
            body: Body::VehicleStateRequest {
                state_type: ControlId::Gear.as_u16(),
                value,
                area: 0,
            },
        }
    }

    #[test]
    fn begin_registration_is_guarded() {
        let (_hal, arbiter, _c) = setup();
        assert!(arbiter.begin_registration());
        assert!(!arbiter.begin_registration());
        arbiter.registration_failed();
        assert_eq!(arbiter.state(), RegistrationState::Unregistered);
        assert!(arbiter.begin_registration());
    }

    #[test]
    fn free_register_releases_immediately() {
        let (hal, arbiter, c) = setup();
        arbiter.begin_registration();
        arbiter.dispatch(register_reply(0, DeviceState::Free), &c);
        assert_eq!(
            arbiter.state(),
            RegistrationState::Registered {
                release_pending: false
            }
        );
        assert_eq!(hal.release_count(), 1);
        assert_eq!(hal.events(), vec![ExternalEvent::ApOwnsResources]);
    }

    #[test]
    fn busy_register_defers_release_to_drive() {
        let (hal, arbiter, c) = setup();
        arbiter.begin_registration();
        arbiter.dispatch(register_reply(0, DeviceState::Busy), &c);
        assert_eq!(hal.release_count(), 0);

        arbiter.dispatch(gear(GEAR_DRIVE), &c);
        assert_eq!(hal.release_count(), 1);
        assert_eq!(
            arbiter.state(),
            RegistrationState::Registered {
                release_pending: false
            }
        );

        arbiter.dispatch(gear(GEAR_DRIVE), &c);
        assert_eq!(hal.release_count(), 1);
        assert_eq!(
            hal.events(),
            vec![ExternalEvent::ApOwnsResources, ExternalEvent::DriveGear]
        );
    }

    #[test]
    fn duplicate_register_success_does_not_release_twice() {
        let (hal, arbiter, c) = setup();
        arbiter.dispatch(register_reply(0, DeviceState::Free), &c);
        arbiter.dispatch(register_reply(0, DeviceState::Free), &c);
        assert_eq!(hal.release_count(), 1);
    }

    #[test]
    fn rejected_register_leaves_state_alone() {
        let (hal, arbiter, c) = setup();
        arbiter.begin_registration();
        arbiter.dispatch(register_reply(5, DeviceState::Free), &c);
        assert_eq!(arbiter.state(), RegistrationState::Registering);
        assert!(hal.calls().is_empty());
    }

    #[test]
    fn reverse_before_registration_only_reports_gear() {
        let (hal, arbiter, c) = setup();
        arbiter.dispatch(gear(GEAR_REVERSE), &c);
        assert!(hal.events().is_empty());
        assert_eq!(hal.reports().len(), 1);
        assert_eq!(hal.reports()[0].value, GEAR_REVERSE);
    }

    #[test]
    fn unregister_success_returns_resources() {
        let (hal, arbiter, c) = setup();
        arbiter.dispatch(register_reply(0, DeviceState::Free), &c);
        hal.clear();
        arbiter.dispatch(
            CommandRecord::response(HEADER, 0, Body::UnregisterResponse { retcode: 0 }),
            &c,
        );
        assert_eq!(arbiter.state(), RegistrationState::Unregistered);
        assert_eq!(hal.events(), vec![ExternalEvent::ApReleasedResources]);
    }

    #[test]
    fn unknown_state_type_and_foreign_category_are_dropped() {
        let (hal, arbiter, c) = setup();
        let mut unknown = gear(GEAR_DRIVE);
        unknown.body = Body::VehicleStateRequest {
            state_type: 0x7fff,
            value: 1,
            area: 0,
        };
        arbiter.dispatch(unknown, &c);

        let mut foreign = gear(GEAR_DRIVE);
        foreign.header.category = 3;
        arbiter.dispatch(foreign, &c);

        assert!(hal.calls().is_empty());
        assert_eq!(arbiter.dropped_frames(), 2);
    }

    #[test]
    fn power_control_reports_power_request() {
        let (hal, arbiter, c) = setup();
        arbiter.dispatch(
            CommandRecord::request(
                HEADER,
                0,
                Body::PowerControlRequest {
                    power_state: 1,
                    time_postpone: 30,
                },
            ),
            &c,
        );
        assert_eq!(
            hal.reports(),
            vec![PropertyReport {
                property: ControlId::PowerStateReq.as_u16(),
                area: 0,
                value: 1,
                param: 30
            }]
        );
    }
}
