//! Software stand-in for the co-processor.
//!
//! Used on boards without the vehicle co-processor. HAL property sets are
//! stored locally, and the injection setters play the part of the vehicle:
//! each validated change is reported to the HAL exactly as a VSTATE frame
//! from the remote would be.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{DummyError, Result};
use crate::hal::{ControlBackend, ExternalEvent, PropertyReport, VehicleHal};
use crate::properties::{
    self, AREA_SEAT_ROW_1_LEFT, AREA_SEAT_ROW_1_RIGHT, ControlId, GEAR_DRIVE, GEAR_PARK,
    GEAR_REVERSE, TURN_LEFT, TURN_NONE, TURN_RIGHT,
};

pub const TEMP_LEFT_AREA: u8 = 1;
pub const TEMP_RIGHT_AREA: u8 = 4;
pub const SEAT_TEMP_LEFT_AREA: u8 = 1;
pub const SEAT_TEMP_RIGHT_AREA: u8 = 4;
pub const DEFROST_LEFT_AREA: u8 = 1;
pub const DEFROST_RIGHT_AREA: u8 = 2;

/// Last known value of every simulated signal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DummyState {
    pub gear: u32,
    pub turn: u32,
    pub temp_left: u32,
    pub temp_right: u32,
    pub fan_direction: u32,
    pub fan_speed: u32,
    pub defrost_left: u32,
    pub defrost_right: u32,
    pub ac_on: u32,
    pub auto_on: u32,
    pub hvac_on: u32,
    pub recirc_on: u32,
    pub power_req_state: u32,
    pub power_req_param: u32,
    pub seat_temp_left: u32,
    pub seat_temp_right: u32,
}

type Field = fn(&mut DummyState) -> &mut u32;

fn check(field: &'static str, value: u32, ok: bool) -> std::result::Result<(), DummyError> {
    if ok {
        Ok(())
    } else {
        tracing::warn!(field, value, "rejecting dummy input");
        Err(DummyError::InvalidValue { field, value })
    }
}

fn on_off(field: &'static str, value: u32) -> std::result::Result<(), DummyError> {
    check(field, value, value <= 1)
}

pub struct DummyVehicle {
    state: Mutex<DummyState>,
    hal: Arc<dyn VehicleHal>,
}

impl std::fmt::Debug for DummyVehicle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyVehicle")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl DummyVehicle {
    pub fn new(hal: Arc<dyn VehicleHal>) -> Self {
        Self {
            state: Mutex::new(DummyState::default()),
            hal,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> DummyState {
        self.state.lock().clone()
    }

    /// Store `value`; returns whether it changed.
    fn update(&self, field: Field, value: u32) -> bool {
        let mut state = self.state.lock();
        let slot = field(&mut state);
        if *slot == value {
            false
        } else {
            *slot = value;
            true
        }
    }

    fn report(&self, control: ControlId, area: u8, value: u32) {
        self.hal.report_property(PropertyReport {
            property: control.as_u16(),
            area,
            value,
            param: 0,
        });
    }

    fn inject(&self, field: Field, control: ControlId, area: u8, value: u32) {
        if self.update(field, value) {
            self.report(control, area, value);
        }
    }

    // -----------------------------------------------------------------------
    // Injection
    // -----------------------------------------------------------------------

    pub fn set_gear(&self, gear: u32) -> std::result::Result<(), DummyError> {
        check("gear", gear, matches!(gear, GEAR_PARK | GEAR_REVERSE | GEAR_DRIVE))?;
        if self.update(|s| &mut s.gear, gear) {
            self.report(ControlId::Gear, 0, gear);
            match gear {
                GEAR_DRIVE => self.hal.signal_event(ExternalEvent::DriveGear),
                GEAR_REVERSE => self.hal.signal_event(ExternalEvent::ReverseGear),
                _ => {}
            }
        }
        Ok(())
    }

    pub fn set_turn(&self, turn: u32) -> std::result::Result<(), DummyError> {
        let event = match turn {
            TURN_NONE => ExternalEvent::TurnNone,
            TURN_LEFT => ExternalEvent::TurnLeft,
            TURN_RIGHT => ExternalEvent::TurnRight,
            _ => return check("turn", turn, false),
        };
        if self.update(|s| &mut s.turn, turn) {
            self.report(ControlId::TurnSignal, 0, turn);
            self.hal.signal_event(event);
        }
        Ok(())
    }

    pub fn set_temp_left(&self, temp: u32) {
        self.inject(|s| &mut s.temp_left, ControlId::AcTemp, TEMP_LEFT_AREA, temp);
    }

    pub fn set_temp_right(&self, temp: u32) {
        self.inject(|s| &mut s.temp_right, ControlId::AcTemp, TEMP_RIGHT_AREA, temp);
    }

    pub fn set_seat_temp_left(&self, level: u32) -> std::result::Result<(), DummyError> {
        check("seat_temp_left", level, level <= 3)?;
        self.inject(
            |s| &mut s.seat_temp_left,
            ControlId::SeatTemperature,
            SEAT_TEMP_LEFT_AREA,
            level,
        );
        Ok(())
    }

    pub fn set_seat_temp_right(&self, level: u32) -> std::result::Result<(), DummyError> {
        check("seat_temp_right", level, level <= 3)?;
        self.inject(
            |s| &mut s.seat_temp_right,
            ControlId::SeatTemperature,
            SEAT_TEMP_RIGHT_AREA,
            level,
        );
        Ok(())
    }

    pub fn set_fan_direction(&self, direction: u32) -> std::result::Result<(), DummyError> {
        check("fan_direction", direction, matches!(direction, 1 | 2 | 3 | 6))?;
        self.inject(|s| &mut s.fan_direction, ControlId::FanDirection, 0, direction);
        Ok(())
    }

    pub fn set_fan_speed(&self, speed: u32) -> std::result::Result<(), DummyError> {
        check("fan_speed", speed, (1..=6).contains(&speed))?;
        self.inject(|s| &mut s.fan_speed, ControlId::FanSpeed, 0, speed);
        Ok(())
    }

    pub fn set_defrost_left(&self, on: u32) -> std::result::Result<(), DummyError> {
        on_off("defrost_left", on)?;
        self.inject(|s| &mut s.defrost_left, ControlId::Defrost, DEFROST_LEFT_AREA, on);
        Ok(())
    }

    pub fn set_defrost_right(&self, on: u32) -> std::result::Result<(), DummyError> {
        on_off("defrost_right", on)?;
        self.inject(|s| &mut s.defrost_right, ControlId::Defrost, DEFROST_RIGHT_AREA, on);
        Ok(())
    }

    pub fn set_ac_on(&self, on: u32) -> std::result::Result<(), DummyError> {
        on_off("ac_on", on)?;
        self.inject(|s| &mut s.ac_on, ControlId::Ac, 0, on);
        Ok(())
    }

    pub fn set_auto_on(&self, on: u32) -> std::result::Result<(), DummyError> {
        on_off("auto_on", on)?;
        self.inject(|s| &mut s.auto_on, ControlId::AutoOn, 0, on);
        Ok(())
    }

    pub fn set_recirc_on(&self, on: u32) -> std::result::Result<(), DummyError> {
        on_off("recirc_on", on)?;
        self.inject(|s| &mut s.recirc_on, ControlId::RecircOn, 0, on);
        Ok(())
    }

    /// HVAC power is reported for both front seats.
    pub fn set_hvac_on(&self, on: u32) -> std::result::Result<(), DummyError> {
        on_off("hvac_on", on)?;
        if self.update(|s| &mut s.hvac_on, on) {
            properties::notify_inbound(self.hal.as_ref(), ControlId::HvacPowerOn, 0, on);
        }
        Ok(())
    }

    /// Inject a power state request. Always reported, even when unchanged.
    pub fn set_power_request(&self, state: u32, param: u32) -> std::result::Result<(), DummyError> {
        check("power_req_state", state, state <= 3)?;
        check("power_req_param", param, (1..=6).contains(&param))?;
        {
            let mut s = self.state.lock();
            s.power_req_state = state;
            s.power_req_param = param;
        }
        tracing::info!(state, param, "power request injected");
        self.hal.report_property(PropertyReport {
            property: ControlId::PowerStateReq.as_u16(),
            area: 0,
            value: state,
            param,
        });
        Ok(())
    }
}

#[async_trait]
impl ControlBackend for DummyVehicle {
    async fn set_control_commands(&self, property_id: u32, area: u32, value: u32) -> Result<()> {
        let Some(control) = properties::resolve(property_id) else {
            tracing::debug!(
                property_id = format_args!("{property_id:#x}"),
                "ignored by dummy backend"
            );
            return Ok(());
        };
        let mut s = self.state.lock();
        match control {
            ControlId::FanSpeed => s.fan_speed = value,
            ControlId::FanDirection => s.fan_direction = value,
            ControlId::AutoOn => s.auto_on = value,
            ControlId::Ac => s.ac_on = value,
            ControlId::RecircOn => s.recirc_on = value,
            ControlId::HvacPowerOn => s.hvac_on = value,
            ControlId::Defrost if area == u32::from(DEFROST_LEFT_AREA) => s.defrost_left = value,
            ControlId::Defrost => s.defrost_right = value,
            ControlId::AcTemp if area == u32::from(TEMP_LEFT_AREA) => s.temp_left = value,
            ControlId::AcTemp if area == u32::from(TEMP_RIGHT_AREA) => s.temp_right = value,
            ControlId::SeatTemperature if area == u32::from(SEAT_TEMP_LEFT_AREA) => {
                s.seat_temp_left = value;
            }
            ControlId::SeatTemperature if area == u32::from(SEAT_TEMP_RIGHT_AREA) => {
                s.seat_temp_right = value;
            }
            other => {
                tracing::warn!(?other, area, value, "unknown area for dummy control");
                return Ok(());
            }
        }
        tracing::debug!(?control, area, value, "dummy control stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::RecordingHal;
    use crate::properties::{HVAC_DEFROSTER, HVAC_SEAT_TEMPERATURE, HVAC_TEMPERATURE_SET};

    fn dummy() -> (Arc<RecordingHal>, DummyVehicle) {
        let hal = Arc::new(RecordingHal::new());
        let dummy = DummyVehicle::new(hal.clone());
        (hal, dummy)
    }

    #[test]
    fn gear_change_reports_and_signals_once() {
        let (hal, dummy) = dummy();
        dummy.set_gear(GEAR_REVERSE).expect("valid");
        dummy.set_gear(GEAR_REVERSE).expect("valid");
        assert_eq!(hal.reports().len(), 1);
        assert_eq!(hal.events(), vec![ExternalEvent::ReverseGear]);
        dummy.set_gear(GEAR_DRIVE).expect("valid");
        assert_eq!(
            hal.events(),
            vec![ExternalEvent::ReverseGear, ExternalEvent::DriveGear]
        );
    }

    #[test]
    fn invalid_gear_is_rejected_without_side_effects() {
        let (hal, dummy) = dummy();
        let err = dummy.set_gear(3).expect_err("invalid");
        assert_eq!(
            err,
            DummyError::InvalidValue {
                field: "gear",
                value: 3
            }
        );
        assert!(hal.calls().is_empty());
        assert_eq!(dummy.snapshot().gear, 0);
    }

    #[test]
    fn turn_signals_matching_event() {
        let (hal, dummy) = dummy();
        dummy.set_turn(TURN_LEFT).expect("valid");
        dummy.set_turn(TURN_NONE).expect("valid");
        assert_eq!(
            hal.events(),
            vec![ExternalEvent::TurnLeft, ExternalEvent::TurnNone]
        );
        assert!(dummy.set_turn(7).is_err());
    }

    #[test]
    fn hvac_power_fans_out() {
        let (hal, dummy) = dummy();
        dummy.set_hvac_on(1).expect("valid");
        let areas: Vec<u8> = hal.reports().iter().map(|r| r.area).collect();
        assert_eq!(areas, vec![AREA_SEAT_ROW_1_LEFT, AREA_SEAT_ROW_1_RIGHT]);
    }

    #[test]
    fn power_request_is_reported_even_when_unchanged() {
        let (hal, dummy) = dummy();
        dummy.set_power_request(1, 2).expect("valid");
        dummy.set_power_request(1, 2).expect("valid");
        assert_eq!(hal.reports().len(), 2);
        assert_eq!(hal.reports()[0].param, 2);
        assert!(dummy.set_power_request(4, 2).is_err());
        assert!(dummy.set_power_request(1, 0).is_err());
    }

    #[test]
    fn seat_and_defrost_use_side_areas() {
        let (hal, dummy) = dummy();
        dummy.set_seat_temp_right(2).expect("valid");
        dummy.set_defrost_right(1).expect("valid");
        assert!(dummy.set_seat_temp_left(4).is_err());
        let areas: Vec<u8> = hal.reports().iter().map(|r| r.area).collect();
        assert_eq!(areas, vec![SEAT_TEMP_RIGHT_AREA, DEFROST_RIGHT_AREA]);
    }

    #[tokio::test]
    async fn control_commands_are_stored_by_area() {
        let (hal, dummy) = dummy();
        dummy
            .set_control_commands(HVAC_TEMPERATURE_SET, u32::from(TEMP_RIGHT_AREA), 22)
            .await
            .expect("stored");
        dummy
            .set_control_commands(HVAC_DEFROSTER, u32::from(DEFROST_LEFT_AREA), 1)
            .await
            .expect("stored");
        dummy
            .set_control_commands(HVAC_SEAT_TEMPERATURE, 9, 3)
            .await
            .expect("unknown area is not an error");
        let snap = dummy.snapshot();
        assert_eq!(snap.temp_right, 22);
        assert_eq!(snap.defrost_left, 1);
        assert_eq!(snap.seat_temp_left, 0);
        assert_eq!(snap.seat_temp_right, 0);
        assert!(hal.calls().is_empty());
    }
}
