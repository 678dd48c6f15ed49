//! Property id to wire control id mapping.
//!
//! Only a handful of HAL property ids have a wire effect today. Every other id
//! is accepted and ignored so the HAL can keep calling through with its full
//! property set.

use serde::{Deserialize, Serialize};

use crate::hal::{PropertyReport, VehicleHal};

// ---------------------------------------------------------------------------
// HAL property ids
// ---------------------------------------------------------------------------

pub const HVAC_FAN_SPEED: u32 = 0x1540_0500;
pub const HVAC_FAN_DIRECTION: u32 = 0x1540_0501;
pub const HVAC_TEMPERATURE_SET: u32 = 0x1560_0503;
pub const HVAC_DEFROSTER: u32 = 0x1320_0504;
pub const HVAC_AC_ON: u32 = 0x1520_0505;
pub const HVAC_RECIRC_ON: u32 = 0x1520_0508;
pub const HVAC_AUTO_ON: u32 = 0x1520_050A;
pub const HVAC_SEAT_TEMPERATURE: u32 = 0x1540_050B;
pub const HVAC_POWER_ON: u32 = 0x1520_0510;
pub const AP_POWER_STATE_REQ: u32 = 0x1141_0A00;
pub const AP_POWER_STATE_REPORT: u32 = 0x1141_0A01;
pub const DISPLAY_BRIGHTNESS: u32 = 0x1140_0A03;
pub const WATCHDOG_ALIVE: u32 = 0x1150_0F31;
pub const PERF_VEHICLE_SPEED: u32 = 0x1160_0207;
pub const GEAR_SELECTION: u32 = 0x1140_0400;
pub const CURRENT_GEAR: u32 = 0x1140_0401;
pub const TURN_SIGNAL_STATE: u32 = 0x1140_0408;

// ---------------------------------------------------------------------------
// Areas and values
// ---------------------------------------------------------------------------

pub const AREA_SEAT_ROW_1_LEFT: u8 = 1;
pub const AREA_SEAT_ROW_1_RIGHT: u8 = 4;

pub const GEAR_PARK: u32 = 1;
pub const GEAR_REVERSE: u32 = 2;
pub const GEAR_DRIVE: u32 = 4;

pub const TURN_NONE: u32 = 0;
pub const TURN_LEFT: u32 = 1;
pub const TURN_RIGHT: u32 = 2;

/// Wire control id / state type shared by CONTROL requests and VSTATE frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum ControlId {
    Ac = 0,
    AutoOn = 1,
    AcTemp = 2,
    FanDirection = 3,
    FanSpeed = 4,
    Defrost = 5,
    RecircOn = 6,
    HvacPowerOn = 7,
    TurnSignal = 8,
    Gear = 9,
    Unsupported = 10,
    PowerStateReq = 11,
    SeatTemperature = 12,
}

impl ControlId {
    pub const fn from_u16(raw: u16) -> Option<Self> {
        Some(match raw {
            0 => Self::Ac,
            1 => Self::AutoOn,
            2 => Self::AcTemp,
            3 => Self::FanDirection,
            4 => Self::FanSpeed,
            5 => Self::Defrost,
            6 => Self::RecircOn,
            7 => Self::HvacPowerOn,
            8 => Self::TurnSignal,
            9 => Self::Gear,
            10 => Self::Unsupported,
            11 => Self::PowerStateReq,
            12 => Self::SeatTemperature,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Wire control id for a HAL property, or `None` when the property has no
/// wire effect.
#[must_use]
pub const fn resolve(property_id: u32) -> Option<ControlId> {
    match property_id {
        HVAC_FAN_SPEED => Some(ControlId::FanSpeed),
        HVAC_FAN_DIRECTION => Some(ControlId::FanDirection),
        HVAC_AUTO_ON => Some(ControlId::AutoOn),
        HVAC_AC_ON => Some(ControlId::Ac),
        HVAC_RECIRC_ON => Some(ControlId::RecircOn),
        HVAC_DEFROSTER => Some(ControlId::Defrost),
        HVAC_TEMPERATURE_SET => Some(ControlId::AcTemp),
        HVAC_POWER_ON => Some(ControlId::HvacPowerOn),
        HVAC_SEAT_TEMPERATURE => Some(ControlId::SeatTemperature),
        _ => None,
    }
}

/// Forward an inbound state value to the HAL.
///
/// HVAC power spans both front seats, so it is reported once per side.
pub fn notify_inbound(hal: &dyn VehicleHal, state_type: ControlId, area: u8, value: u32) {
    let property = state_type.as_u16();
    if state_type == ControlId::HvacPowerOn {
        for side in [AREA_SEAT_ROW_1_LEFT, AREA_SEAT_ROW_1_RIGHT] {
            hal.report_property(PropertyReport {
                property,
                area: side,
                value,
                param: 0,
            });
        }
    } else {
        hal.report_property(PropertyReport {
            property,
            area,
            value,
            param: 0,
        });
    }
}
