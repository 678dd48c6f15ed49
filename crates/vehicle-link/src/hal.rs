//! Seams to the vehicle HAL.
//!
//! [`VehicleHal`] is what the link calls outward (property reports, external
//! events, resource release). [`ControlBackend`] is what the HAL calls inward
//! to push a property change toward the vehicle; both the co-processor link
//! and the dummy backend implement it.

use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One property update forwarded to the HAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyReport {
    /// Wire control id of the property.
    pub property: u16,
    pub area: u8,
    pub value: u32,
    pub param: u32,
}

/// External state signals raised toward the rest of the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalEvent {
    /// The AP now owns the shared resources.
    ApOwnsResources,
    /// The AP gave the shared resources back.
    ApReleasedResources,
    TurnLeft,
    TurnRight,
    TurnNone,
    ReverseGear,
    DriveGear,
}

impl fmt::Display for ExternalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ApOwnsResources => "ap_owns_resources",
            Self::ApReleasedResources => "ap_released_resources",
            Self::TurnLeft => "turn_left",
            Self::TurnRight => "turn_right",
            Self::TurnNone => "turn_none",
            Self::ReverseGear => "reverse_gear",
            Self::DriveGear => "drive_gear",
        };
        f.write_str(name)
    }
}

/// Outbound sink. Implementations must not block and must not call back
/// into the link synchronously with an acked send.
pub trait VehicleHal: Send + Sync {
    fn report_property(&self, report: PropertyReport);

    fn signal_event(&self, event: ExternalEvent);

    /// Take over the resources the co-processor was driving.
    fn release_shared_resources(&self);
}

/// Inbound property-set path.
#[async_trait]
pub trait ControlBackend: Send + Sync {
    async fn set_control_commands(&self, property_id: u32, area: u32, value: u32) -> Result<()>;
}

/// Everything a [`RecordingHal`] observed, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalCall {
    Report(PropertyReport),
    Event(ExternalEvent),
    Release,
}

/// A [`VehicleHal`] that records calls. Useful for tests and for running the
/// link without a real HAL attached.
#[derive(Debug, Default)]
pub struct RecordingHal {
    calls: Mutex<Vec<HalCall>>,
}

impl RecordingHal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<HalCall> {
        self.calls.lock().clone()
    }

    pub fn reports(&self) -> Vec<PropertyReport> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                HalCall::Report(r) => Some(*r),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<ExternalEvent> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                HalCall::Event(e) => Some(*e),
                _ => None,
            })
            .collect()
    }

    pub fn release_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, HalCall::Release))
            .count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl VehicleHal for RecordingHal {
    fn report_property(&self, report: PropertyReport) {
        self.calls.lock().push(HalCall::Report(report));
    }

    fn signal_event(&self, event: ExternalEvent) {
        self.calls.lock().push(HalCall::Event(event));
    }

    fn release_shared_resources(&self) {
        self.calls.lock().push(HalCall::Release);
    }
}
