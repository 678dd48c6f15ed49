//! Fixed-size command frames exchanged with the vehicle co-processor.
//!
//! Every message on the channel is exactly [`FRAME_LEN`] bytes, packed and
//! little endian:
//!
//! ```text
//! 0        1     2     3         4    5..10    10..14 14      15..17   17..21    21..25 25
//! category major minor direction kind reserved client retcode selector magnitude param  index
//! ```
//!
//! The payload area is shared between kinds. A [`Body`] variant names the
//! subset of fields meaningful for one kind and direction; everything else is
//! written as zero and ignored on decode.
//!
//! Request-shaped bodies are used for both requests and notifications; the
//! response shape is selected only when the direction byte says `Response`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// Total wire size of one frame.
pub const FRAME_LEN: usize = 26;

/// Size of the leading header (tags, direction, kind, reserved bytes).
pub const HEADER_LEN: usize = 10;

const OFF_CATEGORY: usize = 0;
const OFF_MAJOR: usize = 1;
const OFF_MINOR: usize = 2;
const OFF_DIRECTION: usize = 3;
const OFF_KIND: usize = 4;
const OFF_CLIENT: usize = 10;
const OFF_RETCODE: usize = 14;
const OFF_SELECTOR: usize = 15;
const OFF_MAGNITUDE: usize = 17;
const OFF_PARAM: usize = 21;
const OFF_INDEX: usize = 25;

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// Command kind carried in byte 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MessageKind {
    Init = 0,
    Register = 1,
    Unregister = 2,
    Control = 3,
    PowerReport = 4,
    GetInfo = 5,
    BootReason = 6,
    PowerControl = 7,
    VehicleState = 8,
}

impl MessageKind {
    pub const fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::Init,
            1 => Self::Register,
            2 => Self::Unregister,
            3 => Self::Control,
            4 => Self::PowerReport,
            5 => Self::GetInfo,
            6 => Self::BootReason,
            7 => Self::PowerControl,
            8 => Self::VehicleState,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Register => "REGISTER",
            Self::Unregister => "UNREGISTER",
            Self::Control => "CONTROL",
            Self::PowerReport => "PWR_REPORT",
            Self::GetInfo => "GET_INFO",
            Self::BootReason => "BOOT_REASON",
            Self::PowerControl => "PWR_CTRL",
            Self::VehicleState => "VSTATE",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message direction carried in byte 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Direction {
    Request = 0,
    Response = 1,
    Notification = 2,
}

impl Direction {
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Request),
            1 => Some(Self::Response),
            2 => Some(Self::Notification),
            _ => None,
        }
    }
}

/// Category and protocol version tags at the start of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Header {
    pub category: u8,
    pub major: u8,
    pub minor: u8,
}

/// Resource ownership reported by the remote in a REGISTER response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    /// The remote no longer uses the shared resources.
    Free,
    /// The remote still drives the shared resources (e.g. rear camera).
    Busy,
    UserActivityBusy,
    Unknown(u16),
}

impl DeviceState {
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        match raw {
            0 => Self::Free,
            1 => Self::Busy,
            2 => Self::UserActivityBusy,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            Self::Free => 0,
            Self::Busy => 1,
            Self::UserActivityBusy => 2,
            Self::Unknown(other) => other,
        }
    }

    #[must_use]
    pub const fn is_free(self) -> bool {
        matches!(self, Self::Free)
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Kind- and direction-specific payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Body {
    Init,
    InitResponse { retcode: u8 },
    RegisterRequest { partition_id: u8 },
    RegisterResponse { retcode: u8, device_state: DeviceState },
    UnregisterRequest { reason: u8 },
    UnregisterResponse { retcode: u8 },
    ControlRequest { control_id: u16, param: u32, area: u8 },
    ControlResponse { retcode: u8, result: u16 },
    PowerReportRequest { power_state: u16, sub_state: u16 },
    PowerReportResponse { retcode: u8 },
    GetInfoRequest { info_index: u16 },
    GetInfoResponse { retcode: u8, length: u8 },
    BootReasonRequest { reason: u8 },
    BootReasonResponse { retcode: u8, reason: u8 },
    PowerControlRequest { power_state: u16, time_postpone: u32 },
    PowerControlResponse { retcode: u8, power_state: u16, time_postpone: u32 },
    VehicleStateRequest { state_type: u16, value: u32, area: u8 },
    VehicleStateResponse { retcode: u8, state_type: u16, value: u32, area: u8 },
}

impl Body {
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Init | Self::InitResponse { .. } => MessageKind::Init,
            Self::RegisterRequest { .. } | Self::RegisterResponse { .. } => MessageKind::Register,
            Self::UnregisterRequest { .. } | Self::UnregisterResponse { .. } => {
                MessageKind::Unregister
            }
            Self::ControlRequest { .. } | Self::ControlResponse { .. } => MessageKind::Control,
            Self::PowerReportRequest { .. } | Self::PowerReportResponse { .. } => {
                MessageKind::PowerReport
            }
            Self::GetInfoRequest { .. } | Self::GetInfoResponse { .. } => MessageKind::GetInfo,
            Self::BootReasonRequest { .. } | Self::BootReasonResponse { .. } => {
                MessageKind::BootReason
            }
            Self::PowerControlRequest { .. } | Self::PowerControlResponse { .. } => {
                MessageKind::PowerControl
            }
            Self::VehicleStateRequest { .. } | Self::VehicleStateResponse { .. } => {
                MessageKind::VehicleState
            }
        }
    }

    /// Return code for response-shaped bodies.
    #[must_use]
    pub const fn retcode(&self) -> Option<u8> {
        match *self {
            Self::InitResponse { retcode }
            | Self::RegisterResponse { retcode, .. }
            | Self::UnregisterResponse { retcode }
            | Self::ControlResponse { retcode, .. }
            | Self::PowerReportResponse { retcode }
            | Self::GetInfoResponse { retcode, .. }
            | Self::BootReasonResponse { retcode, .. }
            | Self::PowerControlResponse { retcode, .. }
            | Self::VehicleStateResponse { retcode, .. } => Some(retcode),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_response(&self) -> bool {
        self.retcode().is_some()
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRecord {
    pub header: Header,
    pub direction: Direction,
    pub client: u32,
    pub body: Body,
}

impl CommandRecord {
    #[must_use]
    pub const fn request(header: Header, client: u32, body: Body) -> Self {
        Self {
            header,
            direction: Direction::Request,
            client,
            body,
        }
    }

    #[must_use]
    pub const fn response(header: Header, client: u32, body: Body) -> Self {
        Self {
            header,
            direction: Direction::Response,
            client,
            body,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    #[must_use]
    pub const fn retcode(&self) -> Option<u8> {
        self.body.retcode()
    }

    /// Build the success echo the AP sends back for a remote-initiated
    /// request. Returns `None` for kinds the AP never echoes.
    #[must_use]
    pub const fn echo_ack(&self) -> Option<Self> {
        let body = match self.body {
            Body::BootReasonRequest { reason } => Body::BootReasonResponse { retcode: 0, reason },
            Body::PowerControlRequest {
                power_state,
                time_postpone,
            } => Body::PowerControlResponse {
                retcode: 0,
                power_state,
                time_postpone,
            },
            Body::VehicleStateRequest {
                state_type,
                value,
                area,
            } => Body::VehicleStateResponse {
                retcode: 0,
                state_type,
                value,
                area,
            },
            _ => return None,
        };
        Some(Self::response(self.header, self.client, body))
    }
}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

fn put_u16(buf: &mut [u8; FRAME_LEN], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut [u8; FRAME_LEN], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn get_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn get_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Serialize a record into its fixed wire form.
#[must_use]
pub fn encode(record: &CommandRecord) -> [u8; FRAME_LEN] {
    let mut buf = [0u8; FRAME_LEN];
    buf[OFF_CATEGORY] = record.header.category;
    buf[OFF_MAJOR] = record.header.major;
    buf[OFF_MINOR] = record.header.minor;
    buf[OFF_DIRECTION] = record.direction as u8;
    buf[OFF_KIND] = record.kind() as u8;
    put_u32(&mut buf, OFF_CLIENT, record.client);
    if let Some(retcode) = record.retcode() {
        buf[OFF_RETCODE] = retcode;
    }

    match record.body {
        Body::Init
        | Body::InitResponse { .. }
        | Body::UnregisterResponse { .. }
        | Body::PowerReportResponse { .. } => {}
        Body::RegisterRequest { partition_id } => buf[OFF_SELECTOR] = partition_id,
        Body::RegisterResponse { device_state, .. } => {
            put_u16(&mut buf, OFF_SELECTOR, device_state.to_raw());
        }
        Body::UnregisterRequest { reason } | Body::BootReasonRequest { reason } => {
            buf[OFF_SELECTOR] = reason;
        }
        Body::BootReasonResponse { reason, .. } => buf[OFF_SELECTOR] = reason,
        Body::ControlRequest {
            control_id,
            param,
            area,
        } => {
            put_u16(&mut buf, OFF_SELECTOR, control_id);
            put_u32(&mut buf, OFF_PARAM, param);
            buf[OFF_INDEX] = area;
        }
        Body::ControlResponse { result, .. } => put_u16(&mut buf, OFF_SELECTOR, result),
        Body::PowerReportRequest {
            power_state,
            sub_state,
        } => {
            put_u16(&mut buf, OFF_SELECTOR, power_state);
            put_u16(&mut buf, OFF_MAGNITUDE, sub_state);
        }
        Body::GetInfoRequest { info_index } => put_u16(&mut buf, OFF_SELECTOR, info_index),
        Body::GetInfoResponse { length, .. } => buf[OFF_MAGNITUDE] = length,
        Body::PowerControlRequest {
            power_state,
            time_postpone,
        }
        | Body::PowerControlResponse {
            power_state,
            time_postpone,
            ..
        } => {
            put_u16(&mut buf, OFF_SELECTOR, power_state);
            put_u32(&mut buf, OFF_MAGNITUDE, time_postpone);
        }
        Body::VehicleStateRequest {
            state_type,
            value,
            area,
        }
        | Body::VehicleStateResponse {
            state_type,
            value,
            area,
            ..
        } => {
            put_u16(&mut buf, OFF_SELECTOR, state_type);
            put_u32(&mut buf, OFF_MAGNITUDE, value);
            buf[OFF_INDEX] = area;
        }
    }
    buf
}

/// Parse one delivered message.
pub fn decode(bytes: &[u8]) -> Result<CommandRecord, FrameError> {
    if bytes.len() != FRAME_LEN {
        return Err(FrameError::LengthMismatch {
            expected: FRAME_LEN,
            got: bytes.len(),
        });
    }
    let kind =
        MessageKind::from_u8(bytes[OFF_KIND]).ok_or(FrameError::UnknownKind(bytes[OFF_KIND]))?;
    let direction = Direction::from_u8(bytes[OFF_DIRECTION])
        .ok_or(FrameError::UnknownDirection(bytes[OFF_DIRECTION]))?;

    let header = Header {
        category: bytes[OFF_CATEGORY],
        major: bytes[OFF_MAJOR],
        minor: bytes[OFF_MINOR],
    };
    let client = get_u32(bytes, OFF_CLIENT);
    let retcode = bytes[OFF_RETCODE];
    let selector_u8 = bytes[OFF_SELECTOR];
    let selector = get_u16(bytes, OFF_SELECTOR);
    let index = bytes[OFF_INDEX];

    let body = if direction == Direction::Response {
        match kind {
            MessageKind::Init => Body::InitResponse { retcode },
            MessageKind::Register => Body::RegisterResponse {
                retcode,
                device_state: DeviceState::from_raw(selector),
            },
            MessageKind::Unregister => Body::UnregisterResponse { retcode },
            MessageKind::Control => Body::ControlResponse {
                retcode,
                result: selector,
            },
            MessageKind::PowerReport => Body::PowerReportResponse { retcode },
            MessageKind::GetInfo => Body::GetInfoResponse {
                retcode,
                length: bytes[OFF_MAGNITUDE],
            },
            MessageKind::BootReason => Body::BootReasonResponse {
                retcode,
                reason: selector_u8,
            },
            MessageKind::PowerControl => Body::PowerControlResponse {
                retcode,
                power_state: selector,
                time_postpone: get_u32(bytes, OFF_MAGNITUDE),
            },
            MessageKind::VehicleState => Body::VehicleStateResponse {
                retcode,
                state_type: selector,
                value: get_u32(bytes, OFF_MAGNITUDE),
                area: index,
            },
        }
    } else {
        match kind {
            MessageKind::Init => Body::Init,
            MessageKind::Register => Body::RegisterRequest {
                partition_id: selector_u8,
            },
            MessageKind::Unregister => Body::UnregisterRequest {
                reason: selector_u8,
            },
            MessageKind::Control => Body::ControlRequest {
                control_id: selector,
                param: get_u32(bytes, OFF_PARAM),
                area: index,
            },
            MessageKind::PowerReport => Body::PowerReportRequest {
                power_state: selector,
                sub_state: get_u16(bytes, OFF_MAGNITUDE),
            },
            MessageKind::GetInfo => Body::GetInfoRequest {
                info_index: selector,
            },
            MessageKind::BootReason => Body::BootReasonRequest {
                reason: selector_u8,
            },
            MessageKind::PowerControl => Body::PowerControlRequest {
                power_state: selector,
                time_postpone: get_u32(bytes, OFF_MAGNITUDE),
            },
            MessageKind::VehicleState => Body::VehicleStateRequest {
                state_type: selector,
                value: get_u32(bytes, OFF_MAGNITUDE),
                area: index,
            },
        }
    };

    Ok(CommandRecord {
        header,
        direction,
        client,
        body,
    })
}
