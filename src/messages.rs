// Message types exchanged with the host over the transport

use serde::{Deserialize, Serialize};

use crate::config::{NUM_SENSORS, NUM_SLOTS};

// Command from teleop/planner -> runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct DriveCommand {
    pub forward_velocity: f32, // m/s
    pub angular_velocity: f32, // rad/s
}

impl DriveCommand {
    pub fn new(forward_velocity: f32, angular_velocity: f32) -> Self {
        Self {
            forward_velocity,
            angular_velocity,
        }
    }

    pub fn stop() -> Self {
        Self::default()
    }

    pub fn is_finite(&self) -> bool {
        self.forward_velocity.is_finite() && self.angular_velocity.is_finite()
    }
}

/// Operator override for the indicator colours.
/// `None` leaves the slot to the safety governor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ColorOverride {
    pub slots: [Option<[u8; 3]>; NUM_SLOTS],
}

/// 10-bit RGB intensity triple as consumed by the LED chain
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u16,
    pub g: u16,
    pub b: u16,
}

impl Rgb {
    pub const FULL: u16 = 1023;

    pub const fn new(r: u16, g: u16, b: u16) -> Self {
        Self { r, g, b }
    }

    /// Scale an 8-bit override colour to the 10-bit LED range
    pub fn from_8bit(rgb: [u8; 3]) -> Self {
        Self {
            r: (rgb[0] as u16) << 2,
            g: (rgb[1] as u16) << 2,
            b: (rgb[2] as u16) << 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorState {
    pub colors: [Rgb; NUM_SLOTS],
}

// Pose estimate published at a fixed cadence
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct OdometryMessage {
    pub x: f32,
    pub y: f32,
    pub theta: f32,
    pub linear_velocity: f32,
    pub angular_velocity: f32,
    /// Milliseconds since the runtime started
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RangeReading {
    pub sensor_id: usize,
    /// `None` until the pinger has answered, or after it timed out
    pub distance: Option<f32>,
    pub error_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RangeReport {
    pub readings: [RangeReading; NUM_SENSORS],
}

/// Sticky counters of the non-fatal faults
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FaultCounters {
    pub sensor_timeouts: u32,
    pub left_link_timeouts: u32,
    pub right_link_timeouts: u32,
    pub link_errors: u32,
    pub malformed_messages: u32,
    /// Times the command stream went stale after having been fresh
    pub stale_commands: u32,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    Faulted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusLevel {
    Info,
    Error,
}

/// Free-text status line for the display and the host log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusLine {
    pub level: StatusLevel,
    pub text: String,
}

impl StatusLine {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Info,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Error,
            text: text.into(),
        }
    }
}

/// Everything the control worker hands to the transport
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    Odometry(OdometryMessage),
    Indicators(IndicatorState),
    Ranges(RangeReport),
    Health(RuntimeHealth),
    Faults(FaultCounters),
    Status(StatusLine),
}
