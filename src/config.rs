// Timeouts, topics, geometry, safety and link configuration
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

// Base tick of the control worker. Components run on divisors of this rate.
pub const LOOP_HZ: u64 = 150;
pub const DRIVE_DIVISOR: u64 = 3; // 50 Hz drive pipeline
pub const RANGING_DIVISOR: u64 = 1; // poll the pinger every tick
pub const INDICATOR_DIVISOR: u64 = 3;
pub const STATUS_DIVISOR: u64 = 150; // once a second

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Odometry is integrated every drive cycle but published at most this often
pub const ODOMETRY_PUBLISH_INTERVAL: Duration = Duration::from_millis(70);

// How long an operator colour override holds before the governor takes over again
pub const COLOR_OVERRIDE_TTL: Duration = Duration::from_millis(100);

// How often the emergency stop is repeated once a fatal fault is latched
pub const FAULT_ESTOP_INTERVAL: Duration = Duration::from_millis(500);

// Zenoh topics
pub const TOPIC_CMD_VEL: &str = "parsec/cmd_vel"; // drive commands
pub const TOPIC_COLORS: &str = "parsec/colors"; // indicator overrides
pub const TOPIC_ODOMETRY: &str = "parsec/odom_simple";
pub const TOPIC_INDICATORS: &str = "parsec/indicators";
pub const TOPIC_RANGES: &str = "parsec/ranges";
pub const TOPIC_HEALTH: &str = "parsec/state/health";
pub const TOPIC_FAULTS: &str = "parsec/state/faults";
pub const TOPIC_LOG: &str = "parsec/log";

// Serial ports
pub const MOTOR_PORT: &str = "/dev/ttyUSB0";
pub const MOTOR_BAUDRATE: u32 = 19_200;
pub const RANGING_PORT: &str = "/dev/ttyUSB1";
pub const RANGING_BAUDRATE: u32 = 115_200;

// Base geometry, measured on the 36 cm chassis
pub const BASE_RADIUS: f32 = 0.18; // meters, center to wheel contact
pub const WHEEL_RADIUS: f32 = 0.07; // meters

// Ultrasonic safety
pub const NUM_SENSORS: usize = 5;
pub const NUM_SLOTS: usize = 2 * NUM_SENSORS;
pub const STOP_DISTANCE: f32 = 0.15; // below this the pinger reading is not trusted
pub const STOP_TIME: f32 = 1.5; // roughly max speed / max deceleration
pub const DISPLAY_THRESHOLD: f32 = 0.6; // obstacle shown closer than this when not governing
pub const MOVING_ENTER_SPEED: f32 = 0.2;
pub const MOVING_EXIT_SPEED: f32 = 0.02;
pub const ROTATION_EPSILON: f32 = 1e-6;

// Hand-adjusted from cos(2*pi*k/12); side-facing pingers slowed the robot too much.
pub const SENSOR_DIRECTIONS: [f32; NUM_SENSORS] = [0.25, 0.5, 1.0, 0.5, 0.25];

// Pinger is declared dead for a round after this many ticks without an echo
pub const SENSOR_TIMEOUT_TICKS: u32 = 10;

// Wheel controllers
pub const LEFT_CONTROLLER_ID: u8 = 1;
pub const RIGHT_CONTROLLER_ID: u8 = 2;
pub const DEFAULT_GAIN: f32 = 0.075;
pub const DEFAULT_ACCELERATION: f32 = 1.0;
pub const LINK_RESPONSE_TIMEOUT: Duration = Duration::from_millis(50);

/// Error raised while loading or validating the configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "parsec-drive-runtime", about = "Safety-governed differential drive runtime")]
pub struct Args {
    /// JSON file with drive configuration overrides
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Serial port of the wheel controller bus
    #[arg(long)]
    pub motor_port: Option<String>,

    /// Serial port of the ultrasonic multiplexer
    #[arg(long)]
    pub ranging_port: Option<String>,

    /// Position controller gain
    #[arg(long)]
    pub gain: Option<f32>,

    /// Position controller acceleration (m/s^2)
    #[arg(long)]
    pub acceleration: Option<f32>,

    /// Run against simulated sensors and wheel controllers
    #[arg(long)]
    pub sim: bool,
}

/// Geometry of the differential-drive base
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    pub base_radius: f32,
    pub wheel_radius: f32,
    /// Controllers are mounted so that positive shaft velocity drives backwards
    pub reversed_mounting: bool,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            base_radius: BASE_RADIUS,
            wheel_radius: WHEEL_RADIUS,
            reversed_mounting: true,
        }
    }
}

/// Ultrasonic safety governor parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub stop_distance: f32,
    pub stop_time: f32,
    pub display_threshold: f32,
    pub moving_enter_speed: f32,
    pub moving_exit_speed: f32,
    pub rotation_epsilon: f32,
    pub sensor_directions: [f32; NUM_SENSORS],
    pub sensor_timeout_ticks: u32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            stop_distance: STOP_DISTANCE,
            stop_time: STOP_TIME,
            display_threshold: DISPLAY_THRESHOLD,
            moving_enter_speed: MOVING_ENTER_SPEED,
            moving_exit_speed: MOVING_EXIT_SPEED,
            rotation_epsilon: ROTATION_EPSILON,
            sensor_directions: SENSOR_DIRECTIONS,
            sensor_timeout_ticks: SENSOR_TIMEOUT_TICKS,
        }
    }
}

/// Wheel controller bus parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub motor_port: String,
    pub baudrate: u32,
    pub left_id: u8,
    pub right_id: u8,
    pub gain: f32,
    pub acceleration: f32,
    pub response_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            motor_port: MOTOR_PORT.to_string(),
            baudrate: MOTOR_BAUDRATE,
            left_id: LEFT_CONTROLLER_ID,
            right_id: RIGHT_CONTROLLER_ID,
            gain: DEFAULT_GAIN,
            acceleration: DEFAULT_ACCELERATION,
            response_timeout_ms: LINK_RESPONSE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl LinkConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// Ultrasonic multiplexer parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RangingConfig {
    pub ranging_port: String,
    pub baudrate: u32,
}

impl Default for RangingConfig {
    fn default() -> Self {
        Self {
            ranging_port: RANGING_PORT.to_string(),
            baudrate: RANGING_BAUDRATE,
        }
    }
}

/// Control worker timing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub loop_hz: u64,
    pub drive_divisor: u64,
    pub ranging_divisor: u64,
    pub indicator_divisor: u64,
    pub status_divisor: u64,
    pub cmd_timeout_ms: u64,
    pub odometry_publish_ms: u64,
    pub color_override_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            loop_hz: LOOP_HZ,
            drive_divisor: DRIVE_DIVISOR,
            ranging_divisor: RANGING_DIVISOR,
            indicator_divisor: INDICATOR_DIVISOR,
            status_divisor: STATUS_DIVISOR,
            cmd_timeout_ms: CMD_TIMEOUT.as_millis() as u64,
            odometry_publish_ms: ODOMETRY_PUBLISH_INTERVAL.as_millis() as u64,
            color_override_ms: COLOR_OVERRIDE_TTL.as_millis() as u64,
        }
    }
}

impl TimingConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.loop_hz.max(1))
    }

    pub fn cmd_timeout(&self) -> Duration {
        Duration::from_millis(self.cmd_timeout_ms)
    }

    pub fn odometry_publish_interval(&self) -> Duration {
        Duration::from_millis(self.odometry_publish_ms)
    }

    pub fn color_override_ttl(&self) -> Duration {
        Duration::from_millis(self.color_override_ms)
    }
}

/// Everything the control worker needs, supplied once at startup
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub geometry: GeometryConfig,
    pub safety: SafetyConfig,
    pub link: LinkConfig,
    pub ranging: RangingConfig,
    pub timing: TimingConfig,
}

impl DriveConfig {
    /// Load a JSON config file; missing fields keep their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Build the config from CLI arguments (file first, then flag overrides)
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(port) = &args.motor_port {
            config.link.motor_port = port.clone();
        }
        if let Some(port) = &args.ranging_port {
            config.ranging.ranging_port = port.clone();
        }
        if let Some(gain) = args.gain {
            config.link.gain = gain;
        }
        if let Some(acceleration) = args.acceleration {
            config.link.acceleration = acceleration;
        }
        Ok(config)
    }

    /// Check the invariants the control pipeline relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.geometry;
        if !(g.base_radius.is_finite() && g.base_radius > 0.0) {
            return Err(invalid(format!("base_radius must be > 0, got {}", g.base_radius)));
        }
        if !(g.wheel_radius.is_finite() && g.wheel_radius > 0.0) {
            return Err(invalid(format!("wheel_radius must be > 0, got {}", g.wheel_radius)));
        }

        let s = &self.safety;
        if !(s.stop_distance.is_finite() && s.stop_distance >= 0.0) {
            return Err(invalid(format!("stop_distance must be >= 0, got {}", s.stop_distance)));
        }
        if !(s.stop_time.is_finite() && s.stop_time > 0.0) {
            return Err(invalid(format!("stop_time must be > 0, got {}", s.stop_time)));
        }
        if !(s.moving_exit_speed >= 0.0 && s.moving_exit_speed < s.moving_enter_speed) {
            return Err(invalid(format!(
                "moving hysteresis must satisfy 0 <= exit < enter, got exit={} enter={}",
                s.moving_exit_speed, s.moving_enter_speed
            )));
        }
        if let Some(bad) = s.sensor_directions.iter().find(|c| !c.is_finite() || c.abs() > 1.0) {
            return Err(invalid(format!("sensor direction {} outside [-1, 1]", bad)));
        }
        if s.sensor_timeout_ticks == 0 {
            return Err(invalid("sensor_timeout_ticks must be > 0".to_string()));
        }

        let l = &self.link;
        if l.left_id == l.right_id {
            return Err(invalid(format!("controller ids must differ, both are {}", l.left_id)));
        }
        if l.left_id == crate::motor::BROADCAST_ID || l.right_id == crate::motor::BROADCAST_ID {
            return Err(invalid("controller id collides with the broadcast id".to_string()));
        }
        if !(l.gain.is_finite() && l.gain >= 0.0) || !(l.acceleration.is_finite() && l.acceleration > 0.0) {
            return Err(invalid(format!(
                "gain/acceleration out of range: gain={} acceleration={}",
                l.gain, l.acceleration
            )));
        }
        if l.response_timeout_ms == 0 {
            return Err(invalid("response_timeout_ms must be > 0".to_string()));
        }

        let t = &self.timing;
        if t.loop_hz == 0
            || t.drive_divisor == 0
            || t.ranging_divisor == 0
            || t.indicator_divisor == 0
            || t.status_divisor == 0
        {
            return Err(invalid("loop rate and tick divisors must be > 0".to_string()));
        }
        Ok(())
    }
}

fn invalid(reason: String) -> ConfigError {
    ConfigError::Invalid(reason)
}
