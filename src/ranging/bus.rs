// Ultrasonic trigger/echo bus
//
// One pinger is addressed at a time. The multiplexer answers a trigger with
// the echo pulse width once the measurement is done.
// Echo frame format: [0xA5, sensor, width_lo, width_hi] (width in microseconds)

use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

/// m/s at roughly 20 °C
pub const SPEED_OF_SOUND: f32 = 343.0;

const ECHO_MARKER: u8 = 0xA5;
const ECHO_FRAME_LEN: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum RangingError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No ultrasonic sensor {0}")]
    InvalidSensor(usize),
}

pub trait RangingBus {
    /// Fire the trigger pulse on one sensor
    fn trigger(&mut self, sensor: usize) -> Result<(), RangingError>;

    /// Echo pulse width of the last trigger, once the sensor is ready
    fn poll_echo(&mut self, sensor: usize) -> Result<Option<Duration>, RangingError>;
}

/// Round-trip pulse width to one-way distance in meters
pub fn pulse_to_distance(width: Duration) -> f32 {
    width.as_secs_f32() * SPEED_OF_SOUND / 2.0
}

/// Ultrasonic multiplexer attached to a serial port
pub struct SerialRangingBus {
    port: Box<dyn SerialPort>,
    pending: Vec<u8>,
    sensors: usize,
}

impl SerialRangingBus {
    pub fn open(port_name: &str, baudrate: u32, sensors: usize) -> Result<Self, RangingError> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(1))
            .open()?;
        debug!("Opened ranging port {} at {} baud", port_name, baudrate);
        Ok(Self {
            port,
            pending: Vec::with_capacity(2 * ECHO_FRAME_LEN),
            sensors,
        })
    }
}

impl RangingBus for SerialRangingBus {
    fn trigger(&mut self, sensor: usize) -> Result<(), RangingError> {
        if sensor >= self.sensors {
            return Err(RangingError::InvalidSensor(sensor));
        }
        // Echoes still in flight belong to the previous sensor
        self.pending.clear();
        self.port.write_all(&[sensor as u8])?;
        self.port.flush()?;
        Ok(())
    }

    fn poll_echo(&mut self, sensor: usize) -> Result<Option<Duration>, RangingError> {
        let available = self.port.bytes_to_read()? as usize;
        if available > 0 {
            let start = self.pending.len();
            self.pending.resize(start + available, 0);
            let read = self.port.read(&mut self.pending[start..])?;
            self.pending.truncate(start + read);
        }
        Ok(take_echo(&mut self.pending, sensor))
    }
}

/// Pop the first complete echo frame for `sensor`, discarding anything else before it
fn take_echo(pending: &mut Vec<u8>, sensor: usize) -> Option<Duration> {
    loop {
        let start = pending.iter().position(|&b| b == ECHO_MARKER)?;
        pending.drain(..start);
        if pending.len() < ECHO_FRAME_LEN {
            return None;
        }
        let frame: Vec<u8> = pending.drain(..ECHO_FRAME_LEN).collect();
        if frame[1] as usize == sensor {
            let micros = u16::from_le_bytes([frame[2], frame[3]]);
            return Some(Duration::from_micros(micros as u64));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pulse_to_distance() {
        // 5.831 ms round trip is about one meter
        assert_relative_eq!(pulse_to_distance(Duration::from_micros(5831)), 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_take_echo_waits_for_full_frame() {
        let mut pending = vec![0xA5, 2, 0x10];
        assert_eq!(take_echo(&mut pending, 2), None);
        pending.push(0x00);
        assert_eq!(take_echo(&mut pending, 2), Some(Duration::from_micros(0x10)));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_take_echo_skips_other_sensors_and_noise() {
        let mut pending = vec![0x00, 0xA5, 1, 0xFF, 0x00, 0xA5, 3, 0xE8, 0x03];
        assert_eq!(take_echo(&mut pending, 3), Some(Duration::from_micros(1000)));
    }
}
