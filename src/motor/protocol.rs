// Wheel position controller serial protocol
//
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// Status format: [0xFF, 0xFF, ID, Length, Status, Params..., Checksum]
// Length counts instruction/status + params + checksum.

use std::time::{Duration, Instant};
use tracing::debug;

use super::half_duplex::HalfDuplex;

/// Packet header bytes
pub const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Address every controller on the bus listens to
pub const BROADCAST_ID: u8 = 0xFE;

/// Instruction set understood by the wheel controllers
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Init = 0x10,            // 1 byte: 1 = primary, 0 = secondary
    SetGain = 0x11,         // u16, thousandths
    SetAcceleration = 0x12, // u16, thousandths of m/s^2
    UpdateVelocity = 0x13,  // u16 sign-magnitude, milli-rad/s; replies with i32 travel (milli-rad)
    EmergencyStop = 0x1F,   // broadcast only, never answered
}

impl TryFrom<u8> for Instruction {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        match value {
            0x10 => Ok(Instruction::Init),
            0x11 => Ok(Instruction::SetGain),
            0x12 => Ok(Instruction::SetAcceleration),
            0x13 => Ok(Instruction::UpdateVelocity),
            0x1F => Ok(Instruction::EmergencyStop),
            other => Err(other),
        }
    }
}

/// Error types for wheel controller communication
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from controller {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for controller {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Controller {id} returned error status: 0x{status:02X}")]
    ControllerError { id: u8, status: u8 },

    #[error("Timeout waiting for response from controller {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, LinkError>;

/// Calculate checksum for a packet (excluding header)
pub fn checksum(data: &[u8]) -> u8 {
    let sum: u32 = data.iter().map(|&b| b as u32).sum();
    (!sum & 0xFF) as u8
}

/// Build a packet with header and checksum
pub fn build_packet(id: u8, instruction: u8, params: &[u8]) -> Vec<u8> {
    let length = (params.len() + 2) as u8; // params + instruction + checksum
    let mut packet = Vec::with_capacity(6 + params.len());

    packet.extend_from_slice(&HEADER);
    packet.push(id);
    packet.push(length);
    packet.push(instruction);
    packet.extend_from_slice(params);

    // Checksum over id, length, instruction, params
    let checksum_data = &packet[2..];
    packet.push(checksum(checksum_data));

    packet
}

/// Owns the half-duplex line shared by all wheel controllers
pub struct ControllerBus<P: HalfDuplex> {
    port: P,
    response_timeout: Duration,
}

impl<P: HalfDuplex> ControllerBus<P> {
    pub fn new(port: P, response_timeout: Duration) -> Self {
        Self {
            port,
            response_timeout,
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Transmit a packet and hand the line back to the receiver
    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.enable_transmit()?;
        self.port.write(packet)?;
        // Flipping direction before the last stop bit has left drops it.
        self.port.wait_transmit_complete()?;
        self.port.enable_receive()?;
        Ok(())
    }

    fn read_byte(&mut self, id: u8, deadline: Instant) -> Result<u8> {
        self.port
            .read_byte_or_timeout(deadline)?
            .ok_or(LinkError::Timeout { id })
    }

    /// Read a status packet, returning its parameters
    fn read_response(&mut self, expected_id: u8, deadline: Instant) -> Result<Vec<u8>> {
        // Resynchronise on the header; a stray byte must not cost the whole exchange
        let mut previous = self.read_byte(expected_id, deadline)?;
        loop {
            let current = self.read_byte(expected_id, deadline)?;
            if previous == HEADER[0] && current == HEADER[1] {
                break;
            }
            previous = current;
        }

        let id = self.read_byte(expected_id, deadline)?;
        let length = self.read_byte(expected_id, deadline)? as usize;

        if id != expected_id {
            return Err(LinkError::InvalidResponse {
                id: expected_id,
                reason: format!("ID mismatch: expected {}, got {}", expected_id, id),
            });
        }
        if length < 2 {
            return Err(LinkError::InvalidResponse {
                id,
                reason: format!("Length {} too short", length),
            });
        }

        // status + params + checksum = length bytes
        let mut remaining = Vec::with_capacity(length);
        for _ in 0..length {
            remaining.push(self.read_byte(expected_id, deadline)?);
        }

        let mut checksum_data = vec![id, length as u8];
        checksum_data.extend_from_slice(&remaining[..remaining.len() - 1]);
        let expected_checksum = checksum(&checksum_data);
        let received_checksum = remaining[remaining.len() - 1];

        if expected_checksum != received_checksum {
            return Err(LinkError::ChecksumMismatch { id });
        }

        let status = remaining[0];
        if status != 0 {
            return Err(LinkError::ControllerError { id, status });
        }

        Ok(remaining[1..remaining.len() - 1].to_vec())
    }

    /// One synchronous request/response exchange, bounded by the response timeout
    pub fn transact(&mut self, id: u8, instruction: Instruction, params: &[u8]) -> Result<Vec<u8>> {
        let packet = build_packet(id, instruction as u8, params);
        debug!("Controller {}: {:?} {:02X?}", id, instruction, params);

        self.port.discard_input()?;
        self.send_packet(&packet)?;
        let deadline = Instant::now() + self.response_timeout;
        self.read_response(id, deadline)
    }

    /// Send to every controller without waiting for an answer
    pub fn broadcast(&mut self, instruction: Instruction, params: &[u8]) -> Result<()> {
        let packet = build_packet(BROADCAST_ID, instruction as u8, params);
        debug!("Broadcast {:?}", instruction);
        self.send_packet(&packet)
    }

    /// Best-effort stop of every controller, used outside the normal cadence
    pub fn software_emergency_stop(&mut self) -> Result<()> {
        self.broadcast(Instruction::EmergencyStop, &[])
    }
}

/// Encode a signed value to sign-magnitude format
/// Bit 15 = sign (1 = negative), Bits 0-14 = magnitude
pub fn encode_sign_magnitude(value: i16) -> u16 {
    let magnitude = value.unsigned_abs().min(0x7FFF);
    if value >= 0 {
        magnitude
    } else {
        0x8000 | magnitude
    }
}

/// Decode sign-magnitude format to signed value
pub fn decode_sign_magnitude(raw: u16) -> i16 {
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Convert a quantity to thousandths, saturating at the u16 range
pub fn to_milli_u16(value: f32) -> u16 {
    (value * 1000.0).round().clamp(0.0, u16::MAX as f32) as u16
}
