// In-memory stand-ins for the ultrasonic multiplexer and the wheel controllers.
// Used by `--sim` runs and by the tests.

use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::NUM_SENSORS;
use crate::motor::half_duplex::HalfDuplex;
use crate::motor::protocol::{build_packet, checksum, decode_sign_magnitude, Instruction, BROADCAST_ID, HEADER};
use crate::ranging::bus::{RangingBus, RangingError, SPEED_OF_SOUND};

/// Scripted pingers; an echo is ready `latency_polls` polls after the trigger
pub struct SimulatedRanging {
    distances: [f32; NUM_SENSORS],
    dead: [bool; NUM_SENSORS],
    latency_polls: u32,
    active: Option<(usize, u32)>,
    overlapping: u32,
}

impl SimulatedRanging {
    pub fn new(distances: [f32; NUM_SENSORS], latency_polls: u32) -> Self {
        Self {
            distances,
            dead: [false; NUM_SENSORS],
            latency_polls: latency_polls.max(1),
            active: None,
            overlapping: 0,
        }
    }

    pub fn set_distance(&mut self, sensor: usize, distance: f32) {
        self.distances[sensor] = distance;
    }

    pub fn set_dead(&mut self, sensor: usize, dead: bool) {
        self.dead[sensor] = dead;
    }

    /// Triggers fired while a live pinger was still ringing
    pub fn overlapping_triggers(&self) -> u32 {
        self.overlapping
    }

}

impl RangingBus for SimulatedRanging {
    fn trigger(&mut self, sensor: usize) -> Result<(), RangingError> {
        if sensor >= NUM_SENSORS {
            return Err(RangingError::InvalidSensor(sensor));
        }
        if let Some((ringing, _)) = self.active {
            if !self.dead[ringing] {
                self.overlapping += 1;
            }
        }
        self.active = Some((sensor, 0));
        Ok(())
    }

    fn poll_echo(&mut self, sensor: usize) -> Result<Option<Duration>, RangingError> {
        let Some((ringing, polls)) = self.active.as_mut() else {
            return Ok(None);
        };
        if *ringing != sensor || self.dead[sensor] {
            return Ok(None);
        }
        *polls += 1;
        if *polls < self.latency_polls {
            return Ok(None);
        }
        self.active = None;
        let round_trip = 2.0 * self.distances[sensor] / SPEED_OF_SOUND;
        Ok(Some(Duration::from_secs_f32(round_trip)))
    }
}

/// Observable state of one simulated wheel controller
#[derive(Debug, Clone, Default)]
pub struct SimController {
    pub id: u8,
    pub initialized: bool,
    pub primary: bool,
    pub gain_milli: u16,
    pub acceleration_milli: u16,
    pub target_milli_rad_s: i16,
    pub silent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Idle,
    Transmit,
    Receive,
}

/// Wheel controllers behind a simulated half-duplex line.
///
/// Bytes written while the transmitter is off, or still in flight when the
/// receiver is switched on, are lost, like on the real transceiver.
pub struct SimulatedControllers {
    controllers: Vec<SimController>,
    // Wheel travel per velocity exchange is target * cycle
    cycle: Duration,
    direction: Direction,
    in_flight: Vec<u8>,
    on_wire: Vec<u8>,
    rx: VecDeque<u8>,
    lost_bytes: usize,
    emergency_stops: usize,
}

impl SimulatedControllers {
    pub fn new(ids: &[u8], cycle: Duration) -> Self {
        Self {
            controllers: ids
                .iter()
                .map(|&id| SimController {
                    id,
                    ..Default::default()
                })
                .collect(),
            cycle,
            direction: Direction::Idle,
            in_flight: Vec::new(),
            on_wire: Vec::new(),
            rx: VecDeque::new(),
            lost_bytes: 0,
            emergency_stops: 0,
        }
    }

    pub fn controller(&self, id: u8) -> Option<&SimController> {
        self.controllers.iter().find(|c| c.id == id)
    }

    /// A silent controller still listens but never answers
    pub fn set_silent(&mut self, id: u8, silent: bool) {
        if let Some(c) = self.controllers.iter_mut().find(|c| c.id == id) {
            c.silent = silent;
        }
    }

    pub fn lost_bytes(&self) -> usize {
        self.lost_bytes
    }

    pub fn emergency_stops(&self) -> usize {
        self.emergency_stops
    }

    fn deliver(&mut self) {
        let wire = std::mem::take(&mut self.on_wire);
        let mut rest = &wire[..];
        while let Some(start) = rest.windows(2).position(|w| w == HEADER) {
            rest = &rest[start + 2..];
            if rest.len() < 2 {
                break;
            }
            let (id, length) = (rest[0], rest[1] as usize);
            if length < 2 || rest.len() < 2 + length {
                break;
            }
            let body = &rest[2..2 + length];
            let expected = checksum(&rest[..1 + length]);
            if body[length - 1] == expected {
                self.handle(id, body[0], &body[1..length - 1]);
            } else {
                debug!("Simulated bus dropped frame with bad checksum");
            }
            rest = &rest[2 + length..];
        }
    }

    fn handle(&mut self, id: u8, instruction: u8, params: &[u8]) {
        let cycle = self.cycle.as_secs_f64();
        if id == BROADCAST_ID {
            if instruction == Instruction::EmergencyStop as u8 {
                self.emergency_stops += 1;
                for c in &mut self.controllers {
                    c.target_milli_rad_s = 0;
                }
            }
            return;
        }

        let Some(controller) = self.controllers.iter_mut().find(|c| c.id == id) else {
            return;
        };
        let reply = match Instruction::try_from(instruction) {
            Ok(Instruction::Init) if params.len() == 1 => {
                controller.initialized = true;
                controller.primary = params[0] == 1;
                Some(Vec::new())
            }
            Ok(Instruction::SetGain) if params.len() == 2 => {
                controller.gain_milli = u16::from_le_bytes([params[0], params[1]]);
                Some(Vec::new())
            }
            Ok(Instruction::SetAcceleration) if params.len() == 2 => {
                controller.acceleration_milli = u16::from_le_bytes([params[0], params[1]]);
                Some(Vec::new())
            }
            Ok(Instruction::UpdateVelocity) if params.len() == 2 => {
                let target = decode_sign_magnitude(u16::from_le_bytes([params[0], params[1]]));
                controller.target_milli_rad_s = target;
                let travel = (target as f64 * cycle).round() as i32;
                Some(travel.to_le_bytes().to_vec())
            }
            _ => None,
        };

        if let (Some(params), false) = (reply, controller.silent) {
            self.rx.extend(build_packet(id, 0, &params));
        }
    }
}

impl HalfDuplex for SimulatedControllers {
    fn enable_transmit(&mut self) -> io::Result<()> {
        self.direction = Direction::Transmit;
        Ok(())
    }

    fn enable_receive(&mut self) -> io::Result<()> {
        // Whatever has not drained yet is cut off by the direction flip
        self.lost_bytes += self.in_flight.len();
        self.in_flight.clear();
        self.direction = Direction::Receive;
        self.deliver();
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.direction == Direction::Transmit {
            self.in_flight.extend_from_slice(bytes);
        } else {
            self.lost_bytes += bytes.len();
        }
        Ok(())
    }

    fn wait_transmit_complete(&mut self) -> io::Result<()> {
        self.on_wire.append(&mut self.in_flight);
        Ok(())
    }

    fn read_byte_or_timeout(&mut self, _deadline: Instant) -> io::Result<Option<u8>> {
        if self.direction != Direction::Receive {
            return Ok(None);
        }
        Ok(self.rx.pop_front())
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.rx.clear();
        Ok(())
    }
}
