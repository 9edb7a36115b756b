// One closed-loop wheel controller on the shared bus
//
// The controller takes a velocity target and reports how far the wheel turned
// since the previous exchange.

use tracing::{debug, info, warn};

use super::half_duplex::HalfDuplex;
use super::kinematics::{linear_to_shaft, shaft_to_linear};
use super::protocol::{
    encode_sign_magnitude, to_milli_u16, ControllerBus, Instruction, LinkError, Result,
};
use crate::fault::Fault;

pub struct PositionController {
    id: u8,
    wheel_radius: f32,
    responding: bool,
}

impl PositionController {
    pub fn new(id: u8, wheel_radius: f32) -> Self {
        Self {
            id,
            wheel_radius,
            responding: true,
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// One-time bus role setup; the primary controller terminates the bus
    pub fn initialize<P: HalfDuplex>(&mut self, bus: &mut ControllerBus<P>, is_primary: bool) -> Result<()> {
        bus.transact(self.id, Instruction::Init, &[is_primary as u8])?;
        info!("Controller {} initialized ({})", self.id, if is_primary { "primary" } else { "secondary" });
        Ok(())
    }

    pub fn set_gain<P: HalfDuplex>(&mut self, bus: &mut ControllerBus<P>, gain: f32) -> Result<()> {
        let raw = to_milli_u16(gain);
        bus.transact(self.id, Instruction::SetGain, &raw.to_le_bytes())?;
        Ok(())
    }

    /// Acceleration limit in m/s^2
    pub fn set_acceleration<P: HalfDuplex>(
        &mut self,
        bus: &mut ControllerBus<P>,
        acceleration: f32,
    ) -> Result<()> {
        let raw = to_milli_u16(acceleration);
        bus.transact(self.id, Instruction::SetAcceleration, &raw.to_le_bytes())?;
        Ok(())
    }

    /// Send a velocity target (m/s) and return the wheel travel (m) since the last call.
    ///
    /// A missing or broken answer comes back as a non-fatal link fault; the
    /// next cycle simply tries again.
    pub fn update_velocity<P: HalfDuplex>(
        &mut self,
        bus: &mut ControllerBus<P>,
        target: f32,
    ) -> std::result::Result<f32, Fault> {
        let shaft_milli = (linear_to_shaft(target, self.wheel_radius) * 1000.0)
            .round()
            .clamp(-(0x7FFF as f32), 0x7FFF as f32) as i16;
        let raw = encode_sign_magnitude(shaft_milli);

        match bus
            .transact(self.id, Instruction::UpdateVelocity, &raw.to_le_bytes())
            .and_then(|params| self.parse_travel(&params))
        {
            Ok(travel) => {
                if !self.responding {
                    info!("Controller {} responding again", self.id);
                    self.responding = true;
                }
                debug!("Controller {}: target={:.3} travel={:.5}", self.id, target, travel);
                Ok(travel)
            }
            Err(e) => {
                let fault = Fault::link(self.id, &e);
                if self.responding {
                    warn!("{}", fault);
                    self.responding = false;
                }
                Err(fault)
            }
        }
    }

    fn parse_travel(&self, params: &[u8]) -> Result<f32> {
        let bytes: [u8; 4] = params
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| LinkError::InvalidResponse {
                id: self.id,
                reason: format!("Expected 4 travel bytes, got {}", params.len()),
            })?;
        let milli_radians = i32::from_le_bytes(bytes);
        Ok(shaft_to_linear(milli_radians as f32 / 1000.0, self.wheel_radius))
    }
}
