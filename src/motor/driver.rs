// High-level drive for the differential base
//
// Combines kinematics and the controller protocol: one velocity exchange per
// wheel per cycle over the shared half-duplex line.

use tracing::{info, warn};

use super::controller::PositionController;
use super::half_duplex::HalfDuplex;
use super::kinematics::{body_to_wheels, WheelPair};
use super::protocol::{ControllerBus, Result};
use crate::config::{GeometryConfig, LinkConfig};
use crate::fault::Fault;

/// Per-side state after one drive exchange
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelState {
    pub target_velocity: f32,
    /// Travel since the previous exchange (delta, not absolute)
    pub accumulated_travel: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriveFeedback {
    pub left: WheelState,
    pub right: WheelState,
    /// Link faults of this exchange; the affected wheel reports zero travel
    pub faults: Vec<Fault>,
}

impl DriveFeedback {
    pub fn travel(&self) -> WheelPair {
        WheelPair::new(self.left.accumulated_travel, self.right.accumulated_travel)
    }
}

pub struct DriveBase<P: HalfDuplex> {
    bus: ControllerBus<P>,
    left: PositionController,
    right: PositionController,
    base_radius: f32,
    // -1.0 when the controllers are mounted mirrored
    polarity: f32,
}

impl<P: HalfDuplex> DriveBase<P> {
    pub fn new(port: P, geometry: &GeometryConfig, link: &LinkConfig) -> Self {
        Self {
            bus: ControllerBus::new(port, link.response_timeout()),
            left: PositionController::new(link.left_id, geometry.wheel_radius),
            right: PositionController::new(link.right_id, geometry.wheel_radius),
            base_radius: geometry.base_radius,
            polarity: if geometry.reversed_mounting { -1.0 } else { 1.0 },
        }
    }

    /// Bus roles, gain and acceleration. Must be called before driving.
    pub fn initialize(&mut self, gain: f32, acceleration: f32) -> Result<()> {
        info!(
            "Initializing controllers {} (left) and {} (right)",
            self.left.id(),
            self.right.id()
        );
        self.left.initialize(&mut self.bus, true)?;
        self.right.initialize(&mut self.bus, false)?;

        for controller in [&mut self.left, &mut self.right] {
            controller.set_gain(&mut self.bus, gain)?;
            controller.set_acceleration(&mut self.bus, acceleration)?;
        }
        info!("Gain: {:.3}, acceleration: {:.3}", gain, acceleration);
        Ok(())
    }

    /// Send a body velocity and collect both wheels' travel since the last call
    pub fn drive(&mut self, forward: f32, angular: f32) -> DriveFeedback {
        let targets = body_to_wheels(forward, angular, self.base_radius);
        let mut faults = Vec::new();
        let mut travel = |result: std::result::Result<f32, Fault>| {
            result.unwrap_or_else(|fault| {
                faults.push(fault);
                0.0
            })
        };
        let left_travel = travel(self.left.update_velocity(&mut self.bus, self.polarity * targets.left));
        let right_travel = travel(self.right.update_velocity(&mut self.bus, self.polarity * targets.right));

        DriveFeedback {
            left: WheelState {
                target_velocity: targets.left,
                accumulated_travel: self.polarity * left_travel,
            },
            right: WheelState {
                target_velocity: targets.right,
                accumulated_travel: self.polarity * right_travel,
            },
            faults,
        }
    }

    /// Broadcast stop to every controller; no acknowledgement expected
    pub fn emergency_stop(&mut self) -> Result<()> {
        self.bus.software_emergency_stop()
    }

    pub fn left(&self) -> &PositionController {
        &self.left
    }

    pub fn right(&self) -> &PositionController {
        &self.right
    }

    pub fn port(&self) -> &P {
        self.bus.port()
    }

    pub fn port_mut(&mut self) -> &mut P {
        self.bus.port_mut()
    }
}

impl<P: HalfDuplex> Drop for DriveBase<P> {
    fn drop(&mut self) {
        if let Err(e) = self.emergency_stop() {
            warn!("Failed to stop controllers on drop: {}", e);
        }
    }
}
