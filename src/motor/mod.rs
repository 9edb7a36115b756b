// Drive module for the differential base
//
// Provides:
// - Differential-drive kinematics (body velocity <-> wheel velocities)
// - Half-duplex line capability and its serial implementation
// - Wheel position controller protocol
// - High-level drive API

mod controller;
mod driver;
pub mod half_duplex;
pub mod kinematics;
pub mod protocol;

pub use controller::PositionController;
pub use driver::{DriveBase, DriveFeedback, WheelState};
pub use half_duplex::{HalfDuplex, SerialHalfDuplex};
pub use kinematics::{body_to_wheels, wheels_to_body, BodyMotion, WheelPair};
pub use protocol::{ControllerBus, Instruction, LinkError, BROADCAST_ID};
