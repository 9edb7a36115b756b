// Motion safety
//
// Provides:
// - Velocity safety governor (stop-before-obstacle clamp)
// - Hazard classification and indicator colours with operator overrides

mod governor;
pub mod hazard;

pub use governor::{judge_slot, safety_factor, GovernorOutput, SafetyGovernor, SlotVerdict};
pub use hazard::{Facing, Hazard, HazardBoard, HazardLevel};
