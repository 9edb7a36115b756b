// Ultrasonic ranging
//
// Provides:
// - Trigger/echo bus abstraction and the serial multiplexer implementation
// - Median filtering of raw readings
// - Round-robin scheduler writing into the distance store

pub mod bus;
pub mod filter;
mod scheduler;
pub mod store;

pub use bus::{RangingBus, RangingError, SerialRangingBus};
pub use filter::MedianFilter;
pub use scheduler::{SensorScheduler, SUCCESSOR};
pub use store::{DistanceStore, SensorReading, Slot};
