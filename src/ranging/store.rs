// Latest distance and error counter per physical pinger
//
// The safety math works on a virtual ring of 2 * NUM_SENSORS slots: slot `i`
// is physical sensor `i`, slot `i + NUM_SENSORS` is its mirror with the
// direction negated. Mirrors are never measured and always read far away.

use crate::config::{NUM_SENSORS, NUM_SLOTS};
use crate::messages::{RangeReading, RangeReport};

/// What a never-measured mirror slot reads
pub const FAR_DISTANCE: f32 = 25.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorReading {
    /// Filtered distance in meters; `None` until measured or after a timeout
    pub distance: Option<f32>,
    pub error_count: u32,
}

/// One entry of the virtual slot table as seen by the governor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
    pub distance: f32,
    /// Cosine between the slot's facing and forward motion
    pub direction: f32,
}

pub fn mirror_slot(sensor: usize) -> usize {
    sensor + NUM_SENSORS
}

/// Physical sensor backing a slot, if any
pub fn physical_sensor(slot: usize) -> Option<usize> {
    (slot < NUM_SENSORS).then_some(slot)
}

pub fn slot_direction(directions: &[f32; NUM_SENSORS], slot: usize) -> f32 {
    match physical_sensor(slot) {
        Some(sensor) => directions[sensor],
        None => -directions[slot - NUM_SENSORS],
    }
}

#[derive(Debug, Clone, Default)]
pub struct DistanceStore {
    readings: [SensorReading; NUM_SENSORS],
}

impl DistanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sensor: usize, distance: f32) {
        self.readings[sensor].distance = Some(distance);
    }

    /// Mark the reading unknown and bump the sticky error counter
    pub fn record_timeout(&mut self, sensor: usize) -> u32 {
        let reading = &mut self.readings[sensor];
        reading.distance = None;
        reading.error_count += 1;
        reading.error_count
    }

    pub fn reading(&self, sensor: usize) -> SensorReading {
        self.readings[sensor]
    }

    /// Build the virtual slot table. Unknown readings are replaced by `unknown_distance`.
    pub fn slots(&self, directions: &[f32; NUM_SENSORS], unknown_distance: f32) -> [Slot; NUM_SLOTS] {
        std::array::from_fn(|slot| Slot {
            distance: match physical_sensor(slot) {
                Some(sensor) => self.readings[sensor].distance.unwrap_or(unknown_distance),
                None => FAR_DISTANCE,
            },
            direction: slot_direction(directions, slot),
        })
    }

    pub fn report(&self) -> RangeReport {
        RangeReport {
            readings: std::array::from_fn(|sensor| RangeReading {
                sensor_id: sensor,
                distance: self.readings[sensor].distance,
                error_count: self.readings[sensor].error_count,
            }),
        }
    }
}
