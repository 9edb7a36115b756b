// Ultrasonic velocity safety governor
//
// Limits the commanded forward velocity so that, when driven for `stop_time`,
// no pinger reading drops below `stop_distance`. Forward motion is planned by
// the host and only gets classified for display; reverse motion is governed
// locally.

use tracing::debug;

use super::hazard::{Facing, Hazard, HazardLevel};
use crate::config::{SafetyConfig, NUM_SENSORS, NUM_SLOTS};
use crate::messages::DriveCommand;
use crate::ranging::{DistanceStore, Slot};

/// Effect of one slot on the commanded velocity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotVerdict {
    pub level: HazardLevel,
    /// Largest fraction of the command this slot allows
    pub limit: f32,
}

/// Judge one slot for a commanded (reverse) velocity
pub fn judge_slot(velocity: f32, slot: &Slot, stop_distance: f32, stop_time: f32) -> SlotVerdict {
    let projected_delta = velocity * slot.direction * stop_time;
    let clearance = slot.distance - stop_distance;

    if projected_delta >= 0.0 || clearance + projected_delta >= 0.0 {
        // Moving away, or even after stop_time the clearance holds
        let level = if clearance > 0.0 { HazardLevel::Clear } else { HazardLevel::Caution };
        SlotVerdict { level, limit: 1.0 }
    } else if clearance <= 0.0 {
        SlotVerdict {
            level: HazardLevel::Blocked,
            limit: 0.0,
        }
    } else {
        SlotVerdict {
            level: HazardLevel::Blocked,
            limit: -clearance / projected_delta,
        }
    }
}

/// Most restrictive limit over all slots, clamped to [0, 1]
pub fn safety_factor<'a>(
    velocity: f32,
    slots: impl IntoIterator<Item = &'a Slot>,
    stop_distance: f32,
    stop_time: f32,
) -> f32 {
    slots
        .into_iter()
        .map(|slot| judge_slot(velocity, slot, stop_distance, stop_time).limit)
        .fold(1.0f32, f32::min)
        .clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GovernorOutput {
    pub command: DriveCommand,
    pub safety_factor: f32,
    pub hazards: [Hazard; NUM_SLOTS],
}

pub struct SafetyGovernor {
    stop_distance: f32,
    stop_time: f32,
    display_threshold: f32,
    moving_enter_speed: f32,
    moving_exit_speed: f32,
    rotation_epsilon: f32,
    directions: [f32; NUM_SENSORS],
    not_moving: bool,
}

impl SafetyGovernor {
    pub fn new(config: &SafetyConfig) -> Self {
        Self {
            stop_distance: config.stop_distance,
            stop_time: config.stop_time,
            display_threshold: config.display_threshold,
            moving_enter_speed: config.moving_enter_speed,
            moving_exit_speed: config.moving_exit_speed,
            rotation_epsilon: config.rotation_epsilon,
            directions: config.sensor_directions,
            not_moving: true,
        }
    }

    pub fn is_stationary(&self) -> bool {
        self.not_moving
    }

    /// Clamp a command against the distance store and classify every slot
    pub fn govern(&mut self, command: DriveCommand, store: &DistanceStore) -> GovernorOutput {
        let velocity = command.forward_velocity;
        // Unknown readings count as already at the stop distance
        let slots = store.slots(&self.directions, self.stop_distance);

        let speed = velocity.abs();
        if speed > self.moving_enter_speed {
            self.not_moving = false;
        } else if speed < self.moving_exit_speed {
            self.not_moving = true;
        }

        let (factor, mut hazards) = if velocity >= 0.0 {
            (1.0, self.show(&slots))
        } else {
            self.limit(velocity, &slots)
        };

        if self.not_moving && command.angular_velocity.abs() > self.rotation_epsilon {
            // Turning in place sweeps the whole perimeter
            for hazard in hazards.iter_mut().filter(|h| !h.is_blocked()) {
                hazard.level = HazardLevel::Caution;
            }
        }

        let forward_velocity = if factor > 0.0 { velocity * factor } else { 0.0 };
        if factor < 1.0 {
            debug!("Safety factor {:.3}: {:.3} -> {:.3} m/s", factor, velocity, forward_velocity);
        }

        GovernorOutput {
            command: DriveCommand::new(forward_velocity, command.angular_velocity),
            safety_factor: factor,
            hazards,
        }
    }

    /// Display-only classification with a fixed threshold
    fn show(&self, slots: &[Slot; NUM_SLOTS]) -> [Hazard; NUM_SLOTS] {
        std::array::from_fn(|i| {
            let level = if slots[i].distance > self.display_threshold {
                HazardLevel::Clear
            } else {
                HazardLevel::Blocked
            };
            Hazard::new(level, Facing::from_direction(slots[i].direction))
        })
    }

    fn limit(&self, velocity: f32, slots: &[Slot; NUM_SLOTS]) -> (f32, [Hazard; NUM_SLOTS]) {
        let verdicts: [SlotVerdict; NUM_SLOTS] =
            std::array::from_fn(|i| judge_slot(velocity, &slots[i], self.stop_distance, self.stop_time));
        let factor = safety_factor(velocity, slots, self.stop_distance, self.stop_time);
        let hazards =
            std::array::from_fn(|i| Hazard::new(verdicts[i].level, Facing::from_direction(slots[i].direction)));
        (factor, hazards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranging::store::mirror_slot;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    const STOP_DISTANCE: f32 = 0.15;
    const STOP_TIME: f32 = 1.5;

    fn slot(distance: f32, direction: f32) -> Slot {
        Slot { distance, direction }
    }

    fn store_with(distances: [f32; NUM_SENSORS]) -> DistanceStore {
        let mut store = DistanceStore::new();
        for (sensor, distance) in distances.into_iter().enumerate() {
            store.record(sensor, distance);
        }
        store
    }

    #[test]
    fn test_scenario_moving_away_is_unconstrained() {
        // delta = -1.0 * -1.0 * 1.5 = 1.5 >= 0
        let verdict = judge_slot(-1.0, &slot(0.5, -1.0), STOP_DISTANCE, STOP_TIME);
        assert_eq!(verdict.level, HazardLevel::Clear);
        assert_eq!(verdict.limit, 1.0);
    }

    #[test]
    fn test_scenario_inside_stop_distance_is_hard_stop() {
        let verdict = judge_slot(-1.0, &slot(0.10, 1.0), STOP_DISTANCE, STOP_TIME);
        assert_eq!(verdict.level, HazardLevel::Blocked);
        assert_eq!(verdict.limit, 0.0);
    }

    #[test]
    fn test_scenario_inside_stop_distance_moving_away() {
        let verdict = judge_slot(-1.0, &slot(0.10, -1.0), STOP_DISTANCE, STOP_TIME);
        assert_eq!(verdict.level, HazardLevel::Caution);
        assert_eq!(verdict.limit, 1.0);
    }

    #[test]
    fn test_scenario_opposite_cosine_clears() {
        // delta = -0.5 * -1.0 * 1.5 = 0.75 >= 0
        let verdict = judge_slot(-0.5, &slot(0.3, -1.0), STOP_DISTANCE, STOP_TIME);
        assert_eq!(verdict.limit, 1.0);
        assert_eq!(verdict.level, HazardLevel::Clear);
    }

    #[test]
    fn test_partial_limit() {
        // clearance 0.45, delta -1.5 -> 0.3 of the command
        let verdict = judge_slot(-1.0, &slot(0.6, 1.0), STOP_DISTANCE, STOP_TIME);
        assert_eq!(verdict.level, HazardLevel::Blocked);
        assert_relative_eq!(verdict.limit, 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_exact_clearance_after_horizon_is_allowed() {
        // clearance + delta == 0 is still safe
        let verdict = judge_slot(-0.25, &slot(0.625, 1.0), 0.25, STOP_TIME);
        assert_eq!(verdict.limit, 1.0);
    }

    #[test]
    fn test_forward_is_display_only() {
        let mut governor = SafetyGovernor::new(&SafetyConfig::default());
        let store = store_with([0.05, 0.5, 0.7, 2.0, 2.0]);
        let out = governor.govern(DriveCommand::new(0.5, 0.0), &store);
        assert_eq!(out.command.forward_velocity, 0.5);
        assert_eq!(out.safety_factor, 1.0);
        assert_eq!(out.hazards[0].level, HazardLevel::Blocked);
        assert_eq!(out.hazards[1].level, HazardLevel::Blocked);
        assert_eq!(out.hazards[2].level, HazardLevel::Clear);
        assert_eq!(out.hazards[mirror_slot(0)].level, HazardLevel::Clear);
        assert_eq!(out.hazards[mirror_slot(0)].facing, Facing::Front);
    }

    #[test]
    fn test_reverse_is_scaled_by_worst_sensor() {
        let mut governor = SafetyGovernor::new(&SafetyConfig::default());
        // Rear center pinger (cos 1.0) at 0.6 m limits to 0.45 / (0.5 * 1.5) = 0.6
        let store = store_with([5.0, 5.0, 0.6, 5.0, 5.0]);
        let out = governor.govern(DriveCommand::new(-0.5, 0.0), &store);
        assert_relative_eq!(out.safety_factor, 0.6, epsilon = 1e-5);
        assert_relative_eq!(out.command.forward_velocity, -0.3, epsilon = 1e-5);
        assert!(out.hazards[2].is_blocked());
        assert_eq!(out.hazards[0].level, HazardLevel::Clear);
    }

    #[test]
    fn test_hard_floor_dominates() {
        let mut governor = SafetyGovernor::new(&SafetyConfig::default());
        let store = store_with([5.0, 5.0, 5.0, 0.1, 5.0]);
        let out = governor.govern(DriveCommand::new(-0.8, 0.0), &store);
        assert_eq!(out.command.forward_velocity, 0.0);
        assert!(out.command.forward_velocity.is_sign_positive());
        assert_eq!(out.safety_factor, 0.0);
    }

    #[test]
    fn test_unknown_reading_blocks_reverse_only() {
        let mut governor = SafetyGovernor::new(&SafetyConfig::default());
        let mut store = store_with([5.0; NUM_SENSORS]);
        store.record_timeout(1);

        let out = governor.govern(DriveCommand::new(-0.3, 0.0), &store);
        assert_eq!(out.command.forward_velocity, 0.0);

        let out = governor.govern(DriveCommand::new(0.3, 0.0), &store);
        assert_eq!(out.command.forward_velocity, 0.3);
    }

    #[test]
    fn test_rotating_in_place_marks_caution() {
        let mut governor = SafetyGovernor::new(&SafetyConfig::default());
        let store = store_with([0.3, 5.0, 5.0, 5.0, 5.0]);
        let out = governor.govern(DriveCommand::new(0.0, 0.8), &store);
        assert!(out.hazards[0].is_blocked());
        for hazard in &out.hazards[1..] {
            assert_eq!(hazard.level, HazardLevel::Caution);
        }
    }

    #[test]
    fn test_motion_hysteresis() {
        let mut governor = SafetyGovernor::new(&SafetyConfig::default());
        let store = store_with([5.0; NUM_SENSORS]);
        assert!(governor.is_stationary());

        governor.govern(DriveCommand::new(0.1, 0.0), &store);
        assert!(governor.is_stationary());
        governor.govern(DriveCommand::new(0.3, 0.0), &store);
        assert!(!governor.is_stationary());
        // Inside the band the previous state holds
        let out = governor.govern(DriveCommand::new(0.1, 0.5), &store);
        assert!(!governor.is_stationary());
        assert_eq!(out.hazards[0].level, HazardLevel::Clear);
        governor.govern(DriveCommand::new(0.01, 0.0), &store);
        assert!(governor.is_stationary());
    }

    fn arb_slot() -> impl Strategy<Value = Slot> {
        (0.0f32..3.0, prop::sample::select(vec![-1.0f32, -0.5, -0.25, 0.25, 0.5, 1.0]))
            .prop_map(|(distance, direction)| Slot { distance, direction })
    }

    proptest! {
        /// No false positives: a slot whose clearance survives the horizon never limits
        #[test]
        fn sufficient_clearance_never_limits(
            distance in STOP_DISTANCE..5.0f32,
            direction in -1.0f32..1.0,
            velocity in -2.0f32..0.0,
        ) {
            let delta = velocity * direction * STOP_TIME;
            prop_assume!(delta >= -(distance - STOP_DISTANCE));
            let verdict = judge_slot(velocity, &slot(distance, direction), STOP_DISTANCE, STOP_TIME);
            prop_assert_eq!(verdict.limit, 1.0);
        }

        /// The min-reduction does not depend on sensor order
        #[test]
        fn order_independent(
            (slots, shuffled) in prop::collection::vec(arb_slot(), 1..10)
                .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle())),
            velocity in -2.0f32..0.0,
        ) {
            let a = safety_factor(velocity, &slots, STOP_DISTANCE, STOP_TIME);
            let b = safety_factor(velocity, &shuffled, STOP_DISTANCE, STOP_TIME);
            prop_assert_eq!(a, b);
        }

        /// The governor clamps by exactly the order-independent reduction
        #[test]
        fn governor_uses_min_reduction(
            distances in prop::array::uniform5(0.0f32..3.0),
            velocity in -2.0f32..-0.001,
        ) {
            let config = SafetyConfig::default();
            let store = store_with(distances);
            let mut slots = store.slots(&config.sensor_directions, STOP_DISTANCE);
            slots.reverse();

            let mut governor = SafetyGovernor::new(&config);
            let out = governor.govern(DriveCommand::new(velocity, 0.0), &store);
            prop_assert_eq!(out.safety_factor, safety_factor(velocity, &slots, STOP_DISTANCE, STOP_TIME));
        }

        /// Adding a sensor can only lower the factor
        #[test]
        fn more_sensors_never_raise_factor(
            slots in prop::collection::vec(arb_slot(), 1..10),
            extra in arb_slot(),
            velocity in -2.0f32..0.0,
        ) {
            let before = safety_factor(velocity, &slots, STOP_DISTANCE, STOP_TIME);
            let after = safety_factor(velocity, slots.iter().chain([&extra]), STOP_DISTANCE, STOP_TIME);
            prop_assert!(after <= before);
            prop_assert!((0.0..=1.0).contains(&after));
        }
    }
}
