// Per-slot hazard classification and the indicator colours derived from it
//
// The governor reclassifies every slot each cycle. An operator override pins
// a slot's colour until its best-before instant; after that the governor's
// colour shows again.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::config::NUM_SLOTS;
use crate::messages::{ColorOverride, IndicatorState, Rgb};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardLevel {
    Clear,
    Caution,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    Front,
    Back,
}

impl Facing {
    /// Slots whose direction cosine is not positive look forward
    pub fn from_direction(direction: f32) -> Self {
        if direction <= 0.0 { Facing::Front } else { Facing::Back }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hazard {
    pub level: HazardLevel,
    pub facing: Facing,
}

impl Hazard {
    pub fn new(level: HazardLevel, facing: Facing) -> Self {
        Self { level, facing }
    }

    pub fn is_blocked(&self) -> bool {
        self.level == HazardLevel::Blocked
    }

    pub fn color(&self) -> Rgb {
        match self.level {
            HazardLevel::Clear => Rgb::new(0, Rgb::FULL, 0),
            HazardLevel::Caution => Rgb::new(0, 0, Rgb::FULL),
            HazardLevel::Blocked => Rgb::new(Rgb::FULL, 0, 0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SlotState {
    hazard: Hazard,
    color: Rgb,
    best_before: Option<Instant>,
}

pub struct HazardBoard {
    slots: [SlotState; NUM_SLOTS],
    override_ttl: Duration,
}

impl HazardBoard {
    pub fn new(override_ttl: Duration) -> Self {
        // Nothing measured yet
        let blocked = Hazard::new(HazardLevel::Blocked, Facing::Back);
        Self {
            slots: [SlotState {
                hazard: blocked,
                color: blocked.color(),
                best_before: None,
            }; NUM_SLOTS],
            override_ttl,
        }
    }

    fn overridden(&self, slot: usize, now: Instant) -> bool {
        self.slots[slot].best_before.is_some_and(|t| now < t)
    }

    /// Store the governor's classification; the colour follows unless overridden
    pub fn classify(&mut self, hazards: &[Hazard; NUM_SLOTS], now: Instant) {
        for (slot, hazard) in hazards.iter().enumerate() {
            let overridden = self.overridden(slot, now);
            let state = &mut self.slots[slot];
            state.hazard = *hazard;
            if !overridden {
                state.color = hazard.color();
                state.best_before = None;
            }
        }
    }

    pub fn apply_override(&mut self, colors: &ColorOverride, now: Instant) {
        let best_before = now + self.override_ttl;
        for (state, color) in self.slots.iter_mut().zip(colors.slots.iter()) {
            if let Some(rgb) = color {
                state.color = Rgb::from_8bit(*rgb);
                state.best_before = Some(best_before);
            }
        }
    }

    pub fn hazard(&self, slot: usize) -> Hazard {
        self.slots[slot].hazard
    }

    pub fn colors(&self) -> [Rgb; NUM_SLOTS] {
        std::array::from_fn(|slot| self.slots[slot].color)
    }

    pub fn indicator_state(&self) -> IndicatorState {
        IndicatorState {
            colors: self.colors(),
        }
    }
}
