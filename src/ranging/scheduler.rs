// Round-robin pinger scheduling
//
// Only one pinger may ring at a time: echoes of one would be picked up by its
// neighbours. The successor table skips neighbours so consecutive pings come
// from different sides of the ring.

use tracing::{debug, info, warn};

use super::bus::{pulse_to_distance, RangingBus};
use super::filter::MedianFilter;
use super::store::DistanceStore;
use crate::config::NUM_SENSORS;
use crate::fault::Fault;

pub const SUCCESSOR: [usize; NUM_SENSORS] = [2, 3, 4, 0, 1];

pub struct SensorScheduler<B: RangingBus> {
    bus: B,
    filters: [MedianFilter; NUM_SENSORS],
    current: usize,
    next: usize,
    // A trigger is outstanding on `current`
    armed: bool,
    waited_ticks: u32,
    timeout_ticks: u32,
    dead: [bool; NUM_SENSORS],
}

impl<B: RangingBus> SensorScheduler<B> {
    pub fn new(bus: B, timeout_ticks: u32) -> Self {
        Self {
            bus,
            filters: Default::default(),
            current: 0,
            next: SUCCESSOR[0],
            armed: false,
            waited_ticks: 0,
            timeout_ticks,
            dead: [false; NUM_SENSORS],
        }
    }

    /// Sensor whose echo is awaited
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Advance the schedule by one tick. Returns the timeout fault, if one happened.
    pub fn step(&mut self, store: &mut DistanceStore) -> Option<Fault> {
        if !self.armed {
            self.fire();
            return None;
        }

        let echo = match self.bus.poll_echo(self.current) {
            Ok(echo) => echo,
            Err(e) => {
                debug!("Pinger {} poll failed: {}", self.current, e);
                None
            }
        };

        match echo {
            Some(width) => {
                let sensor = self.current;
                let filter = &mut self.filters[sensor];
                filter.push(pulse_to_distance(width));
                if let Some(distance) = filter.median() {
                    store.record(sensor, distance);
                }
                if self.dead[sensor] {
                    info!("Pinger {} reporting again", sensor);
                    self.dead[sensor] = false;
                }
                self.advance();
                None
            }
            None => {
                self.waited_ticks += 1;
                if self.waited_ticks < self.timeout_ticks {
                    return None;
                }
                let sensor = self.current;
                let errors = store.record_timeout(sensor);
                self.filters[sensor].clear();
                if !self.dead[sensor] {
                    warn!("Pinger {} not ready after {} ticks ({} errors)", sensor, self.waited_ticks, errors);
                    self.dead[sensor] = true;
                }
                self.advance();
                Some(Fault::SensorTimeout { sensor })
            }
        }
    }

    fn advance(&mut self) {
        self.current = self.next;
        self.next = SUCCESSOR[self.current];
        self.fire();
    }

    fn fire(&mut self) {
        self.armed = true;
        self.waited_ticks = 0;
        if let Err(e) = self.bus.trigger(self.current) {
            // Left armed: the missing echo times out like a dead pinger
            warn!("Pinger {} trigger failed: {}", self.current, e);
        }
    }
}
