// The control cycle
//
// One worker owns every component and runs them in a fixed order each tick:
// ranging, then watchdog -> governor -> drive -> odometry, then indicators.
// Nothing here is shared across threads; inbound messages are applied
// between ticks.

use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{DriveConfig, FAULT_ESTOP_INTERVAL};
use crate::fault::{ensure, Fault};
use crate::messages::{ColorOverride, DriveCommand, FaultCounters, RuntimeHealth, StatusLine, Telemetry};
use crate::motor::{DriveBase, HalfDuplex};
use crate::odometry::OdometryIntegrator;
use crate::ranging::{DistanceStore, RangingBus, SensorScheduler};
use crate::safety::{HazardBoard, SafetyGovernor};
use crate::watchdog::Watchdog;

/// Runs a component every `divisor` ticks, offset by `phase`
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    divisor: u64,
    phase: u64,
}

impl Cadence {
    pub fn new(divisor: u64, phase: u64) -> Self {
        let divisor = divisor.max(1);
        Self {
            divisor,
            phase: phase % divisor,
        }
    }

    pub fn due(&self, tick: u64) -> bool {
        tick % self.divisor == self.phase
    }
}

/// Shared mutable state of one cycle: written by one component, read by the next
pub struct ControlState {
    pub distances: DistanceStore,
    pub watchdog: Watchdog,
    pub hazards: HazardBoard,
}

pub struct Controller<R: RangingBus, P: HalfDuplex> {
    state: ControlState,
    scheduler: SensorScheduler<R>,
    governor: SafetyGovernor,
    drive: DriveBase<P>,
    odometry: OdometryIntegrator,
    ranging_cadence: Cadence,
    drive_cadence: Cadence,
    indicator_cadence: Cadence,
    status_cadence: Cadence,
    tick: u64,
    sensor_timeouts: u32,
    left_link_timeouts: u32,
    right_link_timeouts: u32,
    link_errors: u32,
    malformed_messages: u32,
    stale_commands: u32,
    reported: Option<FaultCounters>,
    latched: Option<Fault>,
    last_estop: Option<Instant>,
    estop_interval: Duration,
    outbox: Vec<Telemetry>,
}

impl<R: RangingBus, P: HalfDuplex> Controller<R, P> {
    pub fn new(config: &DriveConfig, ranging: R, port: P, now: Instant) -> Self {
        let timing = &config.timing;
        Self {
            state: ControlState {
                distances: DistanceStore::new(),
                watchdog: Watchdog::new(timing.cmd_timeout()),
                hazards: HazardBoard::new(timing.color_override_ttl()),
            },
            scheduler: SensorScheduler::new(ranging, config.safety.sensor_timeout_ticks),
            governor: SafetyGovernor::new(&config.safety),
            drive: DriveBase::new(port, &config.geometry, &config.link),
            odometry: OdometryIntegrator::new(
                config.geometry.base_radius,
                timing.odometry_publish_interval(),
                now,
            ),
            ranging_cadence: Cadence::new(timing.ranging_divisor, 0),
            drive_cadence: Cadence::new(timing.drive_divisor, 0),
            indicator_cadence: Cadence::new(timing.indicator_divisor, 1),
            status_cadence: Cadence::new(timing.status_divisor, 2),
            tick: 0,
            sensor_timeouts: 0,
            left_link_timeouts: 0,
            right_link_timeouts: 0,
            link_errors: 0,
            malformed_messages: 0,
            stale_commands: 0,
            reported: None,
            latched: None,
            last_estop: None,
            estop_interval: FAULT_ESTOP_INTERVAL,
            outbox: Vec::new(),
        }
    }

    /// Validate the configuration and set up both wheel controllers.
    /// Any failure here latches the fatal fault.
    pub fn start(&mut self, config: &DriveConfig, now: Instant) -> Result<(), Fault> {
        let result = config.validate().map_err(Fault::from).and_then(|()| {
            self.drive
                .initialize(config.link.gain, config.link.acceleration)
                .map_err(|e| Fault::AssertionFailure(format!("controller setup failed: {}", e)))
        });

        match result {
            Ok(()) => {
                self.outbox
                    .push(Telemetry::Status(StatusLine::info(format!("Gain: {:.3}", config.link.gain))));
                self.outbox.push(Telemetry::Status(StatusLine::info(format!(
                    "Acceleration: {:.3}",
                    config.link.acceleration
                ))));
                info!("Control worker started");
                Ok(())
            }
            Err(fault) => {
                self.latch(fault.clone(), now);
                Err(fault)
            }
        }
    }

    pub fn on_command(&mut self, cmd: DriveCommand, now: Instant) {
        if !cmd.is_finite() {
            warn!("Ignoring non-finite command: {:?}", cmd);
            self.malformed_messages += 1;
            return;
        }
        self.state.watchdog.on_command(cmd, now);
    }

    pub fn on_colors(&mut self, colors: &ColorOverride, now: Instant) {
        self.state.hazards.apply_override(colors, now);
    }

    /// A payload on an inbound topic could not be decoded
    pub fn on_malformed(&mut self) {
        self.malformed_messages += 1;
    }

    pub fn fault(&self) -> Option<&Fault> {
        self.latched.as_ref()
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    pub fn drive(&self) -> &DriveBase<P> {
        &self.drive
    }

    pub fn drive_mut(&mut self) -> &mut DriveBase<P> {
        &mut self.drive
    }

    pub fn ranging_mut(&mut self) -> &mut R {
        self.scheduler.bus_mut()
    }

    pub fn odometry(&self) -> &OdometryIntegrator {
        &self.odometry
    }

    pub fn counters(&self) -> FaultCounters {
        FaultCounters {
            sensor_timeouts: self.sensor_timeouts,
            left_link_timeouts: self.left_link_timeouts,
            right_link_timeouts: self.right_link_timeouts,
            link_errors: self.link_errors,
            malformed_messages: self.malformed_messages,
            stale_commands: self.stale_commands,
        }
    }

    fn count(&mut self, fault: &Fault) {
        match fault {
            Fault::SensorTimeout { .. } => self.sensor_timeouts += 1,
            Fault::LinkTimeout { id } if *id == self.drive.left().id() => self.left_link_timeouts += 1,
            Fault::LinkTimeout { .. } => self.right_link_timeouts += 1,
            Fault::LinkFailure { .. } => self.link_errors += 1,
            Fault::CommandStale => self.stale_commands += 1,
            Fault::AssertionFailure(_) => {}
        }
    }

    /// Stop everything and never resume. Only a restart clears this.
    pub fn latch(&mut self, fault: Fault, now: Instant) {
        if self.latched.is_some() {
            return;
        }
        error!("Fatal fault, halting: {}", fault);
        self.outbox.push(Telemetry::Status(StatusLine::error(fault.to_string())));
        self.latched = Some(fault);
        self.emergency_stop(now);
    }

    fn emergency_stop(&mut self, now: Instant) {
        if let Err(e) = self.drive.emergency_stop() {
            warn!("Emergency stop broadcast failed: {}", e);
        }
        self.last_estop = Some(now);
        self.outbox.push(Telemetry::Health(RuntimeHealth::Faulted));
    }

    /// Run one tick and return what should be published
    pub fn tick(&mut self, now: Instant) -> Vec<Telemetry> {
        let tick = self.tick;
        self.tick += 1;

        if let Some(fault) = &self.latched {
            let due = self
                .last_estop
                .is_none_or(|t| now.saturating_duration_since(t) >= self.estop_interval);
            if due {
                let message = fault.to_string();
                self.emergency_stop(now);
                self.outbox.push(Telemetry::Status(StatusLine::error(message)));
            }
            return std::mem::take(&mut self.outbox);
        }

        if self.ranging_cadence.due(tick) {
            if let Some(fault) = self.scheduler.step(&mut self.state.distances) {
                self.count(&fault);
            }
        }

        if self.drive_cadence.due(tick) {
            if let Err(fault) = self.drive_cycle(now) {
                self.latch(fault, now);
                return std::mem::take(&mut self.outbox);
            }
        }

        if self.indicator_cadence.due(tick) {
            self.outbox
                .push(Telemetry::Indicators(self.state.hazards.indicator_state()));
        }

        if self.status_cadence.due(tick) {
            self.report_status();
        }

        std::mem::take(&mut self.outbox)
    }

    fn drive_cycle(&mut self, now: Instant) -> Result<(), Fault> {
        let was_fresh = !self.state.watchdog.is_stale();
        let command = match self.state.watchdog.check(now) {
            Ok(command) => command,
            Err(fault) => {
                if was_fresh {
                    debug!("{}", fault);
                    self.count(&fault);
                }
                DriveCommand::stop()
            }
        };
        let governed = self.governor.govern(command, &self.state.distances);
        self.state.hazards.classify(&governed.hazards, now);

        let velocity = governed.command;
        ensure(velocity.is_finite(), || format!("governed velocity not finite: {:?}", velocity))?;

        let feedback = self.drive.drive(velocity.forward_velocity, velocity.angular_velocity);
        for fault in &feedback.faults {
            self.count(fault);
        }
        let travel = feedback.travel();
        ensure(travel.left.is_finite() && travel.right.is_finite(), || {
            format!("wheel travel not finite: {:?}", travel)
        })?;

        if let Some(odometry) = self.odometry.update(travel, now) {
            self.outbox.push(Telemetry::Odometry(odometry));
        }
        self.outbox.push(Telemetry::Health(self.state.watchdog.health()));
        Ok(())
    }

    fn report_status(&mut self) {
        let counters = self.counters();
        self.outbox.push(Telemetry::Ranges(self.state.distances.report()));
        self.outbox.push(Telemetry::Faults(counters));

        if self.reported != Some(counters) {
            self.outbox.push(Telemetry::Status(StatusLine::info(format!(
                "PingErrs {} LinkTimeouts {}/{} LinkErrs {} MsgErrs {}",
                counters.sensor_timeouts,
                counters.left_link_timeouts,
                counters.right_link_timeouts,
                counters.link_errors,
                counters.malformed_messages
            ))));
            self.reported = Some(counters);
        }
    }
}
