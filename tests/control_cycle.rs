// End-to-end control cycles against the simulated buses

use std::time::{Duration, Instant};

use parsec_drive_runtime::config::{DriveConfig, NUM_SENSORS};
use parsec_drive_runtime::control::Controller;
use parsec_drive_runtime::fault::Fault;
use parsec_drive_runtime::messages::{
    ColorOverride, DriveCommand, IndicatorState, Rgb, RuntimeHealth, StatusLevel, Telemetry,
};
use parsec_drive_runtime::sim::{SimulatedControllers, SimulatedRanging};

type SimController = Controller<SimulatedRanging, SimulatedControllers>;

struct Rig {
    controller: SimController,
    config: DriveConfig,
    t0: Instant,
    tick: u32,
}

impl Rig {
    fn new(distances: [f32; NUM_SENSORS]) -> Self {
        Self::with_config(DriveConfig::default(), distances)
    }

    fn with_config(config: DriveConfig, distances: [f32; NUM_SENSORS]) -> Self {
        let t0 = Instant::now();
        let ranging = SimulatedRanging::new(distances, 1);
        let controllers = SimulatedControllers::new(&[config.link.left_id, config.link.right_id], Duration::from_millis(20));
        let controller = Controller::new(&config, ranging, controllers, t0);
        Self {
            controller,
            config,
            t0,
            tick: 0,
        }
    }

    fn start(&mut self) -> Result<(), Fault> {
        let now = self.now();
        self.controller.start(&self.config, now)
    }

    fn now(&self) -> Instant {
        self.t0 + self.config.timing.tick_period() * self.tick
    }

    /// Run `ticks` ticks, refreshing `command` before each one when given
    fn run(&mut self, ticks: u32, command: Option<DriveCommand>) -> Vec<Telemetry> {
        let mut out = Vec::new();
        for _ in 0..ticks {
            let now = self.now();
            if let Some(cmd) = command {
                self.controller.on_command(cmd, now);
            }
            out.extend(self.controller.tick(now));
            self.tick += 1;
        }
        out
    }

    fn sim(&self) -> &SimulatedControllers {
        self.controller.drive().port()
    }

    fn target(&self, id: u8) -> i16 {
        self.sim().controller(id).unwrap().target_milli_rad_s
    }
}

fn last_indicators(out: &[Telemetry]) -> IndicatorState {
    out.iter()
        .rev()
        .find_map(|t| match t {
            Telemetry::Indicators(state) => Some(state.clone()),
            _ => None,
        })
        .unwrap()
}

fn health(out: &[Telemetry]) -> Vec<RuntimeHealth> {
    out.iter()
        .filter_map(|t| match t {
            Telemetry::Health(h) => Some(*h),
            _ => None,
        })
        .collect()
}

#[test]
fn test_startup_configures_both_controllers() {
    let mut rig = Rig::new([2.0; NUM_SENSORS]);
    rig.start().unwrap();

    let left = rig.sim().controller(1).unwrap();
    let right = rig.sim().controller(2).unwrap();
    assert!(left.initialized && left.primary);
    assert!(right.initialized && !right.primary);
    assert_eq!(left.gain_milli, 75);
    assert_eq!(right.acceleration_milli, 1000);

    let out = rig.run(1, None);
    let status: Vec<&str> = out
        .iter()
        .filter_map(|t| match t {
            Telemetry::Status(line) => Some(line.text.as_str()),
            _ => None,
        })
        .collect();
    assert!(status.contains(&"Gain: 0.075"));
    assert!(status.contains(&"Acceleration: 1.000"));
}

#[test]
fn test_no_command_keeps_wheels_stopped() {
    let mut rig = Rig::new([2.0; NUM_SENSORS]);
    rig.start().unwrap();

    let out = rig.run(30, None);
    assert_eq!(rig.target(1), 0);
    assert_eq!(rig.target(2), 0);
    assert!(health(&out).iter().all(|h| *h == RuntimeHealth::CmdStale));
}

#[test]
fn test_forward_command_drives_and_integrates() {
    let mut rig = Rig::new([2.0; NUM_SENSORS]);
    rig.start().unwrap();

    let out = rig.run(30, Some(DriveCommand::new(0.5, 0.0)));
    // 0.5 m/s on a 7 cm wheel, controllers mounted reversed
    assert!((rig.target(1) as i32 + 7143).abs() <= 1);
    assert!((rig.target(2) as i32 + 7143).abs() <= 1);
    assert_eq!(health(&out).last(), Some(&RuntimeHealth::Ok));

    let pose = rig.controller.odometry().pose();
    assert!(pose.x > 0.0);
    assert!(pose.y.abs() < 1e-4);
    assert!(out.iter().any(|t| matches!(t, Telemetry::Odometry(m) if m.x > 0.0)));
}

#[test]
fn test_command_goes_stale_after_timeout() {
    let mut rig = Rig::new([2.0; NUM_SENSORS]);
    rig.start().unwrap();

    rig.run(9, Some(DriveCommand::new(0.5, 0.0)));
    assert_ne!(rig.target(1), 0);

    // 250 ms at 150 Hz is under 40 ticks
    let out = rig.run(45, None);
    assert_eq!(rig.target(1), 0);
    assert_eq!(rig.target(2), 0);
    assert_eq!(health(&out).last(), Some(&RuntimeHealth::CmdStale));
}

#[test]
fn test_reverse_toward_obstacle_is_slowed() {
    // Rear pinger sees something 0.4 m away, everything else is far
    let mut rig = Rig::new([5.0, 5.0, 0.4, 5.0, 5.0]);
    rig.start().unwrap();
    rig.run(30, None);

    let out = rig.run(6, Some(DriveCommand::new(-0.5, 0.0)));
    // factor = 0.25 / 0.75, so -0.5 m/s becomes -1/6 m/s, 2381 mrad/s at the shaft
    assert!((rig.target(1) as i32 - 2381).abs() <= 5, "left target {}", rig.target(1));
    assert!((rig.target(2) as i32 - 2381).abs() <= 5, "right target {}", rig.target(2));

    let colors = last_indicators(&out).colors;
    assert_eq!(colors[2], Rgb::new(Rgb::FULL, 0, 0));
}

#[test]
fn test_reverse_inside_stop_distance_stops() {
    let mut rig = Rig::new([5.0, 5.0, 0.1, 5.0, 5.0]);
    rig.start().unwrap();
    rig.run(30, None);

    rig.run(6, Some(DriveCommand::new(-0.5, 0.0)));
    assert_eq!(rig.target(1), 0);
    assert_eq!(rig.target(2), 0);

    // Forward is not governed locally
    rig.run(6, Some(DriveCommand::new(0.5, 0.0)));
    assert_ne!(rig.target(1), 0);
}

#[test]
fn test_silent_controller_is_not_fatal() {
    let mut rig = Rig::new([2.0; NUM_SENSORS]);
    rig.start().unwrap();
    rig.run(9, Some(DriveCommand::new(0.3, 0.0)));

    rig.controller.drive_mut().port_mut().set_silent(2, true);
    rig.run(30, Some(DriveCommand::new(0.3, 0.0)));
    let counters = rig.controller.counters();
    assert_eq!(counters.right_link_timeouts, 10);
    assert_eq!(counters.left_link_timeouts, 0);
    assert!(rig.controller.fault().is_none());

    rig.controller.drive_mut().port_mut().set_silent(2, false);
    let before = rig.controller.odometry().pose().x;
    rig.run(30, Some(DriveCommand::new(0.3, 0.0)));
    assert_eq!(rig.controller.counters().right_link_timeouts, 10);
    assert!(rig.controller.odometry().pose().x > before);
}

#[test]
fn test_dead_pinger_is_counted_not_fatal() {
    let mut rig = Rig::new([2.0; NUM_SENSORS]);
    rig.controller.ranging_mut().set_dead(1, true);
    rig.start().unwrap();

    // Status goes out on ticks 2 and 152
    let out = rig.run(155, Some(DriveCommand::new(0.2, 0.0)));
    assert!(rig.controller.fault().is_none());
    let counters = rig.controller.counters();
    assert!(counters.sensor_timeouts > 0);
    assert!(out.iter().any(|t| matches!(t, Telemetry::Ranges(r) if r.readings[1].distance.is_none())));
    assert!(out.iter().any(|t| matches!(t, Telemetry::Faults(f) if f.sensor_timeouts > 0)));
}

#[test]
fn test_status_line_reports_counters() {
    let mut rig = Rig::new([2.0; NUM_SENSORS]);
    rig.start().unwrap();

    let out = rig.run(150, None);
    let line = out
        .iter()
        .find_map(|t| match t {
            Telemetry::Status(line) if line.text.starts_with("PingErrs") => Some(line.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(line.level, StatusLevel::Info);
    assert_eq!(line.text, "PingErrs 0 LinkTimeouts 0/0 LinkErrs 0 MsgErrs 0");
}

#[test]
fn test_color_override_expires() {
    let mut rig = Rig::new([2.0; NUM_SENSORS]);
    rig.start().unwrap();
    let out = rig.run(30, None);
    let green = Rgb::new(0, Rgb::FULL, 0);
    assert_eq!(last_indicators(&out).colors[0], green);

    let mut colors = ColorOverride::default();
    colors.slots[0] = Some([255, 0, 255]);
    rig.controller.on_colors(&colors, rig.now());

    let out = rig.run(3, None);
    let state = last_indicators(&out);
    assert_eq!(state.colors[0], Rgb::new(1020, 0, 1020));
    assert_eq!(state.colors[1], green);

    // 100 ms later the governor's colour is back
    let out = rig.run(18, None);
    assert_eq!(last_indicators(&out).colors[0], green);
}

#[test]
fn test_invalid_config_latches() {
    let mut config = DriveConfig::default();
    config.geometry.wheel_radius = 0.0;
    let mut rig = Rig::with_config(config, [2.0; NUM_SENSORS]);

    let fault = rig.start().unwrap_err();
    assert!(fault.is_fatal());
    assert_eq!(rig.controller.fault(), Some(&fault));
    assert!(!rig.sim().controller(1).unwrap().initialized);
    assert_eq!(rig.sim().emergency_stops(), 1);

    let out = rig.run(30, Some(DriveCommand::new(0.5, 0.0)));
    assert_eq!(rig.target(1), 0);
    assert!(health(&out).iter().all(|h| *h == RuntimeHealth::Faulted));
}

#[test]
fn test_latched_fault_repeats_emergency_stop() {
    let mut rig = Rig::new([2.0; NUM_SENSORS]);
    rig.controller.drive_mut().port_mut().set_silent(1, true);
    assert!(rig.start().is_err());
    assert_eq!(rig.sim().emergency_stops(), 1);

    // Ticks before 500 ms have passed do not repeat it
    rig.run(75, None);
    assert_eq!(rig.sim().emergency_stops(), 1);

    let out = rig.run(2, None);
    assert_eq!(rig.sim().emergency_stops(), 2);
    assert!(out.iter().any(|t| matches!(t, Telemetry::Status(line) if line.level == StatusLevel::Error)));

    // A fresh command never clears the latch
    rig.run(150, Some(DriveCommand::new(0.5, 0.0)));
    assert_eq!(rig.target(1), 0);
    assert!(rig.controller.fault().is_some());
}

#[test]
fn test_non_finite_command_is_ignored() {
    let mut rig = Rig::new([2.0; NUM_SENSORS]);
    rig.start().unwrap();

    rig.run(6, Some(DriveCommand::new(f32::NAN, 0.0)));
    assert_eq!(rig.target(1), 0);
    assert_eq!(rig.controller.counters().malformed_messages, 6);
    assert!(rig.controller.fault().is_none());
}

#[test]
fn test_stale_transition_is_counted_once() {
    let mut rig = Rig::new([2.0; NUM_SENSORS]);
    rig.start().unwrap();

    // Stale from boot is not a transition
    rig.run(30, None);
    assert_eq!(rig.controller.counters().stale_commands, 0);

    rig.run(9, Some(DriveCommand::new(0.2, 0.0)));
    rig.run(90, None);
    assert_eq!(rig.controller.counters().stale_commands, 1);
    assert_eq!(rig.target(1), 0);
}
