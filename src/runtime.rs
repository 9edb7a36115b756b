// Transport side of the runtime
// Zenoh delivers commands in and carries telemetry out; the control cycle
// itself runs on this task between ticks, so there is exactly one worker.

use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use zenoh::pubsub::Publisher;

use crate::config::{
    Args, DriveConfig, NUM_SENSORS, TOPIC_CMD_VEL, TOPIC_COLORS, TOPIC_FAULTS, TOPIC_HEALTH,
    TOPIC_INDICATORS, TOPIC_LOG, TOPIC_ODOMETRY, TOPIC_RANGES,
};
use crate::control::Controller;
use crate::messages::{ColorOverride, DriveCommand, Telemetry};
use crate::motor::{HalfDuplex, SerialHalfDuplex};
use crate::ranging::{RangingBus, SerialRangingBus};
use crate::sim::{SimulatedControllers, SimulatedRanging};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

struct Publishers {
    odometry: Publisher<'static>,
    indicators: Publisher<'static>,
    ranges: Publisher<'static>,
    health: Publisher<'static>,
    faults: Publisher<'static>,
    log: Publisher<'static>,
}

impl Publishers {
    async fn publish(&self, telemetry: &Telemetry) -> Result<(), BoxError> {
        let (publisher, json) = match telemetry {
            Telemetry::Odometry(m) => (&self.odometry, serde_json::to_string(m)?),
            Telemetry::Indicators(m) => (&self.indicators, serde_json::to_string(m)?),
            Telemetry::Ranges(m) => (&self.ranges, serde_json::to_string(m)?),
            Telemetry::Health(m) => (&self.health, serde_json::to_string(m)?),
            Telemetry::Faults(m) => (&self.faults, serde_json::to_string(m)?),
            Telemetry::Status(m) => (&self.log, serde_json::to_string(m)?),
        };
        publisher.put(json).await?;
        Ok(())
    }
}

pub async fn run(args: Args) -> Result<(), BoxError> {
    let config = DriveConfig::from_args(&args)?;

    if args.sim {
        info!("Running against simulated sensors and controllers");
        let ranging = SimulatedRanging::new([2.0; NUM_SENSORS], 2);
        let cycle = config.timing.tick_period() * config.timing.drive_divisor.max(1) as u32;
        let controllers = SimulatedControllers::new(&[config.link.left_id, config.link.right_id], cycle);
        serve(config, ranging, controllers).await
    } else {
        info!("Opening wheel controller bus on {}", config.link.motor_port);
        let port = SerialHalfDuplex::open(&config.link.motor_port, config.link.baudrate)?;
        info!("Opening ultrasonic bus on {}", config.ranging.ranging_port);
        let ranging = SerialRangingBus::open(&config.ranging.ranging_port, config.ranging.baudrate, NUM_SENSORS)?;
        serve(config, ranging, port).await
    }
}

async fn serve<R: RangingBus, P: HalfDuplex>(config: DriveConfig, ranging: R, port: P) -> Result<(), BoxError> {
    let mut controller = Controller::new(&config, ranging, port, Instant::now());

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let cmd_subscriber = session.declare_subscriber(TOPIC_CMD_VEL).await?;
    let colors_subscriber = session.declare_subscriber(TOPIC_COLORS).await?;
    let publishers = Publishers {
        odometry: session.declare_publisher(TOPIC_ODOMETRY).await?,
        indicators: session.declare_publisher(TOPIC_INDICATORS).await?,
        ranges: session.declare_publisher(TOPIC_RANGES).await?,
        health: session.declare_publisher(TOPIC_HEALTH).await?,
        faults: session.declare_publisher(TOPIC_FAULTS).await?,
        log: session.declare_publisher(TOPIC_LOG).await?,
    };

    // Tuning goes out only once the host can hear it
    if let Err(fault) = controller.start(&config, Instant::now()) {
        warn!("Startup failed, staying halted: {}", fault);
    }

    let mut tick = interval(config.timing.tick_period());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Runtime started: {}Hz tick, drive every {} ticks, {}ms watchdog timeout",
        config.timing.loop_hz,
        config.timing.drive_divisor,
        config.timing.cmd_timeout_ms
    );
    info!("Subscribed to: {}, {}", TOPIC_CMD_VEL, TOPIC_COLORS);
    info!(
        "Publishing to: {}, {}, {}, {}, {}, {}",
        TOPIC_ODOMETRY, TOPIC_INDICATORS, TOPIC_RANGES, TOPIC_HEALTH, TOPIC_FAULTS, TOPIC_LOG
    );

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
        let now = Instant::now();

        // 1. Drain all pending commands (non-blocking), keep latest
        while let Ok(Some(sample)) = cmd_subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<DriveCommand>(&payload) {
                Ok(cmd) => controller.on_command(cmd, now),
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                    controller.on_malformed();
                }
            }
        }
        while let Ok(Some(sample)) = colors_subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<ColorOverride>(&payload) {
                Ok(colors) => controller.on_colors(&colors, now),
                Err(e) => {
                    warn!("Failed to parse colors: {}", e);
                    controller.on_malformed();
                }
            }
        }

        // 2. Run the control cycle; the serial exchanges block for up to the response timeout
        let outbound = tokio::task::block_in_place(|| controller.tick(now));

        // 3. Publish telemetry
        for telemetry in &outbound {
            publishers.publish(telemetry).await?;
        }
    }

    // Dropping the controller broadcasts an emergency stop
    drop(controller);
    tokio::time::sleep(Duration::from_millis(10)).await;
    Ok(())
}
