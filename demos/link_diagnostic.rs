// Wheel controller link diagnostic
//
// Initializes both controllers, then spins each wheel slowly for a moment and
// prints the travel it reports. Run with the wheels OFF THE GROUND.
//
// Usage: cargo run --example link_diagnostic -- [port]

use std::thread::sleep;
use std::time::Duration;

use parsec_drive_runtime::config::{GeometryConfig, LinkConfig};
use parsec_drive_runtime::motor::{DriveBase, SerialHalfDuplex};

const TEST_SPEED: f32 = 0.05; // m/s
const CYCLES: u32 = 25;
const CYCLE: Duration = Duration::from_millis(20);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    let mut link = LinkConfig::default();
    if let Some(port) = std::env::args().nth(1) {
        link.motor_port = port;
    }
    let geometry = GeometryConfig::default();

    println!("Serial port: {} @ {} baud", link.motor_port, link.baudrate);
    println!("Controller ids: left={} right={}", link.left_id, link.right_id);
    println!();

    println!("Step 1: Opening serial port...");
    let port = match SerialHalfDuplex::open(&link.motor_port, link.baudrate) {
        Ok(port) => port,
        Err(e) => {
            println!("  Failed to open serial port: {}", e);
            println!("  - Check the port path and the USB cable");
            return Err(e.into());
        }
    };
    let mut drive = DriveBase::new(port, &geometry, &link);

    println!("Step 2: Initializing controllers...");
    if let Err(e) = drive.initialize(link.gain, link.acceleration) {
        println!("  Initialization failed: {}", e);
        println!("  - Check controller power and ids");
        return Err(e.into());
    }
    println!("  Both controllers answered");
    println!();

    for (label, forward, angular) in [
        ("forward", TEST_SPEED, 0.0),
        ("backward", -TEST_SPEED, 0.0),
        ("rotate", 0.0, TEST_SPEED / geometry.base_radius),
    ] {
        println!("Step 3: Driving {} at {:.2} m/s...", label, TEST_SPEED);
        let (mut left, mut right) = (0.0f32, 0.0f32);
        let mut faults = Vec::new();
        for _ in 0..CYCLES {
            let feedback = drive.drive(forward, angular);
            let travel = feedback.travel();
            left += travel.left;
            right += travel.right;
            faults.extend(feedback.faults);
            sleep(CYCLE);
        }
        drive.drive(0.0, 0.0);
        println!("  Travel: left={:+.4} m right={:+.4} m", left, right);
        if faults.is_empty() {
            println!("  Every exchange answered");
        } else {
            println!("  {} of {} exchanges failed:", faults.len(), 2 * CYCLES);
            for fault in &faults {
                println!("    {}", fault);
            }
        }
        println!();
    }

    // Dropping the drive base broadcasts the emergency stop
    println!("Diagnostic complete");
    Ok(())
}
