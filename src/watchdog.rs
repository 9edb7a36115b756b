// Drive command watchdog
// Note: if the host crashes or the link hangs, the last command would keep the
// robot moving forever. A command older than the timeout is reported stale and
// the caller stops the robot.

use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::fault::Fault;
use crate::messages::{DriveCommand, RuntimeHealth};

pub struct Watchdog {
    latest_cmd: Option<DriveCommand>,
    cmd_received_at: Option<Instant>,
    timeout: Duration,
    health: RuntimeHealth,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            latest_cmd: None,
            cmd_received_at: None,
            timeout,
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    /// Record an incoming command, stamped with its arrival time
    pub fn on_command(&mut self, cmd: DriveCommand, now: Instant) {
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = Some(now);
    }

    /// Fresh command for this cycle, or `CommandStale`; the caller must then stop
    pub fn check(&mut self, now: Instant) -> Result<DriveCommand, Fault> {
        let fresh = match (self.latest_cmd, self.cmd_received_at) {
            (Some(cmd), Some(at)) => {
                let cmd_age = now.saturating_duration_since(at);
                if cmd_age > self.timeout {
                    if self.health == RuntimeHealth::Ok {
                        warn!("Command stale ({:?} old), stopping robot", cmd_age);
                    }
                    None
                } else {
                    Some(cmd)
                }
            }
            // No command ever received
            _ => None,
        };

        match fresh {
            Some(cmd) => {
                if self.health != RuntimeHealth::Ok {
                    info!("Receiving fresh commands");
                }
                self.health = RuntimeHealth::Ok;
                Ok(cmd)
            }
            None => {
                self.health = RuntimeHealth::CmdStale;
                Err(Fault::CommandStale)
            }
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn is_stale(&self) -> bool {
        self.health == RuntimeHealth::CmdStale
    }
}
