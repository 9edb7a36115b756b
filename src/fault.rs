// Fault taxonomy of the control worker
//
// Everything except an assertion failure is recovered locally by substituting
// a safe default and only shows up as a counter. An assertion failure latches.

use crate::config::ConfigError;
use crate::motor::LinkError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Fault {
    #[error("Ultrasonic sensor {sensor} did not report a reading")]
    SensorTimeout { sensor: usize },

    #[error("Wheel controller {id} did not answer")]
    LinkTimeout { id: u8 },

    #[error("Wheel controller {id} exchange failed: {reason}")]
    LinkFailure { id: u8, reason: String },

    #[error("No fresh drive command")]
    CommandStale,

    #[error("Assertion failed: {0}")]
    AssertionFailure(String),
}

impl Fault {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Fault::AssertionFailure(_))
    }

    /// Classify a failed exchange with controller `id`; never fatal
    pub fn link(id: u8, err: &LinkError) -> Self {
        match err {
            LinkError::Timeout { .. } => Fault::LinkTimeout { id },
            other => Fault::LinkFailure {
                id,
                reason: other.to_string(),
            },
        }
    }
}

impl From<ConfigError> for Fault {
    fn from(err: ConfigError) -> Self {
        Fault::AssertionFailure(err.to_string())
    }
}

/// Check an internal invariant, producing a fatal fault when it does not hold
pub fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), Fault> {
    if condition {
        Ok(())
    } else {
        Err(Fault::AssertionFailure(message()))
    }
}
