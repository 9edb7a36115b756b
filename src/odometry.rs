// Dead-reckoning pose from wheel travel
//
// Integrates every drive cycle; publishes only when the publish interval has
// passed so the transport is not flooded.

use std::f32::consts::PI;
use std::time::{Duration, Instant};

use crate::messages::OdometryMessage;
use crate::motor::{wheels_to_body, WheelPair};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    pub x: f32,
    pub y: f32,
    /// Heading in (-pi, pi]
    pub theta: f32,
}

/// Wrap an angle to (-pi, pi]
pub fn normalize_angle(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(2.0 * PI);
    if wrapped > PI { wrapped - 2.0 * PI } else { wrapped }
}

pub struct OdometryIntegrator {
    pose: Pose,
    base_radius: f32,
    linear_velocity: f32,
    angular_velocity: f32,
    started: Instant,
    last_update: Option<Instant>,
    last_publish: Option<Instant>,
    publish_interval: Duration,
}

impl OdometryIntegrator {
    pub fn new(base_radius: f32, publish_interval: Duration, started: Instant) -> Self {
        Self {
            pose: Pose::default(),
            base_radius,
            linear_velocity: 0.0,
            angular_velocity: 0.0,
            started,
            last_update: None,
            last_publish: None,
            publish_interval,
        }
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Fold one cycle of wheel travel (m) into the pose.
    /// Returns the message to publish when the publish interval has elapsed.
    pub fn update(&mut self, travel: WheelPair, now: Instant) -> Option<OdometryMessage> {
        let motion = wheels_to_body(travel, self.base_radius);

        // Midpoint arc approximation
        let mid_heading = self.pose.theta + motion.angular / 2.0;
        self.pose.x += motion.forward * mid_heading.cos();
        self.pose.y += motion.forward * mid_heading.sin();
        self.pose.theta = normalize_angle(self.pose.theta + motion.angular);

        let dt = self
            .last_update
            .map(|t| now.saturating_duration_since(t).as_secs_f32())
            .unwrap_or(0.0);
        if dt > 0.0 {
            self.linear_velocity = motion.forward / dt;
            self.angular_velocity = motion.angular / dt;
        }
        self.last_update = Some(now);

        let due = self
            .last_publish
            .is_none_or(|t| now.saturating_duration_since(t) >= self.publish_interval);
        if !due {
            return None;
        }
        self.last_publish = Some(now);
        Some(self.to_message(now))
    }

    pub fn to_message(&self, now: Instant) -> OdometryMessage {
        OdometryMessage {
            x: self.pose.x,
            y: self.pose.y,
            theta: self.pose.theta,
            linear_velocity: self.linear_velocity,
            angular_velocity: self.angular_velocity,
            timestamp_ms: now.saturating_duration_since(self.started).as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const BASE_RADIUS: f32 = 0.18;
    const CYCLE: Duration = Duration::from_millis(20);

    #[test]
    fn test_straight_line() {
        let t0 = Instant::now();
        let mut odometry = OdometryIntegrator::new(BASE_RADIUS, Duration::from_millis(70), t0);
        for i in 1..=10 {
            odometry.update(WheelPair::new(0.01, 0.01), t0 + CYCLE * i);
        }
        assert_relative_eq!(odometry.pose().x, 0.1, epsilon = 1e-5);
        assert_relative_eq!(odometry.pose().y, 0.0);
        assert_relative_eq!(odometry.pose().theta, 0.0);
    }

    #[test]
    fn test_spin_in_place() {
        let t0 = Instant::now();
        let mut odometry = OdometryIntegrator::new(BASE_RADIUS, Duration::from_millis(70), t0);
        // Quarter turn: each wheel travels base_radius * pi / 2
        let arc = BASE_RADIUS * PI / 2.0;
        odometry.update(WheelPair::new(-arc, arc), t0 + CYCLE);
        assert_relative_eq!(odometry.pose().theta, PI / 2.0, epsilon = 1e-5);
        assert_relative_eq!(odometry.pose().x, 0.0);
    }

    #[test]
    fn test_heading_wraps() {
        assert_relative_eq!(normalize_angle(3.0 * PI / 2.0), -PI / 2.0, epsilon = 1e-5);
        assert_relative_eq!(normalize_angle(-3.0 * PI / 2.0), PI / 2.0, epsilon = 1e-5);
        assert_relative_eq!(normalize_angle(PI), PI);
    }

    #[test]
    fn test_arc_uses_midpoint_heading() {
        let t0 = Instant::now();
        let mut odometry = OdometryIntegrator::new(BASE_RADIUS, Duration::from_millis(70), t0);
        odometry.update(WheelPair::new(0.09, 0.11), t0 + CYCLE);
        let dtheta = 0.02 / (2.0 * BASE_RADIUS);
        assert_relative_eq!(odometry.pose().theta, dtheta, epsilon = 1e-6);
        assert_relative_eq!(odometry.pose().x, 0.1 * (dtheta / 2.0).cos(), epsilon = 1e-6);
        assert_relative_eq!(odometry.pose().y, 0.1 * (dtheta / 2.0).sin(), epsilon = 1e-6);
    }

    #[test]
    fn test_publish_cadence() {
        let t0 = Instant::now();
        let mut odometry = OdometryIntegrator::new(BASE_RADIUS, Duration::from_millis(70), t0);
        let published: Vec<u32> = (1..=10)
            .filter(|&i| odometry.update(WheelPair::new(0.01, 0.01), t0 + CYCLE * i).is_some())
            .collect();
        // 20 ms cycles, 70 ms interval: first update, then every 4th cycle
        assert_eq!(published, vec![1, 5, 9]);
    }

    #[test]
    fn test_velocity_estimate() {
        let t0 = Instant::now();
        let mut odometry = OdometryIntegrator::new(BASE_RADIUS, Duration::ZERO, t0);
        odometry.update(WheelPair::zero(), t0);
        let msg = odometry.update(WheelPair::new(0.01, 0.01), t0 + CYCLE).unwrap();
        assert_relative_eq!(msg.linear_velocity, 0.5, epsilon = 1e-4);
        assert_eq!(msg.timestamp_ms, 20);
    }
}
