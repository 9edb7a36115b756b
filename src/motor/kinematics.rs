// Differential-drive kinematics
// Converts body-frame velocities (forward, angular) to left/right wheel velocities and back.

/// Linear wheel velocities in m/s (or displacements in m, the algebra is the same)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelPair {
    pub left: f32,
    pub right: f32,
}

impl WheelPair {
    pub fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }

    pub fn zero() -> Self {
        Self::default()
    }
}

/// Body-frame motion: forward (m/s or m) and angular (rad/s or rad)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BodyMotion {
    pub forward: f32,
    pub angular: f32,
}

/// Split a body velocity into wheel targets
///
/// # Arguments
/// * `forward` - Forward velocity in m/s (positive = forward)
/// * `angular` - Rotational velocity in rad/s (positive = counter-clockwise)
/// * `base_radius` - Distance from the base center to each wheel in meters
pub fn body_to_wheels(forward: f32, angular: f32, base_radius: f32) -> WheelPair {
    WheelPair {
        left: forward - base_radius * angular,
        right: forward + base_radius * angular,
    }
}

/// Recombine wheel velocities (or displacements) into body motion
pub fn wheels_to_body(wheels: WheelPair, base_radius: f32) -> BodyMotion {
    BodyMotion {
        forward: (wheels.left + wheels.right) / 2.0,
        angular: (wheels.right - wheels.left) / (2.0 * base_radius),
    }
}

/// Shaft angle (rad) to linear travel (m)
pub fn shaft_to_linear(radians: f32, wheel_radius: f32) -> f32 {
    radians * wheel_radius
}

/// Linear velocity (m/s) to shaft velocity (rad/s)
pub fn linear_to_shaft(meters: f32, wheel_radius: f32) -> f32 {
    meters / wheel_radius
}
