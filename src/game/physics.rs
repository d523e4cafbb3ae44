//! Submarine and torpedo kinematics

/// Stateless kinematics helpers shared by the tick loop
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Wrap any angle in degrees into [0, 360)
    #[inline]
    pub fn normalize_heading(degrees: i32) -> i16 {
        degrees.rem_euclid(360) as i16
    }

    /// Signed shortest-arc difference `to - from`, in [-180, 180)
    #[inline]
    pub fn heading_delta(from: i16, to: i16) -> i32 {
        (i32::from(to) - i32::from(from) + 540).rem_euclid(360) - 180
    }

    /// Turn `heading` toward `target` by at most `max_step` degrees
    pub fn turn_toward(heading: i16, target: i16, max_step: u16) -> i16 {
        let max_step = i32::from(max_step);
        let delta = Self::heading_delta(heading, target).clamp(-max_step, max_step);
        Self::normalize_heading(i32::from(heading) + delta)
    }

    /// Move `speed` toward `target` by at most `step`, never overshooting
    pub fn approach_speed(speed: u16, target: u16, step: u16) -> u16 {
        if speed < target {
            speed.saturating_add(step).min(target)
        } else {
            speed.saturating_sub(step).max(target)
        }
    }

    /// Distance covered in one frame at `speed` units per second
    #[inline]
    pub fn frame_distance(speed: u16, frame_milliseconds: u16) -> f64 {
        f64::from(speed) * f64::from(frame_milliseconds) / 1000.0
    }

    /// Advance a position `distance` units along `heading`
    pub fn advance(x: i64, y: i64, heading: i16, distance: f64) -> (i64, i64) {
        if distance == 0.0 {
            return (x, y);
        }
        let radians = f64::from(heading).to_radians();
        let dx = (distance * radians.cos()).round() as i64;
        let dy = (distance * radians.sin()).round() as i64;
        (x + dx, y + dy)
    }

    /// Squared distance, widened so map-scale coordinates cannot overflow
    #[inline]
    pub fn distance_sq(x1: i64, y1: i64, x2: i64, y2: i64) -> i128 {
        let dx = i128::from(x2) - i128::from(x1);
        let dy = i128::from(y2) - i128::from(y1);
        dx * dx + dy * dy
    }

    /// Squared-distance radius test
    #[inline]
    pub fn within_radius(x1: i64, y1: i64, x2: i64, y2: i64, radius: u32) -> bool {
        let r = i128::from(radius);
        Self::distance_sq(x1, y1, x2, y2) <= r * r
    }
}
