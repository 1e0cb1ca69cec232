//! Scalar and vector helpers

use glam::Vec3;

/// Squared distance below which two points are treated as the same location.
const EQUAL_THRESHOLD_SQR: f32 = (1.0 / 16384.0) * (1.0 / 16384.0);

#[inline]
pub fn sqr<T: std::ops::Mul<Output = T> + Copy>(x: T) -> T {
    x * x
}

/// Rounds up to the next power of two.
pub fn next_pow2(mut v: u32) -> u32 {
    v = v.saturating_sub(1);
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v.wrapping_add(1)
}

/// Returns true when the two points are practically at the same location.
#[inline]
pub fn vequal(p0: Vec3, p1: Vec3) -> bool {
    p0.distance_squared(p1) < EQUAL_THRESHOLD_SQR
}
