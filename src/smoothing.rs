//! Low-pass filter for the noisy handset orientation.

use nalgebra::UnitQuaternion;
use std::collections::VecDeque;

/// Number of recent samples the filter interpolates over.
pub const WINDOW_SIZE: usize = 4;

/// Sliding-window orientation smoother.
///
/// Keeps the last four orientation samples and blends them with a two-level
/// hierarchical spherical interpolation, which behaves like a low-pass
/// filter with roughly a four-sample lag. Until the window has filled the
/// input passes through unchanged.
pub struct OrientationSmoother {
    window: VecDeque<UnitQuaternion<f64>>,
}

impl OrientationSmoother {
    pub fn new() -> Self {
        OrientationSmoother {
            window: VecDeque::with_capacity(WINDOW_SIZE),
        }
    }

    /// Push the next orientation sample and get the filtered orientation.
    pub fn push(&mut self, rotation: UnitQuaternion<f64>) -> UnitQuaternion<f64> {
        self.window.push_back(rotation);

        if self.window.len() < WINDOW_SIZE {
            return rotation;
        }

        let s0 = self.window[0];
        let s1 = self.window[1];
        let s2 = self.window[2];
        let s3 = self.window[3];
        self.window.pop_front();

        let m1 = half_slerp(&half_slerp(&s0, &s1), &half_slerp(&s1, &s2));
        let m2 = half_slerp(&half_slerp(&s1, &s2), &half_slerp(&s2, &s3));
        half_slerp(&m1, &m2)
    }

    /// Current window occupancy (oscillates between 3 and 4 once warm).
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }
}

impl Default for OrientationSmoother {
    fn default() -> Self {
        Self::new()
    }
}

/// Spherical midpoint. Antipodal pairs have no unique midpoint, so fall
/// back to the first operand instead of failing.
fn half_slerp(a: &UnitQuaternion<f64>, b: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
    a.try_slerp(b, 0.5, 1.0e-9).unwrap_or(*a)
}
