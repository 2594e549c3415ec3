//! Device-specific orientation correction and operator yaw calibration.
//!
//! The handset reports its gyro attitude in its own frame. Before the
//! orientation is usable it gets a fixed correction: a 180 degree local roll
//! to swap quaternion handedness, then a world-frame preset (90 degree pitch
//! plus a per-device yaw constant) that makes the quaternion read as a
//! camera pointing out the back of the handset. On top of that sits an
//! operator-controlled yaw calibration that zeroes out however much the
//! heading had drifted when the operator pressed calibrate.

use clap::ValueEnum;
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Kind of handset streaming to us. Affects only the yaw constant of the
/// orientation-correction preset, not the wire protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum DeviceKind {
    Android,
    Iphone,
}

impl DeviceKind {
    /// World-frame yaw preset, in degrees.
    pub fn yaw_preset_deg(self) -> f64 {
        match self {
            DeviceKind::Android => 245.0,
            DeviceKind::Iphone => 180.0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DeviceKind::Android => "android",
            DeviceKind::Iphone => "iphone",
        }
    }
}

/// Operator-facing yaw calibration state.
///
/// `captured_offset` persists until the next [`calibrate`](Self::calibrate)
/// call; there is no persistence across process restarts.
pub struct HeadingCalibration {
    /// Heading of the rig at startup, in degrees.
    initial_yaw: f64,
    /// Heading produced by the most recent [`apply`](Self::apply).
    applied_yaw: f64,
    /// Offset captured by the last calibrate call, in degrees.
    captured_offset: f64,
    /// Manual trim added to the device yaw preset, in degrees.
    trim: f64,
}

impl HeadingCalibration {
    pub fn new() -> Self {
        HeadingCalibration {
            initial_yaw: 0.0,
            applied_yaw: 0.0,
            captured_offset: 0.0,
            trim: 0.0,
        }
    }

    /// Correct a raw handset quaternion for the given device kind.
    ///
    /// Records the heading that resulted from the device preset so a later
    /// [`calibrate`](Self::calibrate) can capture it.
    pub fn apply(
        &mut self,
        device: DeviceKind,
        raw: &UnitQuaternion<f64>,
    ) -> UnitQuaternion<f64> {
        // Swap handedness of the gyro quaternion (local 180 degree roll).
        let flipped = raw * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), PI);

        // World-frame preset: pitch up, then the device yaw constant plus
        // the operator trim.
        let yaw_deg = device.yaw_preset_deg() + self.trim;
        let preset = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), yaw_deg.to_radians())
            * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 90.0f64.to_radians());
        let oriented = preset * flipped;

        self.applied_yaw = heading_deg(&oriented);

        // Rotate the heading back by however much it deviated when the
        // offset was captured.
        UnitQuaternion::from_axis_angle(
            &Vector3::y_axis(),
            -self.captured_offset.to_radians(),
        ) * oriented
    }

    /// Capture the difference between the currently applied heading and the
    /// heading recorded at startup. Safe to call repeatedly; each call
    /// overwrites the previous offset with a freshly measured one.
    pub fn calibrate(&mut self) {
        self.captured_offset = self.applied_yaw - self.initial_yaw;
    }

    /// Nudge the yaw preset by `delta_deg` degrees.
    pub fn adjust_trim(&mut self, delta_deg: f64) {
        self.trim += delta_deg;
    }

    pub fn offset_deg(&self) -> f64 {
        self.captured_offset
    }

    pub fn trim_deg(&self) -> f64 {
        self.trim
    }
}

impl Default for HeadingCalibration {
    fn default() -> Self {
        Self::new()
    }
}

/// Heading of an orientation: the yaw of its forward vector in a Y-up
/// frame, in degrees within (-180, 180].
fn heading_deg(q: &UnitQuaternion<f64>) -> f64 {
    let forward = q * Vector3::z();
    forward.x.atan2(forward.z).to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Raw input that cancels the preset pitch, leaving a pure heading.
    fn level_raw() -> UnitQuaternion<f64> {
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), (-90.0f64).to_radians())
    }

    fn wrap_deg(mut deg: f64) -> f64 {
        while deg > 180.0 {
            deg -= 360.0;
        }
        while deg <= -180.0 {
            deg += 360.0;
        }
        deg
    }

    #[test]
    fn test_presets_differ_only_in_yaw() {
        let mut cal = HeadingCalibration::new();
        let raw = level_raw();

        let android = cal.apply(DeviceKind::Android, &raw);
        let android_yaw = heading_deg(&android);
        let iphone = cal.apply(DeviceKind::Iphone, &raw);
        let iphone_yaw = heading_deg(&iphone);

        assert_relative_eq!(
            wrap_deg(android_yaw - iphone_yaw),
            wrap_deg(245.0 - 180.0),
            epsilon = 1.0e-9
        );
        // Same rotation once the yaw difference is removed.
        let unyawed = UnitQuaternion::from_axis_angle(
            &Vector3::y_axis(),
            -(android_yaw - iphone_yaw).to_radians(),
        ) * android;
        assert!(unyawed.angle_to(&iphone) < 1.0e-9);
    }

    #[test]
    fn test_calibrate_zeroes_heading() {
        let mut cal = HeadingCalibration::new();
        let raw = level_raw();

        let before = cal.apply(DeviceKind::Android, &raw);
        assert_relative_eq!(wrap_deg(heading_deg(&before)), wrap_deg(245.0), epsilon = 1.0e-9);

        cal.calibrate();
        let after = cal.apply(DeviceKind::Android, &raw);
        assert_relative_eq!(heading_deg(&after), 0.0, epsilon = 1.0e-9);
    }

    #[test]
    fn test_calibrate_overwrites_offset() {
        let mut cal = HeadingCalibration::new();
        let raw = level_raw();

        cal.apply(DeviceKind::Android, &raw);
        cal.calibrate();
        let first = cal.offset_deg();

        // Device change shifts the applied heading; recalibrating must
        // capture the new value, not accumulate onto the old one.
        cal.apply(DeviceKind::Iphone, &raw);
        cal.calibrate();
        let second = cal.offset_deg();

        assert_relative_eq!(wrap_deg(first), wrap_deg(245.0), epsilon = 1.0e-9);
        assert_relative_eq!(wrap_deg(second), wrap_deg(180.0), epsilon = 1.0e-9);
    }

    #[test]
    fn test_trim_accumulates() {
        let mut cal = HeadingCalibration::new();
        cal.adjust_trim(5.0);
        cal.adjust_trim(-2.0);
        assert_relative_eq!(cal.trim_deg(), 3.0);

        let raw = level_raw();
        let out = cal.apply(DeviceKind::Iphone, &raw);
        assert_relative_eq!(
            wrap_deg(heading_deg(&out)),
            wrap_deg(180.0 + 3.0),
            epsilon = 1.0e-9
        );
    }
}
