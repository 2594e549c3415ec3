//! Latest-pose cell and the decode-side processing pipeline.
//!
//! The network task writes poses, the session tick loop reads them, so both
//! the pose cell and the pipeline sit behind locks. Latest pose wins; a
//! reader always gets a complete snapshot, never a torn one.

use crate::calibration::{DeviceKind, HeadingCalibration};
use crate::protocol::RawSample;
use crate::smoothing::OrientationSmoother;
use nalgebra::UnitQuaternion;
use std::sync::{Arc, Mutex};

/// Filtered orientation plus acceleration magnitude, the externally
/// consumed output of the sensor stream.
#[derive(Clone, Debug)]
pub struct Pose {
    pub orientation: UnitQuaternion<f64>,
    pub accel_magnitude: f64,
    /// Yaw calibration offset in effect when this pose was produced, degrees.
    pub heading_offset: f64,
}

impl Default for Pose {
    fn default() -> Self {
        Pose {
            orientation: UnitQuaternion::identity(),
            accel_magnitude: 0.0,
            heading_offset: 0.0,
        }
    }
}

/// Process-wide latest-pose cell. Cheap to clone; clones share the cell.
#[derive(Clone, Default)]
pub struct PoseStore {
    inner: Arc<Mutex<Pose>>,
}

impl PoseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, pose: Pose) {
        if let Ok(mut cell) = self.inner.lock() {
            *cell = pose;
        }
    }

    pub fn get(&self) -> Pose {
        self.inner
            .lock()
            .ok()
            .map(|cell| cell.clone())
            .unwrap_or_default()
    }
}

/// Decode-side processing: device correction, calibration, smoothing.
///
/// Owned behind a lock shared between the network task (which ingests) and
/// the tick thread (which switches device kind and calibrates).
pub struct PosePipeline {
    device: DeviceKind,
    calibration: HeadingCalibration,
    smoother: OrientationSmoother,
}

pub type SharedPipeline = Arc<Mutex<PosePipeline>>;

impl PosePipeline {
    pub fn new(device: DeviceKind) -> Self {
        PosePipeline {
            device,
            calibration: HeadingCalibration::new(),
            smoother: OrientationSmoother::new(),
        }
    }

    pub fn shared(device: DeviceKind) -> SharedPipeline {
        Arc::new(Mutex::new(Self::new(device)))
    }

    pub fn device(&self) -> DeviceKind {
        self.device
    }

    pub fn set_device(&mut self, device: DeviceKind) {
        if self.device != device {
            log::info!("[pose] device preset switched to {}", device.name());
        }
        self.device = device;
    }

    pub fn calibrate(&mut self) {
        self.calibration.calibrate();
        log::info!(
            "[pose] heading calibrated, offset {:.1} deg",
            self.calibration.offset_deg()
        );
    }

    pub fn adjust_trim(&mut self, delta_deg: f64) {
        self.calibration.adjust_trim(delta_deg);
    }

    pub fn trim_deg(&self) -> f64 {
        self.calibration.trim_deg()
    }

    /// Fold one decoded record into `pose`.
    ///
    /// Acceleration is always taken. The orientation only moves for samples
    /// that carry one; the identity-sentinel samples the handset sends
    /// before its gyro warms up must not disturb the last good orientation.
    pub fn ingest_into(&mut self, sample: &RawSample, pose: &mut Pose) {
        pose.accel_magnitude = sample.accel_magnitude();
        pose.heading_offset = self.calibration.offset_deg();

        if !sample.has_orientation() {
            return;
        }

        let raw = UnitQuaternion::from_quaternion(sample.orientation);
        let corrected = self.calibration.apply(self.device, &raw);
        pose.orientation = self.smoother.push(corrected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{parse_record, FIELD_COUNT};
    use approx::assert_relative_eq;

    fn record_with(quat: [f64; 4], accel: [f64; 3]) -> RawSample {
        let mut fields = vec![0.0; FIELD_COUNT];
        fields[1..5].copy_from_slice(&quat);
        fields[8..11].copy_from_slice(&accel);
        let payload = fields
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",");
        parse_record(&format!("<DATA>{payload}<EOF>")).unwrap()
    }

    #[test]
    fn test_identity_sample_keeps_orientation() {
        let mut pipeline = PosePipeline::new(DeviceKind::Android);
        let mut pose = Pose::default();

        // Establish a real orientation first.
        let sample = record_with([0.5, 0.5, 0.5, 0.5], [0.0, 0.0, 0.0]);
        pipeline.ingest_into(&sample, &mut pose);
        let established = pose.orientation;
        assert_ne!(established, UnitQuaternion::identity());

        // An identity-sentinel sample updates acceleration only.
        let sentinel = record_with([0.0, 0.0, 0.0, 1.0], [3.0, 4.0, 0.0]);
        pipeline.ingest_into(&sentinel, &mut pose);
        assert_eq!(pose.orientation, established);
        assert_relative_eq!(pose.accel_magnitude, 5.0);
    }

    #[test]
    fn test_store_snapshot() {
        let store = PoseStore::new();
        let mut pose = Pose::default();
        pose.accel_magnitude = 2.5;
        store.set(pose);

        let read = store.get();
        assert_relative_eq!(read.accel_magnitude, 2.5);
        assert_eq!(read.orientation, UnitQuaternion::identity());
    }

    #[test]
    fn test_offset_flows_into_pose() {
        let mut pipeline = PosePipeline::new(DeviceKind::Android);
        let mut pose = Pose::default();

        let sample = record_with([0.5, 0.5, 0.5, 0.5], [0.0, 0.0, 0.0]);
        pipeline.ingest_into(&sample, &mut pose);
        assert_relative_eq!(pose.heading_offset, 0.0);

        pipeline.calibrate();
        pipeline.ingest_into(&sample, &mut pose);
        assert_relative_eq!(pose.heading_offset, pipeline.calibration.offset_deg());
    }
}
