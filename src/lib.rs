//! TCP rotation server: streams orientation and acceleration samples from a
//! handheld device, smooths the noisy orientation, and drives a timed duel
//! session against that pose.
//!
//! The two halves are the sensor link ([`server`], [`protocol`],
//! [`smoothing`], [`calibration`], [`pose`]) and the session state machine
//! ([`session`]). Everything scene-side hides behind
//! [`session::StageDirector`].

pub mod calibration;
pub mod pose;
pub mod protocol;
pub mod server;
pub mod session;
pub mod smoothing;
pub mod status;

pub use calibration::{DeviceKind, HeadingCalibration};
pub use pose::{Pose, PosePipeline, PoseStore, SharedPipeline};
pub use protocol::{DecodeError, FrameDecoder, RawSample};
pub use server::{CommandChannel, LinkStats, SensorLink};
pub use session::{LoggingDirector, Phase, SessionEngine, StageDirector, Trigger, Viewpoint};
pub use smoothing::OrientationSmoother;
pub use status::LiveStatus;
