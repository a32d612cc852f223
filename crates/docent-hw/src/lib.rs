//! docent-hw — Camera capture for the guide.
//!
//! V4L2 capture, pixel conversion to RGB, JPEG snapshots, and the
//! [`CapturePipeline`] that owns the camera lease for a session.

pub mod camera;
pub mod frame;
pub mod pipeline;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat, V4lSource};
pub use frame::Frame;
pub use pipeline::{CameraSource, CameraStream, CaptureError, CapturePipeline, Resolution, Settle};
