//! rollcall-hw: Hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access and decoding of the common webcam
//! pixel formats into RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CaptureSession, DeviceInfo, FrameSource, PixelFormat};
pub use frame::Frame;
