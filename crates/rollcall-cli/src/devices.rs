//! Camera and detector acquisition for modal capture loops.

use crate::config::Config;
use rollcall_core::{CascadeError, DetectionParams, FaceDetector, HaarCascade};
use rollcall_hw::{Camera, CameraError, FrameSource};
use std::path::PathBuf;

/// Opens the hardware a capture loop needs, for the duration of that loop only.
pub trait Devices {
    fn detector(&self) -> Result<Box<dyn FaceDetector>, CascadeError>;

    /// Open the camera, run `body` against its frame stream, then release the
    /// device. `body` runs at most once; an open failure is returned instead.
    fn capture(&self, body: &mut dyn FnMut(&mut dyn FrameSource)) -> Result<(), CameraError>;
}

/// V4L2 camera plus the on-disk Haar cascade.
pub struct V4lDevices {
    camera_device: String,
    width: u32,
    height: u32,
    warmup_frames: usize,
    cascade_path: PathBuf,
    params: DetectionParams,
}

impl V4lDevices {
    pub fn from_config(config: &Config) -> Self {
        Self {
            camera_device: config.camera_device.clone(),
            width: config.camera_width,
            height: config.camera_height,
            warmup_frames: config.warmup_frames,
            cascade_path: config.cascade_path(),
            params: config.detection_params(),
        }
    }
}

impl Devices for V4lDevices {
    fn detector(&self) -> Result<Box<dyn FaceDetector>, CascadeError> {
        let cascade = HaarCascade::load(&self.cascade_path, self.params)?;
        Ok(Box::new(cascade))
    }

    fn capture(&self, body: &mut dyn FnMut(&mut dyn FrameSource)) -> Result<(), CameraError> {
        let camera = Camera::open(&self.camera_device, self.width, self.height)?;
        let mut session = camera.start_session(self.warmup_frames)?;
        body(&mut session);
        Ok(())
    }
}
