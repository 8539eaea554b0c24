//! Capture device management.
//!
//! This module owns the camera lifecycle:
//! - `stub://<name>` synthetic cameras (testing, demos)
//! - V4L2 device nodes such as `/dev/video0` (feature: capture-v4l2)
//!
//! A `CaptureManager` hands out at most one `CaptureHandle` at a time. The
//! handle is the only way to read frames and it stops the underlying tracks
//! exactly once, either on `release()` or when dropped.
//!
//! Opening a device may block on a permission prompt or on slow hardware. No
//! timeout is imposed here; callers get the raw success or failure.

#[cfg(feature = "capture-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "capture-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};

use crate::error::{DeviceFailure, OverlayError};
use crate::frame::VideoFrame;

pub use synthetic::SyntheticCamera;
#[cfg(feature = "capture-v4l2")]
pub use v4l2::V4l2Camera;

/// Requested device and resolution hints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureConstraints {
    /// Device URI (`stub://name` or a device path).
    pub device: String,
    /// Ideal frame width. Devices may pick the closest supported mode.
    pub width: u32,
    /// Ideal frame height.
    pub height: u32,
    pub target_fps: u32,
    /// Reads that report "not ready" before the first frame (synthetic only).
    pub warmup_frames: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            device: "stub://camera".to_string(),
            width: 1280,
            height: 720,
            target_fps: 30,
            warmup_frames: 0,
        }
    }
}

/// A live video source bound to an opened device.
pub trait CaptureSource: Send {
    fn describe(&self) -> String;

    /// Read the current frame.
    ///
    /// Returns `Ok(None)` while the device has not produced a usable frame.
    fn read_frame(&mut self) -> Result<Option<VideoFrame>>;

    /// Stop every underlying track. Called once per source.
    fn stop(&mut self);
}

/// Something that can open cameras.
pub trait CaptureDevice: Send {
    /// Open a camera. On failure nothing opened so far may stay alive.
    fn open(
        &mut self,
        constraints: &CaptureConstraints,
    ) -> std::result::Result<Box<dyn CaptureSource>, OverlayError>;
}

/// Opens cameras by URI scheme.
#[derive(Default)]
pub struct SystemCameras;

impl CaptureDevice for SystemCameras {
    fn open(
        &mut self,
        constraints: &CaptureConstraints,
    ) -> std::result::Result<Box<dyn CaptureSource>, OverlayError> {
        if constraints.device.starts_with("stub://") {
            return Ok(Box::new(SyntheticCamera::new(constraints.clone())));
        }
        #[cfg(feature = "capture-v4l2")]
        {
            let camera = V4l2Camera::open(constraints.clone())?;
            Ok(Box::new(camera))
        }
        #[cfg(not(feature = "capture-v4l2"))]
        {
            Err(OverlayError::device(
                DeviceFailure::NotFound,
                format!(
                    "{} requires the capture-v4l2 feature",
                    constraints.device
                ),
            ))
        }
    }
}

/// Exclusive ownership token for an active media stream.
pub struct CaptureHandle {
    id: u64,
    source: Option<Box<dyn CaptureSource>>,
}

impl CaptureHandle {
    fn new(id: u64, source: Box<dyn CaptureSource>) -> Self {
        Self {
            id,
            source: Some(source),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_live(&self) -> bool {
        self.source.is_some()
    }

    pub fn read_frame(&mut self) -> Result<Option<VideoFrame>> {
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| anyhow!("capture handle {} already released", self.id))?;
        source.read_frame()
    }

    /// Stop all tracks. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(mut source) = self.source.take() {
            log::info!("capture: releasing {} (handle {})", source.describe(), self.id);
            source.stop();
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Owns the single active `CaptureHandle` of a session.
pub struct CaptureManager {
    device: Box<dyn CaptureDevice>,
    active: Option<CaptureHandle>,
    next_id: u64,
}

impl CaptureManager {
    pub fn new(device: Box<dyn CaptureDevice>) -> Self {
        Self {
            device,
            active: None,
            next_id: 1,
        }
    }

    pub fn system() -> Self {
        Self::new(Box::new(SystemCameras))
    }

    /// Acquire the camera, returning the handle id.
    ///
    /// While a handle is live this returns its id instead of opening a second one.
    pub fn acquire(
        &mut self,
        constraints: &CaptureConstraints,
    ) -> std::result::Result<u64, OverlayError> {
        if let Some(handle) = &self.active {
            log::debug!("capture: handle {} already active", handle.id());
            return Ok(handle.id());
        }
        let source = self.device.open(constraints).map_err(|err| {
            log::warn!("capture: {} unavailable: {}", constraints.device, err);
            err
        })?;
        let id = self.next_id;
        self.next_id += 1;
        log::info!(
            "capture: acquired {} (handle {}, {}x{} requested)",
            source.describe(),
            id,
            constraints.width,
            constraints.height
        );
        self.active = Some(CaptureHandle::new(id, source));
        Ok(id)
    }

    /// Release the active handle, if any. Idempotent.
    pub fn release(&mut self) {
        if let Some(mut handle) = self.active.take() {
            handle.release();
        }
    }

    pub fn handle_mut(&mut self) -> Option<&mut CaptureHandle> {
        self.active.as_mut()
    }

    pub fn is_acquired(&self) -> bool {
        self.active.is_some()
    }
}
