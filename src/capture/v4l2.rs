//! V4L2 camera (`/dev/videoN`).
//!
//! Opens the device, negotiates the closest mode to the requested resolution
//! and streams frames through memory-mapped buffers. Frames are normalised to
//! RGB24 before they leave this module.

use anyhow::Context;
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CaptureConstraints, CaptureSource};
use crate::error::{DeviceFailure, OverlayError};
use crate::frame::VideoFrame;

const STREAM_BUFFERS: u32 = 4;

#[self_referencing]
struct V4l2Stream {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct V4l2Camera {
    constraints: CaptureConstraints,
    state: Option<V4l2Stream>,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
    frame_count: u64,
}

impl V4l2Camera {
    /// Open and start streaming. Any failure drops the device before returning.
    pub fn open(constraints: CaptureConstraints) -> Result<Self, OverlayError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&constraints.device).map_err(|err| {
            OverlayError::device(
                DeviceFailure::from_io(&err),
                format!("open {}: {}", constraints.device, err),
            )
        })?;
        let mut format = device.format().map_err(|err| {
            OverlayError::device(DeviceFailure::Other, format!("read format: {}", err))
        })?;
        format.width = constraints.width;
        format.height = constraints.height;
        format.fourcc = v4l::FourCC::new(b"YUYV");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {}",
                    constraints.device,
                    err
                );
                device.format().map_err(|err| {
                    OverlayError::device(DeviceFailure::Other, format!("read format: {}", err))
                })?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            OverlayError::device(
                DeviceFailure::Other,
                format!("unsupported pixel format {}", format.fourcc),
            )
        })?;

        if constraints.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(constraints.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Camera: failed to set fps on {}: {}",
                    constraints.device,
                    err
                );
            }
        }

        let state = V4l2StreamTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
            },
        }
        .try_build()
        .map_err(|err| {
            OverlayError::device(DeviceFailure::from_io(&err), format!("start stream: {}", err))
        })?;

        log::info!(
            "V4l2Camera: streaming {} ({}x{} {})",
            constraints.device,
            format.width,
            format.height,
            format.fourcc
        );
        Ok(Self {
            constraints,
            state: Some(state),
            format: pixel_format,
            active_width: format.width,
            active_height: format.height,
            frame_count: 0,
        })
    }
}

impl CaptureSource for V4l2Camera {
    fn describe(&self) -> String {
        format!(
            "{} ({}x{})",
            self.constraints.device, self.active_width, self.active_height
        )
    }

    fn read_frame(&mut self) -> anyhow::Result<Option<VideoFrame>> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        let (width, height, format) = (self.active_width, self.active_height, self.format);
        let pixels = state
            .with_mut(|fields| -> std::io::Result<Option<Vec<u8>>> {
                let (buf, meta) = fields.stream.next()?;
                // Drivers hand out empty buffers until the sensor settles.
                if meta.bytesused == 0 {
                    return Ok(None);
                }
                Ok(Some(buf[..meta.bytesused as usize].to_vec()))
            })
            .context("capture v4l2 frame")?;
        let Some(raw) = pixels else {
            return Ok(None);
        };

        let rgb = normalize_to_rgb(&raw, width, height, format)?;
        self.frame_count += 1;
        Ok(Some(VideoFrame::new(rgb, width, height, self.frame_count)?))
    }

    fn stop(&mut self) {
        // Dropping the stream unmaps the buffers and issues STREAMOFF.
        if self.state.take().is_some() {
            log::info!(
                "V4l2Camera: stopped {} after {} frames",
                self.constraints.device,
                self.frame_count
            );
        }
    }
}
