//! Synthetic camera (`stub://`) for tests and demos.
//!
//! Renders a vertical gradient background with one bright square that
//! bounces across the frame, so motion-based detectors have something to find.

use anyhow::Result;

use super::{CaptureConstraints, CaptureSource};
use crate::frame::VideoFrame;

/// Edge length of the moving square, as a fraction of the frame height.
const OBJECT_SCALE: u32 = 5;
/// Pixels the square travels per frame.
const OBJECT_STEP: u32 = 8;

pub struct SyntheticCamera {
    constraints: CaptureConstraints,
    reads: u64,
    frame_count: u64,
    stopped: bool,
}

impl SyntheticCamera {
    pub fn new(constraints: CaptureConstraints) -> Self {
        Self {
            constraints,
            reads: 0,
            frame_count: 0,
            stopped: false,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    /// Top-left corner of the square for a given frame.
    pub fn object_origin(&self, frame: u64) -> (u32, u32) {
        let side = self.object_side();
        let span_x = self.constraints.width.saturating_sub(side).max(1) as u64;
        let span_y = self.constraints.height.saturating_sub(side).max(1) as u64;
        let travel = frame * OBJECT_STEP as u64;
        (bounce(travel, span_x) as u32, bounce(travel / 2, span_y) as u32)
    }

    fn object_side(&self) -> u32 {
        (self.constraints.height / OBJECT_SCALE).max(1)
    }

    fn render(&self) -> Vec<u8> {
        let width = self.constraints.width;
        let height = self.constraints.height;
        let side = self.object_side();
        let (ox, oy) = self.object_origin(self.frame_count);

        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            let shade = (40 + (y * 80) / height.max(1)) as u8;
            for x in 0..width {
                let inside = x >= ox && x < ox + side && y >= oy && y < oy + side;
                if inside {
                    pixels.extend_from_slice(&[240, 200, 60]);
                } else {
                    pixels.extend_from_slice(&[shade / 2, shade / 2, shade]);
                }
            }
        }
        pixels
    }
}

impl CaptureSource for SyntheticCamera {
    fn describe(&self) -> String {
        format!("{} (synthetic)", self.constraints.device)
    }

    fn read_frame(&mut self) -> Result<Option<VideoFrame>> {
        self.reads += 1;
        if self.stopped || self.reads <= self.constraints.warmup_frames as u64 {
            return Ok(None);
        }
        self.frame_count += 1;
        let frame = VideoFrame::new(
            self.render(),
            self.constraints.width,
            self.constraints.height,
            self.frame_count,
        )?;
        Ok(Some(frame))
    }

    fn stop(&mut self) {
        self.stopped = true;
        log::debug!(
            "SyntheticCamera: {} stopped after {} frames",
            self.constraints.device,
            self.frame_count
        );
    }
}

/// Triangle wave over `0..=span`.
fn bounce(travel: u64, span: u64) -> u64 {
    let period = span * 2;
    let phase = travel % period;
    if phase <= span {
        phase
    } else {
        period - phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraints(warmup: u32) -> CaptureConstraints {
        CaptureConstraints {
            device: "stub://test".to_string(),
            width: 64,
            height: 40,
            target_fps: 30,
            warmup_frames: warmup,
        }
    }

    #[test]
    fn warmup_reads_report_not_ready() -> Result<()> {
        let mut camera = SyntheticCamera::new(constraints(2));
        assert!(camera.read_frame()?.is_none());
        assert!(camera.read_frame()?.is_none());
        let frame = camera.read_frame()?.expect("frame after warmup");
        assert_eq!((frame.width, frame.height), (64, 40));
        assert_eq!(frame.sequence, 1);
        Ok(())
    }

    #[test]
    fn consecutive_frames_move_the_object() -> Result<()> {
        let mut camera = SyntheticCamera::new(constraints(0));
        let first = camera.read_frame()?.unwrap();
        let second = camera.read_frame()?.unwrap();
        assert_ne!(first.pixels(), second.pixels());
        assert_ne!(camera.object_origin(1), camera.object_origin(2));
        Ok(())
    }

    #[test]
    fn stopped_camera_produces_nothing() -> Result<()> {
        let mut camera = SyntheticCamera::new(constraints(0));
        camera.stop();
        assert!(camera.read_frame()?.is_none());
        assert_eq!(camera.frames_captured(), 0);
        Ok(())
    }

    #[test]
    fn bounce_reflects_at_the_edges() {
        assert_eq!(bounce(0, 10), 0);
        assert_eq!(bounce(10, 10), 10);
        assert_eq!(bounce(12, 10), 8);
        assert_eq!(bounce(20, 10), 0);
    }
}
