use sha2::{Digest, Sha256};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::error::OverlayError;
use crate::frame::VideoFrame;

const DEFAULT_CELL: u32 = 16;
const DEFAULT_MIN_DIFF: f32 = 12.0;
/// Mean luma difference that maps to a score of 1.0.
const FULL_SCORE_DIFF: f32 = 96.0;

/// In-process detector that needs no model file.
///
/// Splits the frame into square cells, compares mean luma against the
/// previous frame and reports each connected region of changed cells as a
/// `motion` detection. The first frame, and any frame identical to its
/// predecessor, yields no detections.
pub struct MotionBackend {
    cell: u32,
    min_diff: f32,
    last_hash: Option<[u8; 32]>,
    previous: Option<LumaGrid>,
}

struct LumaGrid {
    cols: u32,
    rows: u32,
    frame_width: u32,
    frame_height: u32,
    cells: Vec<f32>,
}

impl Default for MotionBackend {
    fn default() -> Self {
        Self::new(DEFAULT_CELL, DEFAULT_MIN_DIFF)
    }
}

impl MotionBackend {
    pub fn new(cell: u32, min_diff: f32) -> Self {
        Self {
            cell: cell.max(1),
            min_diff,
            last_hash: None,
            previous: None,
        }
    }

    fn grid(&self, frame: &VideoFrame) -> LumaGrid {
        let cols = frame.width.div_ceil(self.cell);
        let rows = frame.height.div_ceil(self.cell);
        let mut sums = vec![0f32; (cols * rows) as usize];
        let mut counts = vec![0u32; (cols * rows) as usize];
        for (i, px) in frame.pixels().chunks_exact(3).enumerate() {
            let x = i as u32 % frame.width;
            let y = i as u32 / frame.width;
            let idx = ((y / self.cell) * cols + x / self.cell) as usize;
            sums[idx] += 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
            counts[idx] += 1;
        }
        let cells = sums
            .iter()
            .zip(&counts)
            .map(|(sum, count)| if *count == 0 { 0.0 } else { sum / *count as f32 })
            .collect();
        LumaGrid {
            cols,
            rows,
            frame_width: frame.width,
            frame_height: frame.height,
            cells,
        }
    }

    fn regions(&self, prev: &LumaGrid, current: &LumaGrid) -> Vec<Detection> {
        let diffs: Vec<f32> = prev
            .cells
            .iter()
            .zip(&current.cells)
            .map(|(a, b)| (a - b).abs())
            .collect();
        let mut visited = vec![false; diffs.len()];
        let mut detections = Vec::new();

        for start in 0..diffs.len() {
            if visited[start] || diffs[start] < self.min_diff {
                continue;
            }
            // Flood fill over 4-connected changed cells.
            let mut stack = vec![start];
            visited[start] = true;
            let (mut min_c, mut min_r) = (u32::MAX, u32::MAX);
            let (mut max_c, mut max_r) = (0u32, 0u32);
            let mut total = 0f32;
            let mut count = 0u32;
            while let Some(idx) = stack.pop() {
                let c = idx as u32 % current.cols;
                let r = idx as u32 / current.cols;
                min_c = min_c.min(c);
                min_r = min_r.min(r);
                max_c = max_c.max(c);
                max_r = max_r.max(r);
                total += diffs[idx];
                count += 1;

                let mut neighbours = Vec::with_capacity(4);
                if c > 0 {
                    neighbours.push(idx - 1);
                }
                if c + 1 < current.cols {
                    neighbours.push(idx + 1);
                }
                if r > 0 {
                    neighbours.push(idx - current.cols as usize);
                }
                if r + 1 < current.rows {
                    neighbours.push(idx + current.cols as usize);
                }
                for n in neighbours {
                    if !visited[n] && diffs[n] >= self.min_diff {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }

            let x = min_c * self.cell;
            let y = min_r * self.cell;
            let w = ((max_c + 1) * self.cell).min(current.frame_width) - x;
            let h = ((max_r + 1) * self.cell).min(current.frame_height) - y;
            let score = (total / count as f32 / FULL_SCORE_DIFF).min(1.0);
            detections.push(Detection::new(
                "motion",
                score,
                [x as f32, y as f32, w as f32, h as f32],
            ));
        }
        detections
    }
}

impl DetectorBackend for MotionBackend {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<Detection>, OverlayError> {
        let current_hash: [u8; 32] = Sha256::digest(frame.pixels()).into();
        if self.last_hash == Some(current_hash) {
            return Ok(Vec::new());
        }
        self.last_hash = Some(current_hash);

        let grid = self.grid(frame);
        let detections = match &self.previous {
            Some(prev)
                if prev.cols == grid.cols
                    && prev.rows == grid.rows
                    && prev.frame_width == grid.frame_width =>
            {
                self.regions(prev, &grid)
            }
            _ => Vec::new(),
        };
        self.previous = Some(grid);
        Ok(detections)
    }
}
