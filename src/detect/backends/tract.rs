#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{resize, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::error::OverlayError;
use crate::frame::VideoFrame;

/// Values per output row: `x, y, w, h, score, class_index`.
const ROW_LEN: usize = 6;

/// Tract-based backend for ONNX detection models.
///
/// The model takes a `1x3xHxW` float tensor in `0..1` and yields rows of
/// `[x, y, w, h, score, class]` in model-input pixels. Boxes are scaled back
/// to the frame's native resolution.
pub struct TractBackend {
    model: TypedSimplePlan<TypedModel>,
    width: u32,
    height: u32,
    labels: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            labels: Vec::new(),
        })
    }

    /// Class names, one per line, indexed by the model's class output.
    pub fn with_labels_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read labels from {}", path.display()))?;
        self.labels = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Ok(self)
    }

    fn build_input(&self, frame: &VideoFrame) -> Result<Tensor> {
        let image = frame.to_rgb_image()?;
        let scaled = resize(&image, self.width, self.height, FilterType::Triangle);
        let width = self.width as usize;
        let pixels = scaled.as_raw();
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );
        Ok(input.into_tensor())
    }

    fn class_name(&self, index: f32) -> String {
        let idx = index.max(0.0).round() as usize;
        self.labels
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("class {}", idx))
    }

    fn extract_detections(&self, outputs: TVec<TValue>, frame: &VideoFrame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let flat: Vec<f32> = values.iter().copied().collect();
        if flat.len() % ROW_LEN != 0 {
            return Err(anyhow!(
                "model output has {} values, not a multiple of {}",
                flat.len(),
                ROW_LEN
            ));
        }

        let sx = frame.width as f32 / self.width as f32;
        let sy = frame.height as f32 / self.height as f32;
        Ok(flat
            .chunks_exact(ROW_LEN)
            .filter(|row| row[4].is_finite() && row[4] > 0.0)
            .map(|row| {
                Detection::new(
                    self.class_name(row[5]),
                    row[4].min(1.0),
                    [row[0] * sx, row[1] * sy, row[2] * sx, row[3] * sy],
                )
            })
            .collect())
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<Detection>, OverlayError> {
        let run = || -> Result<Vec<Detection>> {
            let input = self.build_input(frame)?;
            let outputs = self
                .model
                .run(tvec!(input.into()))
                .context("ONNX inference failed")?;
            self.extract_detections(outputs, frame)
        };
        run().map_err(|err| OverlayError::BackendUnavailable(format!("{:#}", err)))
    }

    fn warm_up(&mut self) -> Result<(), OverlayError> {
        let blank = VideoFrame::solid(self.width, self.height, [0, 0, 0])
            .map_err(|err| OverlayError::BackendLoadFailed(err.to_string()))?;
        self.detect(&blank)
            .map(|_| ())
            .map_err(|err| OverlayError::BackendLoadFailed(err.to_string()))
    }
}
