use std::io::Cursor;

use anyhow::{Context, Result};
use image::{imageops, DynamicImage, ImageFormat, RgbaImage};

use crate::frame::VideoFrame;

/// Composite `overlay` over `frame` (source-over) and encode the result as PNG.
pub fn compose_png(frame: &VideoFrame, overlay: &RgbaImage) -> Result<Vec<u8>> {
    let mut base = DynamicImage::ImageRgb8(frame.to_rgb_image()?).to_rgba8();
    if overlay.dimensions() != base.dimensions() {
        log::debug!(
            "snapshot: overlay {:?} does not match frame {:?}",
            overlay.dimensions(),
            base.dimensions()
        );
    }
    imageops::overlay(&mut base, overlay, 0, 0);

    let flattened = DynamicImage::ImageRgba8(base).to_rgb8();
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(flattened)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("encode snapshot png")?;
    Ok(bytes)
}
