//! Overlay surface drawn over the video feed.
//!
//! The renderer produces a transparent RGBA image aligned to the frame's
//! native pixel grid; `compose_png` flattens a frame and its overlay into a
//! snapshot.

mod glyphs;
mod renderer;
mod snapshot;

pub use renderer::{
    label_width, OverlayRenderer, CORNER_RADIUS, PILL_HEIGHT, PILL_PADDING, STROKE_WIDTH,
};
pub use snapshot::compose_png;
