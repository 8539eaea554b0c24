//! ObjectAI live overlay
//!
//! Draws object-detection results over a camera feed in real time.
//!
//! # Architecture
//!
//! One detection/render loop, driven tick by tick:
//!
//! 1. **Capture**: a single exclusive camera handle per session.
//! 2. **Detect**: a pluggable backend, in-process or remote, loaded off the loop thread.
//! 3. **Filter**: detections below the confidence threshold are dropped.
//! 4. **Render**: boxes and labels on a transparent surface the size of the frame.
//! 5. **Report**: each filtered batch goes to a logging sink, fire-and-forget.
//!
//! # Module Structure
//!
//! - `capture`: camera lifecycle (synthetic `stub://` sources, V4L2 devices)
//! - `detect`: `Detection`, the `DetectorBackend` trait, backends and their readiness
//! - `filter`, `overlay`, `telemetry`: per-tick stages
//! - `scheduler`, `session`: the loop and the user-facing state machine
//! - `config`, `control`, `sink`, `ui`: configuration, commands, HTTP sink, terminal output

pub mod capture;
pub mod config;
pub mod control;
pub mod detect;
pub mod error;
pub mod filter;
pub mod frame;
pub mod overlay;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod telemetry;
pub mod ui;

pub use capture::{CaptureConstraints, CaptureDevice, CaptureManager, CaptureSource};
pub use config::OverlayConfig;
pub use detect::{BackendMode, BackendReadiness, BackendSlot, Detection, DetectorBackend};
pub use error::{DeviceFailure, OverlayError};
pub use filter::filter_by_confidence;
pub use frame::VideoFrame;
pub use overlay::OverlayRenderer;
pub use scheduler::{Clock, FrameScheduler, ManualClock, MonotonicClock};
pub use session::{Session, SessionState, SessionStatus, TickOutcome};
pub use telemetry::{TelemetryEmitter, TelemetryRecord, TelemetrySink};
