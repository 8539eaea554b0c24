//! Session state and the detection/render loop.
//!
//! A `Session` is owned by one thread, which calls `pump()` whenever it
//! wakes up (ideally at `next_deadline()`). Each due tick reads a frame,
//! runs the backend, filters with the threshold current at that moment,
//! redraws the overlay and hands the batch to telemetry. The next tick is
//! scheduled only after the current one finishes, so ticks never overlap.
//!
//! User actions (`start`, `stop`, `set_threshold`, `set_backend`) are plain
//! `&mut self` calls between pumps; a tick always sees a consistent state.

use anyhow::{anyhow, Result};
use image::RgbaImage;

use crate::capture::{CaptureConstraints, CaptureManager};
use crate::config::{OverlayConfig, SessionSettings};
use crate::detect::{self, BackendMode, BackendReadiness, BackendSlot, Detection};
use crate::error::OverlayError;
use crate::filter::{check_threshold, filter_by_confidence};
use crate::frame::VideoFrame;
use crate::overlay::{compose_png, OverlayRenderer};
use crate::scheduler::{Clock, FrameScheduler, MonotonicClock, TickHandle};
use crate::telemetry::TelemetryEmitter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
}

/// What a fired tick did.
#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    /// Overlay redrawn with this many detections.
    Rendered { detections: usize },
    /// The device had no usable frame yet; nothing drawn.
    FrameNotReady,
    /// The backend failed for this tick; the previous overlay stays.
    BackendUnavailable(String),
    CaptureFailed(String),
    /// Too many failures in a row; no further ticks until restarted.
    Halted(String),
    /// Not running or backend not ready; the loop stopped itself.
    Stopped,
}

/// Snapshot of what the user sees.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub threshold: f32,
    pub fps: u32,
    pub object_count: usize,
    pub mode: BackendMode,
    pub readiness: BackendReadiness,
    pub advisory: Option<String>,
}

impl SessionStatus {
    /// `Status: Live • FPS 30 • Objects 2`; zero objects show as `—`.
    pub fn summary_line(&self) -> String {
        let state = match self.state {
            SessionState::Running => "Live",
            SessionState::Idle => "Idle",
        };
        let objects = if self.object_count == 0 {
            "—".to_string()
        } else {
            self.object_count.to_string()
        };
        format!("Status: {} • FPS {} • Objects {}", state, self.fps, objects)
    }
}

pub struct Session {
    state: SessionState,
    threshold: f32,
    constraints: CaptureConstraints,
    capture: CaptureManager,
    backend: BackendSlot,
    readiness: BackendReadiness,
    scheduler: FrameScheduler,
    clock: Box<dyn Clock>,
    telemetry: TelemetryEmitter,
    renderer: OverlayRenderer,
    visible: Vec<Detection>,
    last_frame: Option<VideoFrame>,
    last_tick_ms: f64,
    fps: u32,
    consecutive_failures: u32,
    max_consecutive_failures: u32,
    halted: bool,
    advisory: Option<String>,
}

impl Session {
    pub fn new(
        capture: CaptureManager,
        backend: BackendSlot,
        telemetry: TelemetryEmitter,
        clock: Box<dyn Clock>,
    ) -> Self {
        let defaults = SessionSettings::default();
        let readiness = backend.readiness();
        Self {
            state: SessionState::Idle,
            threshold: defaults.threshold,
            constraints: CaptureConstraints::default(),
            capture,
            backend,
            readiness,
            scheduler: FrameScheduler::new(defaults.refresh_hz),
            clock,
            telemetry,
            renderer: OverlayRenderer::new(),
            visible: Vec::new(),
            last_frame: None,
            last_tick_ms: 0.0,
            fps: 0,
            consecutive_failures: 0,
            max_consecutive_failures: defaults.max_consecutive_failures,
            halted: false,
            advisory: None,
        }
    }

    /// Build everything from configuration: system cameras, the configured
    /// backend, HTTP telemetry and the monotonic clock.
    pub fn from_config(cfg: &OverlayConfig) -> Result<Self> {
        let telemetry = TelemetryEmitter::from_settings(&cfg.telemetry)?;
        let backend = detect::load_backend(&cfg.detector);
        let session = Self::new(
            CaptureManager::system(),
            backend,
            telemetry,
            Box::new(MonotonicClock::default()),
        )
        .with_constraints(cfg.capture.clone())
        .with_settings(&cfg.session)?;
        Ok(session)
    }

    pub fn with_constraints(mut self, constraints: CaptureConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_settings(mut self, settings: &SessionSettings) -> Result<Self, OverlayError> {
        self.threshold = check_threshold(settings.threshold)?;
        self.scheduler = FrameScheduler::new(settings.refresh_hz);
        self.max_consecutive_failures = settings.max_consecutive_failures.max(1);
        Ok(self)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn mode(&self) -> BackendMode {
        self.backend.mode()
    }

    pub fn readiness(&self) -> &BackendReadiness {
        &self.readiness
    }

    /// Detections currently drawn on the overlay.
    pub fn visible_detections(&self) -> &[Detection] {
        &self.visible
    }

    pub fn overlay(&self) -> &RgbaImage {
        self.renderer.surface()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Acquire the camera and begin ticking once the backend is ready.
    ///
    /// Calling this while running does nothing. On a device failure the
    /// session stays idle and holds no capture resources.
    pub fn start(&mut self) -> Result<(), OverlayError> {
        if self.state == SessionState::Running {
            log::debug!("session: start ignored, already running");
            return Ok(());
        }
        if let Err(err) = self.capture.acquire(&self.constraints) {
            self.capture.release();
            self.advisory = Some(err.to_string());
            return Err(err);
        }
        self.state = SessionState::Running;
        self.halted = false;
        self.consecutive_failures = 0;
        self.advisory = None;
        log::info!(
            "session: running ({} backend, threshold {:.2})",
            self.backend.mode(),
            self.threshold
        );
        self.refresh_readiness();
        self.arm();
        Ok(())
    }

    /// Cancel the pending tick, release the camera and clear what is shown.
    pub fn stop(&mut self) {
        if let Some(handle) = self.scheduler.cancel_all() {
            log::debug!("session: cancelled pending tick {:?}", handle);
        }
        self.capture.release();
        self.visible.clear();
        self.renderer.clear();
        self.last_frame = None;
        self.fps = 0;
        self.consecutive_failures = 0;
        self.halted = false;
        if self.state == SessionState::Running {
            log::info!("session: stopped");
        }
        self.state = SessionState::Idle;
    }

    /// Takes effect at the next filter step; the current overlay is not re-filtered.
    pub fn set_threshold(&mut self, threshold: f32) -> Result<(), OverlayError> {
        self.threshold = check_threshold(threshold)?;
        log::debug!("session: threshold {:.2}", self.threshold);
        Ok(())
    }

    /// Replace the detection backend. State and threshold are unchanged.
    pub fn set_backend(&mut self, slot: BackendSlot) {
        if let Some(handle) = self.scheduler.cancel_all() {
            log::debug!("session: cancelled tick {:?} for backend switch", handle);
        }
        log::info!("session: switching to {} backend", slot.mode());
        self.backend = slot;
        self.readiness = self.backend.readiness();
        self.halted = false;
        self.consecutive_failures = 0;
        self.advisory = None;
        self.refresh_readiness();
        self.arm();
    }

    /// Due time of the pending tick on the session clock, in ms.
    pub fn next_deadline(&self) -> Option<f64> {
        self.scheduler.next_due()
    }

    pub fn now_ms(&self) -> f64 {
        self.clock.now_ms()
    }

    /// Observe backend readiness, arm the loop if it can run, and fire a
    /// due tick.
    pub fn pump(&mut self) -> Option<TickOutcome> {
        self.refresh_readiness();
        self.arm();
        let now = self.clock.now_ms();
        let handle = self.scheduler.poll(now)?;
        Some(self.tick(handle))
    }

    pub fn status(&self) -> SessionStatus {
        let advisory = if let Some(advisory) = &self.advisory {
            Some(advisory.clone())
        } else if !self.readiness.is_ready() || self.state == SessionState::Idle {
            Some(self.readiness.advisory().to_string())
        } else {
            None
        };
        SessionStatus {
            state: self.state,
            threshold: self.threshold,
            fps: self.fps,
            object_count: self.visible.len(),
            mode: self.backend.mode(),
            readiness: self.readiness.clone(),
            advisory,
        }
    }

    /// The latest frame with the overlay drawn over it, as PNG.
    pub fn snapshot_png(&self) -> Result<Vec<u8>> {
        let frame = self
            .last_frame
            .as_ref()
            .ok_or_else(|| anyhow!("no frame captured yet"))?;
        compose_png(frame, self.renderer.surface())
    }

    fn refresh_readiness(&mut self) {
        let readiness = self.backend.poll();
        if readiness != self.readiness {
            log::info!("session: backend {}", readiness.advisory());
            self.readiness = readiness;
        }
    }

    /// Schedule the first tick of a loop if none is pending.
    fn arm(&mut self) {
        if self.state != SessionState::Running
            || !self.readiness.is_ready()
            || self.halted
            || self.scheduler.is_pending()
        {
            return;
        }
        let now = self.clock.now_ms();
        self.last_tick_ms = now;
        let handle = self.scheduler.schedule_next(now);
        log::debug!("session: loop armed, first tick {:?}", handle);
    }

    fn tick(&mut self, handle: TickHandle) -> TickOutcome {
        log::trace!("session: tick {:?}", handle);
        if self.state != SessionState::Running || !self.readiness.is_ready() {
            return TickOutcome::Stopped;
        }

        let outcome = match self.run_detection() {
            Ok(Some(count)) => {
                self.consecutive_failures = 0;
                TickOutcome::Rendered { detections: count }
            }
            Ok(None) => {
                self.consecutive_failures = 0;
                TickOutcome::FrameNotReady
            }
            Err(TickFailure::Capture(reason)) => {
                self.consecutive_failures += 1;
                TickOutcome::CaptureFailed(reason)
            }
            Err(TickFailure::Backend(reason)) => {
                self.consecutive_failures += 1;
                TickOutcome::BackendUnavailable(reason)
            }
            Err(TickFailure::Released) => return TickOutcome::Stopped,
        };

        let now = self.clock.now_ms();
        let elapsed = now - self.last_tick_ms;
        if elapsed > 0.0 {
            self.fps = (1000.0 / elapsed).round() as u32;
        }
        self.last_tick_ms = now;

        if self.consecutive_failures >= self.max_consecutive_failures {
            let reason = match &outcome {
                TickOutcome::BackendUnavailable(reason) | TickOutcome::CaptureFailed(reason) => {
                    reason.clone()
                }
                _ => "repeated failures".to_string(),
            };
            let message = format!(
                "Detection paused after {} failed frames ({}). Stop and start again, or switch backend mode.",
                self.consecutive_failures, reason
            );
            log::warn!("session: {}", message);
            self.halted = true;
            self.advisory = Some(message.clone());
            return TickOutcome::Halted(message);
        }

        self.scheduler.schedule_next(now);
        outcome
    }

    /// Frame read, detect, filter, render and emit. `Ok(None)` when the
    /// device has no frame yet.
    fn run_detection(&mut self) -> std::result::Result<Option<usize>, TickFailure> {
        let handle = self.capture.handle_mut().ok_or(TickFailure::Released)?;
        let frame = match handle.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(err) => {
                log::warn!("session: frame read failed: {:#}", err);
                return Err(TickFailure::Capture(format!("{:#}", err)));
            }
        };

        let backend = self.backend.backend_mut().ok_or(TickFailure::Released)?;
        let raw = match backend.detect(&frame) {
            Ok(raw) => raw,
            Err(err) => {
                log::debug!("session: {}", err);
                return Err(TickFailure::Backend(err.to_string()));
            }
        };

        // Threshold as of now, after detection finished.
        let filtered = filter_by_confidence(&raw, self.threshold);
        self.renderer.render(frame.width, frame.height, &filtered);
        self.telemetry.emit(&filtered);
        log::trace!(
            "session: frame {} kept {}/{} detections",
            frame.sequence,
            filtered.len(),
            raw.len()
        );
        let count = filtered.len();
        self.visible = filtered;
        self.last_frame = Some(frame);
        Ok(Some(count))
    }
}

enum TickFailure {
    Capture(String),
    Backend(String),
    /// Capture handle or backend went away underneath the tick.
    Released,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ScriptedBackend;
    use crate::scheduler::ManualClock;

    fn session_with(batch: Vec<Detection>) -> (Session, ManualClock) {
        let clock = ManualClock::new(0.0);
        let session = Session::new(
            CaptureManager::system(),
            BackendSlot::ready(BackendMode::Client, Box::new(ScriptedBackend::repeating(batch))),
            TelemetryEmitter::disabled(),
            Box::new(clock.clone()),
        )
        .with_constraints(CaptureConstraints {
            width: 64,
            height: 48,
            ..CaptureConstraints::default()
        });
        (session, clock)
    }

    fn run_one_tick(session: &mut Session, clock: &ManualClock) -> TickOutcome {
        session.pump();
        let due = session.next_deadline().unwrap();
        clock.set(due);
        session.pump().unwrap()
    }

    #[test]
    fn summary_line_matches_the_status_bar() {
        let mut status = SessionStatus {
            state: SessionState::Running,
            threshold: 0.45,
            fps: 30,
            object_count: 2,
            mode: BackendMode::Client,
            readiness: BackendReadiness::Ready,
            advisory: None,
        };
        assert_eq!(status.summary_line(), "Status: Live • FPS 30 • Objects 2");
        status.state = SessionState::Idle;
        status.object_count = 0;
        status.fps = 0;
        assert_eq!(status.summary_line(), "Status: Idle • FPS 0 • Objects —");
    }

    #[test]
    fn tick_renders_and_measures_fps() {
        let (mut session, clock) = session_with(vec![Detection::new(
            "person",
            0.9,
            [0.0, 20.0, 30.0, 20.0],
        )]);
        session.start().unwrap();
        let outcome = run_one_tick(&mut session, &clock);
        assert_eq!(outcome, TickOutcome::Rendered { detections: 1 });
        assert_eq!(session.overlay().dimensions(), (64, 48));
        // First boundary at 1000/60 ms after arming at t=0.
        assert_eq!(session.fps(), 60);
        assert!(session.next_deadline().is_some());
    }

    #[test]
    fn snapshot_needs_a_frame() {
        let (mut session, clock) = session_with(vec![]);
        assert!(session.snapshot_png().is_err());
        session.start().unwrap();
        run_one_tick(&mut session, &clock);
        let png = session.snapshot_png().unwrap();
        assert_eq!(&png[1..4], b"PNG");
        session.stop();
        assert!(session.snapshot_png().is_err());
    }

    #[test]
    fn idle_status_advises_how_to_begin() {
        let (session, _clock) = session_with(vec![]);
        let status = session.status();
        assert_eq!(status.state, SessionState::Idle);
        assert_eq!(status.advisory.as_deref(), Some("Ready — press start"));
    }

    #[test]
    fn invalid_threshold_keeps_the_old_value() {
        let (mut session, _clock) = session_with(vec![]);
        assert!(session.set_threshold(2.0).is_err());
        assert_eq!(session.threshold(), 0.45);
        session.set_threshold(0.0).unwrap();
        assert_eq!(session.threshold(), 0.0);
    }
}
