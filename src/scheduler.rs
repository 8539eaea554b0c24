//! Render-frame scheduling.
//!
//! The loop is cooperative: one thread owns the session and asks the
//! scheduler when the next tick is due. A tick is requested with
//! `schedule_next`, fires at most once through `poll`, and can be cancelled
//! until it fires. At most one tick is pending at any time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Millisecond time source.
pub trait Clock: Send {
    fn now_ms(&self) -> f64;
}

/// Wall time since construction.
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Hand-driven clock. Clones share the same time.
#[derive(Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        let clock = Self::default();
        clock.set(start_ms);
        clock
    }

    pub fn set(&self, now_ms: f64) {
        self.bits.store(now_ms.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: f64) {
        self.set(self.now_ms() + delta_ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Cancellation token for a scheduled tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickHandle(u64);

#[derive(Debug)]
pub struct FrameScheduler {
    interval_ms: f64,
    pending: Option<(TickHandle, f64)>,
    next_id: u64,
}

impl FrameScheduler {
    /// `refresh_hz` is the number of rendering opportunities per second.
    pub fn new(refresh_hz: f64) -> Self {
        let refresh_hz = if refresh_hz.is_finite() && refresh_hz > 0.0 {
            refresh_hz
        } else {
            60.0
        };
        Self {
            interval_ms: 1000.0 / refresh_hz,
            pending: None,
            next_id: 1,
        }
    }

    pub fn interval_ms(&self) -> f64 {
        self.interval_ms
    }

    /// Request a tick at the first frame boundary after `now_ms`.
    ///
    /// Returns the already-pending handle if a tick is outstanding.
    pub fn schedule_next(&mut self, now_ms: f64) -> TickHandle {
        if let Some((handle, _)) = self.pending {
            return handle;
        }
        // Tolerate float error when `now_ms` sits exactly on a boundary.
        let slot = (now_ms / self.interval_ms + 1e-9).floor();
        let due = (slot + 1.0) * self.interval_ms;
        let handle = TickHandle(self.next_id);
        self.next_id += 1;
        self.pending = Some((handle, due));
        log::trace!("scheduler: tick {:?} due at {:.3}ms", handle, due);
        handle
    }

    /// Cancel `handle` if it is still pending. Returns whether it was.
    pub fn cancel(&mut self, handle: TickHandle) -> bool {
        match self.pending {
            Some((pending, _)) if pending == handle => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Cancel whatever is pending.
    pub fn cancel_all(&mut self) -> Option<TickHandle> {
        self.pending.take().map(|(handle, _)| handle)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<TickHandle> {
        self.pending.map(|(handle, _)| handle)
    }

    /// Due time of the pending tick.
    pub fn next_due(&self) -> Option<f64> {
        self.pending.map(|(_, due)| due)
    }

    /// Take the pending tick if it is due at `now_ms`.
    pub fn poll(&mut self, now_ms: f64) -> Option<TickHandle> {
        match self.pending {
            Some((handle, due)) if now_ms >= due => {
                self.pending = None;
                Some(handle)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_align_to_frame_boundaries() {
        let mut scheduler = FrameScheduler::new(50.0);
        assert_eq!(scheduler.interval_ms(), 20.0);
        scheduler.schedule_next(5.0);
        assert_eq!(scheduler.next_due(), Some(20.0));
        assert!(scheduler.poll(19.9).is_none());
        assert!(scheduler.poll(20.0).is_some());
        assert!(!scheduler.is_pending());

        // Exactly on a boundary: the next one.
        scheduler.schedule_next(40.0);
        assert_eq!(scheduler.next_due(), Some(60.0));
    }

    #[test]
    fn only_one_tick_is_ever_pending() {
        let mut scheduler = FrameScheduler::new(60.0);
        let first = scheduler.schedule_next(0.0);
        let second = scheduler.schedule_next(3.0);
        assert_eq!(first, second);
        assert!(scheduler.poll(1000.0).is_some());
        assert!(scheduler.poll(1000.0).is_none());
    }

    #[test]
    fn cancelled_tick_never_fires() {
        let mut scheduler = FrameScheduler::new(60.0);
        let handle = scheduler.schedule_next(0.0);
        assert!(scheduler.cancel(handle));
        assert!(!scheduler.cancel(handle));
        assert!(scheduler.poll(10_000.0).is_none());
    }

    #[test]
    fn stale_handle_does_not_cancel_a_newer_tick() {
        let mut scheduler = FrameScheduler::new(60.0);
        let old = scheduler.schedule_next(0.0);
        scheduler.poll(100.0);
        let fresh = scheduler.schedule_next(100.0);
        assert_ne!(old, fresh);
        assert!(!scheduler.cancel(old));
        assert_eq!(scheduler.pending(), Some(fresh));
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(10.0);
        let view = clock.clone();
        clock.advance(6.5);
        assert_eq!(view.now_ms(), 16.5);
    }

    #[test]
    fn invalid_rate_falls_back_to_sixty_hz() {
        let scheduler = FrameScheduler::new(0.0);
        assert!((scheduler.interval_ms() - 1000.0 / 60.0).abs() < 1e-9);
    }
}
