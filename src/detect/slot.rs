//! Backend readiness.
//!
//! Backends load off the loop thread. A `BackendSlot` makes the one-time
//! transition `NotReady -> Ready` or `NotReady -> LoadFailed` visible to the
//! loop, which polls it between ticks and never blocks on it.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use crate::detect::backend::{BackendMode, DetectorBackend};
use crate::error::OverlayError;

type LoadResult = Result<Box<dyn DetectorBackend>, OverlayError>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendReadiness {
    NotReady,
    Ready,
    /// Terminal for this slot. Recover by switching mode or loading again.
    LoadFailed(String),
}

impl BackendReadiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, BackendReadiness::Ready)
    }

    /// User-facing status text.
    pub fn advisory(&self) -> &'static str {
        match self {
            BackendReadiness::NotReady => "Preparing the vision model...",
            BackendReadiness::Ready => "Ready — press start",
            BackendReadiness::LoadFailed(_) => {
                "Failed to load model in-process. You can enable server mode."
            }
        }
    }
}

enum SlotState {
    Loading(Receiver<LoadResult>),
    Ready(Box<dyn DetectorBackend>),
    Failed(String),
}

/// Holds the session's backend through its load lifecycle.
pub struct BackendSlot {
    mode: BackendMode,
    state: SlotState,
}

/// Completes a pending slot.
pub struct BackendPromise {
    tx: Sender<LoadResult>,
}

impl BackendPromise {
    pub fn resolve(self, result: LoadResult) {
        // The slot may have been dropped; nothing waits for the value then.
        let _ = self.tx.send(result);
    }
}

impl BackendSlot {
    /// A slot whose backend is already usable.
    pub fn ready(mode: BackendMode, backend: Box<dyn DetectorBackend>) -> Self {
        Self {
            mode,
            state: SlotState::Ready(backend),
        }
    }

    pub fn failed(mode: BackendMode, reason: impl Into<String>) -> Self {
        Self {
            mode,
            state: SlotState::Failed(reason.into()),
        }
    }

    /// A slot that becomes Ready (or LoadFailed) when the promise resolves.
    pub fn pending(mode: BackendMode) -> (Self, BackendPromise) {
        let (tx, rx) = bounded(1);
        (
            Self {
                mode,
                state: SlotState::Loading(rx),
            },
            BackendPromise { tx },
        )
    }

    /// Run `loader` on a background thread, then warm the backend up.
    pub fn spawn<F>(mode: BackendMode, loader: F) -> Self
    where
        F: FnOnce() -> LoadResult + Send + 'static,
    {
        let (slot, promise) = Self::pending(mode);
        let spawned = std::thread::Builder::new()
            .name("backend-loader".to_string())
            .spawn(move || {
                let result = loader().and_then(|mut backend| {
                    backend.warm_up()?;
                    Ok(backend)
                });
                promise.resolve(result);
            });
        match spawned {
            Ok(_) => slot,
            Err(err) => Self::failed(mode, format!("spawn loader thread: {}", err)),
        }
    }

    pub fn mode(&self) -> BackendMode {
        self.mode
    }

    /// Observe a finished load, if any, and report readiness.
    pub fn poll(&mut self) -> BackendReadiness {
        if let SlotState::Loading(rx) = &self.state {
            let next = match rx.try_recv() {
                Ok(Ok(backend)) => {
                    log::info!("backend {} ({}) ready", backend.name(), self.mode);
                    Some(SlotState::Ready(backend))
                }
                Ok(Err(err)) => {
                    log::error!("backend ({}) failed to load: {}", self.mode, err);
                    Some(SlotState::Failed(err.to_string()))
                }
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => {
                    log::error!("backend ({}) loader exited without a result", self.mode);
                    Some(SlotState::Failed("loader exited without a result".to_string()))
                }
            };
            if let Some(next) = next {
                self.state = next;
            }
        }
        self.readiness()
    }

    /// Readiness as last observed by `poll`.
    pub fn readiness(&self) -> BackendReadiness {
        match &self.state {
            SlotState::Loading(_) => BackendReadiness::NotReady,
            SlotState::Ready(_) => BackendReadiness::Ready,
            SlotState::Failed(reason) => BackendReadiness::LoadFailed(reason.clone()),
        }
    }

    pub fn backend_mut(&mut self) -> Option<&mut (dyn DetectorBackend + 'static)> {
        match &mut self.state {
            SlotState::Ready(backend) => Some(backend.as_mut()),
            _ => None,
        }
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        match &self.state {
            SlotState::Ready(backend) => Some(backend.name()),
            _ => None,
        }
    }
}
