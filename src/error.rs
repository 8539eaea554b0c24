use thiserror::Error;

/// Why a camera could not be acquired.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceFailure {
    /// Permission to use the camera was refused.
    NotAllowed,
    /// No camera matched the request.
    NotFound,
    /// The camera exists but another process holds it.
    Busy,
    Other,
}

impl DeviceFailure {
    /// Classify an I/O error raised while opening a device node.
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => DeviceFailure::NotAllowed,
            std::io::ErrorKind::NotFound => DeviceFailure::NotFound,
            _ if err.raw_os_error() == Some(16) => DeviceFailure::Busy,
            _ => DeviceFailure::Other,
        }
    }
}

impl std::fmt::Display for DeviceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeviceFailure::NotAllowed => "NotAllowedError",
            DeviceFailure::NotFound => "NotFoundError",
            DeviceFailure::Busy => "NotReadableError",
            DeviceFailure::Other => "AbortError",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the detection/render loop.
///
/// Device and backend-load failures end the current attempt and need a user
/// action to retry. Backend-unavailable and telemetry failures are per tick.
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("cannot access camera: {kind}: {detail}")]
    DeviceUnavailable { kind: DeviceFailure, detail: String },
    #[error("detection backend failed to load: {0}")]
    BackendLoadFailed(String),
    #[error("detection backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("telemetry delivery failed: {0}")]
    TelemetryFailure(String),
    #[error("confidence threshold {0} is outside 0..=1")]
    InvalidThreshold(f32),
}

impl OverlayError {
    pub fn device(kind: DeviceFailure, detail: impl Into<String>) -> Self {
        OverlayError::DeviceUnavailable {
            kind,
            detail: detail.into(),
        }
    }

    /// True for errors that heal on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OverlayError::BackendUnavailable(_) | OverlayError::TelemetryFailure(_)
        )
    }
}
