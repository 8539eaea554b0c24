use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::detect::result::Detection;
use crate::error::OverlayError;
use crate::frame::VideoFrame;

/// Where detection runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// In-process detector.
    #[default]
    Client,
    /// Remote detection service.
    Server,
}

impl FromStr for BackendMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "client" | "in-process" | "local" => Ok(BackendMode::Client),
            "server" | "remote" => Ok(BackendMode::Server),
            other => Err(anyhow!("unknown backend mode '{}'; expected client or server", other)),
        }
    }
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendMode::Client => f.write_str("client"),
            BackendMode::Server => f.write_str("server"),
        }
    }
}

/// Detector backend trait.
///
/// A backend instance is driven by one loop and never sees two overlapping
/// `detect` calls. Frames are borrowed for the duration of the call only.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame. Coordinates are in the frame's pixel space.
    fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<Detection>, OverlayError>;

    /// Optional warm-up hook, run once by the loader before the backend is Ready.
    fn warm_up(&mut self) -> Result<(), OverlayError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mode_names() {
        assert_eq!("client".parse::<BackendMode>().unwrap(), BackendMode::Client);
        assert_eq!(" Server ".parse::<BackendMode>().unwrap(), BackendMode::Server);
        assert!("gpu".parse::<BackendMode>().is_err());
        assert_eq!(BackendMode::Server.to_string(), "server");
    }
}
