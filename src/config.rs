use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use url::Url;

use crate::capture::CaptureConstraints;
use crate::detect::BackendMode;
use crate::sink::SinkConfig;

const DEFAULT_CAMERA: &str = "stub://camera";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_MODEL_SIZE: u32 = 640;
const DEFAULT_REMOTE_URL: &str = "http://127.0.0.1:5000/api/detect";
const DEFAULT_THRESHOLD: f32 = 0.45;
const DEFAULT_REFRESH_HZ: f64 = 60.0;
const DEFAULT_MAX_FAILURES: u32 = 30;
const DEFAULT_TELEMETRY_URL: &str = "http://127.0.0.1:5000/api/log";

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    capture: Option<CaptureConfigFile>,
    detector: Option<DetectorConfigFile>,
    session: Option<SessionConfigFile>,
    telemetry: Option<TelemetryConfigFile>,
    sink: Option<SinkConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    warmup_frames: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    mode: Option<BackendMode>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    script_path: Option<PathBuf>,
    model_width: Option<u32>,
    model_height: Option<u32>,
    remote_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SessionConfigFile {
    threshold: Option<f32>,
    refresh_hz: Option<f64>,
    max_consecutive_failures: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TelemetryConfigFile {
    enabled: Option<bool>,
    endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SinkConfigFile {
    addr: Option<String>,
    log_path: Option<PathBuf>,
    static_dir: Option<PathBuf>,
}

/// How the detection backend is chosen and loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub mode: BackendMode,
    /// ONNX model for in-process detection (feature backend-tract).
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    /// JSON detection script replayed in-process instead of a model.
    pub script_path: Option<PathBuf>,
    pub model_width: u32,
    pub model_height: u32,
    pub remote_url: String,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            mode: BackendMode::Client,
            model_path: None,
            labels_path: None,
            script_path: None,
            model_width: DEFAULT_MODEL_SIZE,
            model_height: DEFAULT_MODEL_SIZE,
            remote_url: DEFAULT_REMOTE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub threshold: f32,
    /// Rendering opportunities per second.
    pub refresh_hz: f64,
    /// Failed ticks in a row before the loop halts.
    pub max_consecutive_failures: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            refresh_hz: DEFAULT_REFRESH_HZ,
            max_consecutive_failures: DEFAULT_MAX_FAILURES,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySettings {
    pub enabled: bool,
    pub endpoint: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: DEFAULT_TELEMETRY_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OverlayConfig {
    pub capture: CaptureConstraints,
    pub detector: DetectorSettings,
    pub session: SessionSettings,
    pub telemetry: TelemetrySettings,
    pub sink: SinkConfig,
}

impl OverlayConfig {
    /// Defaults, then the file named by `OBJECTAI_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("OBJECTAI_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: OverlayConfigFile) -> Self {
        let capture = file.capture.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let session = file.session.unwrap_or_default();
        let telemetry = file.telemetry.unwrap_or_default();
        let sink = file.sink.unwrap_or_default();
        let sink_defaults = SinkConfig::default();

        Self {
            capture: CaptureConstraints {
                device: capture
                    .device
                    .unwrap_or_else(|| DEFAULT_CAMERA.to_string()),
                width: capture.width.unwrap_or(DEFAULT_WIDTH),
                height: capture.height.unwrap_or(DEFAULT_HEIGHT),
                target_fps: capture.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
                warmup_frames: capture.warmup_frames.unwrap_or(0),
            },
            detector: DetectorSettings {
                mode: detector.mode.unwrap_or_default(),
                model_path: detector.model_path,
                labels_path: detector.labels_path,
                script_path: detector.script_path,
                model_width: detector.model_width.unwrap_or(DEFAULT_MODEL_SIZE),
                model_height: detector.model_height.unwrap_or(DEFAULT_MODEL_SIZE),
                remote_url: detector
                    .remote_url
                    .unwrap_or_else(|| DEFAULT_REMOTE_URL.to_string()),
            },
            session: SessionSettings {
                threshold: session.threshold.unwrap_or(DEFAULT_THRESHOLD),
                refresh_hz: session.refresh_hz.unwrap_or(DEFAULT_REFRESH_HZ),
                max_consecutive_failures: session
                    .max_consecutive_failures
                    .unwrap_or(DEFAULT_MAX_FAILURES),
            },
            telemetry: TelemetrySettings {
                enabled: telemetry.enabled.unwrap_or(true),
                endpoint: telemetry
                    .endpoint
                    .unwrap_or_else(|| DEFAULT_TELEMETRY_URL.to_string()),
            },
            sink: SinkConfig {
                addr: sink.addr.unwrap_or(sink_defaults.addr),
                log_path: sink.log_path.unwrap_or(sink_defaults.log_path),
                static_dir: sink.static_dir.unwrap_or(sink_defaults.static_dir),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(device) = non_empty_env("OBJECTAI_CAMERA") {
            self.capture.device = device;
        }
        if let Some(mode) = non_empty_env("OBJECTAI_MODE") {
            self.detector.mode = mode.parse().context("OBJECTAI_MODE")?;
        }
        if let Some(threshold) = non_empty_env("OBJECTAI_THRESHOLD") {
            self.session.threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("OBJECTAI_THRESHOLD must be a number between 0 and 1"))?;
        }
        if let Some(model) = non_empty_env("OBJECTAI_MODEL") {
            self.detector.model_path = Some(PathBuf::from(model));
        }
        if let Some(url) = non_empty_env("OBJECTAI_REMOTE_URL") {
            self.detector.remote_url = url;
        }
        if let Some(url) = non_empty_env("OBJECTAI_TELEMETRY_URL") {
            self.telemetry.endpoint = url;
        }
        if let Some(addr) = non_empty_env("OBJECTAI_SINK_ADDR") {
            self.sink.addr = addr;
        }
        if let Some(port) = non_empty_env("PORT") {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|_| anyhow!("PORT must be a TCP port number"))?;
            let host = self
                .sink
                .addr
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "127.0.0.1".to_string());
            self.sink.addr = format!("{}:{}", host, port);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        crate::filter::check_threshold(self.session.threshold)?;
        if !(self.session.refresh_hz.is_finite() && self.session.refresh_hz > 0.0) {
            return Err(anyhow!("session.refresh_hz must be greater than zero"));
        }
        if self.session.max_consecutive_failures == 0 {
            return Err(anyhow!(
                "session.max_consecutive_failures must be greater than zero"
            ));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be greater than zero"));
        }
        if self.capture.target_fps == 0 {
            return Err(anyhow!("capture.target_fps must be greater than zero"));
        }
        if self.detector.model_width == 0 || self.detector.model_height == 0 {
            return Err(anyhow!("detector model size must be greater than zero"));
        }
        check_http_url("detector.remote_url", &self.detector.remote_url)?;
        if self.telemetry.enabled {
            check_http_url("telemetry.endpoint", &self.telemetry.endpoint)?;
        }
        self.sink
            .addr
            .parse::<SocketAddr>()
            .with_context(|| format!("sink.addr '{}' is not a socket address", self.sink.addr))?;
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<OverlayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn check_http_url(field: &str, value: &str) -> Result<()> {
    let url = Url::parse(value).with_context(|| format!("{} '{}' is not a URL", field, value))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(anyhow!("{} must use http or https, not '{}'", field, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = OverlayConfig::from_file(OverlayConfigFile::default());
        cfg.validate().unwrap();
        assert_eq!(cfg.capture.device, DEFAULT_CAMERA);
        assert_eq!((cfg.capture.width, cfg.capture.height), (1280, 720));
        assert_eq!(cfg.session.threshold, 0.45);
        assert_eq!(cfg.detector.mode, BackendMode::Client);
        assert_eq!(cfg.sink.addr, "127.0.0.1:5000");
    }

    #[test]
    fn parses_toml_sections() {
        let raw = r#"
            [capture]
            device = "/dev/video2"
            width = 640
            height = 480

            [detector]
            mode = "server"

            [session]
            threshold = 0.6
        "#;
        let file: OverlayConfigFile = toml::from_str(raw).unwrap();
        let cfg = OverlayConfig::from_file(file);
        assert_eq!(cfg.capture.device, "/dev/video2");
        assert_eq!(cfg.capture.width, 640);
        assert_eq!(cfg.detector.mode, BackendMode::Server);
        assert_eq!(cfg.session.threshold, 0.6);
        assert_eq!(cfg.session.refresh_hz, DEFAULT_REFRESH_HZ);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut cfg = OverlayConfig::default();
        cfg.session.threshold = 1.2;
        assert!(cfg.validate().is_err());

        let mut cfg = OverlayConfig::default();
        cfg.session.refresh_hz = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = OverlayConfig::default();
        cfg.detector.remote_url = "ftp://host/detect".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = OverlayConfig::default();
        cfg.telemetry.enabled = false;
        cfg.telemetry.endpoint = "not a url".to_string();
        assert!(cfg.validate().is_ok());
    }
}
