use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use objectai::config::OverlayConfig;
use objectai::BackendMode;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "OBJECTAI_CONFIG",
        "OBJECTAI_CAMERA",
        "OBJECTAI_MODE",
        "OBJECTAI_THRESHOLD",
        "OBJECTAI_MODEL",
        "OBJECTAI_REMOTE_URL",
        "OBJECTAI_TELEMETRY_URL",
        "OBJECTAI_SINK_ADDR",
        "PORT",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "capture": {
            "device": "stub://porch",
            "width": 800,
            "height": 600,
            "target_fps": 15
        },
        "detector": {
            "mode": "server",
            "remote_url": "http://10.0.0.5:5000/api/detect"
        },
        "session": {
            "threshold": 0.3,
            "refresh_hz": 30,
            "max_consecutive_failures": 5
        },
        "telemetry": {
            "endpoint": "http://10.0.0.5:5000/api/log"
        },
        "sink": {
            "addr": "0.0.0.0:8080",
            "log_path": "/var/log/objectai/detections.log"
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("OBJECTAI_CONFIG", file.path());
    std::env::set_var("OBJECTAI_CAMERA", "stub://garage");
    std::env::set_var("OBJECTAI_THRESHOLD", "0.6");

    let cfg = OverlayConfig::load().expect("load config");

    assert_eq!(cfg.capture.device, "stub://garage");
    assert_eq!((cfg.capture.width, cfg.capture.height), (800, 600));
    assert_eq!(cfg.capture.target_fps, 15);
    assert_eq!(cfg.detector.mode, BackendMode::Server);
    assert_eq!(cfg.detector.remote_url, "http://10.0.0.5:5000/api/detect");
    assert_eq!(cfg.session.threshold, 0.6);
    assert_eq!(cfg.session.refresh_hz, 30.0);
    assert_eq!(cfg.session.max_consecutive_failures, 5);
    assert!(cfg.telemetry.enabled);
    assert_eq!(cfg.telemetry.endpoint, "http://10.0.0.5:5000/api/log");
    assert_eq!(cfg.sink.addr, "0.0.0.0:8080");
    assert_eq!(
        cfg.sink.log_path,
        PathBuf::from("/var/log/objectai/detections.log")
    );

    clear_env();
}

#[test]
fn port_replaces_the_sink_port() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("OBJECTAI_SINK_ADDR", "0.0.0.0:5000");
    std::env::set_var("PORT", "7070");
    let cfg = OverlayConfig::load().expect("load config");
    assert_eq!(cfg.sink.addr, "0.0.0.0:7070");

    clear_env();
}

#[test]
fn defaults_without_any_configuration() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = OverlayConfig::load().expect("load defaults");
    assert_eq!(cfg.capture.device, "stub://camera");
    assert_eq!(cfg.detector.mode, BackendMode::Client);
    assert_eq!(cfg.session.threshold, 0.45);
    assert_eq!(cfg.telemetry.endpoint, "http://127.0.0.1:5000/api/log");
    assert_eq!(cfg.sink.addr, "127.0.0.1:5000");

    clear_env();
}

#[test]
fn rejects_out_of_range_threshold_from_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("OBJECTAI_THRESHOLD", "1.5");
    let err = OverlayConfig::load().unwrap_err();
    assert!(format!("{:#}", err).contains("outside 0..=1"));

    std::env::set_var("OBJECTAI_THRESHOLD", "high");
    assert!(OverlayConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_unknown_mode_and_bad_port() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("OBJECTAI_MODE", "cloud");
    assert!(OverlayConfig::load().is_err());
    std::env::remove_var("OBJECTAI_MODE");

    std::env::set_var("PORT", "http");
    assert!(OverlayConfig::load().is_err());

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("OBJECTAI_CONFIG", "/nonexistent/objectai.toml");
    let err = OverlayConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
