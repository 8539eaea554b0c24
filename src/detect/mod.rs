mod backend;
pub mod backends;
mod result;
mod slot;

pub use backend::{BackendMode, DetectorBackend};
pub use backends::{MotionBackend, RemoteBackend, ScriptStep, ScriptedBackend};
pub use result::{BoundingBox, Detection};
pub use slot::{BackendPromise, BackendReadiness, BackendSlot};

use crate::config::DetectorSettings;
use crate::error::OverlayError;

/// Build the backend selected by configuration.
///
/// Server mode is usable immediately. Client mode loads on a background
/// thread; the returned slot reports `NotReady` until that finishes.
pub fn load_backend(settings: &DetectorSettings) -> BackendSlot {
    match settings.mode {
        BackendMode::Server => match RemoteBackend::new(&settings.remote_url) {
            Ok(backend) => {
                log::info!("backend: remote detection at {}", backend.endpoint());
                BackendSlot::ready(BackendMode::Server, Box::new(backend))
            }
            Err(err) => BackendSlot::failed(BackendMode::Server, format!("{:#}", err)),
        },
        BackendMode::Client => {
            let settings = settings.clone();
            BackendSlot::spawn(BackendMode::Client, move || load_in_process(&settings))
        }
    }
}

fn load_in_process(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>, OverlayError> {
    if let Some(model_path) = &settings.model_path {
        return load_model(settings, model_path);
    }
    if let Some(script_path) = &settings.script_path {
        log::info!("backend: replaying detections from {}", script_path.display());
        let backend = ScriptedBackend::from_json_file(script_path)
            .map_err(|err| OverlayError::BackendLoadFailed(format!("{:#}", err)))?;
        return Ok(Box::new(backend));
    }
    log::info!("backend: in-process motion detector");
    Ok(Box::new(MotionBackend::default()))
}

#[cfg(feature = "backend-tract")]
fn load_model(
    settings: &DetectorSettings,
    model_path: &std::path::Path,
) -> Result<Box<dyn DetectorBackend>, OverlayError> {
    log::info!("backend: loading ONNX model {}", model_path.display());
    let load = || -> anyhow::Result<backends::TractBackend> {
        let backend =
            backends::TractBackend::new(model_path, settings.model_width, settings.model_height)?;
        match &settings.labels_path {
            Some(labels) => backend.with_labels_file(labels),
            None => Ok(backend),
        }
    };
    load()
        .map(|backend| Box::new(backend) as Box<dyn DetectorBackend>)
        .map_err(|err| OverlayError::BackendLoadFailed(format!("{:#}", err)))
}

#[cfg(not(feature = "backend-tract"))]
fn load_model(
    _settings: &DetectorSettings,
    model_path: &std::path::Path,
) -> Result<Box<dyn DetectorBackend>, OverlayError> {
    Err(OverlayError::BackendLoadFailed(format!(
        "{} needs the backend-tract feature",
        model_path.display()
    )))
}
