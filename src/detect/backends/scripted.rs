use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::error::OverlayError;
use crate::frame::VideoFrame;

/// One scripted reply.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ScriptStep {
    Detections(Vec<Detection>),
    Unavailable { error: String },
}

/// Replays a fixed script of detection batches, cycling at the end.
///
/// Used by tests and by the demo fixture mode of the CLI.
pub struct ScriptedBackend {
    steps: Vec<ScriptStep>,
    cursor: usize,
    calls: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            cursor: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Return the same batch on every call.
    pub fn repeating(batch: Vec<Detection>) -> Self {
        Self::new(vec![ScriptStep::Detections(batch)])
    }

    /// Load a JSON array of steps (each a detection list or `{"error": ...}`).
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read detection script {}", path.display()))?;
        let steps: Vec<ScriptStep> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid detection script {}", path.display()))?;
        Ok(Self::new(steps))
    }

    /// Shared counter of `detect` calls, readable after the backend moves into a slot.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &VideoFrame) -> Result<Vec<Detection>, OverlayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.steps.is_empty() {
            return Ok(Vec::new());
        }
        let step = self.steps[self.cursor % self.steps.len()].clone();
        self.cursor += 1;
        match step {
            ScriptStep::Detections(batch) => Ok(batch),
            ScriptStep::Unavailable { error } => Err(OverlayError::BackendUnavailable(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cycles_through_steps() -> Result<()> {
        let frame = VideoFrame::solid(4, 4, [0, 0, 0])?;
        let mut backend = ScriptedBackend::new(vec![
            ScriptStep::Detections(vec![Detection::new("cat", 0.5, [0.0, 0.0, 1.0, 1.0])]),
            ScriptStep::Unavailable {
                error: "offline".into(),
            },
        ]);
        let counter = backend.call_counter();

        assert_eq!(backend.detect(&frame)?.len(), 1);
        assert!(backend.detect(&frame).unwrap_err().is_transient());
        assert_eq!(backend.detect(&frame)?[0].class, "cat");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[test]
    fn loads_script_from_json() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"[[{{"class":"person","score":0.9,"bbox":[0,0,100,100]}}],{{"error":"HTTP 501"}}]"#
        )?;
        let mut backend = ScriptedBackend::from_json_file(file.path())?;
        let frame = VideoFrame::solid(2, 2, [0, 0, 0])?;
        assert_eq!(backend.detect(&frame)?[0].class, "person");
        let err = backend.detect(&frame).unwrap_err();
        assert!(err.to_string().contains("HTTP 501"));
        Ok(())
    }
}
