//! Fire-and-forget reporting of filtered detection batches.
//!
//! Every emit runs on its own short-lived thread. Nothing waits for it, and
//! delivery failures are logged at debug level and dropped. Slow sinks lead
//! to several deliveries in flight at once; there is no queue and no retry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::TelemetrySettings;
use crate::detect::Detection;
use crate::error::OverlayError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Body posted to the logging collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub predictions: Vec<Detection>,
}

/// Destination for telemetry records.
pub trait TelemetrySink: Send + Sync {
    fn deliver(&self, record: &TelemetryRecord) -> Result<(), OverlayError>;
}

/// POSTs records as JSON to an HTTP endpoint such as `/api/log`.
pub struct HttpSink {
    endpoint: Url,
    agent: ureq::Agent,
}

impl HttpSink {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint).context("parse telemetry url")?;
        Ok(Self {
            endpoint,
            agent: ureq::AgentBuilder::new().timeout(HTTP_TIMEOUT).build(),
        })
    }
}

impl TelemetrySink for HttpSink {
    fn deliver(&self, record: &TelemetryRecord) -> Result<(), OverlayError> {
        self.agent
            .post(self.endpoint.as_str())
            .send_json(record)
            .map(|_| ())
            .map_err(|err| OverlayError::TelemetryFailure(err.to_string()))
    }
}

/// Forwards records into a channel. Useful for tests and in-process consumers.
pub struct ChannelSink {
    tx: Sender<TelemetryRecord>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<TelemetryRecord>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl TelemetrySink for ChannelSink {
    fn deliver(&self, record: &TelemetryRecord) -> Result<(), OverlayError> {
        self.tx
            .send(record.clone())
            .map_err(|_| OverlayError::TelemetryFailure("receiver dropped".to_string()))
    }
}

#[derive(Clone)]
pub struct TelemetryEmitter {
    sink: Option<Arc<dyn TelemetrySink>>,
    in_flight: Arc<AtomicUsize>,
}

impl TelemetryEmitter {
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            sink: Some(sink),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// An emitter that drops every batch.
    pub fn disabled() -> Self {
        Self {
            sink: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_settings(settings: &TelemetrySettings) -> Result<Self> {
        if !settings.enabled {
            log::info!("telemetry: disabled");
            return Ok(Self::disabled());
        }
        let sink = HttpSink::new(&settings.endpoint)?;
        log::info!("telemetry: posting detections to {}", settings.endpoint);
        Ok(Self::new(Arc::new(sink)))
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Deliveries started but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Report `batch` without blocking the caller.
    pub fn emit(&self, batch: &[Detection]) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        let record = TelemetryRecord {
            timestamp: chrono::Utc::now().timestamp_millis(),
            predictions: batch.to_vec(),
        };
        let in_flight = self.in_flight.clone();
        in_flight.fetch_add(1, Ordering::SeqCst);
        let counter = in_flight.clone();
        let spawned = std::thread::Builder::new()
            .name("telemetry".to_string())
            .spawn(move || {
                if let Err(err) = sink.deliver(&record) {
                    log::debug!("telemetry: dropped batch of {}: {}", record.predictions.len(), err);
                }
                counter.fetch_sub(1, Ordering::SeqCst);
            });
        if let Err(err) = spawned {
            in_flight.fetch_sub(1, Ordering::SeqCst);
            log::debug!("telemetry: could not spawn delivery thread: {}", err);
        }
    }
}
