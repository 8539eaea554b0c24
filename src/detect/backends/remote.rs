use std::io::Cursor;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::error::OverlayError;
use crate::frame::VideoFrame;

const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Serialize)]
struct DetectRequest<'a> {
    image: &'a str,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DetectResponse {
    List(Vec<Detection>),
    Wrapped { predictions: Vec<Detection> },
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Backend that posts frames to a remote detection service.
///
/// Request: `POST <endpoint>` with `{"image": "<base64 jpeg>"}`.
/// Any non-2xx reply or transport failure becomes `BackendUnavailable`.
pub struct RemoteBackend {
    endpoint: Url,
    agent: ureq::Agent,
    jpeg_quality: u8,
}

impl RemoteBackend {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint).context("parse remote detect url")?;
        match endpoint.scheme() {
            "http" | "https" => {}
            other => anyhow::bail!("unsupported remote detect scheme '{}'", other),
        }
        Ok(Self {
            endpoint,
            agent: ureq::AgentBuilder::new().build(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        })
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn encode(&self, frame: &VideoFrame) -> Result<String> {
        let image = frame.to_rgb_image()?;
        let mut jpeg = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut jpeg, self.jpeg_quality)
            .encode_image(&image)
            .context("encode frame as jpeg")?;
        Ok(BASE64_STANDARD.encode(jpeg.into_inner()))
    }
}

impl DetectorBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<Detection>, OverlayError> {
        let image = self
            .encode(frame)
            .map_err(|err| OverlayError::BackendUnavailable(format!("{:#}", err)))?;
        let response = self
            .agent
            .post(self.endpoint.as_str())
            .send_json(DetectRequest { image: &image });

        match response {
            Ok(response) => match response.into_json::<DetectResponse>() {
                Ok(DetectResponse::List(detections))
                | Ok(DetectResponse::Wrapped {
                    predictions: detections,
                }) => Ok(detections),
                Err(err) => Err(OverlayError::BackendUnavailable(format!(
                    "invalid detection payload: {}",
                    err
                ))),
            },
            Err(ureq::Error::Status(code, response)) => {
                let reason = response
                    .into_json::<ErrorBody>()
                    .map(|body| body.error)
                    .unwrap_or_else(|_| "no error detail".to_string());
                Err(OverlayError::BackendUnavailable(format!(
                    "HTTP {}: {}",
                    code, reason
                )))
            }
            Err(err) => Err(OverlayError::BackendUnavailable(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_endpoints() {
        assert!(RemoteBackend::new("ftp://example.com/detect").is_err());
        assert!(RemoteBackend::new("not a url").is_err());
        assert!(RemoteBackend::new("http://127.0.0.1:5000/api/detect").is_ok());
    }

    #[test]
    fn encodes_frames_as_base64_jpeg() -> Result<()> {
        let backend = RemoteBackend::new("http://127.0.0.1:5000/api/detect")?;
        let frame = VideoFrame::solid(8, 8, [200, 10, 10])?;
        let encoded = backend.encode(&frame)?;
        let bytes = BASE64_STANDARD.decode(encoded)?;
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        Ok(())
    }

    #[test]
    fn refused_connection_is_unavailable_not_fatal() {
        // Port 9 (discard) is closed on test hosts.
        let mut backend = RemoteBackend::new("http://127.0.0.1:9/api/detect").unwrap();
        let frame = VideoFrame::solid(4, 4, [0, 0, 0]).unwrap();
        let err = backend.detect(&frame).unwrap_err();
        assert!(matches!(err, OverlayError::BackendUnavailable(_)));
    }
}
