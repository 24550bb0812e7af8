//! HTTP scoring backend client
//!
//! The model server accepts a PNG body on `POST {endpoint}/score` with the
//! thresholds as query parameters and answers `{"detections": [...]}`.
//! `GET {endpoint}/health` is used as the load step when a slot is created.

use async_trait::async_trait;
use image::{ImageFormat, RgbImage};
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;

use super::{RawDetection, ScoringBackend, ScoringError};

const USER_AGENT: &str = concat!("gpc-ml/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    detections: Vec<RawDetection>,
}

/// Remote model endpoint
pub struct HttpScoringBackend {
    name: String,
    endpoint: String,
    http_client: reqwest::Client,
}

impl HttpScoringBackend {
    /// Build a client and confirm the model server is ready
    pub async fn load(
        name: impl Into<String>,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Self, ScoringError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ScoringError::Unavailable(e.to_string()))?;

        let backend = Self {
            name: name.into(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http_client,
        };

        let response = backend
            .http_client
            .get(format!("{}/health", backend.endpoint))
            .send()
            .await
            .map_err(|e| ScoringError::Unavailable(format!("{}: {}", backend.endpoint, e)))?;

        if !response.status().is_success() {
            return Err(ScoringError::Unavailable(format!(
                "{} health check returned {}",
                backend.endpoint,
                response.status()
            )));
        }

        tracing::info!(
            backend = %backend.name,
            endpoint = %backend.endpoint,
            "Scoring backend loaded"
        );
        Ok(backend)
    }
}

fn encode_png(image: &RgbImage) -> Result<Vec<u8>, ScoringError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| ScoringError::InvalidInput(format!("PNG encode failed: {}", e)))?;
    Ok(buffer.into_inner())
}

#[async_trait]
impl ScoringBackend for HttpScoringBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score(
        &self,
        image: &RgbImage,
        confidence_threshold: f32,
        iou_threshold: f32,
    ) -> Result<Vec<RawDetection>, ScoringError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ScoringError::InvalidInput("empty image".to_string()));
        }

        let body = encode_png(image)?;

        tracing::debug!(
            backend = %self.name,
            width = image.width(),
            height = image.height(),
            "Scoring image"
        );

        let response = self
            .http_client
            .post(format!("{}/score", self.endpoint))
            .query(&[
                ("confidence_threshold", confidence_threshold),
                ("iou_threshold", iou_threshold),
            ])
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(body)
            .send()
            .await
            .map_err(|e| ScoringError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            return Err(ScoringError::Unavailable(format!("{} returned {}", self.name, status)));
        }
        if status.is_client_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(ScoringError::InvalidInput(format!("{}: {}", status, message)));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ScoringError::Inference(format!("{}: {}", status, message)));
        }

        let parsed: ScoreResponse = response
            .json()
            .await
            .map_err(|e| ScoringError::Decode(e.to_string()))?;

        Ok(parsed.detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing_with_optional_polygon() {
        let json = r#"{"detections": [
            {"class_id": 2, "confidence": 0.91, "bbox": [1.0, 2.0, 30.0, 40.0]},
            {"class_id": 0, "confidence": 0.6, "bbox": [0, 0, 5, 5], "polygon": [[0,0],[5,0],[5,5]]}
        ]}"#;
        let parsed: ScoreResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.detections.len(), 2);
        assert!(parsed.detections[0].polygon.is_none());
        assert_eq!(parsed.detections[1].polygon.as_ref().unwrap().len(), 3);
    }

    #[test]
    fn test_png_encoding_produces_signature() {
        let image = RgbImage::from_pixel(4, 4, image::Rgb([10, 200, 10]));
        let bytes = encode_png(&image).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }
}
