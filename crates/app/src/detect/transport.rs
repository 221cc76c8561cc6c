//! Client-side transport for submitting frames to the detection API.
//!
//! The trait is the seam the watch loop is tested through; the HTTP
//! implementation posts multipart uploads and decodes the server's error
//! taxonomy. Dropping the in-flight future aborts the underlying request,
//! which is how client-side cancellation works.

use async_trait::async_trait;
use thiserror::Error;

use crate::detect::data::{DetectionResponse, ErrorBody};

#[derive(Debug, Error)]
pub enum TransportError {
    /// Structured error body returned by the server.
    #[error("{0}")]
    Server(String),
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
}

#[async_trait]
pub trait DetectTransport: Send + Sync {
    async fn detect(&self, jpeg: Vec<u8>) -> Result<DetectionResponse, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(server: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/api/detect", server.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl DetectTransport for HttpTransport {
    async fn detect(&self, jpeg: Vec<u8>) -> Result<DetectionResponse, TransportError> {
        let part = reqwest::multipart::Part::bytes(jpeg)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")?;
        let form = reqwest::multipart::Form::new().part("image", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<DetectionResponse>().await?);
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => match body.details {
                Some(details) => format!("{} ({})", body.error, details.trim()),
                None => body.error,
            },
            Err(_) => format!("server returned {status}"),
        };
        Err(TransportError::Server(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let transport = HttpTransport::new("http://127.0.0.1:8080/");
        assert_eq!(transport.endpoint, "http://127.0.0.1:8080/api/detect");
    }
}
