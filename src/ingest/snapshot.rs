//! HTTP snapshot camera source.
//!
//! One authenticated GET per capture, no persistent connection. The body must be a
//! still image in a format the `image` crate can decode (JPEG or PNG).

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use image::GenericImageView;
use std::io::Read;
use std::time::Duration;

use super::normalize::PixelFormat;
use super::stub::SyntheticCamera;
use crate::error::CaptureError;
use crate::frame::RawFrame;

const MAX_SNAPSHOT_BYTES: u64 = 16 * 1024 * 1024;

/// Configuration for an HTTP snapshot source.
#[derive(Clone, Debug)]
pub struct SnapshotConfig {
    pub url: String,
    pub user: String,
    pub pass: String,
    pub timeout: Duration,
}

pub struct SnapshotSource {
    config: SnapshotConfig,
    backend: SnapshotBackend,
}

enum SnapshotBackend {
    Synthetic(SyntheticCamera),
    Http(ureq::Agent),
}

impl SnapshotSource {
    pub fn new(config: SnapshotConfig) -> Self {
        let backend = match SyntheticCamera::parse(&config.url) {
            Some(camera) => SnapshotBackend::Synthetic(camera),
            None => SnapshotBackend::Http(
                ureq::AgentBuilder::new().timeout(config.timeout).build(),
            ),
        };
        Self { config, backend }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub fn capture(&self) -> Result<RawFrame, CaptureError> {
        match &self.backend {
            SnapshotBackend::Synthetic(camera) => {
                if !camera.is_reachable() {
                    return Err(CaptureError::Network(format!(
                        "{} did not respond",
                        camera.url
                    )));
                }
                camera
                    .read(u32::MAX)
                    .ok_or_else(|| CaptureError::Decode("Bad Image Data".to_string()))
            }
            SnapshotBackend::Http(agent) => {
                let body = self.fetch(agent)?;
                decode_image(&body)
            }
        }
    }

    fn fetch(&self, agent: &ureq::Agent) -> Result<Vec<u8>, CaptureError> {
        let response = agent
            .get(&self.config.url)
            .set(
                "Authorization",
                &basic_auth(&self.config.user, &self.config.pass),
            )
            .call()
            .map_err(|err| match err {
                ureq::Error::Status(code, response) => CaptureError::Network(format!(
                    "{} {}",
                    code,
                    response.status_text()
                )),
                ureq::Error::Transport(transport) => CaptureError::Network(transport.to_string()),
            })?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_SNAPSHOT_BYTES + 1)
            .read_to_end(&mut bytes)
            .map_err(|err| CaptureError::Network(format!("read snapshot body: {}", err)))?;
        if bytes.len() as u64 > MAX_SNAPSHOT_BYTES {
            return Err(CaptureError::Decode(format!(
                "snapshot exceeds {} bytes",
                MAX_SNAPSHOT_BYTES
            )));
        }
        if bytes.is_empty() {
            return Err(CaptureError::Decode("empty snapshot body".to_string()));
        }
        Ok(bytes)
    }
}

/// `Authorization` header value for HTTP Basic auth.
pub fn basic_auth(user: &str, pass: &str) -> String {
    format!("Basic {}", BASE64_STANDARD.encode(format!("{}:{}", user, pass)))
}

pub(crate) fn decode_image(bytes: &[u8]) -> Result<RawFrame, CaptureError> {
    let image = image::load_from_memory(bytes)
        .map_err(|err| CaptureError::Decode(format!("Bad Image Data ({})", err)))?;
    let (width, height) = image.dimensions();
    let rgb = image.into_rgb8();
    Ok(RawFrame::new(rgb.into_raw(), width, height, PixelFormat::Rgb24))
}
