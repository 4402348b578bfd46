//! Local capture device source (address sentinel `"0"`).
//!
//! Like the stream source, every capture opens the device, takes the first usable
//! frame within the frame budget and releases the device again. Real devices go
//! through V4L2 (feature `ingest-v4l2`); `stub://` device paths use the synthetic
//! camera.

use super::stub::SyntheticCamera;
use crate::error::CaptureError;
use crate::frame::RawFrame;

/// Configuration for a local device source.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// Device path (e.g., "/dev/video0").
    pub device: String,
    pub frame_budget: u32,
}

pub struct DeviceSource {
    config: DeviceConfig,
    synthetic: Option<SyntheticCamera>,
}

impl DeviceSource {
    pub fn new(config: DeviceConfig) -> Self {
        let synthetic = SyntheticCamera::parse(&config.device);
        Self { config, synthetic }
    }

    pub fn device(&self) -> &str {
        &self.config.device
    }

    pub fn capture(&self) -> Result<RawFrame, CaptureError> {
        if let Some(camera) = &self.synthetic {
            if !camera.is_reachable() {
                return Err(CaptureError::Connect(camera.url.clone()));
            }
            return (0..self.config.frame_budget)
                .find_map(|attempt| camera.read(attempt))
                .ok_or_else(|| {
                    CaptureError::Decode(format!(
                        "no frame within {} reads",
                        self.config.frame_budget
                    ))
                });
        }
        capture_device(&self.config)
    }
}

#[cfg(not(feature = "ingest-v4l2"))]
fn capture_device(config: &DeviceConfig) -> Result<RawFrame, CaptureError> {
    Err(CaptureError::Connect(format!(
        "{}: local capture requires the ingest-v4l2 feature",
        config.device
    )))
}

#[cfg(feature = "ingest-v4l2")]
fn capture_device(config: &DeviceConfig) -> Result<RawFrame, CaptureError> {
    use v4l::buffer::Type;
    use v4l::io::traits::CaptureStream;
    use v4l::video::Capture;

    use crate::ingest::normalize::PixelFormat;
    use crate::ingest::snapshot::decode_image;

    let connect_err = |what: &str, err: std::io::Error| {
        CaptureError::Connect(format!("{}: {}: {}", config.device, what, err))
    };

    let mut device =
        v4l::Device::with_path(&config.device).map_err(|err| connect_err("open", err))?;
    let mut format = device.format().map_err(|err| connect_err("read format", err))?;
    format.fourcc = v4l::FourCC::new(b"MJPG");
    let format = match device.set_format(&format) {
        Ok(format) => format,
        Err(err) => {
            log::warn!(
                "DeviceSource: MJPG not accepted by {}: {}",
                config.device,
                err
            );
            device
                .format()
                .map_err(|err| connect_err("read format", err))?
        }
    };

    let mut stream = v4l::prelude::MmapStream::with_buffers(&mut device, Type::VideoCapture, 4)
        .map_err(|err| connect_err("create buffer stream", err))?;

    for _ in 0..config.frame_budget {
        let (buf, _meta) = match stream.next() {
            Ok(next) => next,
            Err(err) => {
                log::debug!("DeviceSource: read from {} failed: {}", config.device, err);
                continue;
            }
        };
        if buf.is_empty() {
            continue;
        }
        let frame = match &format.fourcc.repr {
            b"MJPG" => decode_image(buf).ok(),
            b"YUYV" => Some(RawFrame::new(
                buf.to_vec(),
                format.width,
                format.height,
                PixelFormat::Yuyv,
            )),
            b"RGB3" => Some(RawFrame::new(
                buf.to_vec(),
                format.width,
                format.height,
                PixelFormat::Rgb24,
            )),
            b"BGR3" => Some(RawFrame::new(
                buf.to_vec(),
                format.width,
                format.height,
                PixelFormat::Bgr24,
            )),
            other => {
                return Err(CaptureError::Decode(format!(
                    "{}: unsupported pixel format {}",
                    config.device,
                    String::from_utf8_lossy(other)
                )))
            }
        };
        if let Some(frame) = frame {
            return Ok(frame);
        }
    }

    Err(CaptureError::Decode(format!(
        "no frame within {} reads",
        config.frame_budget
    )))
}
