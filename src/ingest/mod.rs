//! Camera frame sources.
//!
//! This module provides the sources a slot can be bound to:
//! - HTTP snapshot cameras (one authenticated GET per capture)
//! - Stream cameras over RTSP (feature: rtsp-ffmpeg)
//! - The local capture device (feature: ingest-v4l2)
//! - Stub cameras (`stub://`) for testing
//!
//! Every source returns a `RawFrame` or a `CaptureError`; none of them retries.
//! Channel reordering and rotation happen afterwards, in the capture round.

pub mod device;
pub(crate) mod normalize;
pub mod snapshot;
pub mod stream;
mod stub;
pub mod target;

pub use device::{DeviceConfig, DeviceSource};
pub use normalize::PixelFormat;
pub use snapshot::{SnapshotConfig, SnapshotSource};
pub use stream::{StreamConfig, StreamSource};
pub use target::SourceTarget;

use crate::config::{CameraSlotConfig, Protocol};
use crate::error::CaptureError;
use crate::frame::RawFrame;

/// Source bound to one slot for one capture round.
pub enum CameraSource {
    Snapshot(SnapshotSource),
    Stream(StreamSource),
    Device(DeviceSource),
}

impl CameraSource {
    /// Build the source for `slot`, or `None` when the slot is unconfigured.
    pub fn for_slot(slot: &CameraSlotConfig) -> Option<Self> {
        let source = match SourceTarget::resolve(slot) {
            SourceTarget::Skip => return None,
            SourceTarget::LocalDevice(device) => Self::Device(DeviceSource::new(DeviceConfig {
                device,
                frame_budget: slot.frame_budget,
            })),
            SourceTarget::Url(url) => match slot.protocol {
                Protocol::Http => Self::Snapshot(SnapshotSource::new(SnapshotConfig {
                    url,
                    user: slot.user.clone(),
                    pass: slot.pass.clone(),
                    timeout: slot.snapshot_timeout,
                })),
                Protocol::Rtsp => Self::Stream(StreamSource::new(StreamConfig {
                    url,
                    frame_budget: slot.frame_budget,
                })),
            },
        };
        Some(source)
    }

    /// Capture one frame.
    pub fn capture(&self) -> Result<RawFrame, CaptureError> {
        match self {
            Self::Snapshot(source) => source.capture(),
            Self::Stream(source) => source.capture(),
            Self::Device(source) => source.capture(),
        }
    }

    /// Log-safe description of the source.
    pub fn describe(&self) -> String {
        match self {
            Self::Snapshot(source) => format!("HTTP {}", target::redact_url(source.url())),
            Self::Stream(source) => format!("RTSP {}", target::redact_url(source.url())),
            Self::Device(source) => format!("device {}", source.device()),
        }
    }
}
