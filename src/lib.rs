//! Pallet kiosk controller.
//!
//! A scanned pallet code triggers one capture round: every configured camera slot
//! (up to five) is asked for a still frame, the frames are rotated and stored as
//! JPEG, and each stored frame is relayed to a collection endpoint by a strictly
//! serial upload queue. Per-camera status is published as events for a display.
//!
//! # Module Structure
//!
//! - `trigger`: raw keystrokes / serial bytes to `PalletCode`s
//! - `scanner`: keyboard and serial input threads
//! - `ingest`: camera sources (HTTP snapshot, RTSP stream, local device)
//! - `frame`: raw frames and rotation
//! - `capture`: capture rounds, `CaptureResult`, `UploadJob`
//! - `storage`: JPEG persistence and file naming
//! - `upload`: single-flight FIFO upload worker
//! - `status`: per-camera status board
//! - `pipeline`: controller wiring and `PipelineEvent`
//! - `ui`: terminal rendering of the status board

pub mod capture;
pub mod config;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod scanner;
pub mod status;
pub mod storage;
pub mod trigger;
pub mod ui;
pub mod upload;

pub use capture::{CaptureOrchestrator, CaptureResult, JobSink, UploadJob};
pub use config::{CameraSlotConfig, KioskConfig, Protocol, ReloadPolicy, ScannerSource, SLOT_COUNT};
pub use error::{CaptureError, UploadError};
pub use frame::{RawFrame, Rotation};
pub use ingest::CameraSource;
pub use pipeline::{Kiosk, PipelineEvent};
pub use status::{CameraStatus, StatusBoard};
pub use storage::FrameStore;
pub use trigger::{InputMode, PalletCode, RawInput, TriggerNormalizer};
pub use upload::{HttpUploader, UploadHandle, UploadQueue, UploadReceipt, Uploader};
