//! Failure taxonomy surfaced to the status board.
//!
//! Every variant degrades to a per-camera status; none of them is fatal for the
//! process. `Display` strings are what an operator sees.

use thiserror::Error;

/// Why a slot produced no usable image in a round.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// Camera or capture session could not be opened.
    #[error("Connect Fail: {0}")]
    Connect(String),
    /// Payload was not a valid image, or no frame decoded within the budget.
    #[error("Decode Fail: {0}")]
    Decode(String),
    /// HTTP transport failure, including timeouts and non-success replies.
    #[error("HTTP: {0}")]
    Network(String),
    #[error("Disk Write Error: {0}")]
    DiskWrite(String),
}

impl CaptureError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Decode(_) => "decode",
            Self::Network(_) => "network",
            Self::DiskWrite(_) => "disk_write",
        }
    }
}

/// Why a single upload job terminated unsuccessfully.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("File Error")]
    File(#[source] std::io::Error),
    #[error("{0}")]
    Network(String),
    /// Endpoint answered with a non-success status and the queue is configured to
    /// treat that as a failure.
    #[error("HTTP status {status}")]
    Rejected { status: u16 },
}
