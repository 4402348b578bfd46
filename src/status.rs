//! Per-camera status derived from pipeline events.
//!
//! This is the whole contract a display consumes: five entries, each `Idle`,
//! `Sending`, `Ok` or `Error`, overwritten by the latest event for that camera.
//! Once a round has started, upload events from earlier rounds are ignored so a
//! late transfer never reports on the pallet currently at the kiosk.

use std::fmt;

use crate::config::SLOT_COUNT;
use crate::pipeline::PipelineEvent;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CameraStatus {
    #[default]
    Idle,
    Sending,
    Ok(String),
    Error(String),
}

impl fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Sending => f.write_str("sending..."),
            Self::Ok(message) => write!(f, "sent ({})", message),
            Self::Error(message) => write!(f, "error: {}", message),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusBoard {
    cameras: [CameraStatus; SLOT_COUNT],
    round: Option<u64>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, cam: usize) -> Option<&CameraStatus> {
        self.cameras.get(cam)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &CameraStatus)> {
        self.cameras.iter().enumerate()
    }

    /// Round the entries describe, if one has started.
    pub fn round(&self) -> Option<u64> {
        self.round
    }

    pub fn reset(&mut self) {
        self.cameras = Default::default();
    }

    /// Fold `event` in. Returns the camera whose entry changed, if any; a new
    /// round resets every entry and reports `None`.
    pub fn apply(&mut self, event: &PipelineEvent) -> Option<usize> {
        let (cam, status) = match event {
            PipelineEvent::RoundStarted { round, .. } => {
                self.reset();
                self.round = Some(*round);
                return None;
            }
            PipelineEvent::UploadStarted { round, .. }
            | PipelineEvent::UploadFinished { round, .. }
                if self.is_stale(*round) =>
            {
                log::debug!("status: ignoring upload event from round {}", round);
                return None;
            }
            // Successful captures stay idle until their upload starts.
            PipelineEvent::Capture(result) => match &result.error {
                Some(err) => (result.slot_index, CameraStatus::Error(err.to_string())),
                None => return None,
            },
            PipelineEvent::UploadStarted { cam, .. } => (*cam, CameraStatus::Sending),
            PipelineEvent::UploadFinished {
                cam,
                success,
                message,
                ..
            } => {
                let status = if *success {
                    CameraStatus::Ok(message.clone())
                } else {
                    CameraStatus::Error(message.clone())
                };
                (*cam, status)
            }
        };
        let entry = self.cameras.get_mut(cam)?;
        *entry = status;
        Some(cam)
    }

    fn is_stale(&self, round: u64) -> bool {
        self.round.is_some_and(|current| round != current)
    }
}
