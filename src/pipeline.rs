//! Controller wiring.
//!
//! `Kiosk` owns the capture orchestrator and the upload worker for one
//! configuration snapshot. Rounds run one at a time on the caller's thread, so a
//! slot is never captured by two rounds at once; codes scanned meanwhile wait in
//! the trigger channel. Everything observable leaves through `PipelineEvent`s.

use anyhow::Result;
use std::sync::mpsc::Sender;

use crate::capture::{attempted_slots, CaptureOrchestrator, CaptureResult, JobSink, UploadJob};
use crate::config::{KioskConfig, ReloadPolicy};
use crate::storage::{round_timestamp, FrameStore};
use crate::trigger::PalletCode;
use crate::upload::{HttpUploader, UploadHandle, Uploader};

/// Rounds are numbered from 1 for the life of a `Kiosk`. Upload events carry the
/// number of the round whose frame they transfer.
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineEvent {
    /// A round began for `code`; `slots` is the number of slots it will attempt.
    RoundStarted {
        round: u64,
        code: PalletCode,
        slots: usize,
    },
    Capture(CaptureResult),
    UploadStarted { round: u64, cam: usize },
    UploadFinished {
        round: u64,
        cam: usize,
        success: bool,
        message: String,
    },
}

pub struct Kiosk {
    config: KioskConfig,
    orchestrator: CaptureOrchestrator,
    uploads: Option<UploadHandle>,
    events: Sender<PipelineEvent>,
    rounds: u64,
}

impl Kiosk {
    /// Build with the HTTP uploader for `config.upload`.
    pub fn new(config: KioskConfig, events: Sender<PipelineEvent>) -> Result<Self> {
        let uploader = http_uploader(&config)?;
        Self::with_uploader(config, events, uploader)
    }

    /// Build with a caller-supplied uploader; `None` disables uploads.
    pub fn with_uploader(
        config: KioskConfig,
        events: Sender<PipelineEvent>,
        uploader: Option<Box<dyn Uploader>>,
    ) -> Result<Self> {
        let store = FrameStore::open(&config.storage.dir, config.storage.jpeg_quality)?;
        let orchestrator = CaptureOrchestrator::new(store, config.cameras.max_workers);
        let uploads = match uploader {
            Some(uploader) => Some(UploadHandle::spawn(uploader, events.clone())?),
            None => None,
        };
        Ok(Self {
            config,
            orchestrator,
            uploads,
            events,
            rounds: 0,
        })
    }

    pub fn config(&self) -> &KioskConfig {
        &self.config
    }

    /// Run one capture round for `code` at the current local time.
    pub fn on_trigger(&mut self, code: &PalletCode) -> Vec<CaptureResult> {
        let stamp = round_timestamp(chrono::Local::now());
        self.run_round_at(code, &stamp)
    }

    pub fn run_round_at(&mut self, code: &PalletCode, round_stamp: &str) -> Vec<CaptureResult> {
        self.rounds += 1;
        let round = self.rounds;
        let slots = self.config.slot_snapshot();
        let configured = attempted_slots(&slots);
        log::info!("round {}: {} ({} camera slot(s))", round, code, configured);
        let _ = self.events.send(PipelineEvent::RoundStarted {
            round,
            code: code.clone(),
            slots: configured,
        });

        let mut disabled = UploadsDisabled;
        let sink: &mut dyn JobSink = match self.uploads.as_mut() {
            Some(handle) => handle,
            None => &mut disabled,
        };
        let events = &self.events;
        self.orchestrator
            .run_round(round, code, round_stamp, &slots, sink, &mut |result| {
                let _ = events.send(PipelineEvent::Capture(result.clone()));
            })
    }

    /// Swap in a new configuration. The current upload worker is stopped according
    /// to the new `upload.on_reload` policy before a fresh one is started.
    pub fn reconfigure(&mut self, config: KioskConfig) -> Result<()> {
        let uploader = http_uploader(&config)?;
        self.reconfigure_with(config, uploader)
    }

    pub fn reconfigure_with(
        &mut self,
        config: KioskConfig,
        uploader: Option<Box<dyn Uploader>>,
    ) -> Result<()> {
        let store = FrameStore::open(&config.storage.dir, config.storage.jpeg_quality)?;
        if let Some(handle) = self.uploads.take() {
            log::info!(
                "reload: stopping upload worker ({:?})",
                config.upload.on_reload
            );
            handle.stop(config.upload.on_reload)?;
        }
        self.orchestrator = CaptureOrchestrator::new(store, config.cameras.max_workers);
        self.uploads = match uploader {
            Some(uploader) => Some(UploadHandle::spawn(uploader, self.events.clone())?),
            None => None,
        };
        self.config = config;
        log::info!("reload: configuration applied");
        Ok(())
    }

    /// Stop the upload worker, waiting for it per `policy`.
    pub fn shutdown(mut self, policy: ReloadPolicy) -> Result<()> {
        if let Some(handle) = self.uploads.take() {
            handle.stop(policy)?;
        }
        Ok(())
    }
}

fn http_uploader(config: &KioskConfig) -> Result<Option<Box<dyn Uploader>>> {
    if !config.uploads_enabled() {
        log::warn!("upload.server_url is empty; frames will be kept locally only");
        return Ok(None);
    }
    Ok(Some(Box::new(HttpUploader::new(&config.upload)?)))
}

struct UploadsDisabled;

impl JobSink for UploadsDisabled {
    fn submit(&mut self, job: UploadJob) {
        log::debug!(
            "upload disabled; keeping {} for cam {}",
            job.file_path.display(),
            job.cam_index
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::UploadReceipt;
    use std::sync::mpsc;

    fn stub_config(dir: &std::path::Path, addresses: &[&str]) -> Result<KioskConfig> {
        let mut cfg = KioskConfig::from_defaults()?;
        cfg.storage.dir = dir.to_path_buf();
        for (slot, address) in cfg.cameras.slots.iter_mut().zip(addresses) {
            slot.address = address.to_string();
        }
        Ok(cfg)
    }

    #[test]
    fn round_without_uploads_still_reports_captures() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (tx, rx) = mpsc::channel();
        let mut kiosk = Kiosk::new(stub_config(dir.path(), &["stub://a", " ", "stub://unreachable"])?, tx)?;
        let code = PalletCode::new("PAL001").expect("code");
        kiosk.run_round_at(&code, "20240131-0905");
        kiosk.shutdown(ReloadPolicy::Drain)?;

        let events: Vec<PipelineEvent> = rx.try_iter().collect();
        assert_eq!(
            events[0],
            PipelineEvent::RoundStarted {
                round: 1,
                code,
                slots: 2
            }
        );
        let captures = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::Capture(_)))
            .count();
        assert_eq!(captures, 2);
        assert!(!events
            .iter()
            .any(|e| matches!(e, PipelineEvent::UploadStarted { .. })));
        Ok(())
    }

    #[test]
    fn reconfigure_drains_previous_worker() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (tx, rx) = mpsc::channel();
        let ok = || -> Option<Box<dyn Uploader>> {
            Some(Box::new(|_: &UploadJob| -> Result<UploadReceipt, crate::error::UploadError> {
                Ok(UploadReceipt { status: 200 })
            }))
        };
        let mut kiosk = Kiosk::with_uploader(stub_config(dir.path(), &["stub://a"])?, tx, ok())?;
        let code = PalletCode::new("PAL002").expect("code");
        kiosk.run_round_at(&code, "20240131-0905");

        let next = stub_config(dir.path(), &["", "stub://b"])?;
        kiosk.reconfigure_with(next, ok())?;
        let results = kiosk.run_round_at(&code, "20240131-0906");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].slot_index, 1);
        kiosk.shutdown(ReloadPolicy::Drain)?;

        let finished: Vec<usize> = rx
            .try_iter()
            .filter_map(|e| match e {
                PipelineEvent::UploadFinished { cam, success: true, .. } => Some(cam),
                _ => None,
            })
            .collect();
        assert_eq!(finished, vec![0, 1]);
        Ok(())
    }
}
