//! Capture rounds.
//!
//! A round takes the per-slot configuration snapshot, captures every configured
//! slot on a bounded pool of scoped worker threads, persists successful frames and
//! reports exactly one `CaptureResult` per attempted slot. Successful results become
//! `UploadJob`s handed to a `JobSink` as they complete.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{mpsc, Mutex};

use crate::config::CameraSlotConfig;
use crate::error::CaptureError;
use crate::ingest::{CameraSource, SourceTarget};
use crate::storage::FrameStore;
use crate::trigger::PalletCode;

/// Outcome of one slot in one round.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureResult {
    pub slot_index: usize,
    /// Target path, written only when `error` is `None`.
    pub file_path: PathBuf,
    pub error: Option<CaptureError>,
}

impl CaptureResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Operator-facing reason; `"OK"` on success.
    pub fn message(&self) -> String {
        match &self.error {
            Some(err) => err.to_string(),
            None => "OK".to_string(),
        }
    }
}

/// One queued transfer. The file stays on disk after the job is consumed.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadJob {
    /// Round that produced the frame.
    pub round: u64,
    pub file_path: PathBuf,
    pub pallet_code: PalletCode,
    pub cam_index: usize,
}

/// Receiver of upload jobs produced by a round.
pub trait JobSink {
    fn submit(&mut self, job: UploadJob);
}

/// Number of slots a round will attempt.
pub fn attempted_slots(slots: &[CameraSlotConfig]) -> usize {
    slots
        .iter()
        .filter(|slot| SourceTarget::resolve(slot) != SourceTarget::Skip)
        .count()
}

impl JobSink for Vec<UploadJob> {
    fn submit(&mut self, job: UploadJob) {
        self.push(job);
    }
}

pub struct CaptureOrchestrator {
    store: FrameStore,
    max_workers: usize,
}

impl CaptureOrchestrator {
    pub fn new(store: FrameStore, max_workers: usize) -> Self {
        Self {
            store,
            max_workers: max_workers.max(1),
        }
    }

    /// Capture every configured slot. Results are reported in completion order and
    /// returned sorted by slot index. Unconfigured slots produce nothing.
    pub fn run_round(
        &self,
        round: u64,
        code: &PalletCode,
        round_stamp: &str,
        slots: &[CameraSlotConfig],
        sink: &mut dyn JobSink,
        on_result: &mut dyn FnMut(&CaptureResult),
    ) -> Vec<CaptureResult> {
        let work: VecDeque<(&CameraSlotConfig, CameraSource)> = slots
            .iter()
            .filter_map(|slot| CameraSource::for_slot(slot).map(|source| (slot, source)))
            .collect();
        if work.is_empty() {
            log::warn!("capture: no camera slots configured; nothing to do for {}", code);
            return Vec::new();
        }
        let attempted = work.len();
        let worker_count = self.max_workers.min(attempted);
        let queue = Mutex::new(work);
        let mut results = Vec::with_capacity(attempted);

        std::thread::scope(|scope| {
            let (tx, rx) = mpsc::channel::<CaptureResult>();
            let mut spawned = 0;
            for worker in 0..worker_count {
                let tx = tx.clone();
                let queue = &queue;
                let spawn = std::thread::Builder::new()
                    .name(format!("capture-{}", worker))
                    .spawn_scoped(scope, move || {
                        drain_slots(queue, &self.store, code, round_stamp, &tx)
                    });
                match spawn {
                    Ok(_) => spawned += 1,
                    Err(err) => log::warn!("capture: failed to spawn worker {}: {}", worker, err),
                }
            }
            if spawned == 0 {
                drain_slots(&queue, &self.store, code, round_stamp, &tx);
            }
            drop(tx);

            for result in rx {
                if result.is_success() {
                    sink.submit(UploadJob {
                        round,
                        file_path: result.file_path.clone(),
                        pallet_code: code.clone(),
                        cam_index: result.slot_index,
                    });
                }
                on_result(&result);
                results.push(result);
            }
        });

        results.sort_by_key(|result| result.slot_index);
        let ok = results.iter().filter(|r| r.is_success()).count();
        log::info!(
            "capture: round {} finished: {}/{} slots captured",
            code,
            ok,
            results.len()
        );
        results
    }
}

fn drain_slots(
    queue: &Mutex<VecDeque<(&CameraSlotConfig, CameraSource)>>,
    store: &FrameStore,
    code: &PalletCode,
    round_stamp: &str,
    results: &mpsc::Sender<CaptureResult>,
) {
    loop {
        let next = match queue.lock() {
            Ok(mut pending) => pending.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        let Some((slot, source)) = next else {
            return;
        };
        let result = capture_slot(store, code, round_stamp, slot, &source);
        if results.send(result).is_err() {
            return;
        }
    }
}

fn capture_slot(
    store: &FrameStore,
    code: &PalletCode,
    round_stamp: &str,
    slot: &CameraSlotConfig,
    source: &CameraSource,
) -> CaptureResult {
    let file_path = store.path_for(code, round_stamp, slot.index);
    log::debug!("capture: slot {} <- {}", slot.index, source.describe());

    let error = match source.capture() {
        Ok(frame) => {
            log::debug!(
                "capture: slot {} frame {}x{} ({} bytes)",
                slot.index,
                frame.width,
                frame.height,
                frame.byte_len()
            );
            match frame.into_oriented_image(slot.rotation) {
                Ok(image) => store
                    .write_jpeg(&image, &file_path)
                    .err()
                    .map(|err| CaptureError::DiskWrite(format!("{:#}", err))),
                Err(err) => Some(CaptureError::Decode(format!("{:#}", err))),
            }
        }
        Err(err) => Some(err),
    };

    match &error {
        None => log::debug!("capture: slot {} -> {}", slot.index, file_path.display()),
        Some(err) => log::warn!(
            "capture: slot {} failed ({}): {}",
            slot.index,
            err.kind(),
            err
        ),
    }
    CaptureResult {
        slot_index: slot.index,
        file_path,
        error,
    }
}
