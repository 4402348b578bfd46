//! Upload side of the pipeline.
//!
//! - `queue`: the single-flight FIFO state machine
//! - `http`: multipart POST transfer
//! - `multipart`: form body encoding
//!
//! `UploadHandle` owns a worker thread holding the queue. Jobs arrive over a
//! channel, transfers run one at a time on that thread and every transfer is
//! bracketed by `UploadStarted` / `UploadFinished` events. A handle is never
//! reconfigured: on reload it is stopped (draining or discarding its backlog) and
//! a fresh one is spawned.

pub mod http;
pub mod multipart;
pub mod queue;

pub use http::HttpUploader;
pub use queue::{QueueState, UploadQueue};

use anyhow::{anyhow, Context, Result};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::JoinHandle;

use crate::capture::{JobSink, UploadJob};
use crate::config::ReloadPolicy;
use crate::error::UploadError;
use crate::pipeline::PipelineEvent;

/// Message shown for a delivered job.
pub const UPLOAD_OK: &str = "OK";

/// What the endpoint answered for a delivered job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadReceipt {
    pub status: u16,
}

/// Performs one transfer attempt. Never retries.
pub trait Uploader: Send {
    fn upload(&mut self, job: &UploadJob) -> Result<UploadReceipt, UploadError>;
}

impl<F> Uploader for F
where
    F: FnMut(&UploadJob) -> Result<UploadReceipt, UploadError> + Send,
{
    fn upload(&mut self, job: &UploadJob) -> Result<UploadReceipt, UploadError> {
        self(job)
    }
}

enum UploadCommand {
    Job(UploadJob),
    Discard,
}

pub struct UploadHandle {
    commands: Option<Sender<UploadCommand>>,
    join: Option<JoinHandle<()>>,
}

impl UploadHandle {
    pub fn spawn(uploader: Box<dyn Uploader>, events: Sender<PipelineEvent>) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let join = std::thread::Builder::new()
            .name("upload".into())
            .spawn(move || run_worker(uploader, rx, events))
            .context("spawn upload worker")?;
        Ok(Self {
            commands: Some(tx),
            join: Some(join),
        })
    }

    /// Queue `job` behind everything submitted before it.
    pub fn submit(&self, job: UploadJob) {
        let Some(commands) = &self.commands else {
            return;
        };
        let cam = job.cam_index;
        if commands.send(UploadCommand::Job(job)).is_err() {
            log::error!("upload: worker gone; dropping job for cam {}", cam);
        }
    }

    /// Stop accepting jobs and wait for the worker. `Drain` transfers the backlog
    /// first; `Discard` lets only the in-flight transfer finish.
    pub fn stop(mut self, policy: ReloadPolicy) -> Result<()> {
        if let Some(commands) = self.commands.take() {
            if policy == ReloadPolicy::Discard {
                let _ = commands.send(UploadCommand::Discard);
            }
        }
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("upload worker thread panicked"))?;
        }
        Ok(())
    }
}

impl JobSink for UploadHandle {
    fn submit(&mut self, job: UploadJob) {
        UploadHandle::submit(self, job);
    }
}

fn run_worker(
    mut uploader: Box<dyn Uploader>,
    commands: Receiver<UploadCommand>,
    events: Sender<PipelineEvent>,
) {
    let mut queue = UploadQueue::new();
    let mut next: Option<UploadJob> = None;
    loop {
        let job = match next.take() {
            Some(job) => job,
            None => match commands.recv() {
                Ok(command) => match apply(&mut queue, command) {
                    Some(job) => job,
                    None => continue,
                },
                Err(_) => break,
            },
        };

        let (round, cam) = (job.round, job.cam_index);
        let _ = events.send(PipelineEvent::UploadStarted { round, cam });
        let outcome = uploader.upload(&job);
        let (success, message) = match outcome {
            Ok(receipt) => {
                log::info!(
                    "upload: cam {} {} delivered (HTTP {})",
                    cam,
                    job.file_path.display(),
                    receipt.status
                );
                (true, UPLOAD_OK.to_string())
            }
            Err(err) => {
                log::warn!(
                    "upload: cam {} {} failed: {}",
                    cam,
                    job.file_path.display(),
                    err
                );
                (false, err.to_string())
            }
        };

        // Jobs submitted during the transfer join the backlog before it advances.
        loop {
            match commands.try_recv() {
                Ok(command) => {
                    apply(&mut queue, command);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        let _ = events.send(PipelineEvent::UploadFinished {
            round,
            cam,
            success,
            message,
        });
        next = queue.finish();
    }
    log::debug!("upload: worker exiting");
}

fn apply(queue: &mut UploadQueue, command: UploadCommand) -> Option<UploadJob> {
    match command {
        UploadCommand::Job(job) => {
            let started = queue.enqueue(job);
            if started.is_none() {
                log::debug!("upload: queued ({} waiting)", queue.backlog());
            }
            started
        }
        UploadCommand::Discard => {
            let dropped = queue.discard_pending();
            if !dropped.is_empty() {
                log::warn!("upload: discarded {} queued job(s)", dropped.len());
            }
            None
        }
    }
}
