//! Single-flight FIFO of upload jobs.
//!
//! `UploadQueue` only tracks order and the in-flight slot; the worker that owns it
//! performs the transfers. A job is started only by `enqueue` on an idle queue or by
//! `finish` of the job before it, so at most one job is ever in flight and jobs start
//! in insertion order.

use std::collections::VecDeque;

use crate::capture::UploadJob;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Sending,
}

#[derive(Debug, Default)]
pub struct UploadQueue {
    in_flight: Option<UploadJob>,
    pending: VecDeque<UploadJob>,
}

impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> QueueState {
        if self.in_flight.is_some() {
            QueueState::Sending
        } else {
            QueueState::Idle
        }
    }

    pub fn in_flight(&self) -> Option<&UploadJob> {
        self.in_flight.as_ref()
    }

    /// Jobs waiting behind the in-flight one.
    pub fn backlog(&self) -> usize {
        self.pending.len()
    }

    /// Append `job`. Returns the job to transfer now when the queue was idle.
    pub fn enqueue(&mut self, job: UploadJob) -> Option<UploadJob> {
        if self.in_flight.is_some() {
            self.pending.push_back(job);
            return None;
        }
        self.in_flight = Some(job.clone());
        Some(job)
    }

    /// Terminate the in-flight job (success or failure) and start the next one, if
    /// any. Returns the job to transfer next.
    pub fn finish(&mut self) -> Option<UploadJob> {
        self.in_flight = self.pending.pop_front();
        self.in_flight.clone()
    }

    /// Drop every job that has not started. The in-flight transfer is untouched.
    pub fn discard_pending(&mut self) -> Vec<UploadJob> {
        self.pending.drain(..).collect()
    }
}
