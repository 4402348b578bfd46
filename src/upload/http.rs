//! Multipart POST transfer to the collection endpoint.
//!
//! `POST {server_url}?sulabel={code}&cam={index}&gate={gate}` with the JPEG in the
//! `photo` field. Any reply that arrives counts as delivered unless
//! `require_success_status` is set; only transport failures fail a job otherwise.

use anyhow::{Context, Result};
use std::io::Read;
use url::Url;

use super::multipart::MultipartForm;
use super::{UploadReceipt, Uploader};
use crate::capture::UploadJob;
use crate::config::UploadSettings;
use crate::error::UploadError;

const MAX_LOGGED_BODY: u64 = 4096;

pub struct HttpUploader {
    agent: ureq::Agent,
    endpoint: Url,
    gate: String,
    require_success_status: bool,
}

impl HttpUploader {
    pub fn new(settings: &UploadSettings) -> Result<Self> {
        let endpoint = Url::parse(&settings.server_url)
            .with_context(|| format!("invalid upload server url '{}'", settings.server_url))?;
        Ok(Self {
            agent: ureq::AgentBuilder::new().timeout(settings.timeout).build(),
            endpoint,
            gate: settings.gate.clone(),
            require_success_status: settings.require_success_status,
        })
    }

    pub fn request_url(&self, job: &UploadJob) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("sulabel", job.pallet_code.as_str())
            .append_pair("cam", &job.cam_index.to_string())
            .append_pair("gate", &self.gate);
        url
    }

    fn judge(&self, status: u16, body: &str) -> Result<UploadReceipt, UploadError> {
        log::debug!("upload: response {} body={:?}", status, body);
        if self.require_success_status && !(200..300).contains(&status) {
            return Err(UploadError::Rejected { status });
        }
        Ok(UploadReceipt { status })
    }
}

impl Uploader for HttpUploader {
    fn upload(&mut self, job: &UploadJob) -> Result<UploadReceipt, UploadError> {
        let data = std::fs::read(&job.file_path).map_err(UploadError::File)?;
        let filename = job
            .file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let form = MultipartForm::new();
        let content_type = form.content_type();
        let body = form.file("photo", &filename, "image/jpeg", &data).finish();

        let url = self.request_url(job);
        log::debug!(
            "upload: POST {} file={} ({} bytes)",
            url,
            job.file_path.display(),
            data.len()
        );

        match self
            .agent
            .post(url.as_str())
            .set("Content-Type", &content_type)
            .send_bytes(&body)
        {
            Ok(response) => {
                let status = response.status();
                let text = read_body(response);
                self.judge(status, &text)
            }
            Err(ureq::Error::Status(status, response)) => {
                let text = read_body(response);
                self.judge(status, &text)
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(UploadError::Network(transport.to_string()))
            }
        }
    }
}

fn read_body(response: ureq::Response) -> String {
    let mut text = String::new();
    if let Err(err) = response
        .into_reader()
        .take(MAX_LOGGED_BODY)
        .read_to_string(&mut text)
    {
        log::debug!("upload: response body unreadable: {}", err);
    }
    text
}
