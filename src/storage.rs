//! Local frame storage.
//!
//! Captured frames are written as JPEG under a fixed working directory, named
//! `{pallet}_{yyyyMMdd-HHmm}_{slot}.jpg`. Files are kept after upload (success or
//! failure) for audit; a repeated round within the same minute overwrites them.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::trigger::PalletCode;

/// Format of the round timestamp embedded in filenames.
pub const ROUND_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M";

#[derive(Clone, Debug)]
pub struct FrameStore {
    dir: PathBuf,
    jpeg_quality: u8,
}

impl FrameStore {
    /// Open the store, creating `dir` if absent.
    pub fn open(dir: impl Into<PathBuf>, jpeg_quality: u8) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create frame directory {}", dir.display()))?;
        Ok(Self { dir, jpeg_quality })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, code: &PalletCode, round_stamp: &str, slot: usize) -> PathBuf {
        self.dir.join(format!(
            "{}_{}_{}.jpg",
            filename_safe(code.as_str()),
            round_stamp,
            slot
        ))
    }

    /// Encode `image` as JPEG at `path`, replacing any existing file.
    pub fn write_jpeg(&self, image: &RgbImage, path: &Path) -> Result<()> {
        // Directory may have been removed since startup.
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create frame directory {}", self.dir.display()))?;

        let partial = path.with_extension("jpg.part");
        let written = self
            .encode_into(image, &partial)
            .and_then(|()| {
                fs::rename(&partial, path).with_context(|| format!("move into {}", path.display()))
            });
        if written.is_err() {
            // never leave a half-written frame behind
            let _ = fs::remove_file(&partial);
        }
        written
    }

    fn encode_into(&self, image: &RgbImage, partial: &Path) -> Result<()> {
        let file =
            File::create(partial).with_context(|| format!("create {}", partial.display()))?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality)
            .encode_image(image)
            .with_context(|| format!("encode jpeg {}", partial.display()))?;
        writer
            .flush()
            .with_context(|| format!("flush {}", partial.display()))?;
        Ok(())
    }
}

/// Timestamp shared by every file of a round.
pub fn round_timestamp(now: DateTime<Local>) -> String {
    now.format(ROUND_TIMESTAMP_FORMAT).to_string()
}

fn filename_safe(code: &str) -> String {
    code.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
