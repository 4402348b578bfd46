//! In-process cameras for `stub://` addresses.
//!
//! The host part of the URL picks the behaviour:
//! - `stub://unreachable...` never opens
//! - `stub://blank...` opens but never yields a decodable frame
//! - anything else yields a small gradient frame after a short warm-up

use crate::frame::RawFrame;
use crate::ingest::normalize::PixelFormat;

pub(crate) const STUB_SCHEME: &str = "stub://";

const STUB_WIDTH: u32 = 64;
const STUB_HEIGHT: u32 = 48;
/// Empty reads before the first real frame, like a decoder waiting for a keyframe.
const WARMUP_READS: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StubBehavior {
    Frame,
    Unreachable,
    Blank,
}

#[derive(Clone, Debug)]
pub(crate) struct SyntheticCamera {
    pub(crate) url: String,
    pub(crate) behavior: StubBehavior,
}

impl SyntheticCamera {
    pub(crate) fn parse(url: &str) -> Option<Self> {
        let rest = url.strip_prefix(STUB_SCHEME)?;
        let behavior = if rest.starts_with("unreachable") {
            StubBehavior::Unreachable
        } else if rest.starts_with("blank") {
            StubBehavior::Blank
        } else {
            StubBehavior::Frame
        };
        Some(Self {
            url: url.to_string(),
            behavior,
        })
    }

    pub(crate) fn is_reachable(&self) -> bool {
        self.behavior != StubBehavior::Unreachable
    }

    /// Frame for the `attempt`-th read of a session (0-based); `None` is an empty read.
    pub(crate) fn read(&self, attempt: u32) -> Option<RawFrame> {
        match self.behavior {
            StubBehavior::Frame if attempt >= WARMUP_READS => Some(gradient_frame()),
            _ => None,
        }
    }
}

fn gradient_frame() -> RawFrame {
    let mut pixels = Vec::with_capacity((STUB_WIDTH * STUB_HEIGHT * 3) as usize);
    for y in 0..STUB_HEIGHT {
        for x in 0..STUB_WIDTH {
            // BGR, like the stream decoders deliver
            pixels.push((x * 4) as u8);
            pixels.push((y * 5) as u8);
            pixels.push(128);
        }
    }
    RawFrame::new(pixels, STUB_WIDTH, STUB_HEIGHT, PixelFormat::Bgr24)
}
