//! Encoder/muxer contract.

use std::path::PathBuf;

use async_trait::async_trait;
use dayreel_common::{FrameClock, ReelResult};
use dayreel_platform_core::OutputFormat;
use image::RgbaImage;

/// Settings fixed when an encoder starts.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Surface size. Encoders crop odd values down to even ones.
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub clock: FrameClock,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    /// Whether an audio track is muxed alongside video.
    pub with_audio: bool,
    /// Frames buffered per emitted chunk.
    pub chunk_frames: u32,
    /// Directory for intermediate files.
    pub scratch_dir: PathBuf,
}

impl EncoderConfig {
    /// Output size with odd dimensions rounded down to even, as 4:2:0
    /// chroma subsampling requires.
    pub fn even_dimensions(&self) -> (u32, u32) {
        (even(self.width), even(self.height))
    }
}

fn even(value: u32) -> u32 {
    (value & !1).max(2)
}

/// Accepts composited frames and mixed audio until finalized.
#[async_trait]
pub trait Encoder: Send {
    fn format(&self) -> OutputFormat;

    /// Video frames accepted so far.
    fn frames_written(&self) -> u64;

    /// Append one surface frame.
    async fn push_video(&mut self, frame: &RgbaImage) -> ReelResult<()>;

    /// Append interleaved stereo samples for the most recent frame.
    async fn push_audio(&mut self, samples: &[f32]) -> ReelResult<()>;

    /// Flush and merge everything written into the container bytes.
    async fn finalize(self: Box<Self>) -> ReelResult<Vec<u8>>;

    /// Discard partial output.
    async fn abort(self: Box<Self>);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(width: u32, height: u32) -> EncoderConfig {
        EncoderConfig {
            width,
            height,
            format: OutputFormat::MP4_H264,
            clock: FrameClock::new(30, 48000),
            video_bitrate_kbps: 2500,
            audio_bitrate_kbps: 128,
            with_audio: true,
            chunk_frames: 30,
            scratch_dir: std::env::temp_dir(),
        }
    }

    #[test]
    fn test_odd_dimensions_round_down() {
        assert_eq!(config(721, 1279).even_dimensions(), (720, 1278));
        assert_eq!(config(720, 1280).even_dimensions(), (720, 1280));
        assert_eq!(config(1, 1).even_dimensions(), (2, 2));
    }
}
