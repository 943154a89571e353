//! Decoder binding: a muted, non-visible playback context per clip.

use async_trait::async_trait;
use dayreel_common::{FrameClock, ReelResult};
use image::RgbaImage;

use crate::mixer::AudioSource;
use crate::resources::LocalResource;

/// One decoded video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Presentation time relative to the clip start.
    pub pts_secs: f64,
    pub image: RgbaImage,
}

/// Interleaved stereo `f32` samples at the bus sample rate.
#[derive(Debug, Clone, Default)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
}

/// A video frame plus the audio that plays alongside it.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub video: VideoFrame,
    pub audio: Option<AudioChunk>,
}

/// Intrinsic properties reported once the first frame is available.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipInfo {
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
    pub has_audio: bool,
}

/// Options shared by every clip opened in one run.
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    /// Output frame rate and bus sample rate the decoder resamples to.
    pub frame_clock: FrameClock,
}

/// A clip ready for playback.
#[async_trait]
pub trait DecodedClip: Send {
    fn info(&self) -> ClipInfo;

    /// The clip's audio handle, if it has an audio track.
    fn audio_source(&mut self) -> Option<&mut AudioSource>;

    /// Rewind so the next frame is the first one.
    async fn play_from_start(&mut self) -> ReelResult<()>;

    /// Wait for the next frame. `None` signals end of stream.
    async fn next_frame(&mut self) -> ReelResult<Option<DecodedFrame>>;

    /// Halt playback and release decoder state.
    async fn stop(&mut self);
}

/// Opens local resources for playback.
#[async_trait]
pub trait ClipDecoder: Send + Sync {
    /// Open `resource` muted and wait for its first frame.
    ///
    /// Undecodable media fails with [`dayreel_common::ReelError::Decode`].
    async fn open(
        &self,
        resource: &LocalResource,
        options: &DecodeOptions,
    ) -> ReelResult<Box<dyn DecodedClip>>;

    /// Human-readable name of this decoder.
    fn name(&self) -> &str;
}
