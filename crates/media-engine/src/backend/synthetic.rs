//! Deterministic in-memory media backend.
//!
//! Clips are described by their URI:
//!
//! ```text
//! synthetic://clip?duration=2&width=720&height=1280&audio=1&color=3366cc&fail=decode
//! ```
//!
//! Fetching produces an in-memory resource holding the clip description;
//! decoding generates solid-colour frames with a moving scan line and a
//! 440 Hz tone. `fail=fetch` and `fail=decode` inject failures at the
//! matching phase. The encoder fingerprints each frame and emits one
//! chunk per `chunk_frames` frames.

use async_trait::async_trait;
use dayreel_common::{FrameClock, ReelError, ReelResult};
use dayreel_platform_core::{OutputFormat, PlatformCapabilities};
use image::{Rgba, RgbaImage};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::decoder::{
    AudioChunk, ClipDecoder, ClipInfo, DecodeOptions, DecodedClip, DecodedFrame, VideoFrame,
};
use crate::encoder::{Encoder, EncoderConfig};
use crate::fetcher::ClipFetcher;
use crate::mixer::AudioSource;
use crate::resources::{LocalResource, ResourceLedger};

use super::MediaBackend;

/// URI scheme handled by this backend.
pub const SCHEME: &str = "synthetic";

const CONTAINER_MAGIC: &[u8; 4] = b"DRSY";
const TONE_HZ: f32 = 440.0;
const TONE_AMPLITUDE: f32 = 0.2;

/// Phase at which a synthetic clip fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePoint {
    Fetch,
    Decode,
}

/// Description of one synthetic clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticClipSpec {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub audio: bool,
    pub color: [u8; 3],
    pub fail: Option<FailurePoint>,
}

impl Default for SyntheticClipSpec {
    fn default() -> Self {
        Self {
            duration_secs: 2.0,
            width: 720,
            height: 1280,
            audio: true,
            color: [51, 102, 204],
            fail: None,
        }
    }
}

impl SyntheticClipSpec {
    /// Parse a `synthetic://` URI. Unknown parameters are ignored.
    pub fn parse(uri: &str) -> ReelResult<Self> {
        let url =
            Url::parse(uri).map_err(|e| ReelError::fetch(format!("invalid URI {uri}: {e}")))?;
        if url.scheme() != SCHEME {
            return Err(ReelError::fetch(format!(
                "not a synthetic clip URI: {uri}"
            )));
        }

        let mut spec = Self::default();
        for (key, value) in url.query_pairs() {
            let bad = || ReelError::fetch(format!("invalid synthetic parameter {key}={value}"));
            match key.as_ref() {
                "duration" => {
                    spec.duration_secs = value.parse::<f64>().map_err(|_| bad())?;
                    if !spec.duration_secs.is_finite() || spec.duration_secs < 0.0 {
                        return Err(bad());
                    }
                }
                "width" => spec.width = value.parse().map_err(|_| bad())?,
                "height" => spec.height = value.parse().map_err(|_| bad())?,
                "audio" => {
                    spec.audio = match value.as_ref() {
                        "1" | "true" | "yes" => true,
                        "0" | "false" | "no" => false,
                        _ => return Err(bad()),
                    }
                }
                "color" => spec.color = parse_hex_color(&value).ok_or_else(bad)?,
                "fail" => {
                    spec.fail = match value.as_ref() {
                        "fetch" => Some(FailurePoint::Fetch),
                        "decode" => Some(FailurePoint::Decode),
                        _ => return Err(bad()),
                    }
                }
                _ => {}
            }
        }
        Ok(spec)
    }

    /// Render back into a URI.
    pub fn to_uri(&self) -> String {
        let mut uri = format!(
            "{SCHEME}://clip?duration={}&width={}&height={}&audio={}&color={:02x}{:02x}{:02x}",
            self.duration_secs,
            self.width,
            self.height,
            u8::from(self.audio),
            self.color[0],
            self.color[1],
            self.color[2],
        );
        match self.fail {
            Some(FailurePoint::Fetch) => uri.push_str("&fail=fetch"),
            Some(FailurePoint::Decode) => uri.push_str("&fail=decode"),
            None => {}
        }
        uri
    }
}

fn parse_hex_color(value: &str) -> Option<[u8; 3]> {
    let hex = value.trim_start_matches('#');
    if hex.len() != 6 {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

/// Fetches and decodes `synthetic://` clips.
#[derive(Debug, Default)]
pub struct SyntheticSource;

#[async_trait]
impl ClipFetcher for SyntheticSource {
    async fn fetch(&self, uri: &str, ledger: &ResourceLedger) -> ReelResult<LocalResource> {
        let spec = SyntheticClipSpec::parse(uri)?;
        match spec.fail {
            Some(FailurePoint::Fetch) => Err(ReelError::fetch(format!(
                "HTTP 503 Service Unavailable: {uri}"
            ))),
            // A payload the decoder cannot parse.
            Some(FailurePoint::Decode) => Ok(LocalResource::memory(
                ledger,
                uri,
                b"\x00\x00\x00\x18ftypcorrupt".to_vec(),
            )),
            None => Ok(LocalResource::memory(ledger, uri, serde_json::to_vec(&spec)?)),
        }
    }

    fn name(&self) -> &str {
        SCHEME
    }
}

#[async_trait]
impl ClipDecoder for SyntheticSource {
    async fn open(
        &self,
        resource: &LocalResource,
        options: &DecodeOptions,
    ) -> ReelResult<Box<dyn DecodedClip>> {
        let bytes = resource
            .bytes()
            .ok_or_else(|| ReelError::decode("synthetic clips are held in memory"))?;
        let spec: SyntheticClipSpec = serde_json::from_slice(bytes).map_err(|e| {
            ReelError::decode(format!(
                "unrecognised media in {}: {e}",
                resource.source_uri()
            ))
        })?;

        let clip = SyntheticClip::new(spec, options.frame_clock);
        if clip.total_frames == 0 {
            return Err(ReelError::decode(format!(
                "no decodable frames in {}",
                resource.source_uri()
            )));
        }
        Ok(Box::new(clip))
    }

    fn name(&self) -> &str {
        SCHEME
    }
}

/// A playing synthetic clip.
pub struct SyntheticClip {
    spec: SyntheticClipSpec,
    clock: FrameClock,
    total_frames: u64,
    next_index: u64,
    sample_cursor: u64,
    audio: Option<AudioSource>,
    stopped: bool,
}

impl SyntheticClip {
    pub fn new(spec: SyntheticClipSpec, clock: FrameClock) -> Self {
        let total_frames = clock.frames_for_secs(spec.duration_secs);
        let audio = spec.audio.then(AudioSource::muted);
        Self {
            spec,
            clock,
            total_frames,
            next_index: 0,
            sample_cursor: 0,
            audio,
            stopped: false,
        }
    }

    fn render_frame(&self, index: u64) -> RgbaImage {
        let [r, g, b] = self.spec.color;
        let mut image = RgbaImage::from_pixel(self.spec.width, self.spec.height, Rgba([r, g, b, 255]));
        if self.spec.height > 0 {
            let row = (index % self.spec.height as u64) as u32;
            for x in 0..self.spec.width {
                image.put_pixel(x, row, Rgba([255, 255, 255, 255]));
            }
        }
        image
    }

    fn render_audio(&mut self, index: u64) -> AudioChunk {
        let frames = self.clock.samples_for_frame(index);
        let rate = self.clock.sample_rate() as f32;
        let mut samples = Vec::with_capacity(frames * FrameClock::CHANNELS);
        for n in 0..frames as u64 {
            let t = (self.sample_cursor + n) as f32 / rate;
            let value = TONE_AMPLITUDE * (std::f32::consts::TAU * TONE_HZ * t).sin();
            for _ in 0..FrameClock::CHANNELS {
                samples.push(value);
            }
        }
        self.sample_cursor += frames as u64;
        AudioChunk { samples }
    }
}

#[async_trait]
impl DecodedClip for SyntheticClip {
    fn info(&self) -> ClipInfo {
        ClipInfo {
            width: self.spec.width,
            height: self.spec.height,
            duration_secs: self.spec.duration_secs,
            has_audio: self.spec.audio,
        }
    }

    fn audio_source(&mut self) -> Option<&mut AudioSource> {
        self.audio.as_mut()
    }

    async fn play_from_start(&mut self) -> ReelResult<()> {
        self.next_index = 0;
        self.sample_cursor = 0;
        self.stopped = false;
        Ok(())
    }

    async fn next_frame(&mut self) -> ReelResult<Option<DecodedFrame>> {
        if self.stopped || self.next_index >= self.total_frames {
            return Ok(None);
        }
        let index = self.next_index;
        self.next_index += 1;

        let audio = if self.spec.audio {
            Some(self.render_audio(index))
        } else {
            None
        };
        Ok(Some(DecodedFrame {
            video: VideoFrame {
                pts_secs: self.clock.frames_to_secs(index),
                image: self.render_frame(index),
            },
            audio,
        }))
    }

    async fn stop(&mut self) {
        self.stopped = true;
        if let Some(source) = self.audio.as_mut() {
            source.mute();
        }
    }
}

/// Summary read back from a synthetic container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticContainer {
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub frames: u64,
    pub audio_samples: u64,
    pub chunks: u32,
}

impl SyntheticContainer {
    /// Parse the header written by [`SyntheticEncoder::finalize`].
    pub fn inspect(bytes: &[u8]) -> Option<Self> {
        let rest = bytes.strip_prefix(CONTAINER_MAGIC)?;
        let (mime_len, rest) = rest.split_first()?;
        let mime_len = *mime_len as usize;
        let mime_type = std::str::from_utf8(rest.get(..mime_len)?).ok()?.to_string();
        let mut fields = rest.get(mime_len..)?;

        let width = take_u32(&mut fields)?;
        let height = take_u32(&mut fields)?;
        let fps = take_u32(&mut fields)?;
        let chunks = take_u32(&mut fields)?;
        let frames = take_u64(&mut fields)?;
        let audio_samples = take_u64(&mut fields)?;

        Some(Self {
            mime_type,
            width,
            height,
            fps,
            frames,
            audio_samples,
            chunks,
        })
    }

    /// Video duration implied by the frame count.
    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.fps.max(1) as f64
    }
}

fn take_u32(fields: &mut &[u8]) -> Option<u32> {
    let head = fields.get(..4)?;
    let value = u32::from_le_bytes(head.try_into().ok()?);
    *fields = &fields[4..];
    Some(value)
}

fn take_u64(fields: &mut &[u8]) -> Option<u64> {
    let head = fields.get(..8)?;
    let value = u64::from_le_bytes(head.try_into().ok()?);
    *fields = &fields[8..];
    Some(value)
}

/// Chunked in-memory encoder.
pub struct SyntheticEncoder {
    config: EncoderConfig,
    pending: Vec<u8>,
    pending_frames: u32,
    chunks: Vec<Vec<u8>>,
    frames: u64,
    audio_samples: u64,
}

impl SyntheticEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self {
            config,
            pending: Vec::new(),
            pending_frames: 0,
            chunks: Vec::new(),
            frames: 0,
            audio_samples: 0,
        }
    }

    /// Chunks emitted so far.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn flush_chunk(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        self.chunks.push(std::mem::take(&mut self.pending));
        self.pending_frames = 0;
    }
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl Encoder for SyntheticEncoder {
    fn format(&self) -> OutputFormat {
        self.config.format
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }

    async fn push_video(&mut self, frame: &RgbaImage) -> ReelResult<()> {
        if frame.dimensions() != (self.config.width, self.config.height) {
            return Err(ReelError::encoding(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                self.config.width,
                self.config.height
            )));
        }
        self.pending
            .extend_from_slice(&fnv1a_64(frame.as_raw()).to_le_bytes());
        self.pending_frames += 1;
        self.frames += 1;
        if self.pending_frames >= self.config.chunk_frames.max(1) {
            self.flush_chunk();
        }
        Ok(())
    }

    async fn push_audio(&mut self, samples: &[f32]) -> ReelResult<()> {
        if self.config.with_audio {
            self.audio_samples += (samples.len() / FrameClock::CHANNELS) as u64;
        }
        Ok(())
    }

    async fn finalize(mut self: Box<Self>) -> ReelResult<Vec<u8>> {
        self.flush_chunk();
        if self.frames == 0 {
            return Ok(Vec::new());
        }

        let mime = self.config.format.mime_type().as_bytes();
        let (width, height) = self.config.even_dimensions();
        let body: usize = self.chunks.iter().map(Vec::len).sum();
        let mut bytes = Vec::with_capacity(CONTAINER_MAGIC.len() + 1 + mime.len() + 32 + body);
        bytes.extend_from_slice(CONTAINER_MAGIC);
        bytes.push(mime.len() as u8);
        bytes.extend_from_slice(mime);
        bytes.extend_from_slice(&width.to_le_bytes());
        bytes.extend_from_slice(&height.to_le_bytes());
        bytes.extend_from_slice(&self.config.clock.fps().to_le_bytes());
        bytes.extend_from_slice(&(self.chunks.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.frames.to_le_bytes());
        bytes.extend_from_slice(&self.audio_samples.to_le_bytes());
        for chunk in &self.chunks {
            bytes.extend_from_slice(chunk);
        }

        tracing::debug!(
            frames = self.frames,
            chunks = self.chunks.len(),
            bytes = bytes.len(),
            "Synthetic encoder finalized"
        );
        Ok(bytes)
    }

    async fn abort(self: Box<Self>) {
        tracing::debug!(frames = self.frames, "Synthetic encoder aborted");
    }
}

/// In-memory backend for tests and dry runs.
#[derive(Debug)]
pub struct SyntheticBackend {
    source: SyntheticSource,
    capabilities: PlatformCapabilities,
    mixing: bool,
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticBackend {
    /// A backend that supports every format and has an audio bus.
    pub fn new() -> Self {
        Self {
            source: SyntheticSource,
            capabilities: PlatformCapabilities::all(),
            mixing: true,
        }
    }

    pub fn with_capabilities(mut self, capabilities: PlatformCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn without_mixing(mut self) -> Self {
        self.mixing = false;
        self
    }
}

#[async_trait]
impl MediaBackend for SyntheticBackend {
    fn name(&self) -> &str {
        SCHEME
    }

    fn capabilities(&self) -> PlatformCapabilities {
        self.capabilities.clone()
    }

    fn supports_mixing(&self) -> bool {
        self.mixing
    }

    async fn fetch(&self, uri: &str, ledger: &ResourceLedger) -> ReelResult<LocalResource> {
        self.source.fetch(uri, ledger).await
    }

    async fn open(
        &self,
        resource: &LocalResource,
        options: &DecodeOptions,
    ) -> ReelResult<Box<dyn DecodedClip>> {
        self.source.open(resource, options).await
    }

    async fn start_encoder(&self, config: EncoderConfig) -> ReelResult<Box<dyn Encoder>> {
        if !self.capabilities.supports(&config.format) {
            return Err(ReelError::encoding(format!(
                "format {} is not supported by the {SCHEME} backend",
                config.format
            )));
        }
        Ok(Box::new(SyntheticEncoder::new(config)))
    }
}
