//! ffmpeg-based media backend.
//!
//! Clips are probed with `ffprobe` and decoded by two `ffmpeg` child
//! processes per clip: one emitting raw RGBA frames at the output frame
//! rate, one emitting interleaved stereo `f32le` at the bus sample rate.
//! Encoding pipes surface frames into an `ffmpeg` encoder while audio is
//! spooled to a scratch file; finalization muxes the two in a second
//! pass.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dayreel_common::{AppConfig, FrameClock, ReelError, ReelResult};
use dayreel_platform_core::{
    AudioCodec, Container, OutputFormat, PlatformCapabilities, VideoCodec,
};
use image::RgbaImage;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::decoder::{
    AudioChunk, ClipDecoder, ClipInfo, DecodeOptions, DecodedClip, DecodedFrame, VideoFrame,
};
use crate::encoder::{Encoder, EncoderConfig};
use crate::fetcher::{ClipFetcher, HttpClipFetcher};
use crate::mixer::AudioSource;
use crate::resources::{LocalResource, ResourceLedger};

use super::MediaBackend;

/// Whether `binary` can be found on `PATH`.
pub fn command_exists(binary: &str) -> bool {
    std::process::Command::new(binary)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn scratch_name(scratch_dir: &Path, stem: &str, ext: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    scratch_dir.join(format!("{stem}-{}-{n}.{ext}", std::process::id()))
}

/// Collect a child's stderr in the background so it never blocks on a
/// full pipe.
fn drain_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    let mut stderr = child.stderr.take()?;
    Some(tokio::spawn(async move {
        let mut output = String::new();
        match stderr.read_to_string(&mut output).await {
            Ok(_) => output,
            Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
        }
    }))
}

async fn collect_stderr(task: Option<JoinHandle<String>>) -> String {
    match task {
        Some(task) => task
            .await
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string()),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Encoder name ffmpeg uses for a video codec.
fn video_encoder_name(codec: VideoCodec) -> &'static str {
    match codec {
        VideoCodec::H264 => "libx264",
        VideoCodec::Vp9 => "libvpx-vp9",
        VideoCodec::Vp8 => "libvpx",
    }
}

fn audio_encoder_name(codec: AudioCodec) -> &'static str {
    match codec {
        AudioCodec::Aac => "aac",
        AudioCodec::Opus => "libopus",
    }
}

fn muxer_name(container: Container) -> &'static str {
    match container {
        Container::Mp4 => "mp4",
        Container::Webm => "webm",
    }
}

/// Build capabilities from `ffmpeg -encoders` and `ffmpeg -muxers`
/// listings.
pub fn parse_ffmpeg_listing(encoders: &str, muxers: &str) -> PlatformCapabilities {
    // Listing rows look like " V....D libx264   H.264 ..." and
    // "  E mp4   MP4 (MPEG-4 Part 14)"; the name is the second column.
    let names = |listing: &str| -> Vec<String> {
        listing
            .lines()
            .filter_map(|line| {
                let mut columns = line.split_whitespace();
                let flags = columns.next()?;
                let name = columns.next()?;
                (name != "=" && flags != "--").then(|| name.to_string())
            })
            .collect()
    };
    let encoder_names = names(encoders);
    let muxer_names = names(muxers);
    let has_encoder = |name: &str| encoder_names.iter().any(|n| n == name);
    let has_muxer = |name: &str| {
        muxer_names
            .iter()
            .any(|n| n.split(',').any(|alias| alias == name))
    };

    let mut caps = PlatformCapabilities::default();
    for container in [Container::Mp4, Container::Webm] {
        if has_muxer(muxer_name(container)) {
            caps = caps.with_container(container);
        }
    }
    for codec in [VideoCodec::H264, VideoCodec::Vp9, VideoCodec::Vp8] {
        if has_encoder(video_encoder_name(codec)) {
            caps = caps.with_video_codec(codec);
        }
    }
    for codec in [AudioCodec::Aac, AudioCodec::Opus] {
        if has_encoder(audio_encoder_name(codec)) {
            caps = caps.with_audio_codec(codec);
        }
    }
    caps
}

async fn ffmpeg_listing(flag: &str) -> ReelResult<String> {
    let output = Command::new("ffmpeg")
        .args(["-hide_banner", flag])
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| ReelError::unsupported(format!("failed to run ffmpeg {flag}: {e}")))?;
    if !output.status.success() {
        return Err(ReelError::unsupported(format!(
            "ffmpeg {flag} failed (status {})",
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Ask the installed ffmpeg what it can encode and mux.
pub async fn probe_capabilities() -> ReelResult<PlatformCapabilities> {
    let encoders = ffmpeg_listing("-encoders").await?;
    let muxers = ffmpeg_listing("-muxers").await?;
    Ok(parse_ffmpeg_listing(&encoders, &muxers))
}

// ---------------------------------------------------------------------------
// Probing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    #[serde(default)]
    tags: std::collections::HashMap<String, String>,
    #[serde(default)]
    side_data_list: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

impl ProbeStream {
    /// Display rotation in degrees, from either the legacy `rotate` tag
    /// or display-matrix side data.
    fn rotation(&self) -> i64 {
        if let Some(rotate) = self.tags.get("rotate").and_then(|r| r.parse::<i64>().ok()) {
            return rotate;
        }
        self.side_data_list
            .iter()
            .find_map(|entry| {
                let rotation = entry.get("rotation")?;
                rotation
                    .as_i64()
                    .or_else(|| rotation.as_f64().map(|r| r.round() as i64))
            })
            .unwrap_or(0)
    }
}

/// Parse `ffprobe -of json` output into clip properties.
///
/// Width and height are reported as displayed, after rotation, since
/// ffmpeg auto-rotates when decoding.
pub fn parse_probe_output(json: &str) -> ReelResult<ClipInfo> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| ReelError::decode(format!("unreadable ffprobe output: {e}")))?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| ReelError::decode("no video stream"))?;
    let has_audio = probe
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    let (mut width, mut height) = (video.width.unwrap_or(0), video.height.unwrap_or(0));
    if video.rotation().rem_euclid(180) == 90 {
        std::mem::swap(&mut width, &mut height);
    }

    let parse_secs = |s: &Option<String>| s.as_deref().and_then(|d| d.parse::<f64>().ok());
    let duration_secs = parse_secs(&video.duration)
        .or_else(|| probe.format.as_ref().and_then(|f| parse_secs(&f.duration)))
        .unwrap_or(0.0);

    Ok(ClipInfo {
        width,
        height,
        duration_secs,
        has_audio,
    })
}

async fn probe_clip(path: &Path) -> ReelResult<ClipInfo> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "stream=codec_type,width,height,duration:stream_tags=rotate:stream_side_data=rotation:format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| ReelError::decode(format!("failed to start ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(ReelError::decode(format!(
            "ffprobe failed (status {}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Read exactly `buf.len()` bytes, or report a clean end of stream.
///
/// A stream that ends part-way through is treated as ended; the partial
/// tail is dropped.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(true)
}

struct DecodeProcess {
    child: Child,
    stdout: ChildStdout,
}

impl DecodeProcess {
    fn spawn(path: &Path, output_args: &[String]) -> ReelResult<Self> {
        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(output_args)
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ReelError::decode(format!("failed to start ffmpeg decoder: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ReelError::decode("failed to capture ffmpeg stdout"))?;
        Ok(Self { child, stdout })
    }

    async fn kill(mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

/// A clip decoded by ffmpeg child processes.
pub struct FfmpegClip {
    path: PathBuf,
    info: ClipInfo,
    clock: FrameClock,
    video: Option<DecodeProcess>,
    audio_process: Option<DecodeProcess>,
    audio: Option<AudioSource>,
    pending: Option<DecodedFrame>,
    frame_index: u64,
}

impl FfmpegClip {
    fn video_args(&self) -> Vec<String> {
        vec![
            "-map".into(),
            "0:v:0".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgba".into(),
            "-r".into(),
            self.clock.fps().to_string(),
        ]
    }

    fn audio_args(&self) -> Vec<String> {
        vec![
            "-map".into(),
            "0:a:0".into(),
            "-f".into(),
            "f32le".into(),
            "-ac".into(),
            FrameClock::CHANNELS.to_string(),
            "-ar".into(),
            self.clock.sample_rate().to_string(),
        ]
    }

    async fn restart(&mut self) -> ReelResult<()> {
        self.shutdown().await;
        self.video = Some(DecodeProcess::spawn(&self.path, &self.video_args())?);
        if self.info.has_audio {
            self.audio_process = Some(DecodeProcess::spawn(&self.path, &self.audio_args())?);
        }
        self.frame_index = 0;
        self.pending = self.read_frame().await?;
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Some(process) = self.video.take() {
            process.kill().await;
        }
        if let Some(process) = self.audio_process.take() {
            process.kill().await;
        }
        self.pending = None;
    }

    async fn read_frame(&mut self) -> ReelResult<Option<DecodedFrame>> {
        let Some(video) = self.video.as_mut() else {
            return Ok(None);
        };
        let frame_bytes = self.info.width as usize * self.info.height as usize * 4;
        let mut buf = vec![0u8; frame_bytes];
        let complete = read_full(&mut video.stdout, &mut buf)
            .await
            .map_err(|e| ReelError::decode(format!("failed reading decoded frame: {e}")))?;
        if !complete || frame_bytes == 0 {
            return Ok(None);
        }
        let image = RgbaImage::from_raw(self.info.width, self.info.height, buf)
            .ok_or_else(|| ReelError::decode("decoded frame has the wrong size"))?;

        let index = self.frame_index;
        self.frame_index += 1;
        let audio = self.read_audio(index).await?;

        Ok(Some(DecodedFrame {
            video: VideoFrame {
                pts_secs: self.clock.frames_to_secs(index),
                image,
            },
            audio,
        }))
    }

    async fn read_audio(&mut self, index: u64) -> ReelResult<Option<AudioChunk>> {
        let Some(process) = self.audio_process.as_mut() else {
            return Ok(None);
        };
        let len = self.clock.interleaved_len_for_frame(index);
        let mut buf = vec![0u8; len * 4];
        // Audio may end before video; the mixer pads short chunks.
        let mut filled = 0;
        while filled < buf.len() {
            let n = process
                .stdout
                .read(&mut buf[filled..])
                .await
                .map_err(|e| ReelError::decode(format!("failed reading decoded audio: {e}")))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        let samples = buf[..filled - filled % 4]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Some(AudioChunk { samples }))
    }
}

#[async_trait]
impl DecodedClip for FfmpegClip {
    fn info(&self) -> ClipInfo {
        self.info
    }

    fn audio_source(&mut self) -> Option<&mut AudioSource> {
        self.audio.as_mut()
    }

    async fn play_from_start(&mut self) -> ReelResult<()> {
        if self.frame_index == 1 && self.pending.is_some() {
            return Ok(());
        }
        self.restart().await
    }

    async fn next_frame(&mut self) -> ReelResult<Option<DecodedFrame>> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        self.read_frame().await
    }

    async fn stop(&mut self) {
        self.shutdown().await;
        if let Some(source) = self.audio.as_mut() {
            source.mute();
        }
    }
}

/// Opens clips with ffprobe + ffmpeg.
#[derive(Debug, Default)]
pub struct FfmpegDecoder;

#[async_trait]
impl ClipDecoder for FfmpegDecoder {
    async fn open(
        &self,
        resource: &LocalResource,
        options: &DecodeOptions,
    ) -> ReelResult<Box<dyn DecodedClip>> {
        let path = resource
            .path()
            .ok_or_else(|| ReelError::decode("ffmpeg decodes file-backed resources only"))?
            .to_path_buf();
        let info = probe_clip(&path).await?;

        let mut clip = FfmpegClip {
            path,
            info,
            clock: options.frame_clock,
            video: None,
            audio_process: None,
            audio: info.has_audio.then(AudioSource::muted),
            pending: None,
            frame_index: 0,
        };
        clip.restart().await?;
        if clip.pending.is_none() {
            clip.shutdown().await;
            return Err(ReelError::decode(format!(
                "no decodable frames in {}",
                resource.source_uri()
            )));
        }
        tracing::debug!(
            uri = %resource.source_uri(),
            width = info.width,
            height = info.height,
            duration_secs = info.duration_secs,
            has_audio = info.has_audio,
            "Clip opened"
        );
        Ok(Box::new(clip))
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn video_codec_args(format: OutputFormat, bitrate_kbps: u32) -> Vec<String> {
    let mut args = strings(&["-c:v", video_encoder_name(format.video_codec)]);
    match format.video_codec {
        VideoCodec::H264 => args.extend(strings(&["-preset", "veryfast"])),
        VideoCodec::Vp9 | VideoCodec::Vp8 => {
            args.extend(strings(&["-deadline", "realtime", "-cpu-used", "8"]))
        }
    }
    args.extend([
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-b:v".into(),
        format!("{}k", bitrate_kbps.max(100)),
    ]);
    args
}

fn container_args(format: OutputFormat) -> Vec<String> {
    match format.container {
        Container::Mp4 => vec![
            "-f".into(),
            "mp4".into(),
            "-movflags".into(),
            "+faststart".into(),
        ],
        Container::Webm => vec!["-f".into(), "webm".into()],
    }
}

/// Arguments for the first pass: raw RGBA on stdin to a video-only file.
fn video_pass_args(config: &EncoderConfig, output: &Path) -> Vec<String> {
    let (even_w, even_h) = config.even_dimensions();
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-v".into(),
        "error".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgba".into(),
        "-s".into(),
        format!("{}x{}", config.width, config.height),
        "-framerate".into(),
        config.clock.fps().to_string(),
        "-i".into(),
        "-".into(),
    ];
    if (even_w, even_h) != (config.width, config.height) {
        args.extend(["-vf".into(), format!("crop={even_w}:{even_h}:0:0")]);
    }
    args.extend(video_codec_args(config.format, config.video_bitrate_kbps));
    args.extend(container_args(config.format));
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Arguments for the second pass: copy video, encode spooled audio.
fn mux_pass_args(config: &EncoderConfig, video: &Path, audio: &Path, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-v".into(),
        "error".into(),
        "-i".into(),
        video.to_string_lossy().into_owned(),
        "-f".into(),
        "f32le".into(),
        "-ar".into(),
        config.clock.sample_rate().to_string(),
        "-ac".into(),
        FrameClock::CHANNELS.to_string(),
        "-i".into(),
        audio.to_string_lossy().into_owned(),
        "-map".into(),
        "0:v:0".into(),
        "-map".into(),
        "1:a:0".into(),
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        audio_encoder_name(config.format.audio_codec).into(),
        "-b:a".into(),
        format!("{}k", config.audio_bitrate_kbps.max(32)),
    ];
    args.extend(container_args(config.format));
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Two-pass ffmpeg encoder.
pub struct FfmpegEncoder {
    config: EncoderConfig,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_task: Option<JoinHandle<String>>,
    video_path: PathBuf,
    audio_path: Option<PathBuf>,
    audio_writer: Option<BufWriter<tokio::fs::File>>,
    audio_bytes: u64,
    output_path: PathBuf,
    frames: u64,
}

impl FfmpegEncoder {
    pub async fn start(config: EncoderConfig) -> ReelResult<Self> {
        tokio::fs::create_dir_all(&config.scratch_dir)
            .await
            .map_err(|e| ReelError::encoding(format!("cannot create scratch directory: {e}")))?;

        let ext = config.format.extension();
        let video_path = scratch_name(&config.scratch_dir, "encode-video", ext);
        let output_path = scratch_name(&config.scratch_dir, "encode-output", ext);

        let (audio_path, audio_writer) = if config.with_audio {
            let path = scratch_name(&config.scratch_dir, "encode-audio", "f32");
            let file = tokio::fs::File::create(&path)
                .await
                .map_err(|e| ReelError::encoding(format!("cannot create audio spool: {e}")))?;
            (Some(path), Some(BufWriter::new(file)))
        } else {
            (None, None)
        };

        let args = video_pass_args(&config, &video_path);
        tracing::debug!(args = ?args, "Starting ffmpeg encoder");
        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ReelError::encoding(format!("failed to start ffmpeg: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ReelError::encoding("failed to capture ffmpeg stdin"))?;
        let stderr_task = drain_stderr(&mut child);

        tracing::info!(
            pid = child.id(),
            format = %config.format,
            width = config.width,
            height = config.height,
            "ffmpeg encoder started"
        );

        Ok(Self {
            config,
            child,
            stdin: Some(stdin),
            stderr_task,
            video_path,
            audio_path,
            audio_writer,
            audio_bytes: 0,
            output_path,
            frames: 0,
        })
    }

    async fn cleanup(&self) {
        for path in [Some(&self.video_path), self.audio_path.as_ref(), Some(&self.output_path)]
            .into_iter()
            .flatten()
        {
            let _ = tokio::fs::remove_file(path).await;
        }
    }

    async fn finish(&mut self) -> ReelResult<Vec<u8>> {
        drop(self.stdin.take());
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| ReelError::encoding(format!("failed to wait on ffmpeg: {e}")))?;
        let stderr = collect_stderr(self.stderr_task.take()).await;
        if !status.success() {
            return Err(ReelError::encoding(format!(
                "ffmpeg encode failed (status {status}): {}",
                stderr.trim()
            )));
        }

        if let Some(mut writer) = self.audio_writer.take() {
            writer
                .flush()
                .await
                .map_err(|e| ReelError::encoding(format!("failed to flush audio spool: {e}")))?;
        }

        match &self.audio_path {
            Some(audio_path) if self.audio_bytes > 0 => {
                let args = mux_pass_args(&self.config, &self.video_path, audio_path, &self.output_path);
                let output = Command::new("ffmpeg")
                    .args(&args)
                    .stdin(Stdio::null())
                    .output()
                    .await
                    .map_err(|e| ReelError::encoding(format!("failed to start ffmpeg mux: {e}")))?;
                if !output.status.success() {
                    return Err(ReelError::encoding(format!(
                        "ffmpeg mux failed (status {}): {}",
                        output.status,
                        String::from_utf8_lossy(&output.stderr).trim()
                    )));
                }
            }
            _ => {
                tokio::fs::rename(&self.video_path, &self.output_path)
                    .await
                    .map_err(|e| ReelError::encoding(format!("failed to move output: {e}")))?;
            }
        }

        tokio::fs::read(&self.output_path)
            .await
            .map_err(|e| ReelError::encoding(format!("failed to read encoded output: {e}")))
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
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
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ReelError::encoding("encoder input already closed"))?;
        stdin
            .write_all(frame.as_raw())
            .await
            .map_err(|e| ReelError::encoding(format!("failed to write frame to ffmpeg: {e}")))?;
        self.frames += 1;
        Ok(())
    }

    async fn push_audio(&mut self, samples: &[f32]) -> ReelResult<()> {
        let Some(writer) = self.audio_writer.as_mut() else {
            return Ok(());
        };
        let mut bytes = Vec::with_capacity(samples.len() * 4);
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        writer
            .write_all(&bytes)
            .await
            .map_err(|e| ReelError::encoding(format!("failed to spool audio: {e}")))?;
        self.audio_bytes += bytes.len() as u64;
        Ok(())
    }

    async fn finalize(mut self: Box<Self>) -> ReelResult<Vec<u8>> {
        let result = self.finish().await;
        self.cleanup().await;
        if let Ok(bytes) = &result {
            tracing::info!(frames = self.frames, bytes = bytes.len(), "ffmpeg encoder finalized");
        }
        result
    }

    async fn abort(mut self: Box<Self>) {
        drop(self.stdin.take());
        drop(self.audio_writer.take());
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        let _ = collect_stderr(self.stderr_task.take()).await;
        self.cleanup().await;
        tracing::debug!(frames = self.frames, "ffmpeg encoder aborted");
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Backend driving the system's `ffmpeg` and `ffprobe`.
pub struct FfmpegBackend {
    fetcher: HttpClipFetcher,
    decoder: FfmpegDecoder,
    capabilities: PlatformCapabilities,
}

impl FfmpegBackend {
    /// Check that ffmpeg is installed and probe what it can encode.
    pub async fn detect(config: &AppConfig) -> ReelResult<Self> {
        for binary in ["ffmpeg", "ffprobe"] {
            if !command_exists(binary) {
                return Err(ReelError::unsupported(format!("{binary} not found on PATH")));
            }
        }
        let capabilities = probe_capabilities().await?;
        tracing::info!(capabilities = ?capabilities, "ffmpeg backend ready");
        Ok(Self {
            fetcher: HttpClipFetcher::new(&config.scratch_dir)?,
            decoder: FfmpegDecoder,
            capabilities,
        })
    }
}

#[async_trait]
impl MediaBackend for FfmpegBackend {
    fn name(&self) -> &str {
        self.decoder.name()
    }

    fn capabilities(&self) -> PlatformCapabilities {
        self.capabilities.clone()
    }

    fn supports_mixing(&self) -> bool {
        !self.capabilities.audio_codecs.is_empty()
    }

    async fn fetch(&self, uri: &str, ledger: &ResourceLedger) -> ReelResult<LocalResource> {
        self.fetcher.fetch(uri, ledger).await
    }

    async fn open(
        &self,
        resource: &LocalResource,
        options: &DecodeOptions,
    ) -> ReelResult<Box<dyn DecodedClip>> {
        self.decoder.open(resource, options).await
    }

    async fn start_encoder(&self, mut config: EncoderConfig) -> ReelResult<Box<dyn Encoder>> {
        if !self.capabilities.supports(&config.format) {
            return Err(ReelError::encoding(format!(
                "ffmpeg cannot produce {}",
                config.format
            )));
        }
        if config.with_audio && !self.capabilities.supports_audio(&config.format) {
            tracing::warn!(format = %config.format, "Audio codec unavailable; encoding video only");
            config.with_audio = false;
        }
        Ok(Box::new(FfmpegEncoder::start(config).await?))
    }
}
