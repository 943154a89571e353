//! Compilation orchestrator.
//!
//! Drives one run through `Idle → Loading → Processing → Finalizing →
//! Done`, with `Error` reachable from every non-terminal stage and `Idle`
//! re-entered only through [`Orchestrator::reset`].
//!
//! A run is a single task. Every sub-step boundary (before each fetch,
//! before each draw, between draw ticks, before finalization) checks the
//! run's [`CancelToken`]. Temporary resources are owned by a
//! `LoadedClips` guard that is released on every exit path.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dayreel_common::{
    AppConfig, CancelToken, DrawCadence, FrameClock, OverlayConfig, ReelError, ReelResult,
    RunClock,
};
use dayreel_media_engine::{
    ClipDrawReport, ClipInfo, DecodeOptions, DecodedClip, Encoder, EncoderConfig,
    FrameCompositor, LocalResource, MediaBackend, MixingSession, OverlayRenderer, ResourceLedger,
};
use dayreel_model::{
    loading_percent, processing_percent, ArtifactRef, CompilationProgress, CompilationRequest,
    CompiledArtifact, Stage,
};
use dayreel_platform_core::{parse_preference, resolve_output_format, OutputFormat};
use serde::Serialize;
use tokio::sync::watch;

use crate::tracker::ProgressTracker;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run parameters resolved from configuration.
#[derive(Debug, Clone)]
pub struct CompilerSettings {
    pub fps: u32,
    pub audio_sample_rate: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    /// Surface size used when the first clip reports zero dimensions.
    pub fallback_width: u32,
    pub fallback_height: u32,
    pub format_preference: Vec<OutputFormat>,
    pub draw_cadence: DrawCadence,
    /// Per-fetch and per-open time limit. `None` waits indefinitely.
    pub stall_timeout: Option<Duration>,
    pub chunk_frames: u32,
    pub scratch_dir: PathBuf,
    pub overlay: OverlayConfig,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl CompilerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let defaults = &config.compilation;
        let mut format_preference = parse_preference(&defaults.format_preference);
        if format_preference.is_empty() {
            tracing::warn!(
                configured = ?defaults.format_preference,
                "No recognised output formats configured; using built-in preference"
            );
            format_preference = OutputFormat::DEFAULT_PREFERENCE.to_vec();
        }
        Self {
            fps: defaults.fps,
            audio_sample_rate: defaults.audio_sample_rate,
            video_bitrate_kbps: defaults.video_bitrate_kbps,
            audio_bitrate_kbps: defaults.audio_bitrate_kbps,
            fallback_width: defaults.fallback_width,
            fallback_height: defaults.fallback_height,
            format_preference,
            draw_cadence: defaults.draw_cadence,
            stall_timeout: defaults.stall_timeout_secs.map(Duration::from_secs),
            chunk_frames: defaults.chunk_frames,
            scratch_dir: config.scratch_dir.clone(),
            overlay: config.overlay.clone(),
        }
    }

    /// Reject settings no run could draw or encode with.
    pub fn validate(&self) -> ReelResult<()> {
        if self.fps == 0 {
            return Err(ReelError::config("fps must be at least 1"));
        }
        if self.audio_sample_rate == 0 {
            return Err(ReelError::config("audio sample rate must be at least 1 Hz"));
        }
        if self.fallback_width == 0 || self.fallback_height == 0 {
            return Err(ReelError::config(format!(
                "fallback surface {}x{} has no area",
                self.fallback_width, self.fallback_height
            )));
        }
        Ok(())
    }

    fn frame_clock(&self) -> FrameClock {
        FrameClock::new(self.fps, self.audio_sample_rate)
    }
}

/// How a `compile` call resolved.
#[derive(Debug, Clone)]
pub enum CompileOutcome {
    /// The run finished and its artifact is published.
    Compiled(Arc<CompiledArtifact>),
    /// The run failed; the message is also in the `Error` snapshot.
    Failed(String),
    /// The run was cancelled by a reset or superseded by a newer run.
    Cancelled,
    /// The request had no clips; nothing happened.
    Empty,
}

impl CompileOutcome {
    /// The artifact, or nothing for every other outcome.
    pub fn artifact(&self) -> Option<Arc<CompiledArtifact>> {
        match self {
            Self::Compiled(artifact) => Some(Arc::clone(artifact)),
            _ => None,
        }
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self, Self::Compiled(_))
    }
}

/// Diagnostics from the most recent run that reached processing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub audio_mixed: bool,
    pub clips: Vec<ClipDrawReport>,
    pub frames: u64,
    pub elapsed_ms: u64,
}

impl RunReport {
    /// Clips whose frames carried a badge, by 1-based index.
    pub fn badged_clips(&self) -> Vec<usize> {
        self.clips
            .iter()
            .filter(|c| c.badge_frames > 0)
            .map(|c| c.clip_index)
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error("compilation cancelled")]
    Cancelled,

    #[error("failed to load clip {index} of {total}: {source}")]
    Load {
        index: usize,
        total: usize,
        source: ReelError,
    },

    #[error("failed to process clip {index} of {total}: {source}")]
    Process {
        index: usize,
        total: usize,
        source: ReelError,
    },

    #[error("{context}: {source}")]
    Stage {
        context: &'static str,
        source: ReelError,
    },
}

impl RunError {
    fn load(index: usize, total: usize) -> impl FnOnce(ReelError) -> Self {
        move |source| match source {
            ReelError::Cancelled => Self::Cancelled,
            source => Self::Load {
                index,
                total,
                source,
            },
        }
    }

    fn process(index: usize, total: usize) -> impl FnOnce(ReelError) -> Self {
        move |source| match source {
            ReelError::Cancelled => Self::Cancelled,
            source => Self::Process {
                index,
                total,
                source,
            },
        }
    }

    fn stage(context: &'static str) -> impl FnOnce(ReelError) -> Self {
        move |source| match source {
            ReelError::Cancelled => Self::Cancelled,
            source => Self::Stage { context, source },
        }
    }

    fn phase(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancel",
            Self::Load { source, .. } | Self::Process { source, .. } | Self::Stage { source, .. } => {
                source.phase()
            }
        }
    }
}

/// One fetched clip and its playback context.
struct LoadedClip {
    label: Option<u32>,
    resource: Option<LocalResource>,
    clip: Option<Box<dyn DecodedClip>>,
}

/// Owner of a run's temporary resources.
///
/// [`LoadedClips::release_all`] stops every decoder and releases every
/// resource; dropping the guard does the same without awaiting.
#[derive(Default)]
pub(crate) struct LoadedClips {
    entries: Vec<LoadedClip>,
}

impl LoadedClips {
    fn push(&mut self, label: Option<u32>, resource: LocalResource) -> &mut LoadedClip {
        self.entries.push(LoadedClip {
            label,
            resource: Some(resource),
            clip: None,
        });
        let last = self.entries.len() - 1;
        &mut self.entries[last]
    }

    fn first_info(&self) -> Option<ClipInfo> {
        self.entries
            .first()
            .and_then(|entry| entry.clip.as_ref())
            .map(|clip| clip.info())
    }

    async fn release_all(&mut self) {
        for mut entry in self.entries.drain(..) {
            if let Some(mut clip) = entry.clip.take() {
                clip.stop().await;
            }
            if let Some(resource) = entry.resource.take() {
                resource.release();
            }
        }
    }
}

impl Drop for LoadedClips {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            tracing::warn!(
                clips = self.entries.len(),
                "Releasing loaded clips without stopping playback"
            );
        }
        for mut entry in self.entries.drain(..) {
            drop(entry.clip.take());
            if let Some(resource) = entry.resource.take() {
                resource.release();
            }
        }
    }
}

/// Marks a run as active until it ends or its `compile` future is
/// dropped. A newer run's token is left in place.
struct ActiveRun<'a> {
    active: &'a Mutex<Option<CancelToken>>,
    token: CancelToken,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        let mut active = lock(self.active);
        if active.as_ref().is_some_and(|t| t.same_as(&self.token)) {
            *active = None;
        }
    }
}

struct PublishedArtifact {
    reference: ArtifactRef,
    artifact: Arc<CompiledArtifact>,
}

/// Coordinates fetch, decode, compositing, mixing and encoding for a
/// list of clips, and publishes progress and the finished artifact.
pub struct Orchestrator {
    backend: Arc<dyn MediaBackend>,
    settings: CompilerSettings,
    ledger: ResourceLedger,
    tracker: ProgressTracker,
    run_lock: tokio::sync::Mutex<()>,
    active: Mutex<Option<CancelToken>>,
    published: Mutex<Option<PublishedArtifact>>,
    last_report: Mutex<Option<RunReport>>,
    next_ref: AtomicU64,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn MediaBackend>, settings: CompilerSettings) -> Self {
        Self {
            backend,
            settings,
            ledger: ResourceLedger::new(),
            tracker: ProgressTracker::new(),
            run_lock: tokio::sync::Mutex::new(()),
            active: Mutex::new(None),
            published: Mutex::new(None),
            last_report: Mutex::new(None),
            next_ref: AtomicU64::new(1),
        }
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    pub fn backend(&self) -> &Arc<dyn MediaBackend> {
        &self.backend
    }

    /// Counts of temporary resources allocated and released by runs.
    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    /// Latest progress snapshot.
    pub fn progress(&self) -> CompilationProgress {
        self.tracker.snapshot()
    }

    /// Progress updates dropped for moving the percent backwards. Stays
    /// at zero unless a run computes its percentages out of order.
    pub fn regressing_updates(&self) -> u64 {
        self.tracker.regressions()
    }

    /// Observe progress without polling.
    pub fn subscribe(&self) -> watch::Receiver<CompilationProgress> {
        self.tracker.subscribe()
    }

    /// The currently published artifact.
    pub fn compiled_artifact(&self) -> Option<Arc<CompiledArtifact>> {
        lock(&self.published)
            .as_ref()
            .map(|p| Arc::clone(&p.artifact))
    }

    /// Reference to the currently published artifact.
    pub fn artifact_ref(&self) -> Option<ArtifactRef> {
        lock(&self.published).as_ref().map(|p| p.reference)
    }

    /// Resolve a reference handed out earlier. Fails once a newer run
    /// starts or the orchestrator is reset.
    pub fn resolve(&self, reference: ArtifactRef) -> Option<Arc<CompiledArtifact>> {
        lock(&self.published)
            .as_ref()
            .filter(|p| p.reference == reference)
            .map(|p| Arc::clone(&p.artifact))
    }

    /// Report from the most recent run that reached processing.
    pub fn last_report(&self) -> Option<RunReport> {
        lock(&self.last_report).clone()
    }

    /// Whether a run is in flight.
    pub fn is_running(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Cancel any in-flight run, return to `Idle`, and revoke the
    /// published artifact. A no-op when already idle with no artifact.
    pub fn reset(&self) {
        let cancelled = match lock(&self.active).take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        };
        let revoked = lock(&self.published).take().is_some();
        let changed = self.tracker.reset();

        if cancelled || revoked || changed {
            tracing::info!(cancelled, revoked, "Compilation reset");
        }
    }

    /// Compile `request` into a single video.
    ///
    /// An empty request resolves immediately without changing state. A
    /// call made while another run is active cancels that run and starts
    /// once it has unwound.
    pub async fn compile(&self, request: &CompilationRequest) -> CompileOutcome {
        if request.is_empty() {
            tracing::debug!("Empty compilation request ignored");
            return CompileOutcome::Empty;
        }

        let token = CancelToken::new();
        if let Some(previous) = lock(&self.active).replace(token.clone()) {
            tracing::info!("Superseding active compilation");
            previous.cancel();
        }
        let active_run = ActiveRun {
            active: &self.active,
            token: token.clone(),
        };

        let _run = self.run_lock.lock().await;
        if token.is_cancelled() {
            return CompileOutcome::Cancelled;
        }

        // A new run invalidates the previous artifact.
        lock(&self.published).take();

        let clock = RunClock::start();
        let total = request.len();
        tracing::info!(clips = total, backend = self.backend.name(), "Compilation started");

        let mut loaded = LoadedClips::default();
        let result = self.run(request, &token, &clock, &mut loaded).await;
        loaded.release_all().await;
        drop(active_run);

        match result {
            Ok(artifact) => {
                let artifact = Arc::new(artifact);
                if !self.publish_artifact(&token, Arc::clone(&artifact)) {
                    tracing::info!("Compilation cancelled after finalization");
                    return CompileOutcome::Cancelled;
                }
                self.tracker.publish(&token, CompilationProgress::done(total));
                tracing::info!(
                    clips = total,
                    bytes = artifact.size_bytes(),
                    format = %artifact.format,
                    duration_secs = artifact.duration_secs,
                    elapsed_ms = clock.elapsed_ms(),
                    "Compilation complete"
                );
                CompileOutcome::Compiled(artifact)
            }
            Err(RunError::Cancelled) => {
                tracing::info!(elapsed_ms = clock.elapsed_ms(), "Compilation cancelled");
                CompileOutcome::Cancelled
            }
            Err(_) if token.is_cancelled() => {
                tracing::info!("Compilation cancelled while failing");
                CompileOutcome::Cancelled
            }
            Err(error) => {
                let message = error.to_string();
                tracing::error!(phase = error.phase(), error = %message, "Compilation failed");
                self.tracker
                    .publish(&token, CompilationProgress::error(total, &message));
                CompileOutcome::Failed(message)
            }
        }
    }

    fn publish_artifact(&self, token: &CancelToken, artifact: Arc<CompiledArtifact>) -> bool {
        let mut published = lock(&self.published);
        if token.is_cancelled() {
            return false;
        }
        let reference = ArtifactRef(self.next_ref.fetch_add(1, Ordering::Relaxed));
        *published = Some(PublishedArtifact {
            reference,
            artifact,
        });
        true
    }

    async fn within<T>(
        &self,
        future: impl Future<Output = ReelResult<T>>,
        on_stall: fn(String) -> ReelError,
        what: &str,
    ) -> ReelResult<T> {
        match self.settings.stall_timeout {
            Some(limit) => tokio::time::timeout(limit, future)
                .await
                .map_err(|_| on_stall(format!("{what} stalled for {}s", limit.as_secs_f64())))?,
            None => future.await,
        }
    }

    async fn run(
        &self,
        request: &CompilationRequest,
        token: &CancelToken,
        clock: &RunClock,
        loaded: &mut LoadedClips,
    ) -> Result<CompiledArtifact, RunError> {
        let total = request.len();
        let options = DecodeOptions {
            frame_clock: self.settings.frame_clock(),
        };

        // Loading
        self.tracker.begin_run(token, total);

        for (i, reference) in request.iter().enumerate() {
            let index = i + 1;
            token.check().map_err(RunError::load(index, total))?;
            self.tracker.publish(
                token,
                CompilationProgress::loading_clip(index, total, loading_percent(i, total)),
            );

            let uri = reference.source_location.as_str();
            let resource = self
                .within(self.backend.fetch(uri, &self.ledger), ReelError::fetch, "fetch")
                .await
                .map_err(RunError::load(index, total))?;

            let entry = loaded.push(reference.overlay_label, resource);
            let Some(resource) = entry.resource.as_ref() else {
                return Err(RunError::load(index, total)(ReelError::fetch(
                    "resource missing after fetch",
                )));
            };
            let clip = self
                .within(self.backend.open(resource, &options), ReelError::decode, "decode")
                .await
                .map_err(RunError::load(index, total))?;
            let info = clip.info();
            entry.clip = Some(clip);

            tracing::info!(
                clip_index = index,
                uri = %uri,
                width = info.width,
                height = info.height,
                duration_secs = info.duration_secs,
                "Clip loaded"
            );
            self.tracker.publish(
                token,
                CompilationProgress::loading_clip(index, total, loading_percent(index, total)),
            );
        }

        // Processing
        token.check().map_err(RunError::stage("processing"))?;

        let (width, height) = match loaded.first_info() {
            Some(info) if info.width > 0 && info.height > 0 => (info.width, info.height),
            _ => {
                tracing::warn!(
                    width = self.settings.fallback_width,
                    height = self.settings.fallback_height,
                    "First clip reported no dimensions; using fallback surface size"
                );
                (self.settings.fallback_width, self.settings.fallback_height)
            }
        };

        let capabilities = self.backend.capabilities();
        let format = resolve_output_format(&self.settings.format_preference, &capabilities)
            .ok_or_else(|| RunError::Stage {
                context: "failed to start encoder",
                source: ReelError::encoding("no supported output format"),
            })?;

        let mixing = self.backend.supports_mixing();
        if !mixing {
            tracing::warn!("Audio mixing unavailable; producing video-only output");
        }
        let with_audio = mixing && capabilities.supports_audio(&format);

        let encoder_config = EncoderConfig {
            width,
            height,
            format,
            clock: options.frame_clock,
            video_bitrate_kbps: self.settings.video_bitrate_kbps,
            audio_bitrate_kbps: self.settings.audio_bitrate_kbps,
            with_audio,
            chunk_frames: self.settings.chunk_frames,
            scratch_dir: self.settings.scratch_dir.clone(),
        };
        let (out_width, out_height) = encoder_config.even_dimensions();
        let mut encoder = self
            .backend
            .start_encoder(encoder_config)
            .await
            .map_err(RunError::stage("failed to start encoder"))?;
        tracing::info!(format = %format, width, height, with_audio, "Encoder started");

        let mut compositor = FrameCompositor::new(
            width,
            height,
            OverlayRenderer::new(&self.settings.overlay),
            self.settings.draw_cadence,
            options.frame_clock,
        );
        let mut mixer = with_audio.then(|| MixingSession::open(options.frame_clock));

        let drawn = self
            .draw_all(loaded, token, &mut compositor, mixer.as_mut(), encoder.as_mut())
            .await;
        let reports = match drawn {
            Ok(reports) => reports,
            Err(error) => {
                encoder.abort().await;
                return Err(error);
            }
        };

        *lock(&self.last_report) = Some(RunReport {
            format,
            width: out_width,
            height: out_height,
            audio_mixed: with_audio,
            clips: reports,
            frames: compositor.output_frames(),
            elapsed_ms: clock.elapsed_ms(),
        });

        // Finalizing
        if let Err(error) = token.check() {
            encoder.abort().await;
            return Err(RunError::stage("finalizing")(error));
        }
        self.tracker
            .publish(token, CompilationProgress::finalizing(total));

        let bytes = encoder
            .finalize()
            .await
            .map_err(RunError::stage("failed to finalize video"))?;
        if bytes.is_empty() {
            return Err(RunError::Stage {
                context: "failed to finalize video",
                source: ReelError::encoding("encoder produced no data"),
            });
        }
        token.check().map_err(RunError::stage("finalizing"))?;

        Ok(CompiledArtifact {
            bytes,
            format,
            clip_count: total,
            duration_secs: options.frame_clock.frames_to_secs(compositor.output_frames()),
            width: out_width,
            height: out_height,
            created_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    async fn draw_all(
        &self,
        loaded: &mut LoadedClips,
        token: &CancelToken,
        compositor: &mut FrameCompositor,
        mut mixer: Option<&mut MixingSession>,
        encoder: &mut dyn Encoder,
    ) -> Result<Vec<ClipDrawReport>, RunError> {
        let total = loaded.entries.len();
        let mut reports = Vec::with_capacity(total);

        for (i, entry) in loaded.entries.iter_mut().enumerate() {
            let index = i + 1;
            token.check().map_err(RunError::process(index, total))?;
            self.tracker.publish(
                token,
                CompilationProgress::processing_clip(index, total, processing_percent(i, total)),
            );

            let Some(clip) = entry.clip.as_mut() else {
                return Err(RunError::process(index, total)(ReelError::decode(
                    "clip was not opened",
                )));
            };
            let report = compositor
                .draw_clip(
                    index,
                    &mut **clip,
                    entry.label,
                    mixer.as_deref_mut(),
                    encoder,
                    token,
                )
                .await
                .map_err(RunError::process(index, total))?;
            reports.push(report);

            self.tracker.publish(
                token,
                CompilationProgress::processing_clip(
                    index,
                    total,
                    processing_percent(index, total),
                ),
            );
        }
        Ok(reports)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("backend", &self.backend.name())
            .field("stage", &self.progress().stage)
            .field("outstanding_resources", &self.ledger.outstanding())
            .finish()
    }
}

/// Whether `stage` is one a finished `compile` call can leave behind.
pub fn is_settled(stage: Stage) -> bool {
    matches!(stage, Stage::Idle | Stage::Done | Stage::Error)
}
