//! Shared fixtures for orchestrator integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dayreel_common::{DrawCadence, ReelResult};
use dayreel_compiler::{CompilerSettings, Orchestrator};
use dayreel_media_engine::decoder::DecodedFrame;
use dayreel_media_engine::mixer::AudioSource;
use dayreel_media_engine::{
    ClipInfo, DecodeOptions, DecodedClip, Encoder, EncoderConfig, LocalResource, MediaBackend,
    ResourceLedger, SyntheticBackend,
};
use dayreel_model::{ClipReference, CompilationProgress, Stage};
use dayreel_platform_core::PlatformCapabilities;
use tokio::sync::{watch, Notify};

pub const FPS: u32 = 10;

pub fn settings() -> CompilerSettings {
    CompilerSettings {
        fps: FPS,
        audio_sample_rate: 8000,
        fallback_width: 36,
        fallback_height: 64,
        draw_cadence: DrawCadence::Immediate,
        ..CompilerSettings::default()
    }
}

pub fn synthetic(duration: f64) -> ClipReference {
    ClipReference::new(format!(
        "synthetic://clip?duration={duration}&width=36&height=64"
    ))
}

pub fn failing(point: &str) -> ClipReference {
    ClipReference::new(format!(
        "synthetic://clip?duration=1&width=36&height=64&fail={point}"
    ))
}

pub fn orchestrator(backend: impl MediaBackend + 'static) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(Arc::new(backend), settings()))
}

/// Where a [`GatedBackend`] pauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePoint {
    /// Before the n-th fetch (1-based, counted across runs) returns.
    Fetch(usize),
    /// When the n-th opened clip reaches end of stream.
    EndOfClip(usize),
}

/// Rendezvous between a paused backend and the test driving it.
#[derive(Debug, Default)]
pub struct Gate {
    reached: Notify,
    release: Notify,
}

impl Gate {
    /// Wait until the backend is paused at the gate.
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    /// Let the paused backend continue.
    pub fn open(&self) {
        self.release.notify_one();
    }

    async fn pause(&self) {
        self.reached.notify_one();
        self.release.notified().await;
    }
}

/// Synthetic backend that pauses once at each scripted point.
pub struct GatedBackend {
    inner: SyntheticBackend,
    gates: Vec<(GatePoint, Arc<Gate>)>,
    fetches: AtomicUsize,
    opens: AtomicUsize,
}

impl GatedBackend {
    pub fn new(point: GatePoint) -> (Self, Arc<Gate>) {
        let (backend, mut gates) = Self::with_points(&[point]);
        let gate = gates.remove(0);
        (backend, gate)
    }

    /// One gate per point, in the order given.
    pub fn with_points(points: &[GatePoint]) -> (Self, Vec<Arc<Gate>>) {
        let gates: Vec<(GatePoint, Arc<Gate>)> = points
            .iter()
            .map(|point| (*point, Arc::new(Gate::default())))
            .collect();
        let handles = gates.iter().map(|(_, gate)| Arc::clone(gate)).collect();
        let backend = Self {
            inner: SyntheticBackend::new(),
            gates,
            fetches: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
        };
        (backend, handles)
    }

    fn gate_at(&self, point: GatePoint) -> Option<Arc<Gate>> {
        self.gates
            .iter()
            .find(|(p, _)| *p == point)
            .map(|(_, gate)| Arc::clone(gate))
    }
}

#[async_trait]
impl MediaBackend for GatedBackend {
    fn name(&self) -> &str {
        "gated"
    }

    fn capabilities(&self) -> PlatformCapabilities {
        self.inner.capabilities()
    }

    fn supports_mixing(&self) -> bool {
        self.inner.supports_mixing()
    }

    async fn fetch(&self, uri: &str, ledger: &ResourceLedger) -> ReelResult<LocalResource> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        let resource = self.inner.fetch(uri, ledger).await?;
        if let Some(gate) = self.gate_at(GatePoint::Fetch(n)) {
            gate.pause().await;
        }
        Ok(resource)
    }

    async fn open(
        &self,
        resource: &LocalResource,
        options: &DecodeOptions,
    ) -> ReelResult<Box<dyn DecodedClip>> {
        let n = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        let clip = self.inner.open(resource, options).await?;
        if let Some(gate) = self.gate_at(GatePoint::EndOfClip(n)) {
            return Ok(Box::new(GatedClip {
                inner: clip,
                gate: Some(gate),
            }));
        }
        Ok(clip)
    }

    async fn start_encoder(&self, config: EncoderConfig) -> ReelResult<Box<dyn Encoder>> {
        self.inner.start_encoder(config).await
    }
}

struct GatedClip {
    inner: Box<dyn DecodedClip>,
    gate: Option<Arc<Gate>>,
}

#[async_trait]
impl DecodedClip for GatedClip {
    fn info(&self) -> ClipInfo {
        self.inner.info()
    }

    fn audio_source(&mut self) -> Option<&mut AudioSource> {
        self.inner.audio_source()
    }

    async fn play_from_start(&mut self) -> ReelResult<()> {
        self.inner.play_from_start().await
    }

    async fn next_frame(&mut self) -> ReelResult<Option<DecodedFrame>> {
        let frame = self.inner.next_frame().await?;
        if frame.is_none() {
            if let Some(gate) = self.gate.take() {
                gate.pause().await;
            }
        }
        Ok(frame)
    }

    async fn stop(&mut self) {
        self.inner.stop().await
    }
}

/// Backend whose first clip reports zero dimensions.
pub struct ZeroSizeBackend(pub SyntheticBackend);

#[async_trait]
impl MediaBackend for ZeroSizeBackend {
    fn name(&self) -> &str {
        "zero-size"
    }

    fn capabilities(&self) -> PlatformCapabilities {
        self.0.capabilities()
    }

    fn supports_mixing(&self) -> bool {
        self.0.supports_mixing()
    }

    async fn fetch(&self, uri: &str, ledger: &ResourceLedger) -> ReelResult<LocalResource> {
        self.0.fetch(uri, ledger).await
    }

    async fn open(
        &self,
        resource: &LocalResource,
        options: &DecodeOptions,
    ) -> ReelResult<Box<dyn DecodedClip>> {
        let inner = self.0.open(resource, options).await?;
        Ok(Box::new(ZeroSizeClip(inner)))
    }

    async fn start_encoder(&self, config: EncoderConfig) -> ReelResult<Box<dyn Encoder>> {
        self.0.start_encoder(config).await
    }
}

struct ZeroSizeClip(Box<dyn DecodedClip>);

#[async_trait]
impl DecodedClip for ZeroSizeClip {
    fn info(&self) -> ClipInfo {
        ClipInfo {
            width: 0,
            height: 0,
            ..self.0.info()
        }
    }

    fn audio_source(&mut self) -> Option<&mut AudioSource> {
        self.0.audio_source()
    }

    async fn play_from_start(&mut self) -> ReelResult<()> {
        self.0.play_from_start().await
    }

    async fn next_frame(&mut self) -> ReelResult<Option<DecodedFrame>> {
        self.0.next_frame().await
    }

    async fn stop(&mut self) {
        self.0.stop().await
    }
}

/// Record every snapshot published until a terminal stage.
pub fn record_progress(
    mut rx: watch::Receiver<CompilationProgress>,
) -> tokio::task::JoinHandle<Vec<CompilationProgress>> {
    tokio::spawn(async move {
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            let terminal = snapshot.stage.is_terminal();
            seen.push(snapshot);
            if terminal {
                break;
            }
        }
        seen
    })
}

pub fn stages(seen: &[CompilationProgress]) -> Vec<Stage> {
    let mut stages: Vec<Stage> = Vec::new();
    for snapshot in seen {
        if stages.last() != Some(&snapshot.stage) {
            stages.push(snapshot.stage);
        }
    }
    stages
}

/// Whether percent never went backwards in what a subscriber observed.
/// The `Error` snapshot carries no percent and is excluded. Updates the
/// tracker refused are counted by `Orchestrator::regressing_updates`.
pub fn percents_non_decreasing(seen: &[CompilationProgress]) -> bool {
    let percents: Vec<u8> = seen
        .iter()
        .filter(|s| s.stage != Stage::Error)
        .map(|s| s.percent_complete)
        .collect();
    percents.windows(2).all(|w| w[0] <= w[1])
}
