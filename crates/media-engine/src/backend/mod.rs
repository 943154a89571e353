//! Media backends.
//!
//! A backend bundles everything host-specific: how clips are fetched and
//! decoded, which formats can be encoded, whether an audio bus exists.
//! The orchestrator only ever talks to [`MediaBackend`].

pub mod ffmpeg;
pub mod synthetic;

use async_trait::async_trait;
use dayreel_common::ReelResult;
use dayreel_platform_core::PlatformCapabilities;

use crate::decoder::{DecodeOptions, DecodedClip};
use crate::encoder::{Encoder, EncoderConfig};
use crate::resources::{LocalResource, ResourceLedger};

pub use ffmpeg::FfmpegBackend;
pub use synthetic::SyntheticBackend;

/// Host media stack seen by the orchestrator.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Human-readable backend name.
    fn name(&self) -> &str;

    /// Containers and codecs this host can encode.
    fn capabilities(&self) -> PlatformCapabilities;

    /// Whether an audio mixing bus can be opened. Without one, runs
    /// produce video-only output.
    fn supports_mixing(&self) -> bool;

    /// Fetch a clip into a local resource.
    async fn fetch(&self, uri: &str, ledger: &ResourceLedger) -> ReelResult<LocalResource>;

    /// Open a fetched clip for muted playback.
    async fn open(
        &self,
        resource: &LocalResource,
        options: &DecodeOptions,
    ) -> ReelResult<Box<dyn DecodedClip>>;

    /// Start an encoder for one run.
    async fn start_encoder(&self, config: EncoderConfig) -> ReelResult<Box<dyn Encoder>>;
}
