//! dayreel Media Engine
//!
//! Everything between a clip URI and encoded container bytes: fetching,
//! decoding, compositing with the day badge, audio routing, and
//! encoding.
//!
//! # Pipeline Architecture
//!
//! ```text
//! clip URI ── fetch ──► LocalResource ── open ──► DecodedClip
//!                                                    │
//!                       ┌────────── frames ──────────┤
//!                       ▼                            │ audio
//!               FrameCompositor                      ▼
//!          (cover-fit + "Day N" badge)         MixingSession
//!                       │                            │
//!                       └──────────► Encoder ◄───────┘
//!                                       │
//!                                       ▼
//!                                 container bytes
//! ```
//!
//! Host specifics live behind [`backend::MediaBackend`]: the ffmpeg
//! backend drives system binaries, the synthetic backend generates media
//! in memory for tests and dry runs.

pub mod backend;
pub mod compositor;
pub mod decoder;
pub mod encoder;
pub mod fetcher;
pub mod mixer;
pub mod overlay;
pub mod resources;

pub use backend::{FfmpegBackend, MediaBackend, SyntheticBackend};
pub use compositor::{ClipDrawReport, FrameCompositor, Surface};
pub use decoder::{ClipDecoder, ClipInfo, DecodeOptions, DecodedClip, DecodedFrame};
pub use encoder::{Encoder, EncoderConfig};
pub use fetcher::{ClipFetcher, HttpClipFetcher};
pub use mixer::{AudioRoute, AudioSource, MixingSession};
pub use overlay::OverlayRenderer;
pub use resources::{LocalResource, ResourceLedger};
