//! dayreel Compiler
//!
//! Turns an ordered list of clip references into one compiled video and
//! reports progress while doing so.
//!
//! - [`Orchestrator`]: the run state machine and resource owner
//! - [`ProgressTracker`]: cancellation-aware progress publication
//! - [`ArtifactStore`]: persistence hand-off for finished compilations
//! - [`CompilationResult`]: save, download and share actions on a finished run

pub mod orchestrator;
pub mod persistence;
pub mod result;
pub mod tracker;

pub use orchestrator::{is_settled, CompileOutcome, CompilerSettings, Orchestrator, RunReport};
pub use persistence::{ArtifactStore, LocalArtifactStore};
pub use result::{CompilationResult, ShareOutcome, SharePayload, ShareTarget};
pub use tracker::ProgressTracker;
