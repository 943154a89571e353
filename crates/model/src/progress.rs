//! Compilation progress snapshots.
//!
//! A run moves through `Idle → Loading → Processing → Finalizing → Done`,
//! with `Error` reachable from any non-terminal stage. Percentages are
//! split into fixed sub-ranges so they only ever grow within a run:
//!
//! | Stage       | Range   |
//! |-------------|---------|
//! | Loading     | 5..=30  |
//! | Processing  | 30..=90 |
//! | Finalizing  | 95      |
//! | Done        | 100     |

use serde::{Deserialize, Serialize};

/// Percent published when loading starts.
pub const LOADING_START_PERCENT: u8 = 5;
/// Percent reached once every clip is loaded.
pub const LOADING_END_PERCENT: u8 = 30;
/// Percent reached once every clip is drawn.
pub const PROCESSING_END_PERCENT: u8 = 90;
/// Percent published while the encoder flushes.
pub const FINALIZING_PERCENT: u8 = 95;
/// Percent pinned on completion.
pub const DONE_PERCENT: u8 = 100;

/// Orchestrator stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Idle,
    Loading,
    Processing,
    Finalizing,
    Done,
    Error,
}

impl Stage {
    /// Whether a run has settled in this stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Whether a run is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Loading | Self::Processing | Self::Finalizing)
    }

    /// Heading shown by the progress overlay.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Idle => "",
            Self::Done => "Video Ready!",
            Self::Error => "Compilation Failed",
            Self::Loading | Self::Processing | Self::Finalizing => "Creating Your Video",
        }
    }
}

/// A snapshot of compilation progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CompilationProgress {
    pub stage: Stage,

    /// 1-based index of the clip being worked on, 0 when none.
    pub current_clip_index: usize,

    pub total_clips: usize,

    /// Overall completion in `[0, 100]`.
    pub percent_complete: u8,

    /// Human-readable status line.
    pub status_message: String,
}

impl CompilationProgress {
    /// The initial idle snapshot.
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn loading_started(total_clips: usize) -> Self {
        Self {
            stage: Stage::Loading,
            current_clip_index: 0,
            total_clips,
            percent_complete: LOADING_START_PERCENT,
            status_message: "Loading video clips...".to_string(),
        }
    }

    /// Published before clip `index` (1-based) is fetched.
    pub fn loading_clip(index: usize, total_clips: usize, percent_complete: u8) -> Self {
        Self {
            stage: Stage::Loading,
            current_clip_index: index,
            total_clips,
            percent_complete,
            status_message: format!("Loading clip {index} of {total_clips}..."),
        }
    }

    /// Published before clip `index` (1-based) is drawn.
    pub fn processing_clip(index: usize, total_clips: usize, percent_complete: u8) -> Self {
        Self {
            stage: Stage::Processing,
            current_clip_index: index,
            total_clips,
            percent_complete,
            status_message: format!("Processing clip {index} of {total_clips}..."),
        }
    }

    pub fn finalizing(total_clips: usize) -> Self {
        Self {
            stage: Stage::Finalizing,
            current_clip_index: total_clips,
            total_clips,
            percent_complete: FINALIZING_PERCENT,
            status_message: "Finalizing video...".to_string(),
        }
    }

    pub fn done(total_clips: usize) -> Self {
        Self {
            stage: Stage::Done,
            current_clip_index: total_clips,
            total_clips,
            percent_complete: DONE_PERCENT,
            status_message: "Compilation complete!".to_string(),
        }
    }

    pub fn error(total_clips: usize, message: impl AsRef<str>) -> Self {
        Self {
            stage: Stage::Error,
            current_clip_index: 0,
            total_clips,
            percent_complete: 0,
            status_message: format!("Error: {}", message.as_ref()),
        }
    }

    /// Whether moving from `self` to `next` keeps the run's percent
    /// non-decreasing. Resets and errors are always allowed.
    pub fn permits(&self, next: &CompilationProgress) -> bool {
        match next.stage {
            Stage::Idle | Stage::Error => true,
            _ if self.stage.is_active() => next.percent_complete >= self.percent_complete,
            _ => true,
        }
    }
}

/// Percent after `loaded` of `total` clips finished loading.
pub fn loading_percent(loaded: usize, total: usize) -> u8 {
    interpolate(LOADING_START_PERCENT, LOADING_END_PERCENT, loaded, total)
}

/// Percent after `drawn` of `total` clips finished drawing.
pub fn processing_percent(drawn: usize, total: usize) -> u8 {
    interpolate(LOADING_END_PERCENT, PROCESSING_END_PERCENT, drawn, total)
}

fn interpolate(start: u8, end: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return start;
    }
    let fraction = done.min(total) as f64 / total as f64;
    let span = (end - start) as f64;
    start + (fraction * span).round() as u8
}
