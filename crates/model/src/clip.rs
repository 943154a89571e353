//! Clip references and compilation requests.

use serde::{Deserialize, Serialize};

/// One source clip to include in a compilation.
///
/// Immutable input; position in the request is playback position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipReference {
    /// Where the clip lives (`https://`, `file://`, `synthetic://`).
    pub source_location: String,

    /// Day number drawn as a "Day N" badge over the clip's frames.
    #[serde(default)]
    pub overlay_label: Option<u32>,

    /// Stored clip id, forwarded to the compilation record on save.
    #[serde(default)]
    pub clip_id: Option<String>,

    /// Duration known from the clip record, if any. Informational only.
    #[serde(default)]
    pub duration_hint_secs: Option<f64>,
}

impl ClipReference {
    pub fn new(source_location: impl Into<String>) -> Self {
        Self {
            source_location: source_location.into(),
            overlay_label: None,
            clip_id: None,
            duration_hint_secs: None,
        }
    }

    pub fn with_label(mut self, day: u32) -> Self {
        self.overlay_label = Some(day);
        self
    }

    pub fn with_clip_id(mut self, id: impl Into<String>) -> Self {
        self.clip_id = Some(id.into());
        self
    }

    /// Badge text for this clip, if it carries a label.
    pub fn overlay_text(&self) -> Option<String> {
        self.overlay_label.map(|day| format!("Day {day}"))
    }
}

/// An ordered list of clips to compile.
///
/// No reordering and no deduplication: the same clip may appear twice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompilationRequest {
    pub clips: Vec<ClipReference>,
}

impl CompilationRequest {
    pub fn new(clips: Vec<ClipReference>) -> Self {
        Self { clips }
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ClipReference> {
        self.clips.iter()
    }

    /// Stored ids of the clips that carry one, in playback order.
    pub fn clip_ids(&self) -> Vec<String> {
        self.clips.iter().filter_map(|c| c.clip_id.clone()).collect()
    }
}

impl FromIterator<ClipReference> for CompilationRequest {
    fn from_iter<I: IntoIterator<Item = ClipReference>>(iter: I) -> Self {
        Self {
            clips: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a CompilationRequest {
    type Item = &'a ClipReference;
    type IntoIter = std::slice::Iter<'a, ClipReference>;

    fn into_iter(self) -> Self::IntoIter {
        self.clips.iter()
    }
}
