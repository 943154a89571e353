//! Stored records at the persistence boundary.
//!
//! These rows are owned by the storage collaborator; the compilation core
//! only reads clip records to build requests and hands a
//! [`SaveCompilation`] to the store after a successful run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::clip::ClipReference;

/// A stored daily clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipRecord {
    pub id: String,
    pub journey_id: String,
    pub video_url: String,

    /// Duration in seconds.
    pub duration: f64,

    /// Capture timestamp (RFC 3339).
    pub captured_at: String,

    pub week_number: u32,

    #[serde(default)]
    pub is_highlight: bool,
    #[serde(default)]
    pub is_best_of_day: bool,
    #[serde(default)]
    pub is_best_of_week: bool,
    #[serde(default)]
    pub is_best_of_month: bool,
}

impl ClipRecord {
    /// Build a clip reference, labelled with `day_number` when known.
    pub fn to_clip_reference(&self, day_number: Option<u32>) -> ClipReference {
        ClipReference {
            source_location: self.video_url.clone(),
            overlay_label: day_number,
            clip_id: Some(self.id.clone()),
            duration_hint_secs: Some(self.duration),
        }
    }
}

/// A stored compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilationRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub video_url: String,

    /// Duration in seconds.
    pub duration: f64,

    pub clip_count: usize,
    #[serde(default)]
    pub clip_ids: Vec<String>,
    #[serde(default)]
    pub journey_id: Option<String>,
    #[serde(default)]
    pub is_draft: bool,

    /// Creation timestamp (RFC 3339).
    pub created_at: String,
}

/// Everything a store needs to persist one compiled artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveCompilation {
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub duration: f64,
    pub clip_count: usize,
    pub clip_ids: Vec<String>,
    pub journey_id: Option<String>,
    pub is_draft: bool,
}

impl SaveCompilation {
    /// Title used when the user does not provide one: the journey name
    /// when compiling a single journey, otherwise the date.
    pub fn default_title(journey_name: Option<&str>, date: chrono::NaiveDate) -> String {
        match journey_name {
            Some(name) => format!("{name} Compilation"),
            None => format!("Compilation - {}", date.format("%Y-%m-%d")),
        }
    }
}

/// Errors that can occur when reading or writing records.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Record not found: {id}")]
    NotFound { id: String },
}

/// Generate a record id shaped like a UUID v4 from the clock and a
/// process-wide counter.
pub fn generate_record_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let count = COUNTER.fetch_add(1, Ordering::Relaxed) as u128;
    let seed = nanos ^ (count << 64) ^ count.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    format!(
        "{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
        (seed & 0xFFFF_FFFF) as u32,
        ((seed >> 32) & 0xFFFF) as u16,
        ((seed >> 48) & 0x0FFF) as u16,
        (((seed >> 60) & 0x3FFF) as u16) | 0x8000,
        ((seed >> 74) ^ count) & 0xFFFF_FFFF_FFFF,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip_record() -> ClipRecord {
        ClipRecord {
            id: "clip-1".to_string(),
            journey_id: "journey-1".to_string(),
            video_url: "https://cdn.example/clips/1.mp4".to_string(),
            duration: 3.2,
            captured_at: "2026-03-01T08:00:00Z".to_string(),
            week_number: 9,
            is_highlight: true,
            is_best_of_day: false,
            is_best_of_week: false,
            is_best_of_month: false,
        }
    }

    #[test]
    fn test_clip_record_to_reference() {
        let reference = clip_record().to_clip_reference(Some(60));
        assert_eq!(reference.source_location, "https://cdn.example/clips/1.mp4");
        assert_eq!(reference.overlay_label, Some(60));
        assert_eq!(reference.clip_id.as_deref(), Some("clip-1"));
    }

    #[test]
    fn test_default_title() {
        let date = chrono::NaiveDate::from_ymd_opt(2026, 5, 4).unwrap();
        assert_eq!(
            SaveCompilation::default_title(Some("Baby Mia"), date),
            "Baby Mia Compilation"
        );
        assert_eq!(
            SaveCompilation::default_title(None, date),
            "Compilation - 2026-05-04"
        );
    }

    #[test]
    fn test_compilation_record_defaults_for_legacy_rows() {
        let json = r#"{
            "id": "c1", "user_id": "u1", "title": "T", "video_url": "v",
            "duration": 4.0, "clip_count": 2, "created_at": "2026-01-01T00:00:00Z"
        }"#;
        let record: CompilationRecord = serde_json::from_str(json).unwrap();
        assert!(!record.is_draft);
        assert!(record.clip_ids.is_empty());
        assert!(record.journey_id.is_none());
    }

    #[test]
    fn test_generated_ids_are_unique_and_uuid_shaped() {
        let a = generate_record_id();
        let b = generate_record_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
        assert_eq!(a.chars().nth(14), Some('4'));
    }
}
