//! The compiled video produced by a successful run.

use std::fmt;

use dayreel_platform_core::OutputFormat;
use serde::{Deserialize, Serialize};

/// A finished compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledArtifact {
    /// Encoded container bytes.
    #[serde(skip)]
    pub bytes: Vec<u8>,

    /// Format the encoder produced; decides extension and content type.
    pub format: OutputFormat,

    /// Number of clips drawn into the output.
    pub clip_count: usize,

    /// Output duration in seconds.
    pub duration_secs: f64,

    /// Output surface size.
    pub width: u32,
    pub height: u32,

    /// Completion timestamp (RFC 3339).
    pub created_at: String,
}

impl CompiledArtifact {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }

    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// File name used by download/share actions, e.g.
    /// `compilation-1718000000000.webm`.
    pub fn suggested_file_name(&self, timestamp_millis: i64) -> String {
        format!("compilation-{timestamp_millis}.{}", self.extension())
    }
}

/// Transient reference to the currently published artifact.
///
/// A reference stops resolving once a newer run starts or the
/// orchestrator is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef(pub u64);

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "artifact:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(format: OutputFormat) -> CompiledArtifact {
        CompiledArtifact {
            bytes: vec![1, 2, 3],
            format,
            clip_count: 2,
            duration_secs: 3.5,
            width: 720,
            height: 1280,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_extension_follows_format() {
        let webm = artifact(OutputFormat::WEBM_VP9);
        assert_eq!(webm.extension(), "webm");
        assert_eq!(webm.mime_type(), "video/webm;codecs=vp9");
        assert_eq!(webm.suggested_file_name(42), "compilation-42.webm");
        assert_eq!(artifact(OutputFormat::MP4_H264).extension(), "mp4");
    }

    #[test]
    fn test_artifact_ref_display() {
        assert_eq!(ArtifactRef(7).to_string(), "artifact:7");
    }
}
