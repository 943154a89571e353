//! dayreel platform core contracts.
//!
//! This crate describes what a host media stack can produce (containers
//! and codecs) and which output format a compilation should use. Format
//! resolution is a pure function over a declared [`PlatformCapabilities`]
//! value, so nothing here touches a real encoder.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Webm,
}

/// Video codec inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    Vp9,
    Vp8,
}

/// Audio codec inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
    Opus,
}

/// A concrete output format: container plus codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputFormat {
    pub container: Container,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
}

impl OutputFormat {
    /// MP4 with H.264 video and AAC audio.
    pub const MP4_H264: Self = Self {
        container: Container::Mp4,
        video_codec: VideoCodec::H264,
        audio_codec: AudioCodec::Aac,
    };

    /// WebM with VP9 video and Opus audio.
    pub const WEBM_VP9: Self = Self {
        container: Container::Webm,
        video_codec: VideoCodec::Vp9,
        audio_codec: AudioCodec::Opus,
    };

    /// WebM with VP8 video and Opus audio.
    pub const WEBM_VP8: Self = Self {
        container: Container::Webm,
        video_codec: VideoCodec::Vp8,
        audio_codec: AudioCodec::Opus,
    };

    /// Default preference order.
    pub const DEFAULT_PREFERENCE: [Self; 3] = [Self::MP4_H264, Self::WEBM_VP9, Self::WEBM_VP8];

    /// Full mime type including codec parameters where they disambiguate.
    pub fn mime_type(&self) -> &'static str {
        match (self.container, self.video_codec) {
            (Container::Mp4, _) => "video/mp4",
            (Container::Webm, VideoCodec::Vp9) => "video/webm;codecs=vp9",
            (Container::Webm, _) => "video/webm",
        }
    }

    /// Mime type without codec parameters, for storage content types.
    pub fn content_type(&self) -> &'static str {
        match self.container {
            Container::Mp4 => "video/mp4",
            Container::Webm => "video/webm",
        }
    }

    /// File extension (without dot).
    pub fn extension(&self) -> &'static str {
        match self.container {
            Container::Mp4 => "mp4",
            Container::Webm => "webm",
        }
    }

    /// Parse a mime type such as `video/webm; codecs=vp9`.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        let normalized: String = mime
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '"')
            .collect::<String>()
            .to_ascii_lowercase();
        let (base, params) = match normalized.split_once(';') {
            Some((base, params)) => (base.to_string(), Some(params.to_string())),
            None => (normalized, None),
        };
        let codecs = params
            .as_deref()
            .and_then(|p| p.strip_prefix("codecs="))
            .unwrap_or("");

        match base.as_str() {
            "video/mp4" => match codecs {
                "" | "h264" | "avc1" => Some(Self::MP4_H264),
                _ if codecs.starts_with("avc1") => Some(Self::MP4_H264),
                _ => None,
            },
            "video/webm" => match codecs {
                "" | "vp8" | "vp8,opus" => Some(Self::WEBM_VP8),
                "vp9" | "vp9,opus" => Some(Self::WEBM_VP9),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Parse a configured preference list, skipping entries that are not
/// recognised output formats. Duplicates keep their first position.
pub fn parse_preference<S: AsRef<str>>(mime_types: &[S]) -> Vec<OutputFormat> {
    let mut formats = Vec::with_capacity(mime_types.len());
    for mime in mime_types {
        if let Some(format) = OutputFormat::from_mime_type(mime.as_ref()) {
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
    }
    formats
}

/// What a host media stack can encode and mux.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCapabilities {
    pub containers: BTreeSet<Container>,
    pub video_codecs: BTreeSet<VideoCodec>,
    pub audio_codecs: BTreeSet<AudioCodec>,
}

impl PlatformCapabilities {
    /// A host that supports every known format.
    pub fn all() -> Self {
        Self {
            containers: [Container::Mp4, Container::Webm].into_iter().collect(),
            video_codecs: [VideoCodec::H264, VideoCodec::Vp9, VideoCodec::Vp8]
                .into_iter()
                .collect(),
            audio_codecs: [AudioCodec::Aac, AudioCodec::Opus].into_iter().collect(),
        }
    }

    pub fn with_container(mut self, container: Container) -> Self {
        self.containers.insert(container);
        self
    }

    pub fn with_video_codec(mut self, codec: VideoCodec) -> Self {
        self.video_codecs.insert(codec);
        self
    }

    pub fn with_audio_codec(mut self, codec: AudioCodec) -> Self {
        self.audio_codecs.insert(codec);
        self
    }

    /// Whether the host can produce this format's video stream.
    pub fn supports(&self, format: &OutputFormat) -> bool {
        self.containers.contains(&format.container)
            && self.video_codecs.contains(&format.video_codec)
    }

    /// Whether the host can also encode this format's audio stream.
    pub fn supports_audio(&self, format: &OutputFormat) -> bool {
        self.supports(format) && self.audio_codecs.contains(&format.audio_codec)
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty() || self.video_codecs.is_empty()
    }
}

/// Pick the first format in `preference` that `capabilities` supports.
pub fn resolve_output_format(
    preference: &[OutputFormat],
    capabilities: &PlatformCapabilities,
) -> Option<OutputFormat> {
    preference
        .iter()
        .copied()
        .find(|format| capabilities.supports(format))
}
