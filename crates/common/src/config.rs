//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory for temporary clip downloads and encoder spool files.
    pub scratch_dir: PathBuf,

    /// Directory where saved compilations are stored by the local store.
    pub storage_dir: PathBuf,

    /// Compilation pipeline settings.
    pub compilation: CompilationDefaults,

    /// Day badge overlay styling.
    #[serde(default)]
    pub overlay: OverlayConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// How the compositor paces its draw loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawCadence {
    /// Tick at the output frame rate, like a display refresh loop.
    Realtime,
    /// Draw as soon as each frame is decoded, yielding between frames.
    Immediate,
}

/// Default compilation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationDefaults {
    /// Output frame rate.
    pub fps: u32,

    /// Video bitrate in kbps.
    pub video_bitrate_kbps: u32,

    /// Audio bitrate in kbps.
    pub audio_bitrate_kbps: u32,

    /// Mixing bus sample rate.
    pub audio_sample_rate: u32,

    /// Surface width used when the first clip reports zero dimensions.
    pub fallback_width: u32,

    /// Surface height used when the first clip reports zero dimensions.
    pub fallback_height: u32,

    /// Output formats in order of preference, as mime types.
    pub format_preference: Vec<String>,

    /// Draw loop pacing.
    pub draw_cadence: DrawCadence,

    /// Give up on a single fetch or decoder open after this many seconds.
    /// `None` waits indefinitely.
    #[serde(default)]
    pub stall_timeout_secs: Option<u64>,

    /// Frames per buffered chunk for encoders that emit chunks.
    pub chunk_frames: u32,
}

/// Day badge overlay styling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// TrueType font used for badge text. Well-known system fonts are
    /// tried when unset.
    pub font_path: Option<PathBuf>,

    /// Font size as a fraction of surface width.
    pub font_scale: f32,

    /// Badge background opacity in `[0.0, 1.0]`.
    pub badge_opacity: f32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "dayreel=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("dayreel"),
            storage_dir: dirs_default_storage(),
            compilation: CompilationDefaults::default(),
            overlay: OverlayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CompilationDefaults {
    fn default() -> Self {
        Self {
            fps: 30,
            video_bitrate_kbps: 2500,
            audio_bitrate_kbps: 128,
            audio_sample_rate: 48000,
            fallback_width: 720,
            fallback_height: 1280,
            format_preference: vec![
                "video/mp4".to_string(),
                "video/webm;codecs=vp9".to_string(),
                "video/webm".to_string(),
            ],
            draw_cadence: DrawCadence::Immediate,
            stall_timeout_secs: None,
            chunk_frames: 30,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            font_scale: 0.07,
            badge_opacity: 0.5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Location of the JSON config file.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("dayreel").join("config.json")
}

/// Default storage directory for saved compilations.
fn dirs_default_storage() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("dayreel").join("compilations")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_format_preference_order() {
        let defaults = CompilationDefaults::default();
        assert_eq!(defaults.format_preference[0], "video/mp4");
        assert_eq!(defaults.format_preference[2], "video/webm");
        assert_eq!((defaults.fallback_width, defaults.fallback_height), (720, 1280));
    }

    #[test]
    fn test_config_without_overlay_section_uses_defaults() {
        let mut value = serde_json::to_value(AppConfig::default()).unwrap();
        value.as_object_mut().unwrap().remove("overlay");
        let parsed: AppConfig = serde_json::from_value(value).unwrap();
        assert!((parsed.overlay.font_scale - 0.07).abs() < 1e-6);
        assert!(parsed.compilation.stall_timeout_secs.is_none());
    }
}
