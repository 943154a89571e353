//! Show the output format preference.

use dayreel_common::AppConfig;
use dayreel_compiler::CompilerSettings;
use dayreel_media_engine::backend::ffmpeg::{command_exists, probe_capabilities};

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    let settings = CompilerSettings::from_config(config);
    let capabilities = if command_exists("ffmpeg") {
        Some(probe_capabilities().await?)
    } else {
        None
    };

    println!("{:<4} {:<28} {:<6} {:<12} {}", "#", "MIME TYPE", "EXT", "CONTENT", "HOST");
    for (i, format) in settings.format_preference.iter().enumerate() {
        let host = match &capabilities {
            Some(caps) if caps.supports_audio(format) => "yes",
            Some(caps) if caps.supports(format) => "video only",
            Some(_) => "no",
            None => "unknown",
        };
        println!(
            "{:<4} {:<28} {:<6} {:<12} {}",
            i + 1,
            format.mime_type(),
            format.extension(),
            format.content_type(),
            host
        );
    }
    Ok(())
}
