//! Check the host media stack.

use dayreel_common::AppConfig;
use dayreel_compiler::CompilerSettings;
use dayreel_media_engine::backend::ffmpeg::{command_exists, probe_capabilities};
use dayreel_media_engine::OverlayRenderer;
use dayreel_platform_core::resolve_output_format;

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("dayreel System Check");
    println!("{}", "=".repeat(50));

    let mut ready = true;
    for binary in ["ffmpeg", "ffprobe"] {
        if command_exists(binary) {
            println!("[OK] {binary} found");
        } else {
            println!("[FAIL] {binary} not found on PATH");
            ready = false;
        }
    }

    if ready {
        let capabilities = probe_capabilities().await?;
        println!(
            "[OK] Containers: {:?} | video: {:?} | audio: {:?}",
            capabilities.containers, capabilities.video_codecs, capabilities.audio_codecs
        );
        let settings = CompilerSettings::from_config(config);
        match resolve_output_format(&settings.format_preference, &capabilities) {
            Some(format) => {
                let audio = if capabilities.supports_audio(&format) {
                    "with audio"
                } else {
                    "video only"
                };
                println!("[OK] Output format: {format} ({audio})");
            }
            None => {
                println!("[FAIL] No preferred output format can be encoded");
                ready = false;
            }
        }
    }

    if OverlayRenderer::new(&config.overlay).has_font() {
        println!("[OK] Badge font available");
    } else {
        println!("[WARN] No badge font found; day badges are drawn without text");
    }

    println!(
        "[OK] Config: {}",
        dayreel_common::config::config_file_path().display()
    );
    println!("     Scratch: {}", config.scratch_dir.display());
    println!("     Storage: {}", config.storage_dir.display());

    println!();
    if ready {
        println!("dayreel is ready to compile.");
    } else {
        println!("Some requirements are missing. Use --synthetic for offline dry runs.");
    }
    Ok(())
}
