//! dayreel CLI: compile journal clips into one video from the terminal.
//!
//! Usage:
//!   dayreel compile --clip URI[@DAY]...   Compile clips into one video
//!   dayreel check                        Check the host media stack
//!   dayreel formats                      Show output format preference

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "dayreel",
    about = "Compile daily journal clips into a single video",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile clips into one video
    Compile {
        /// Clip URI, optionally suffixed with `@DAY` to draw a "Day N" badge.
        /// Repeat in playback order.
        #[arg(short, long = "clip", required = true)]
        clips: Vec<String>,

        /// Directory the compiled video is written to
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Use the in-memory synthetic backend instead of ffmpeg
        #[arg(long)]
        synthetic: bool,

        /// Also save the compilation and its record into this directory
        #[arg(long)]
        save_dir: Option<PathBuf>,

        /// Title for the saved compilation
        #[arg(long)]
        title: Option<String>,

        /// Owner recorded with the saved compilation
        #[arg(long, default_value = "local")]
        user: String,

        /// Save as a draft
        #[arg(long)]
        draft: bool,

        /// Override the configured output frame rate
        #[arg(long)]
        fps: Option<u32>,
    },

    /// Check ffmpeg, fonts, and configuration
    Check,

    /// Show the output format preference and what this host supports
    Formats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = dayreel_common::AppConfig::load();

    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    dayreel_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Compile {
            clips,
            out,
            synthetic,
            save_dir,
            title,
            user,
            draft,
            fps,
        } => {
            if let Some(fps) = fps {
                config.compilation.fps = fps;
            }
            commands::compile::run(
                config,
                commands::compile::CompileArgs {
                    clips,
                    out,
                    synthetic,
                    save_dir,
                    title,
                    user,
                    draft,
                },
            )
            .await
        }
        Commands::Check => commands::check::run(&config).await,
        Commands::Formats => commands::formats::run(&config).await,
    }
}
