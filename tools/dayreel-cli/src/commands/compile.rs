//! Compile clips into one video.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use dayreel_common::AppConfig;
use dayreel_compiler::{
    CompilationResult, CompileOutcome, CompilerSettings, LocalArtifactStore, Orchestrator,
};
use dayreel_media_engine::{FfmpegBackend, MediaBackend, SyntheticBackend};
use dayreel_model::{ClipReference, CompilationRequest};

pub struct CompileArgs {
    pub clips: Vec<String>,
    pub out: PathBuf,
    pub synthetic: bool,
    pub save_dir: Option<PathBuf>,
    pub title: Option<String>,
    pub user: String,
    pub draft: bool,
}

/// Split `URI@DAY` into a clip reference. The suffix only counts as a
/// day label when it is all digits, so `user@host` URIs pass through.
fn parse_clip(arg: &str) -> anyhow::Result<ClipReference> {
    if let Some((uri, day)) = arg.rsplit_once('@') {
        if !day.is_empty() && day.chars().all(|c| c.is_ascii_digit()) {
            let day: u32 = day
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid day label in {arg}: {e}"))?;
            return Ok(ClipReference::new(uri).with_label(day));
        }
    }
    Ok(ClipReference::new(arg))
}

pub async fn run(config: AppConfig, args: CompileArgs) -> anyhow::Result<()> {
    let clips = args
        .clips
        .iter()
        .map(|arg| parse_clip(arg))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let request = CompilationRequest::new(clips);

    let backend: Arc<dyn MediaBackend> = if args.synthetic {
        Arc::new(SyntheticBackend::new())
    } else {
        Arc::new(
            FfmpegBackend::detect(&config)
                .await
                .map_err(|e| anyhow::anyhow!("Media backend unavailable: {e}. Try --synthetic."))?,
        )
    };

    println!(
        "Compiling {} clip(s) with the {} backend",
        request.len(),
        backend.name()
    );

    let settings = CompilerSettings::from_config(&config);
    settings.validate()?;
    let orchestrator = Arc::new(Orchestrator::new(backend, settings));

    let mut rx = orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let p = rx.borrow_and_update().clone();
            print!(
                "\r  {:>3}% {:<40}",
                p.percent_complete, p.status_message
            );
            let _ = std::io::stdout().flush();
            if p.stage.is_terminal() {
                break;
            }
        }
    });

    let interrupt = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted; cancelling compilation");
                orchestrator.reset();
            }
        })
    };

    let outcome = orchestrator.compile(&request).await;
    interrupt.abort();
    printer.abort();
    println!();

    let artifact = match outcome {
        CompileOutcome::Compiled(artifact) => artifact,
        CompileOutcome::Failed(message) => anyhow::bail!("Compilation failed: {message}"),
        CompileOutcome::Cancelled => {
            println!("Compilation cancelled.");
            return Ok(());
        }
        CompileOutcome::Empty => {
            println!("Nothing to compile.");
            return Ok(());
        }
    };

    if let Some(report) = orchestrator.last_report() {
        println!(
            "  {}x{} {} | {} frames | audio: {} | {} ms",
            report.width,
            report.height,
            report.format,
            report.frames,
            if report.audio_mixed { "mixed" } else { "none" },
            report.elapsed_ms
        );
    }

    let mut result = CompilationResult::new(artifact);
    let path = result
        .download(&args.out)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to write video: {e}"))?;
    println!("Video written: {}", path.display());

    if let Some(save_dir) = args.save_dir {
        let store = LocalArtifactStore::new(save_dir);
        let mut save = result.save_request(args.user, request.clip_ids(), None);
        if let Some(title) = args.title {
            save.title = title;
        }
        save.is_draft = args.draft;

        // The downloaded file stays valid even when saving fails.
        match result.save(&store, save).await {
            Ok(record) => println!("Saved compilation {} ({})", record.id, record.title),
            Err(e) => println!("Save failed: {e}"),
        }
    }

    Ok(())
}
