//! Reset and supersede while a run is in flight.

mod common;

use std::sync::Arc;

use common::*;
use dayreel_compiler::CompileOutcome;
use dayreel_model::{CompilationProgress, CompilationRequest, Stage};

#[tokio::test]
async fn test_reset_between_clips_cancels_run() {
    let (backend, gate) = GatedBackend::new(GatePoint::EndOfClip(1));
    let orchestrator = orchestrator(backend);
    let request = CompilationRequest::new(vec![synthetic(0.5).with_label(1), synthetic(0.5)]);

    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.compile(&request).await })
    };

    // Clip 1 has drawn every frame; clip 2 has not started.
    gate.reached().await;
    assert_eq!(orchestrator.progress().stage, Stage::Processing);
    assert!(orchestrator.is_running());

    orchestrator.reset();
    assert_eq!(orchestrator.progress(), CompilationProgress::idle());
    gate.open();

    let outcome = run.await.unwrap();
    assert!(matches!(outcome, CompileOutcome::Cancelled));
    assert!(orchestrator.compiled_artifact().is_none());
    assert_eq!(orchestrator.progress(), CompilationProgress::idle());
    assert_eq!(orchestrator.ledger().allocated(), 2);
    assert_eq!(orchestrator.ledger().outstanding(), 0);
    assert!(!orchestrator.is_running());

    // Drawing never completed, so no report was recorded.
    assert!(orchestrator.last_report().is_none());
}

#[tokio::test]
async fn test_reset_during_loading_cancels_run() {
    let (backend, gate) = GatedBackend::new(GatePoint::Fetch(2));
    let orchestrator = orchestrator(backend);
    let request = CompilationRequest::new(vec![synthetic(0.3), synthetic(0.3), synthetic(0.3)]);

    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.compile(&request).await })
    };

    gate.reached().await;
    assert_eq!(orchestrator.progress().stage, Stage::Loading);
    orchestrator.reset();
    gate.open();

    assert!(matches!(run.await.unwrap(), CompileOutcome::Cancelled));
    assert_eq!(orchestrator.progress().stage, Stage::Idle);
    // The third clip was never fetched.
    assert_eq!(orchestrator.ledger().allocated(), 2);
    assert_eq!(orchestrator.ledger().outstanding(), 0);
}

#[tokio::test]
async fn test_new_compile_supersedes_active_run() {
    let (backend, gate) = GatedBackend::new(GatePoint::EndOfClip(1));
    let orchestrator = orchestrator(backend);

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        let request = CompilationRequest::new(vec![synthetic(0.3), synthetic(0.3)]);
        tokio::spawn(async move { orchestrator.compile(&request).await })
    };
    gate.reached().await;

    let second = {
        let orchestrator = Arc::clone(&orchestrator);
        let request = CompilationRequest::new(vec![synthetic(0.4)]);
        tokio::spawn(async move { orchestrator.compile(&request).await })
    };
    // Let the second call cancel the first before it resumes.
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    gate.open();

    assert!(matches!(first.await.unwrap(), CompileOutcome::Cancelled));
    let artifact = second.await.unwrap().artifact().expect("second run compiles");
    assert_eq!(artifact.clip_count, 1);
    assert_eq!(orchestrator.progress().stage, Stage::Done);
    assert_eq!(orchestrator.ledger().outstanding(), 0);
}

#[tokio::test]
async fn test_reset_after_cancel_is_idempotent() {
    let (backend, gate) = GatedBackend::new(GatePoint::Fetch(1));
    let orchestrator = orchestrator(backend);
    let request = CompilationRequest::new(vec![synthetic(0.3)]);

    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.compile(&request).await })
    };
    gate.reached().await;
    orchestrator.reset();
    orchestrator.reset();
    gate.open();

    assert!(matches!(run.await.unwrap(), CompileOutcome::Cancelled));
    orchestrator.reset();
    assert_eq!(orchestrator.progress(), CompilationProgress::idle());
    assert_eq!(orchestrator.ledger().outstanding(), 0);
}

#[tokio::test]
async fn test_superseding_run_reports_its_own_progress() {
    // First run pauses at the end of its last clip, the second at its
    // first fetch (the third fetch overall).
    let (backend, gates) =
        GatedBackend::with_points(&[GatePoint::EndOfClip(2), GatePoint::Fetch(3)]);
    let (first_gate, second_gate) = (Arc::clone(&gates[0]), Arc::clone(&gates[1]));
    let orchestrator = orchestrator(backend);

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        let request = CompilationRequest::new(vec![synthetic(0.3), synthetic(0.3)]);
        tokio::spawn(async move { orchestrator.compile(&request).await })
    };
    first_gate.reached().await;
    let stale = orchestrator.progress();
    assert_eq!((stale.stage, stale.total_clips), (Stage::Processing, 2));
    assert_eq!(stale.percent_complete, 60);

    let second = {
        let orchestrator = Arc::clone(&orchestrator);
        let request =
            CompilationRequest::new(vec![synthetic(0.3), synthetic(0.3), synthetic(0.3)]);
        tokio::spawn(async move { orchestrator.compile(&request).await })
    };
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    first_gate.open();

    second_gate.reached().await;
    let progress = orchestrator.progress();
    assert_eq!(progress, CompilationProgress::loading_clip(1, 3, 5));
    assert_eq!(orchestrator.regressing_updates(), 0);
    second_gate.open();

    assert!(matches!(first.await.unwrap(), CompileOutcome::Cancelled));
    let artifact = second.await.unwrap().artifact().expect("second run compiles");
    assert_eq!(artifact.clip_count, 3);
    assert_eq!(orchestrator.progress(), CompilationProgress::done(3));
    assert_eq!(orchestrator.regressing_updates(), 0);
    assert_eq!(orchestrator.ledger().outstanding(), 0);
}

#[tokio::test]
async fn test_dropped_compile_is_no_longer_running() {
    let (backend, gate) = GatedBackend::new(GatePoint::Fetch(2));
    let orchestrator = orchestrator(backend);

    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        let request = CompilationRequest::new(vec![synthetic(0.3), synthetic(0.3)]);
        tokio::spawn(async move { orchestrator.compile(&request).await })
    };
    gate.reached().await;
    assert!(orchestrator.is_running());

    run.abort();
    assert!(run.await.unwrap_err().is_cancelled());
    assert!(!orchestrator.is_running());
    assert_eq!(orchestrator.ledger().allocated(), 2);
    assert_eq!(orchestrator.ledger().outstanding(), 0);

    // The orchestrator stays usable.
    let outcome = orchestrator
        .compile(&CompilationRequest::new(vec![synthetic(0.2)]))
        .await;
    assert!(outcome.is_compiled());
    assert_eq!(orchestrator.ledger().outstanding(), 0);
}
