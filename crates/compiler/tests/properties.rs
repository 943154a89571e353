//! Property tests over randomly shaped requests.

mod common;

use common::*;
use dayreel_compiler::CompileOutcome;
use dayreel_media_engine::SyntheticBackend;
use dayreel_model::{ClipReference, CompilationRequest, Stage};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum ClipShape {
    Ok { tenths: u8, label: Option<u32>, audio: bool },
    FailFetch,
    FailDecode,
}

impl ClipShape {
    fn reference(&self) -> ClipReference {
        match self {
            Self::Ok {
                tenths,
                label,
                audio,
            } => {
                let clip = ClipReference::new(format!(
                    "synthetic://clip?duration={}&width=24&height=40&audio={}",
                    f64::from(*tenths) / 10.0,
                    u8::from(*audio)
                ));
                match label {
                    Some(day) => clip.with_label(*day),
                    None => clip,
                }
            }
            Self::FailFetch => failing("fetch"),
            Self::FailDecode => failing("decode"),
        }
    }

    fn fails(&self) -> bool {
        !matches!(self, Self::Ok { .. })
    }
}

fn arb_shape() -> impl Strategy<Value = ClipShape> {
    prop_oneof![
        6 => (1u8..8, proptest::option::of(1u32..400), any::<bool>())
            .prop_map(|(tenths, label, audio)| ClipShape::Ok { tenths, label, audio }),
        1 => Just(ClipShape::FailFetch),
        1 => Just(ClipShape::FailDecode),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_runs_settle_and_release_everything(shapes in proptest::collection::vec(arb_shape(), 1..5)) {
        let (outcome, seen, stage, percent, outstanding, regressions) = runtime().block_on(async {
            let orchestrator = orchestrator(SyntheticBackend::new());
            let recorder = record_progress(orchestrator.subscribe());
            let request = CompilationRequest::new(shapes.iter().map(ClipShape::reference).collect());
            let outcome = orchestrator.compile(&request).await;
            let seen = recorder.await.unwrap();
            let progress = orchestrator.progress();
            (
                outcome,
                seen,
                progress.stage,
                progress.percent_complete,
                orchestrator.ledger().outstanding(),
                orchestrator.regressing_updates(),
            )
        });

        prop_assert_eq!(outstanding, 0);
        prop_assert_eq!(regressions, 0);
        prop_assert!(seen.iter().all(|s| s.total_clips == shapes.len()));
        prop_assert!(percents_non_decreasing(&seen));

        let expect_failure = shapes.iter().any(ClipShape::fails);
        match outcome {
            CompileOutcome::Compiled(artifact) => {
                prop_assert!(!expect_failure);
                prop_assert_eq!(stage, Stage::Done);
                prop_assert_eq!(percent, 100);
                prop_assert_eq!(artifact.clip_count, shapes.len());

                let expected: f64 = shapes
                    .iter()
                    .map(|s| match s {
                        ClipShape::Ok { tenths, .. } => f64::from(*tenths) / 10.0,
                        _ => 0.0,
                    })
                    .sum();
                let tolerance = shapes.len() as f64 / FPS as f64;
                prop_assert!((artifact.duration_secs - expected).abs() <= tolerance);
            }
            CompileOutcome::Failed(message) => {
                prop_assert!(expect_failure);
                prop_assert_eq!(stage, Stage::Error);
                prop_assert!(message.contains("clip"));
            }
            other => prop_assert!(false, "unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn prop_badges_match_labels(labels in proptest::collection::vec(proptest::option::of(1u32..100), 1..5)) {
        let report = runtime().block_on(async {
            let orchestrator = orchestrator(SyntheticBackend::new());
            let clips = labels
                .iter()
                .map(|label| {
                    let clip = synthetic(0.2);
                    match label {
                        Some(day) => clip.with_label(*day),
                        None => clip,
                    }
                })
                .collect();
            orchestrator.compile(&CompilationRequest::new(clips)).await;
            orchestrator.last_report()
        });

        let report = report.expect("run report");
        let expected: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, label)| label.is_some())
            .map(|(i, _)| i + 1)
            .collect();
        prop_assert_eq!(report.badged_clips(), expected);
    }
}
