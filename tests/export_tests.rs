//! End-to-end export runs against mocked processes and a real temp directory

mod common;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{sample_media, Behaviour, MockProbe, MockRunner, RecordingSink};
use segcut::adapters::LocalFsAdapter;
use segcut::app::{AppContainer, DefaultAppContainer, ExportInteractor, ExportRequest, ExportState};
use segcut::config::AppConfig;
use segcut::domain::model::{Segment, SegmentId, Timebase};
use segcut::error::ResourceKind;
use segcut::planner::CutStrategy;
use segcut::SegcutError;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    input: PathBuf,
    runner: Arc<MockRunner>,
    probe: Arc<MockProbe>,
    sink: Arc<RecordingSink>,
    interactor: Arc<ExportInteractor>,
}

fn fixture(runner: MockRunner, keyframes: Vec<f64>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("talk.mkv");
    std::fs::write(&input, b"source").unwrap();

    let runner = Arc::new(runner);
    let sink = Arc::new(RecordingSink::default());
    let probe = Arc::new(MockProbe::new(sample_media(&input), keyframes));
    let container = DefaultAppContainer::with_ports(
        &AppConfig::default(),
        runner.clone(),
        probe.clone(),
        Arc::new(LocalFsAdapter::new()),
        sink.clone(),
    );

    Fixture {
        interactor: container.export_interactor(),
        dir,
        input,
        runner,
        probe,
        sink,
    }
}

fn segment(id: u64, start: f64, end: f64) -> Segment {
    Segment {
        start: Some(start),
        end: Some(end),
        name: format!("part{}", id),
        ..Segment::placeholder(SegmentId(id))
    }
}

impl Fixture {
    fn output_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    fn request(&self, segments: Vec<Segment>, strategy: CutStrategy) -> ExportRequest {
        let mut settings = AppConfig::default().export_settings(self.output_dir());
        settings.strategy = strategy;
        ExportRequest {
            input: self.input.clone(),
            segments,
            invert: false,
            settings,
            overwrite: false,
        }
    }
}

fn assert_monotonic_to_one(fractions: &[f64]) {
    assert!(!fractions.is_empty());
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]), "{:?}", fractions);
    assert_eq!(*fractions.last().unwrap(), 1.0);
    assert!(fractions[..fractions.len() - 1].iter().all(|f| *f < 1.0));
}

#[tokio::test]
async fn test_two_segments_merge_with_chapters() {
    let fx = fixture(MockRunner::new(), vec![0.0]);
    let mut request = fx.request(vec![segment(1, 0.0, 10.0), segment(2, 20.0, 30.0)], CutStrategy::Normal);
    request.settings.merge = true;
    request.settings.chapters = true;

    let response = fx.interactor.export_segments(request).await.unwrap();

    let merged = fx.output_dir().join("talk-merged.mkv");
    assert_eq!(response.output_paths, vec![merged.clone()]);
    assert!(merged.exists());
    // Intermediates are removed after a successful merge
    let leftovers: Vec<_> = std::fs::read_dir(fx.output_dir())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(leftovers, vec![merged]);

    let commands = fx.runner.commands();
    assert_eq!(commands.len(), 3);
    let concat = &commands[2];
    assert!(concat.stdin.is_some());
    assert!(concat.args.iter().any(|a| a == "-map_chapters"));

    assert_monotonic_to_one(&fx.sink.fractions.lock().unwrap());
    assert_eq!(fx.interactor.state(), ExportState::Done);
}

#[tokio::test]
async fn test_smart_cut_runs_encode_copy_and_join() {
    let fx = fixture(MockRunner::new(), vec![0.0, 13.0, 26.0]);
    let request = fx.request(vec![segment(1, 12.3, 20.0)], CutStrategy::Smart);

    let response = fx.interactor.export_segments(request).await.unwrap();
    assert_eq!(response.output_paths.len(), 1);
    assert!(response.output_paths[0].exists());

    let commands = fx.runner.commands();
    assert_eq!(commands.len(), 3);
    assert!(commands[0].args.windows(2).any(|w| w[0] == "-c:0" && w[1] == "libx264"));
    assert!(commands[1].args.iter().any(|a| a == "13.000000"));
    assert!(commands[2].args.iter().any(|a| a == "concat"));

    // The scratch directory is gone once the join has finished
    let entries: Vec<PathBuf> = std::fs::read_dir(fx.output_dir())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries, response.output_paths);
    assert_monotonic_to_one(&fx.sink.fractions.lock().unwrap());
}

#[tokio::test]
async fn test_missing_encoder_falls_back_to_copy() {
    let fx = fixture(
        MockRunner::new().on_call(0, Behaviour::Fail("Unknown encoder 'libx264'")),
        vec![0.0, 13.0, 26.0],
    );
    let request = fx.request(vec![segment(1, 12.3, 20.0)], CutStrategy::Smart);

    let response = fx.interactor.export_segments(request).await.unwrap();
    assert_eq!(response.output_paths.len(), 1);
    assert!(response.output_paths[0].exists());
    assert!(response
        .warnings
        .iter()
        .any(|w| w.contains("Encoder libx264 is unavailable")));

    let commands = fx.runner.commands();
    assert_eq!(commands.len(), 2);
    assert!(!commands[1].args.iter().any(|a| a == "libx264"));
    assert!(commands[1].args.iter().any(|a| a == "12.300000"));
    assert_monotonic_to_one(&fx.sink.fractions.lock().unwrap());
    assert_eq!(fx.interactor.state(), ExportState::Done);
}

#[tokio::test]
async fn test_timebase_mismatch_fails_the_join() {
    let fx = fixture(MockRunner::new(), vec![0.0, 13.0, 26.0]);
    fx.probe
        .video_time_bases
        .lock()
        .unwrap()
        .insert("head".to_string(), Timebase { num: 1, den: 90000 });
    let request = fx.request(vec![segment(1, 0.0, 10.0), segment(2, 12.3, 20.0)], CutStrategy::Smart);

    let err = fx.interactor.export_segments(request).await.unwrap_err();
    match err {
        SegcutError::StageFailed {
            stage,
            completed,
            source,
        } => {
            assert_eq!(stage, 1);
            assert_eq!(completed.len(), 1);
            assert!(completed[0].exists());
            match *source {
                SegcutError::Execution { message, .. } => {
                    assert!(message.contains("timebase mismatch"), "{}", message)
                }
                other => panic!("unexpected {:?}", other),
            }

            // Only the first segment remains; the scratch parts are gone
            let entries: Vec<PathBuf> = std::fs::read_dir(fx.output_dir())
                .unwrap()
                .map(|e| e.unwrap().path())
                .collect();
            assert_eq!(entries, completed);
        }
        other => panic!("unexpected {:?}", other),
    }
    // Copy, then encode and copy for the smart cut; the join never runs
    assert_eq!(fx.runner.commands().len(), 3);
    assert_eq!(fx.interactor.state(), ExportState::Failed);
}

#[tokio::test]
async fn test_failed_stage_keeps_earlier_outputs() {
    let fx = fixture(MockRunner::new().on_call(1, Behaviour::Fail("No space left on device")), vec![0.0]);
    let request = fx.request(vec![segment(1, 0.0, 10.0), segment(2, 20.0, 30.0)], CutStrategy::Normal);

    let err = fx.interactor.export_segments(request).await.unwrap_err();
    match err {
        SegcutError::StageFailed {
            stage,
            completed,
            source,
        } => {
            assert_eq!(stage, 1);
            assert_eq!(completed.len(), 1);
            assert!(completed[0].exists());
            assert!(matches!(
                *source,
                SegcutError::Resource {
                    kind: ResourceKind::DiskFull,
                    ..
                }
            ));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(fx.interactor.state(), ExportState::Failed);
    assert_eq!(fx.sink.errors.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancel_stops_the_running_stage() {
    let fx = fixture(MockRunner::new().on_call(0, Behaviour::Block), vec![0.0]);
    let request = fx.request(vec![segment(1, 0.0, 10.0), segment(2, 20.0, 30.0)], CutStrategy::Normal);

    assert!(!fx.interactor.cancel());

    let interactor = Arc::clone(&fx.interactor);
    let running = tokio::spawn(async move { interactor.export_segments(request).await });
    fx.runner.blocked.notified().await;
    assert!(fx.interactor.cancel());

    let result = running.await.unwrap();
    assert!(matches!(result, Err(SegcutError::Cancelled)));
    assert_eq!(fx.interactor.state(), ExportState::Cancelled);
    assert!(*fx.sink.cancelled.lock().unwrap());
    assert!(fx.sink.errors.lock().unwrap().is_empty());
    assert_eq!(fx.runner.commands().len(), 1);
}

#[tokio::test]
async fn test_cancel_after_last_stage_still_cancels() {
    let fx = fixture(MockRunner::new(), vec![0.0]);
    let accepted = Arc::new(AtomicBool::new(false));
    {
        let interactor = Arc::clone(&fx.interactor);
        let accepted = Arc::clone(&accepted);
        fx.runner
            .set_after_success(move || accepted.store(interactor.cancel(), Ordering::SeqCst));
    }
    let request = fx.request(vec![segment(1, 0.0, 10.0)], CutStrategy::Normal);

    let result = fx.interactor.export_segments(request).await;
    assert!(accepted.load(Ordering::SeqCst));
    assert!(matches!(result, Err(SegcutError::Cancelled)));
    assert_eq!(fx.interactor.state(), ExportState::Cancelled);
    assert!(fx.sink.completed.lock().unwrap().is_empty());
    // What was produced is kept
    assert_eq!(std::fs::read_dir(fx.output_dir()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_second_export_is_refused_while_one_runs() {
    let fx = fixture(MockRunner::new().on_call(0, Behaviour::Block), vec![0.0]);
    let first = fx.request(vec![segment(1, 0.0, 10.0)], CutStrategy::Normal);
    let second = fx.request(vec![segment(2, 20.0, 30.0)], CutStrategy::Normal);

    let interactor = Arc::clone(&fx.interactor);
    let running = tokio::spawn(async move { interactor.export_segments(first).await });
    fx.runner.blocked.notified().await;

    assert!(matches!(
        fx.interactor.export_segments(second).await,
        Err(SegcutError::ExportInProgress)
    ));

    fx.interactor.cancel();
    assert!(running.await.unwrap().is_err());
    // The lock is free again
    let third = fx.request(vec![segment(3, 20.0, 30.0)], CutStrategy::Normal);
    assert!(fx.interactor.export_segments(third).await.is_ok());
}

#[tokio::test]
async fn test_existing_output_is_not_overwritten() {
    let fx = fixture(MockRunner::new(), vec![0.0]);
    let request = fx.request(vec![segment(1, 0.0, 10.0)], CutStrategy::Normal);

    let first = fx.interactor.export_segments(request.clone()).await.unwrap();
    let runs = fx.runner.commands().len();

    let err = fx.interactor.export_segments(request.clone()).await.unwrap_err();
    assert!(matches!(
        err,
        SegcutError::Resource {
            kind: ResourceKind::OutputExists,
            ..
        }
    ));
    assert_eq!(fx.runner.commands().len(), runs);

    let again = fx
        .interactor
        .export_segments(ExportRequest {
            overwrite: true,
            ..request
        })
        .await
        .unwrap();
    assert_eq!(again.output_paths, first.output_paths);
}

#[tokio::test]
async fn test_invalid_segment_spawns_nothing() {
    let fx = fixture(MockRunner::new(), vec![0.0]);
    let request = fx.request(vec![segment(1, 5.0, 5.0)], CutStrategy::Normal);

    let err = fx.interactor.export_segments(request).await.unwrap_err();
    assert!(matches!(err, SegcutError::Validation { .. }));
    assert!(fx.runner.commands().is_empty());
    assert!(!fx.output_dir().exists());
}
