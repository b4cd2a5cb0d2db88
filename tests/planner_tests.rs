//! Planner behaviour against a mocked probe

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{sample_media, MockProbe};
use segcut::config::AppConfig;
use segcut::domain::model::{Segment, SegmentId};
use segcut::domain::timeline;
use segcut::planner::{CutMode, CutStrategy, ExportPlanner, ExportSettings, KeyframeIndex};
use segcut::SegcutError;

fn planner(probe: Arc<MockProbe>) -> ExportPlanner {
    ExportPlanner::new(Arc::new(KeyframeIndex::new(probe)))
}

fn segment(id: u64, start: f64, end: f64) -> Segment {
    Segment {
        start: Some(start),
        end: Some(end),
        ..Segment::placeholder(SegmentId(id))
    }
}

fn settings(strategy: CutStrategy) -> ExportSettings {
    let mut settings = AppConfig::default().export_settings("/out");
    settings.strategy = strategy;
    settings
}

fn input() -> PathBuf {
    PathBuf::from("/media/talk.mkv")
}

#[tokio::test]
async fn test_smart_cut_encodes_up_to_next_keyframe() {
    let media = sample_media(&input());
    let probe = Arc::new(MockProbe::new(media.clone(), vec![0.0, 13.0, 26.0]));
    let (outputs, _) = timeline::output_segments(&[segment(1, 12.3, 20.0)], media.duration, false).unwrap();

    let plan = planner(probe)
        .plan(&media, &outputs, &settings(CutStrategy::Smart))
        .await
        .unwrap();

    let planned = &plan.segments[0];
    assert_eq!(planned.cut_from, 12.3);
    assert_eq!(planned.cut_to, 20.0);
    match &planned.mode {
        CutMode::SmartCut { boundary, encoder } => {
            assert_eq!(*boundary, 13.0);
            assert_eq!(encoder.encoder, "libx264");
            assert_eq!(encoder.bit_rate, Some(2_000_000));
        }
        other => panic!("expected smart cut, got {:?}", other),
    }
    assert!(plan.warnings.is_empty());
}

#[tokio::test]
async fn test_keyframe_coincident_start_is_copied() {
    let media = sample_media(&input());
    let probe = Arc::new(MockProbe::new(media.clone(), vec![0.0, 13.0, 26.0]));
    let (outputs, _) = timeline::output_segments(&[segment(1, 13.0, 20.0)], media.duration, false).unwrap();

    let plan = planner(probe)
        .plan(&media, &outputs, &settings(CutStrategy::Smart))
        .await
        .unwrap();
    assert_eq!(plan.segments[0].mode, CutMode::Copy);
}

#[tokio::test]
async fn test_keyframe_strategy_snaps_start_back() {
    let media = sample_media(&input());
    let probe = Arc::new(MockProbe::new(media.clone(), vec![0.0, 13.0, 26.0]));
    let (outputs, _) = timeline::output_segments(&[segment(1, 14.5, 20.0)], media.duration, false).unwrap();

    let plan = planner(probe)
        .plan(&media, &outputs, &settings(CutStrategy::Keyframe))
        .await
        .unwrap();
    assert_eq!(plan.segments[0].cut_from, 13.0);
    assert_eq!(plan.segments[0].mode, CutMode::Copy);
}

#[tokio::test]
async fn test_inverted_segments_plan_the_gaps() {
    let media = sample_media(&input());
    let probe = Arc::new(MockProbe::new(media.clone(), vec![0.0]));
    let segments = [segment(1, 0.0, 10.0), segment(2, 20.0, 30.0)];
    let (outputs, _) = timeline::output_segments(&segments, media.duration, true).unwrap();

    let plan = planner(probe)
        .plan(&media, &outputs, &settings(CutStrategy::Normal))
        .await
        .unwrap();
    let spans: Vec<(f64, f64)> = plan.segments.iter().map(|s| (s.cut_from, s.cut_to)).collect();
    assert_eq!(spans, vec![(10.0, 20.0), (30.0, 40.0)]);
    assert_eq!(plan.total_duration(), 20.0);
    assert!(plan
        .segments
        .iter()
        .all(|s| s.output_path.starts_with(Path::new("/out"))));
}

#[tokio::test]
async fn test_merge_adds_a_distinct_target() {
    let media = sample_media(&input());
    let probe = Arc::new(MockProbe::new(media.clone(), vec![0.0]));
    let segments = [segment(1, 0.0, 10.0), segment(2, 20.0, 30.0)];
    let (outputs, _) = timeline::output_segments(&segments, media.duration, false).unwrap();

    let mut settings = settings(CutStrategy::Normal);
    settings.merge = true;
    let plan = planner(Arc::clone(&probe))
        .plan(&media, &outputs, &settings)
        .await
        .unwrap();
    let merge = plan.merge.as_ref().unwrap();
    assert_eq!(merge.output_path, PathBuf::from("/out/talk-merged.mkv"));
    assert_eq!(plan.target_paths().len(), 3);

    let (single, _) = timeline::output_segments(&segments[..1], media.duration, false).unwrap();
    let plan = planner(probe).plan(&media, &single, &settings).await.unwrap();
    assert!(plan.merge.is_none());
    assert_eq!(plan.warnings.len(), 1);
}

#[tokio::test]
async fn test_colliding_names_are_rejected_before_execution() {
    let media = sample_media(&input());
    let probe = Arc::new(MockProbe::new(media.clone(), vec![0.0]));
    let segments = [segment(1, 0.0, 10.0), segment(2, 20.0, 30.0)];
    let (outputs, _) = timeline::output_segments(&segments, media.duration, false).unwrap();

    let mut settings = settings(CutStrategy::Normal);
    settings.segment_template = "same.{ext}".to_string();
    let result = planner(probe).plan(&media, &outputs, &settings).await;
    assert!(matches!(result, Err(SegcutError::Validation { .. })));
}

#[tokio::test]
async fn test_unsupported_codec_is_copied_with_warning() {
    let mut media = sample_media(&input());
    media.streams[0].codec_name = "prores".to_string();
    let probe = Arc::new(MockProbe::new(media.clone(), vec![0.0, 13.0, 26.0]));
    let (outputs, _) = timeline::output_segments(&[segment(1, 12.3, 20.0)], media.duration, false).unwrap();

    let plan = planner(probe)
        .plan(&media, &outputs, &settings(CutStrategy::Smart))
        .await
        .unwrap();
    assert_eq!(plan.segments[0].mode, CutMode::Copy);
    assert_eq!(plan.segments[0].cut_from, 12.3);
    assert_eq!(plan.warnings.len(), 1);
    assert!(plan.warnings[0].contains("Codec prores cannot be smart cut"));
}
