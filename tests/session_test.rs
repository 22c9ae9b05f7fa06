//! Tests for the episode loop: indexing, config snapshot, and shutdown.

mod common;

use async_trait::async_trait;
use common::{mock_scene, test_settings};
use std::fs;
use tactile_daq::data::item::{HardnessClass, ObjectDescription};
use tactile_daq::data::npz::read_npz;
use tactile_daq::data::storage::DatasetLayout;
use tactile_daq::error::{AppResult, DaqError};
use tactile_daq::hardware::mock::MotionModel;
use tactile_daq::session::{run_session, DatasetWriter, ObjectDescriber, ScriptedDescriber};
use tempfile::tempdir;
use tokio::sync::watch;

/// Answers `answers` times, then requests shutdown and waits for an answer
/// that never comes.
struct InterruptingDescriber {
    answers: usize,
    shutdown: watch::Sender<bool>,
}

#[async_trait]
impl ObjectDescriber for InterruptingDescriber {
    async fn describe(&mut self) -> AppResult<ObjectDescription> {
        if self.answers == 0 {
            self.shutdown.send_replace(true);
            std::future::pending::<()>().await;
        }
        self.answers -= 1;
        Ok(ObjectDescription {
            hardness: HardnessClass::Soft,
        })
    }
}

fn item_names(layout: &DatasetLayout) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(layout.items_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test(start_paused = true)]
async fn test_episodes_get_contiguous_indices() {
    let dir = tempdir().unwrap();
    let settings = test_settings(dir.path().join("fresh").as_path());
    let (mut scene, _gripper) = mock_scene(&settings, MotionModel::Polls(0)).await;
    let (_tx, rx) = watch::channel(false);
    let mut describer = ScriptedDescriber::new([HardnessClass::Soft; 4]);

    let writer = DatasetWriter::new(settings).with_episode_limit(Some(4));
    let summary = writer.run(&mut scene, &mut describer, rx).await.unwrap();

    assert_eq!(summary.first_index, 0);
    assert_eq!(summary.episodes_written, 4);
    assert!(summary.config_written);
    assert_eq!(
        item_names(writer.layout()),
        vec!["0000.npz", "0001.npz", "0002.npz", "0003.npz"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_restart_continues_indexing_and_keeps_config() {
    let dir = tempdir().unwrap();
    let settings = test_settings(dir.path());
    let layout = DatasetLayout::new(dir.path());

    for (run, expected_first) in [(0, 0), (1, 2)] {
        let (mut scene, _gripper) = mock_scene(&settings, MotionModel::Polls(0)).await;
        let (_tx, rx) = watch::channel(false);
        let mut describer = ScriptedDescriber::new([HardnessClass::Hard; 2]);
        let mut run_settings = settings.clone();
        // Settings changed between runs must not leak into the snapshot.
        run_settings.seed = 1 + run;
        let writer = DatasetWriter::new(run_settings).with_episode_limit(Some(2));
        let summary = writer.run(&mut scene, &mut describer, rx).await.unwrap();

        assert_eq!(summary.first_index, expected_first);
        assert_eq!(summary.config_written, run == 0);
    }

    assert_eq!(layout.count_items().unwrap(), 4);
    let config = read_npz(&layout.config_path()).unwrap();
    assert_eq!(config["seed"].item(), Some(tactile_daq::data::tensor::Scalar::Int(1)));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_describing_writes_nothing() {
    let dir = tempdir().unwrap();
    let settings = test_settings(dir.path());
    let (mut scene, _gripper) = mock_scene(&settings, MotionModel::Polls(0)).await;
    let (tx, rx) = watch::channel(false);
    let mut describer = InterruptingDescriber {
        answers: 2,
        shutdown: tx,
    };

    let writer = DatasetWriter::new(settings);
    let summary = writer.run(&mut scene, &mut describer, rx).await.unwrap();

    assert_eq!(summary.episodes_written, 2);
    assert_eq!(item_names(writer.layout()), vec!["0000.npz", "0001.npz"]);
    assert!(!writer.layout().item_path(2).exists());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_before_start() {
    let dir = tempdir().unwrap();
    let settings = test_settings(dir.path());
    let (mut scene, gripper) = mock_scene(&settings, MotionModel::Polls(0)).await;
    let (_tx, rx) = watch::channel(true);
    let mut describer = ScriptedDescriber::new([HardnessClass::Soft]);

    let writer = DatasetWriter::new(settings);
    let summary = writer.run(&mut scene, &mut describer, rx).await.unwrap();

    assert_eq!(summary.episodes_written, 0);
    assert!(writer.layout().config_path().exists());
    assert!(gripper.commands().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_description_aborts_run() {
    let dir = tempdir().unwrap();
    let settings = test_settings(dir.path());
    let (mut scene, _gripper) = mock_scene(&settings, MotionModel::Polls(0)).await;
    let (_tx, rx) = watch::channel(false);
    let mut describer = ScriptedDescriber::new([HardnessClass::Hard]);

    let writer = DatasetWriter::new(settings);
    let err = writer.run(&mut scene, &mut describer, rx).await.unwrap_err();

    assert!(matches!(err, DaqError::InvalidDescription(_)));
    assert_eq!(item_names(writer.layout()), vec!["0000.npz"]);
}

#[tokio::test(start_paused = true)]
async fn test_run_session_with_simulated_rig() {
    let dir = tempdir().unwrap();
    let mut settings = test_settings(dir.path());
    settings.num_force_bins = 2;
    let (_tx, rx) = watch::channel(false);
    let mut describer = ScriptedDescriber::new([HardnessClass::Soft]);

    let writer = DatasetWriter::new(settings).with_episode_limit(Some(1));
    let summary = run_session(&writer, &mut describer, rx).await.unwrap();

    assert_eq!(summary.episodes_written, 1);
    let record = read_npz(&writer.layout().item_path(0)).unwrap();
    assert_eq!(record["left_sensor"].shape(), &[2, 240, 320, 3]);
    assert_eq!(record["wrist_camera"].shape(), &[2, 32, 32, 3]);
    assert_eq!(record.len(), 7);
}
