//! Tests for the touch and scan protocols against a simulated rig.

mod common;

use common::{mock_scene, test_settings};
use std::time::Duration;
use tactile_daq::capture::{scan_continuous, scan_fixed_delay, scan_object, touch};
use tactile_daq::config::CapturePolicy;
use tactile_daq::data::item::Field;
use tactile_daq::data::tensor::{DType, Tensor};
use tactile_daq::error::DaqError;
use tactile_daq::hardware::mock::MotionModel;
use tempfile::tempdir;

#[tokio::test(start_paused = true)]
async fn test_fixed_delay_scan_follows_force_ramp() {
    let dir = tempdir().unwrap();
    let settings = test_settings(dir.path());
    let (mut scene, gripper) = mock_scene(&settings, MotionModel::Polls(0)).await;

    let item = scan_fixed_delay(&settings, &mut scene).await.unwrap();

    let force = item.get(Field::Force).unwrap();
    assert_eq!(force.shape(), &[5, 1]);
    match force {
        Tensor::F64(values) => {
            let values: Vec<f64> = values.iter().copied().collect();
            assert_eq!(values, vec![0.0, 2.5, 5.0, 7.5, 10.0]);
        }
        other => panic!("force stored as {}", other.dtype()),
    }

    assert_eq!(
        item.field_names(),
        vec![
            Field::Pos,
            Field::Force,
            Field::ObjectDetected,
            Field::LeftSensor,
            Field::RightSensor,
            Field::WristCamera,
        ]
    );
    assert_eq!(item.get(Field::LeftSensor).unwrap().shape(), &[5, 240, 320, 3]);
    assert_eq!(item.get(Field::WristCamera).unwrap().shape(), &[5, 32, 32, 3]);
    assert_eq!(item.get(Field::ObjectDetected).unwrap().dtype(), DType::Bool);
    assert!(!item.contains(Field::ObjHardness));

    // Five touches at max_pos with truncated forces, then reopen to min_pos.
    let commands = gripper.commands().await;
    assert_eq!(
        commands,
        vec![
            (255, 10, 0),
            (255, 10, 2),
            (255, 10, 5),
            (255, 10, 7),
            (255, 10, 10),
            (3, 10, 0),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_touch_reports_contact() {
    let dir = tempdir().unwrap();
    let settings = test_settings(dir.path());
    let (mut scene, _gripper) = mock_scene(&settings, MotionModel::Polls(0)).await;

    let item = touch(&mut scene, 255, 10, 4.0, Duration::from_millis(10), None)
        .await
        .unwrap();
    assert_eq!(item.get(Field::Pos), Some(&Tensor::u8_1d(140)));
    assert_eq!(item.get(Field::ObjectDetected), Some(&Tensor::bool_1d(true)));
    assert_eq!(item.get(Field::Force), Some(&Tensor::f64_1d(4.0)));
    assert_eq!(item.get(Field::WristCamera).unwrap().shape(), &[48, 64, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_continuous_scan_includes_terminal_sample() {
    let dir = tempdir().unwrap();
    let mut settings = test_settings(dir.path());
    settings.capture.policy = CapturePolicy::Continuous;
    let (mut scene, gripper) = mock_scene(&settings, MotionModel::Polls(3)).await;

    let item = scan_object(&settings, &mut scene).await.unwrap();

    assert_eq!(item.get(Field::Pos).unwrap().shape(), &[4, 1]);
    assert_eq!(item.get(Field::RightSensor).unwrap().shape(), &[4, 240, 320, 3]);
    match item.get(Field::ObjectDetected).unwrap() {
        Tensor::Bool(flags) => {
            let flags: Vec<bool> = flags.iter().copied().collect();
            assert_eq!(flags, vec![false, false, false, true]);
        }
        other => panic!("object_detected stored as {}", other.dtype()),
    }
    assert_eq!(gripper.commands().await, vec![(255, 10, 10), (3, 10, 0)]);
}

#[tokio::test(start_paused = true)]
async fn test_continuous_scan_is_bounded() {
    let dir = tempdir().unwrap();
    let mut settings = test_settings(dir.path());
    settings.capture.max_samples = 5;
    let (mut scene, _gripper) = mock_scene(&settings, MotionModel::Polls(100)).await;

    let err = scan_continuous(&settings, &mut scene).await.unwrap_err();
    assert!(matches!(err, DaqError::Timeout { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_continuous_scan_with_timed_motion() {
    let dir = tempdir().unwrap();
    let settings = test_settings(dir.path());
    let (mut scene, _gripper) =
        mock_scene(&settings, MotionModel::Timed(Duration::from_millis(200))).await;

    let item = scan_continuous(&settings, &mut scene).await.unwrap();
    let samples = item.get(Field::Pos).unwrap().shape()[0];
    // 30 Hz over a 200 ms motion.
    assert!((6..=8).contains(&samples), "got {} samples", samples);
}

#[tokio::test(start_paused = true)]
async fn test_scans_are_reproducible_for_a_seed() {
    let dir = tempdir().unwrap();
    let settings = test_settings(dir.path());
    let (mut scene, _gripper) = mock_scene(&settings, MotionModel::Polls(0)).await;

    let first = scan_fixed_delay(&settings, &mut scene).await.unwrap();
    let second = scan_fixed_delay(&settings, &mut scene).await.unwrap();
    assert_eq!(
        first.get(Field::LeftSensor),
        second.get(Field::LeftSensor)
    );
    assert_ne!(
        first.get(Field::LeftSensor),
        first.get(Field::RightSensor)
    );
}
