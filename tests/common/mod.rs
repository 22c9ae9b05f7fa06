//! Shared fixtures for integration tests: a fully simulated rig.
#![allow(dead_code)]

use std::path::Path;
use tactile_daq::config::{DigitResolution, Settings};
use tactile_daq::hardware::mock::{MockFrameSource, MockGripper, MotionModel};
use tactile_daq::hardware::{GripperLimits, GripperNode, TactileSensor, WristCamera};
use tactile_daq::scene::{Scene, LEFT_SENSOR, RIGHT_SENSOR, WRIST_CAMERA};

/// Settings for a small, fast simulated rig writing into `dataset_dir`.
pub fn test_settings(dataset_dir: &Path) -> Settings {
    let mut settings = Settings {
        dataset_dir: dataset_dir.to_path_buf(),
        relaxation_time: 0.01,
        num_force_bins: 5,
        digit_resolution: DigitResolution::Qvga,
        wrist_camera_resolution: [64, 48],
        resize_img_shape: Some([32, 32]),
        ..Settings::default()
    };
    settings.devices.simulate = true;
    settings.devices.object_width = Some(140);
    settings
}

/// Simulated scene plus a handle on its gripper for inspecting commands.
pub async fn mock_scene(settings: &Settings, motion: MotionModel) -> (Scene, MockGripper) {
    let gripper = MockGripper::new()
        .with_motion(motion)
        .with_object_width(settings.devices.object_width);
    let node = GripperNode::connect(
        Box::new(gripper.clone()),
        GripperLimits::from_settings(settings),
    )
    .await
    .expect("mock gripper activates");

    let (w, h) = settings.digit_resolution.dimensions();
    let [cam_w, cam_h] = settings.wrist_camera_resolution;
    let left = TactileSensor::new(
        &settings.left_digit_serial,
        settings.digit_resolution,
        Box::new(MockFrameSource::new(&settings.left_digit_serial, w, h)),
    )
    .expect("left sensor");
    let right = TactileSensor::new(
        &settings.right_digit_serial,
        settings.digit_resolution,
        Box::new(MockFrameSource::new(&settings.right_digit_serial, w, h)),
    )
    .expect("right sensor");
    let wrist = WristCamera::new(Box::new(MockFrameSource::new("wrist", cam_w, cam_h)), None);

    let scene = Scene::new(node)
        .with(LEFT_SENSOR, Box::new(left))
        .and_then(|s| s.with(RIGHT_SENSOR, Box::new(right)))
        .and_then(|s| s.with(WRIST_CAMERA, Box::new(wrist)))
        .expect("scene children");
    (scene, gripper)
}
