//! Episode capture protocol.
//!
//! A scan aligns gripper actuation with sensor sampling and returns one
//! [`DatasetItem`] whose fields carry a leading axis over the samples taken.
//! Two policies exist:
//!
//! - **Fixed delay**: for each force of an inclusive linear ramp, close the
//!   gripper at that force, wait the relaxation time, sample once.
//! - **Continuous**: close once at the maximum force and sample at a fixed
//!   frame rate until the gripper reports it has stopped moving.
//!
//! Both reopen the gripper afterwards. Sampling is sequential; no two device
//! operations overlap.

use crate::config::{CapturePolicy, Settings};
use crate::data::item::{DatasetItem, Field};
use crate::data::tensor::Tensor;
use crate::error::{AppResult, DaqError};
use crate::hardware::sensors::resize_rgb;
use crate::hardware::{EpisodeRng, ObjectStatus, Observation};
use crate::scene::{Scene, GRIPPER, KEY_SEPARATOR, LEFT_SENSOR, RIGHT_SENSOR, WRIST_CAMERA};
use ndarray::{Array3, Ix3};
use rand::SeedableRng;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info};

/// `count` evenly spaced forces from `min` to `max`, both included.
///
/// A single bin yields just `min`. The last force is exactly `max`.
pub fn force_ramp(min: u8, max: u8, count: usize) -> Vec<f64> {
    let (min, max) = (f64::from(min), f64::from(max));
    match count {
        0 => Vec::new(),
        1 => vec![min],
        n => {
            let step = (max - min) / (n - 1) as f64;
            let mut ramp: Vec<f64> = (0..n - 1).map(|i| min + step * i as f64).collect();
            ramp.push(max);
            ramp
        }
    }
}

/// Move the gripper, let the contact relax, then sample every sensor once.
///
/// The device receives `force` truncated to an integer; the item keeps the
/// requested value.
pub async fn touch(
    scene: &mut Scene,
    pos: u8,
    speed: u8,
    force: f64,
    relaxation: Duration,
    resize: Option<(u32, u32)>,
) -> AppResult<DatasetItem> {
    scene.gripper().move_to(pos, speed, force as u8).await?;
    sleep(relaxation).await;
    let obs = scene.observe().await?;
    sensor_item(&obs, force, resize)
}

/// Scan the object with the configured policy.
pub async fn scan_object(settings: &Settings, scene: &mut Scene) -> AppResult<DatasetItem> {
    match settings.capture.policy {
        CapturePolicy::FixedDelay => scan_fixed_delay(settings, scene).await,
        CapturePolicy::Continuous => scan_continuous(settings, scene).await,
    }
}

/// One touch per force of the ramp, stacked.
pub async fn scan_fixed_delay(settings: &Settings, scene: &mut Scene) -> AppResult<DatasetItem> {
    scene
        .initialize_episode(&mut EpisodeRng::seed_from_u64(settings.seed))
        .await?;

    let forces = force_ramp(settings.min_force, settings.max_force, settings.num_force_bins);
    let mut series = Vec::with_capacity(forces.len());
    for force in forces {
        let item = touch(
            scene,
            settings.max_pos,
            settings.speed,
            force,
            settings.relaxation(),
            settings.resize_shape(),
        )
        .await?;
        debug!(force, "touch sampled");
        series.push(item);
    }

    scene.gripper().open(settings.speed, settings.min_force).await?;
    info!(samples = series.len(), "fixed-delay scan complete");
    DatasetItem::stack(&series)
}

/// Sample at the frame rate until the gripper stops, stacked.
///
/// The sample on which the gripper is first seen stopped is included. Fails
/// if the gripper is still moving after `capture.max_samples` samples.
pub async fn scan_continuous(settings: &Settings, scene: &mut Scene) -> AppResult<DatasetItem> {
    scene
        .initialize_episode(&mut EpisodeRng::seed_from_u64(settings.seed))
        .await?;

    let force = f64::from(settings.max_force);
    scene
        .gripper()
        .move_to(settings.max_pos, settings.speed, settings.max_force)
        .await?;

    let mut ticker = interval(settings.frame_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut series = Vec::new();
    loop {
        ticker.tick().await;
        let obs = scene.observe().await?;
        let status = gripper_status(&obs)?;
        series.push(sensor_item(&obs, force, settings.resize_shape())?);
        if !status.is_moving() {
            debug!(?status, samples = series.len(), "gripper settled");
            break;
        }
        if series.len() >= settings.capture.max_samples {
            return Err(DaqError::Timeout {
                operation: format!(
                    "continuous scan waiting {} samples for the gripper to settle",
                    settings.capture.max_samples
                ),
                timeout: settings.frame_period().saturating_mul(
                    u32::try_from(settings.capture.max_samples).unwrap_or(u32::MAX),
                ),
            });
        }
    }

    scene.gripper().open(settings.speed, settings.min_force).await?;
    info!(samples = series.len(), "continuous scan complete");
    DatasetItem::stack(&series)
}

fn scene_key(child: &str, field: &str) -> String {
    format!("{}{}{}", child, KEY_SEPARATOR, field)
}

fn lookup<'a>(obs: &'a Observation, child: &str, field: &str) -> AppResult<&'a Tensor> {
    let key = scene_key(child, field);
    obs.get(&key)
        .ok_or_else(|| DaqError::Instrument(format!("Scene observation lacks '{}'", key)))
}

fn gripper_status(obs: &Observation) -> AppResult<ObjectStatus> {
    let raw = lookup(obs, GRIPPER, "status")?
        .first_u8()
        .ok_or_else(|| DaqError::Instrument("Gripper status is not a u8 array".to_string()))?;
    ObjectStatus::try_from(raw)
}

/// Turn one scene observation into the sensor half of a dataset item.
fn sensor_item(
    obs: &Observation,
    force: f64,
    resize: Option<(u32, u32)>,
) -> AppResult<DatasetItem> {
    let wrist = match (lookup(obs, WRIST_CAMERA, "image")?, resize) {
        (Tensor::U8(image), Some(dsize)) => {
            let frame: Array3<u8> = image.clone().into_dimensionality::<Ix3>()?;
            Tensor::from(resize_rgb(&frame, dsize)?.into_dyn())
        }
        (image, _) => image.clone(),
    };

    Ok(DatasetItem::new()
        .with(Field::Pos, lookup(obs, GRIPPER, "pos")?.clone())
        .with(Field::Force, Tensor::f64_1d(force))
        .with(
            Field::ObjectDetected,
            lookup(obs, GRIPPER, "object_detected")?.clone(),
        )
        .with(Field::LeftSensor, lookup(obs, LEFT_SENSOR, "sensor")?.clone())
        .with(Field::RightSensor, lookup(obs, RIGHT_SENSOR, "sensor")?.clone())
        .with(Field::WristCamera, wrist))
}
