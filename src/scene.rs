//! Scene: the rig's devices composed into one addressable unit.
//!
//! Every child is registered under a name and its observation fields are
//! re-keyed as `<name>/<field>`, so two devices reporting the same field name
//! stay distinct. The gripper is always present under [`GRIPPER`] and is also
//! reachable as a typed handle for actuation.

use crate::config::Settings;
use crate::error::{AppResult, DaqError};
use crate::hardware::mock::{MockFrameSource, MockGripper, MotionModel};
use crate::hardware::robotiq::RobotiqDriver;
use crate::hardware::{
    EpisodeRng, FrameSource, GripperDriver, GripperLimits, GripperNode, Node, Observation,
    TactileSensor, WristCamera,
};
use std::time::Duration;
use tracing::{info, warn};

/// Name of the gripper child.
pub const GRIPPER: &str = "gripper";
/// Name of the left tactile sensor child.
pub const LEFT_SENSOR: &str = "left";
/// Name of the right tactile sensor child.
pub const RIGHT_SENSOR: &str = "right";
/// Name of the wrist camera child.
pub const WRIST_CAMERA: &str = "wrist";

/// Separator between child name and field name in scene observations.
pub const KEY_SEPARATOR: char = '/';

/// Gripper plus named observation-only children.
pub struct Scene {
    gripper: GripperNode,
    children: Vec<(String, Box<dyn Node>)>,
    closed: bool,
}

impl Scene {
    /// Scene holding only the gripper.
    pub fn new(gripper: GripperNode) -> Self {
        Self {
            gripper,
            children: Vec::new(),
            closed: false,
        }
    }

    /// Register a child under `name`.
    ///
    /// Names must be non-empty, unique, and free of the key separator.
    pub fn add(&mut self, name: impl Into<String>, node: Box<dyn Node>) -> AppResult<()> {
        let name = name.into();
        if name.is_empty() || name.contains(KEY_SEPARATOR) {
            return Err(DaqError::Configuration(format!(
                "Invalid scene child name '{}'",
                name
            )));
        }
        if name == GRIPPER || self.children.iter().any(|(n, _)| *n == name) {
            return Err(DaqError::Configuration(format!(
                "Scene already has a child named '{}'",
                name
            )));
        }
        self.children.push((name, node));
        Ok(())
    }

    /// Builder-style [`Scene::add`].
    pub fn with(mut self, name: impl Into<String>, node: Box<dyn Node>) -> AppResult<Self> {
        self.add(name, node)?;
        Ok(self)
    }

    /// Typed gripper handle.
    pub fn gripper(&mut self) -> &mut GripperNode {
        &mut self.gripper
    }

    /// Child names, gripper first.
    pub fn child_names(&self) -> Vec<&str> {
        std::iter::once(GRIPPER)
            .chain(self.children.iter().map(|(name, _)| name.as_str()))
            .collect()
    }

    /// Observe every child sequentially and merge into `<child>/<field>` keys.
    pub async fn observe(&mut self) -> AppResult<Observation> {
        let mut merged = Observation::new();
        let gripper_obs = self.gripper.observe().await?;
        merge_prefixed(&mut merged, GRIPPER, gripper_obs)?;
        for (name, node) in self.children.iter_mut() {
            let obs = node.observe().await?;
            merge_prefixed(&mut merged, name, obs)?;
        }
        Ok(merged)
    }

    /// Reset stateful children before a new episode.
    pub async fn initialize_episode(&mut self, rng: &mut EpisodeRng) -> AppResult<()> {
        self.gripper.initialize_episode(rng).await?;
        for (_, node) in self.children.iter_mut() {
            node.initialize_episode(rng).await?;
        }
        Ok(())
    }

    /// Release every device, attempting all of them even if some fail.
    ///
    /// Closing twice is a no-op.
    pub async fn close(&mut self) -> AppResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut errors = Vec::new();
        for (name, node) in self.children.iter_mut() {
            if let Err(err) = node.close().await {
                warn!(child = %name, error = %err, "failed to close scene child");
                errors.push(err);
            }
        }
        if let Err(err) = self.gripper.close().await {
            warn!(child = GRIPPER, error = %err, "failed to close scene child");
            errors.push(err);
        }

        if errors.is_empty() {
            info!("scene closed");
            Ok(())
        } else {
            Err(DaqError::ShutdownFailed(errors))
        }
    }
}

fn merge_prefixed(merged: &mut Observation, prefix: &str, obs: Observation) -> AppResult<()> {
    for (field, tensor) in obs {
        let key = format!("{}{}{}", prefix, KEY_SEPARATOR, field);
        if merged.contains_key(&key) {
            return Err(DaqError::Instrument(format!(
                "Observation key '{}' reported twice",
                key
            )));
        }
        merged.insert(key, tensor);
    }
    Ok(())
}

/// Frame sources for the left sensor, right sensor and wrist camera.
type FrameSources = (
    Box<dyn FrameSource>,
    Box<dyn FrameSource>,
    Box<dyn FrameSource>,
);

fn frame_sources(settings: &Settings, simulate: bool) -> AppResult<FrameSources> {
    let backend = if simulate {
        "mock"
    } else {
        settings.devices.camera_backend.as_str()
    };
    match backend {
        "mock" => {
            let (w, h) = settings.digit_resolution.dimensions();
            let [cam_w, cam_h] = settings.wrist_camera_resolution;
            let left: Box<dyn FrameSource> =
                Box::new(MockFrameSource::new(&settings.left_digit_serial, w, h));
            let right: Box<dyn FrameSource> =
                Box::new(MockFrameSource::new(&settings.right_digit_serial, w, h));
            let wrist: Box<dyn FrameSource> = Box::new(MockFrameSource::new("wrist", cam_w, cam_h));
            Ok((left, right, wrist))
        }
        other => Err(DaqError::FeatureNotEnabled(format!("camera_{}", other))),
    }
}

/// Build and connect the rig described by `settings`.
///
/// With `devices.simulate` every device is a mock. Otherwise the gripper is
/// reached over its socket and frames come from `devices.camera_backend`.
/// The wrist camera streams at full size; captures resize its frames.
pub async fn build_scene(settings: &Settings) -> AppResult<Scene> {
    let simulate = settings.devices.simulate;
    let (left, right, wrist) = frame_sources(settings, simulate)?;

    let driver: Box<dyn GripperDriver> = if simulate {
        Box::new(
            MockGripper::new()
                .with_motion(MotionModel::Timed(Duration::from_millis(200)))
                .with_object_width(settings.devices.object_width),
        )
    } else {
        Box::new(RobotiqDriver::connect(&settings.host, settings.port, settings.io_timeout()).await?)
    };
    let gripper = GripperNode::connect(driver, GripperLimits::from_settings(settings)).await?;

    let mut scene = Scene::new(gripper);
    let nodes: Vec<(&str, AppResult<Box<dyn Node>>)> = vec![
        (
            LEFT_SENSOR,
            TactileSensor::new(&settings.left_digit_serial, settings.digit_resolution, left)
                .map(|n| Box::new(n) as Box<dyn Node>),
        ),
        (
            RIGHT_SENSOR,
            TactileSensor::new(&settings.right_digit_serial, settings.digit_resolution, right)
                .map(|n| Box::new(n) as Box<dyn Node>),
        ),
        (
            WRIST_CAMERA,
            Ok(Box::new(WristCamera::new(wrist, None)) as Box<dyn Node>),
        ),
    ];
    for (name, node) in nodes {
        if let Err(err) = node.and_then(|node| scene.add(name, node)) {
            return Err(abandon(&mut scene, err).await);
        }
    }

    info!(simulate, children = ?scene.child_names(), "scene ready");
    Ok(scene)
}

/// Close a partly built scene and hand back the error that stopped the build.
async fn abandon(scene: &mut Scene, err: DaqError) -> DaqError {
    if let Err(close_err) = scene.close().await {
        warn!(error = %close_err, "scene close failed after build error");
    }
    err
}
