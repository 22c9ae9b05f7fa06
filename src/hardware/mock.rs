//! Mock Hardware Implementations
//!
//! Provides simulated devices for testing and dry runs without the rig.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockGripper` - Simulated gripper controller with motion timing and object contact
//! - `MockFrameSource` - Seeded RGB frame generator for tactile sensors and cameras
//!
//! # Performance Characteristics
//!
//! - MockGripper: 200ms per move, or a fixed number of "moving" status reads
//! - MockFrameSource: configurable readout latency, zero by default

use async_trait::async_trait;
use ndarray::Array3;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::{
    EpisodeRng, FrameSource, GripperDriver, GripperRegister, ObjectStatus,
};

// =============================================================================
// MockGripper - Simulated Gripper Controller
// =============================================================================

/// How a simulated move decides it has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionModel {
    /// Motion takes a fixed wall-clock time.
    Timed(Duration),
    /// The object status reads "moving" this many times, then settles.
    Polls(u32),
}

#[derive(Debug)]
struct GripperState {
    activated: bool,
    requested: u8,
    speed: u8,
    force: u8,
    origin: u8,
    started: Instant,
    moving_reads_left: u32,
    commands: Vec<(u8, u8, u8)>,
    closed: bool,
}

/// Mock gripper controller
///
/// Simulates a parallel gripper with:
/// - Activation handshake
/// - Position request echo (`PRE`) updated as soon as a move is commanded
/// - Motion completing after [`MotionModel`]
/// - Object contact at a fixed closing position
///
/// Clones share state, so a test can keep a handle after moving the driver
/// into a node.
///
/// # Example
///
/// ```rust,ignore
/// let gripper = MockGripper::new().with_object_width(Some(120));
/// gripper.command_move(255, 10, 5).await?;
/// ```
#[derive(Debug, Clone)]
pub struct MockGripper {
    state: Arc<RwLock<GripperState>>,
    motion: MotionModel,
    object_width: Option<u8>,
}

impl MockGripper {
    /// Create new open mock gripper with a 200ms timed motion and no object
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(GripperState {
                activated: false,
                requested: 0,
                speed: 0,
                force: 0,
                origin: 0,
                started: Instant::now(),
                moving_reads_left: 0,
                commands: Vec::new(),
                closed: false,
            })),
            motion: MotionModel::Timed(Duration::from_millis(200)),
            object_width: None,
        }
    }

    /// Use a different motion model
    pub fn with_motion(mut self, motion: MotionModel) -> Self {
        self.motion = motion;
        self
    }

    /// Place an object between the fingers, contacted at `width`
    pub fn with_object_width(mut self, width: Option<u8>) -> Self {
        self.object_width = width;
        self
    }

    /// Every `(position, speed, force)` command received so far
    pub async fn commands(&self) -> Vec<(u8, u8, u8)> {
        self.state.read().await.commands.clone()
    }

    /// Check if the connection was closed
    pub async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }

    /// Where a move from `origin` to `target` stops, and why.
    fn destination(&self, origin: u8, target: u8) -> (u8, ObjectStatus) {
        match self.object_width {
            Some(width) if origin <= width && width < target => {
                (width, ObjectStatus::StoppedInnerObject)
            }
            _ => (target, ObjectStatus::AtDestination),
        }
    }

    fn settled(&self, state: &GripperState) -> bool {
        match self.motion {
            MotionModel::Timed(duration) => state.started.elapsed() >= duration,
            MotionModel::Polls(_) => state.moving_reads_left == 0,
        }
    }

    fn current_position(&self, state: &GripperState) -> u8 {
        let (stop, _) = self.destination(state.origin, state.requested);
        if self.settled(state) {
            return stop;
        }
        match self.motion {
            MotionModel::Timed(duration) => {
                let fraction = (state.started.elapsed().as_secs_f64() / duration.as_secs_f64())
                    .clamp(0.0, 1.0);
                let span = f64::from(stop) - f64::from(state.origin);
                (f64::from(state.origin) + span * fraction).round() as u8
            }
            MotionModel::Polls(_) => state.origin,
        }
    }
}

impl Default for MockGripper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GripperDriver for MockGripper {
    async fn activate(&mut self) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.activated = true;
        debug!("MockGripper: activated");
        Ok(())
    }

    async fn command_move(&mut self, position: u8, speed: u8, force: u8) -> AppResult<bool> {
        let mut state = self.state.write().await;
        if !state.activated {
            return Err(DaqError::Instrument(
                "MockGripper: move commanded before activation".to_string(),
            ));
        }
        let origin = self.current_position(&state);
        state.origin = origin;
        state.requested = position;
        state.speed = speed;
        state.force = force;
        state.started = Instant::now();
        state.moving_reads_left = match self.motion {
            MotionModel::Polls(n) => n,
            MotionModel::Timed(_) => 0,
        };
        state.commands.push((position, speed, force));
        debug!(from = origin, to = position, speed, force, "MockGripper: moving");
        Ok(true)
    }

    async fn read(&mut self, register: GripperRegister) -> AppResult<u8> {
        let mut state = self.state.write().await;
        let value = match register {
            GripperRegister::Act => u8::from(state.activated),
            GripperRegister::Sta => {
                if state.activated {
                    3
                } else {
                    0
                }
            }
            GripperRegister::Gto => u8::from(state.activated),
            GripperRegister::Atr | GripperRegister::Adr | GripperRegister::Flt => 0,
            GripperRegister::Force => state.force,
            GripperRegister::Speed => state.speed,
            GripperRegister::Pre => state.requested,
            GripperRegister::Pos => self.current_position(&state),
            GripperRegister::Obj => {
                if state.moving_reads_left > 0 {
                    state.moving_reads_left -= 1;
                    ObjectStatus::Moving as u8
                } else if self.settled(&state) {
                    self.destination(state.origin, state.requested).1 as u8
                } else {
                    ObjectStatus::Moving as u8
                }
            }
        };
        Ok(value)
    }

    async fn close(&mut self) -> AppResult<()> {
        self.state.write().await.closed = true;
        debug!("MockGripper: connection closed");
        Ok(())
    }
}

// =============================================================================
// MockFrameSource - Simulated Camera / Tactile Sensor
// =============================================================================

/// Mock RGB frame source
///
/// Produces `[height, width, 3]` noise frames from a ChaCha8 stream. The
/// stream is reseeded from the episode RNG at every reset, so a recording
/// with a fixed seed is reproducible.
#[derive(Debug, Clone)]
pub struct MockFrameSource {
    name: String,
    resolution: (u32, u32),
    rng: ChaCha8Rng,
    latency: Duration,
    frame_count: Arc<RwLock<u64>>,
    closed: Arc<RwLock<bool>>,
}

impl MockFrameSource {
    /// Create new mock frame source with specified resolution
    ///
    /// # Arguments
    /// * `name` - Identity reported by [`FrameSource::name`]
    /// * `width` - Frame width in pixels
    /// * `height` - Frame height in pixels
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            resolution: (width, height),
            rng: ChaCha8Rng::seed_from_u64(0),
            latency: Duration::ZERO,
            frame_count: Arc::new(RwLock::new(0)),
            closed: Arc::new(RwLock::new(false)),
        }
    }

    /// Simulate a readout delay per frame
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Get total number of frames produced
    pub async fn frame_count(&self) -> u64 {
        *self.frame_count.read().await
    }

    /// Check if the source was closed
    pub async fn is_closed(&self) -> bool {
        *self.closed.read().await
    }
}

#[async_trait]
impl FrameSource for MockFrameSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    async fn grab(&mut self) -> AppResult<Array3<u8>> {
        if *self.closed.read().await {
            return Err(DaqError::Instrument(format!(
                "{}: frame requested after close",
                self.name
            )));
        }
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        let (width, height) = self.resolution;
        let mut pixels = vec![0u8; width as usize * height as usize * 3];
        self.rng.fill_bytes(&mut pixels);
        *self.frame_count.write().await += 1;
        Ok(Array3::from_shape_vec(
            (height as usize, width as usize, 3),
            pixels,
        )?)
    }

    async fn reset(&mut self, rng: &mut EpisodeRng) -> AppResult<()> {
        self.rng = ChaCha8Rng::seed_from_u64(rng.gen());
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        *self.closed.write().await = true;
        debug!(source = %self.name, "MockFrameSource: closed");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_mock_gripper_timed_motion() {
        let mut gripper = MockGripper::new();
        gripper.activate().await.unwrap();
        assert!(gripper.command_move(200, 10, 5).await.unwrap());

        assert_eq!(gripper.read(GripperRegister::Pre).await.unwrap(), 200);
        assert_eq!(gripper.read(GripperRegister::Obj).await.unwrap(), 0);

        sleep(Duration::from_millis(250)).await;
        assert_eq!(gripper.read(GripperRegister::Pos).await.unwrap(), 200);
        assert_eq!(
            gripper.read(GripperRegister::Obj).await.unwrap(),
            ObjectStatus::AtDestination as u8
        );
    }

    #[tokio::test]
    async fn test_mock_gripper_counted_polls() {
        let mut gripper = MockGripper::new().with_motion(MotionModel::Polls(3));
        gripper.activate().await.unwrap();
        gripper.command_move(255, 10, 5).await.unwrap();

        let statuses: Vec<u8> = {
            let mut out = Vec::new();
            for _ in 0..5 {
                out.push(gripper.read(GripperRegister::Obj).await.unwrap());
            }
            out
        };
        assert_eq!(statuses, vec![0, 0, 0, 3, 3]);
    }

    #[tokio::test]
    async fn test_mock_gripper_object_contact() {
        let mut gripper = MockGripper::new()
            .with_motion(MotionModel::Polls(0))
            .with_object_width(Some(140));
        gripper.activate().await.unwrap();
        gripper.command_move(255, 10, 5).await.unwrap();

        assert_eq!(gripper.read(GripperRegister::Pos).await.unwrap(), 140);
        assert_eq!(
            gripper.read(GripperRegister::Obj).await.unwrap(),
            ObjectStatus::StoppedInnerObject as u8
        );

        // Opening moves away from the object without contact.
        gripper.command_move(0, 10, 5).await.unwrap();
        assert_eq!(gripper.read(GripperRegister::Pos).await.unwrap(), 0);
        assert_eq!(gripper.commands().await, vec![(255, 10, 5), (0, 10, 5)]);
    }

    #[tokio::test]
    async fn test_mock_gripper_requires_activation() {
        let mut gripper = MockGripper::new();
        assert_eq!(gripper.read(GripperRegister::Sta).await.unwrap(), 0);
        assert!(gripper.command_move(100, 10, 5).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_frame_source_shape() {
        let mut source = MockFrameSource::new("D20591", 320, 240);
        let frame = source.grab().await.unwrap();
        assert_eq!(frame.shape(), &[240, 320, 3]);
        assert_eq!(source.frame_count().await, 1);
    }

    #[tokio::test]
    async fn test_mock_frame_source_reset_is_reproducible() {
        let mut a = MockFrameSource::new("a", 8, 4);
        let mut b = MockFrameSource::new("b", 8, 4);
        a.reset(&mut EpisodeRng::seed_from_u64(7)).await.unwrap();
        b.reset(&mut EpisodeRng::seed_from_u64(7)).await.unwrap();
        assert_eq!(a.grab().await.unwrap(), b.grab().await.unwrap());
    }

    #[tokio::test]
    async fn test_mock_frame_source_closed() {
        let mut source = MockFrameSource::new("cam", 8, 4);
        source.close().await.unwrap();
        assert!(source.is_closed().await);
        assert!(source.grab().await.is_err());
    }
}
