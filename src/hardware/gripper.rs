//! Gripper adapter.
//!
//! Wraps a [`GripperDriver`] with the position limits and move confirmation
//! the capture protocol relies on. A move is confirmed once the controller
//! echoes the commanded position in its `PRE` register; the fingers may still
//! be travelling at that point.

use crate::config::Settings;
use crate::data::tensor::Tensor;
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::{
    GripperDriver, GripperRegister, MoveAck, Node, Observation, ObjectStatus,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// Interval between `PRE` register reads while confirming a move.
pub const MOVE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Motion limits and timing of a gripper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GripperLimits {
    /// Smallest commandable position.
    pub min_pos: u8,
    /// Largest commandable position.
    pub max_pos: u8,
    /// Limit for a move to be confirmed.
    pub move_timeout: Duration,
}

impl GripperLimits {
    /// Limits taken from the run settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            min_pos: settings.min_pos,
            max_pos: settings.max_pos,
            move_timeout: settings.move_timeout(),
        }
    }

    /// Clip a requested position into `[min_pos, max_pos]`.
    pub fn clip(&self, position: u8) -> u8 {
        position.clamp(self.min_pos, self.max_pos)
    }
}

impl Default for GripperLimits {
    fn default() -> Self {
        Self {
            min_pos: 0,
            max_pos: 255,
            move_timeout: Duration::from_secs(5),
        }
    }
}

/// Parallel gripper node.
pub struct GripperNode {
    driver: Box<dyn GripperDriver>,
    limits: GripperLimits,
}

impl GripperNode {
    /// Activate the gripper behind `driver` and wrap it.
    pub async fn connect(
        mut driver: Box<dyn GripperDriver>,
        limits: GripperLimits,
    ) -> AppResult<Self> {
        driver.activate().await?;
        info!(
            min_pos = limits.min_pos,
            max_pos = limits.max_pos,
            "gripper activated"
        );
        Ok(Self { driver, limits })
    }

    /// Configured limits.
    pub fn limits(&self) -> &GripperLimits {
        &self.limits
    }

    /// Command a move and wait until the controller confirms the target.
    ///
    /// The position is clipped to the configured limits first. Fails with
    /// [`DaqError::Timeout`] if the confirmation does not arrive within the
    /// move timeout.
    pub async fn move_to(&mut self, position: u8, speed: u8, force: u8) -> AppResult<MoveAck> {
        let target = self.limits.clip(position);
        let ack = self.driver.command_move(target, speed, force).await?;
        debug!(target, speed, force, ack, "gripper move commanded");

        let deadline = Instant::now() + self.limits.move_timeout;
        loop {
            if self.driver.read(GripperRegister::Pre).await? == target {
                break;
            }
            if Instant::now() >= deadline {
                return Err(DaqError::Timeout {
                    operation: format!("gripper move to {}", target),
                    timeout: self.limits.move_timeout,
                });
            }
            sleep(MOVE_POLL_INTERVAL).await;
        }

        Ok(MoveAck {
            ack,
            position: target,
        })
    }

    /// Open the fingers as far as the limits allow.
    pub async fn open(&mut self, speed: u8, force: u8) -> AppResult<MoveAck> {
        self.move_to(0, speed, force).await
    }

    /// Current object detection status.
    pub async fn object_status(&mut self) -> AppResult<ObjectStatus> {
        ObjectStatus::try_from(self.driver.read(GripperRegister::Obj).await?)
    }
}

#[async_trait]
impl Node for GripperNode {
    async fn observe(&mut self) -> AppResult<Observation> {
        let pos = self.driver.read(GripperRegister::Pos).await?;
        let status = self.object_status().await?;

        let mut obs = Observation::new();
        obs.insert("pos".to_string(), Tensor::u8_1d(pos));
        obs.insert(
            "object_detected".to_string(),
            Tensor::bool_1d(status == ObjectStatus::StoppedInnerObject),
        );
        obs.insert("status".to_string(), Tensor::u8_1d(status as u8));
        Ok(obs)
    }

    async fn close(&mut self) -> AppResult<()> {
        self.driver.close().await
    }
}
