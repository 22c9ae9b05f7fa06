//! Capability traits for the rig's devices.
//!
//! Adapters talk to hardware only through these seams. A [`GripperDriver`]
//! speaks the gripper's register protocol, a [`FrameSource`] produces RGB
//! frames, and every adapter exposes the uniform [`Node`] contract used by
//! the scene.

use crate::data::tensor::Tensor;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use ndarray::Array3;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Named snapshot of a device's state.
pub type Observation = BTreeMap<String, Tensor>;

/// Randomness source handed to every node at episode start.
pub type EpisodeRng = ChaCha8Rng;

/// Uniform observation contract shared by every adapter.
#[async_trait]
pub trait Node: Send {
    /// Sample the device. The key set and dtypes are stable per device type.
    async fn observe(&mut self) -> AppResult<Observation>;

    /// Reset episode state before a new episode.
    async fn initialize_episode(&mut self, _rng: &mut EpisodeRng) -> AppResult<()> {
        Ok(())
    }

    /// Release the device.
    async fn close(&mut self) -> AppResult<()> {
        Ok(())
    }
}

/// Gripper controller registers.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GripperRegister {
    /// Activation request
    Act,
    /// Go-to request
    Gto,
    /// Automatic release
    Atr,
    /// Automatic release direction
    Adr,
    Force,
    Speed,
    /// Position request on SET, actual finger position on GET
    Pos,
    /// Gripper status, 3 once activated
    Sta,
    /// Position request echo
    Pre,
    /// Object detection status
    Obj,
    /// Fault code
    Flt,
}

impl GripperRegister {
    /// Register name on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            GripperRegister::Act => "ACT",
            GripperRegister::Gto => "GTO",
            GripperRegister::Atr => "ATR",
            GripperRegister::Adr => "ADR",
            GripperRegister::Force => "FOR",
            GripperRegister::Speed => "SPE",
            GripperRegister::Pos => "POS",
            GripperRegister::Sta => "STA",
            GripperRegister::Pre => "PRE",
            GripperRegister::Obj => "OBJ",
            GripperRegister::Flt => "FLT",
        }
    }
}

impl fmt::Display for GripperRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GripperRegister {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ACT" => GripperRegister::Act,
            "GTO" => GripperRegister::Gto,
            "ATR" => GripperRegister::Atr,
            "ADR" => GripperRegister::Adr,
            "FOR" => GripperRegister::Force,
            "SPE" => GripperRegister::Speed,
            "POS" => GripperRegister::Pos,
            "STA" => GripperRegister::Sta,
            "PRE" => GripperRegister::Pre,
            "OBJ" => GripperRegister::Obj,
            "FLT" => GripperRegister::Flt,
            other => {
                return Err(DaqError::Instrument(format!(
                    "Unknown gripper register '{}'",
                    other
                )))
            }
        })
    }
}

/// Object detection status reported in the `OBJ` register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStatus {
    /// Fingers are moving towards the requested position.
    Moving = 0,
    /// Stopped on contact while opening.
    StoppedOuterObject = 1,
    /// Stopped on contact while closing.
    StoppedInnerObject = 2,
    /// Reached the requested position without contact.
    AtDestination = 3,
}

impl ObjectStatus {
    /// Whether the fingers are still in motion.
    pub fn is_moving(&self) -> bool {
        matches!(self, ObjectStatus::Moving)
    }
}

impl TryFrom<u8> for ObjectStatus {
    type Error = DaqError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ObjectStatus::Moving),
            1 => Ok(ObjectStatus::StoppedOuterObject),
            2 => Ok(ObjectStatus::StoppedInnerObject),
            3 => Ok(ObjectStatus::AtDestination),
            other => Err(DaqError::Instrument(format!(
                "Invalid object status {}",
                other
            ))),
        }
    }
}

/// Result of a gripper move command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveAck {
    /// Whether the controller acknowledged the command.
    pub ack: bool,
    /// Position actually commanded after clipping.
    pub position: u8,
}

/// Register-level access to a parallel gripper controller.
#[async_trait]
pub trait GripperDriver: Send {
    /// Run the activation sequence and wait until the gripper is ready.
    async fn activate(&mut self) -> AppResult<()>;

    /// Set position, speed and force and start moving. Returns the controller ack.
    async fn command_move(&mut self, position: u8, speed: u8, force: u8) -> AppResult<bool>;

    /// Read one register.
    async fn read(&mut self, register: GripperRegister) -> AppResult<u8>;

    /// Release the connection.
    async fn close(&mut self) -> AppResult<()> {
        Ok(())
    }
}

/// Producer of RGB frames, shaped `[height, width, 3]`.
#[async_trait]
pub trait FrameSource: Send {
    /// Human-readable identity, e.g. a serial number.
    fn name(&self) -> &str;

    /// Frame size as `(width, height)`.
    fn resolution(&self) -> (u32, u32);

    /// Block until the next frame is available and return it.
    async fn grab(&mut self) -> AppResult<Array3<u8>>;

    /// Reset per-episode state.
    async fn reset(&mut self, _rng: &mut EpisodeRng) -> AppResult<()> {
        Ok(())
    }

    /// Stop streaming.
    async fn close(&mut self) -> AppResult<()> {
        Ok(())
    }
}
