//! Device adapters for the data-collection rig.
//!
//! - [`capabilities`]: trait seams between adapters and hardware drivers
//! - [`gripper`]: gripper adapter with limits and move confirmation
//! - [`sensors`]: tactile sensor and wrist camera adapters
//! - [`robotiq`]: socket driver for the Robotiq gripper
//! - [`mock`]: simulated devices

pub mod capabilities;
pub mod gripper;
pub mod mock;
pub mod robotiq;
pub mod sensors;

pub use capabilities::{
    EpisodeRng, FrameSource, GripperDriver, GripperRegister, MoveAck, Node, Observation,
    ObjectStatus,
};
pub use gripper::{GripperLimits, GripperNode};
pub use sensors::{TactileSensor, WristCamera};
