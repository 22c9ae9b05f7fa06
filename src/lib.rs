//! Core library for the tactile data-collection rig.
//!
//! The rig is a parallel gripper, two tactile imaging sensors and a wrist
//! camera. This library drives the rig through a fixed touch protocol and
//! stores each episode as a NumPy-compatible archive that downstream
//! training code can load directly.
//!
//! - [`hardware`]: device adapters and drivers
//! - [`scene`]: adapters composed under namespaced observation keys
//! - [`capture`]: touch and scan protocols
//! - [`session`]: the episode loop writing a dataset directory
//! - [`data`]: dataset records, archive codec, on-disk layout and readers
//! - [`config`]: layered run settings

pub mod capture;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod scene;
pub mod session;

pub use config::Settings;
pub use error::{AppResult, DaqError};
