//! Run configuration using Figment.
//!
//! Settings are assembled from, in increasing precedence:
//! 1. Compiled-in defaults (the values the rig was commissioned with)
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `TACTILE_`, nested keys split on `__`
//!
//! ```text
//! TACTILE_HOST=192.168.1.42
//! TACTILE_CAPTURE__POLICY=continuous
//! TACTILE_DEVICES__SIMULATE=true
//! ```
//!
//! Once a dataset directory has been initialized its settings are frozen in
//! `config.npz`; later runs against the same directory never rewrite it.

use crate::data::tensor::{Scalar, Tensor};
use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Tactile sensor resolution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigitResolution {
    /// 640x480
    #[serde(rename = "VGA")]
    Vga,
    /// 320x240
    #[serde(rename = "QVGA")]
    Qvga,
}

impl DigitResolution {
    /// Frame size as `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            DigitResolution::Vga => (640, 480),
            DigitResolution::Qvga => (320, 240),
        }
    }

    /// Mode name as the sensor firmware spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            DigitResolution::Vga => "VGA",
            DigitResolution::Qvga => "QVGA",
        }
    }
}

/// Sampling policy used by a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePolicy {
    /// One sample per force bin after a fixed relaxation delay.
    FixedDelay,
    /// Samples at a fixed frame rate until the gripper stops moving.
    Continuous,
}

impl CapturePolicy {
    /// Configuration spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            CapturePolicy::FixedDelay => "fixed_delay",
            CapturePolicy::Continuous => "continuous",
        }
    }
}

impl fmt::Display for CapturePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapturePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed_delay" | "fixed-delay" => Ok(CapturePolicy::FixedDelay),
            "continuous" => Ok(CapturePolicy::Continuous),
            other => Err(format!(
                "Invalid capture policy '{}'. Must be one of: fixed_delay, continuous",
                other
            )),
        }
    }
}

/// Capture protocol settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Sampling policy.
    pub policy: CapturePolicy,
    /// Sampling rate for the continuous policy, in Hz.
    pub frame_rate: f64,
    /// Upper bound on samples in one continuous scan.
    pub max_samples: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            policy: CapturePolicy::FixedDelay,
            frame_rate: 30.0,
            max_samples: 300,
        }
    }
}

/// Device backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Replace every device with a simulated one.
    pub simulate: bool,
    /// Frame source backend for the tactile sensors and wrist camera.
    pub camera_backend: String,
    /// Socket I/O timeout for the gripper, in seconds.
    pub io_timeout: f64,
    /// Gripper position at which a simulated object is contacted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_width: Option<u8>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            simulate: false,
            camera_backend: "realsense".to_string(),
            io_timeout: 2.0,
            object_width: Some(140),
        }
    }
}

/// Immutable run parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Gripper controller address.
    pub host: String,
    /// Gripper socket port.
    pub port: u16,
    /// Settling delay between actuation and sampling, in seconds.
    pub relaxation_time: f64,
    /// Dataset root directory.
    pub dataset_dir: PathBuf,
    /// Seed for per-episode randomness.
    pub seed: u64,
    /// Lowest force of the ramp.
    pub min_force: u8,
    /// Highest force of the ramp.
    pub max_force: u8,
    /// Number of force values in the ramp, both ends included.
    pub num_force_bins: usize,
    /// Smallest position the gripper is commanded to.
    pub min_pos: u8,
    /// Closing position used for every touch.
    pub max_pos: u8,
    /// Gripper speed.
    pub speed: u8,
    /// Limit for a gripper move to be acknowledged, in seconds.
    pub move_timeout: f64,
    /// Left tactile sensor serial number.
    pub left_digit_serial: String,
    /// Right tactile sensor serial number.
    pub right_digit_serial: String,
    /// Tactile sensor resolution mode.
    pub digit_resolution: DigitResolution,
    /// Wrist camera stream size as `[width, height]`.
    pub wrist_camera_resolution: [u32; 2],
    /// Stored wrist camera image size as `[width, height]`; `None` keeps the stream size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resize_img_shape: Option<[u32; 2]>,
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Capture protocol settings.
    pub capture: CaptureConfig,
    /// Device backend settings.
    pub devices: DeviceConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "192.168.1.179".to_string(),
            port: 63352,
            relaxation_time: 0.5,
            dataset_dir: PathBuf::from("dataset/"),
            seed: 1,
            min_force: 0,
            max_force: 10,
            num_force_bins: 10,
            min_pos: 3,
            max_pos: 255,
            speed: 10,
            move_timeout: 5.0,
            left_digit_serial: "D20591".to_string(),
            right_digit_serial: "D20589".to_string(),
            digit_resolution: DigitResolution::Qvga,
            wrist_camera_resolution: [640, 480],
            resize_img_shape: Some([128, 128]),
            log_level: "info".to_string(),
            capture: CaptureConfig::default(),
            devices: DeviceConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from defaults, an optional TOML file, and the environment.
    ///
    /// After loading, settings are validated.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(DaqError::Configuration(format!(
                    "Configuration file {} does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        let settings: Self = figment
            .merge(Env::prefixed("TACTILE_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings after loading.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.min_force > self.max_force {
            return Err(DaqError::Configuration(format!(
                "min_force {} exceeds max_force {}",
                self.min_force, self.max_force
            )));
        }

        if self.num_force_bins == 0 {
            return Err(DaqError::Configuration(
                "num_force_bins must be > 0".to_string(),
            ));
        }

        if self.min_pos > self.max_pos {
            return Err(DaqError::Configuration(format!(
                "min_pos {} exceeds max_pos {}",
                self.min_pos, self.max_pos
            )));
        }

        check_seconds("relaxation_time", self.relaxation_time, true)?;
        check_seconds("move_timeout", self.move_timeout, false)?;
        if !(self.capture.frame_rate.is_finite() && self.capture.frame_rate > 0.0) {
            return Err(DaqError::Configuration(format!(
                "Invalid capture.frame_rate {}. Must be > 0",
                self.capture.frame_rate
            )));
        }
        check_seconds("capture frame period", 1.0 / self.capture.frame_rate, false)?;

        if self.capture.max_samples == 0 {
            return Err(DaqError::Configuration(
                "capture.max_samples must be > 0".to_string(),
            ));
        }

        check_seconds("devices.io_timeout", self.devices.io_timeout, false)?;

        if self.wrist_camera_resolution.contains(&0) {
            return Err(DaqError::Configuration(
                "wrist_camera_resolution dimensions must be > 0".to_string(),
            ));
        }

        if let Some(shape) = self.resize_img_shape {
            if shape.contains(&0) {
                return Err(DaqError::Configuration(
                    "resize_img_shape dimensions must be > 0".to_string(),
                ));
            }
        }

        if self.left_digit_serial.is_empty() || self.right_digit_serial.is_empty() {
            return Err(DaqError::Configuration(
                "Tactile sensor serial numbers cannot be empty".to_string(),
            ));
        }

        if self.left_digit_serial == self.right_digit_serial {
            return Err(DaqError::Configuration(format!(
                "Both tactile sensors use serial '{}'",
                self.left_digit_serial
            )));
        }

        Ok(())
    }

    /// Relaxation delay.
    pub fn relaxation(&self) -> Duration {
        seconds(self.relaxation_time)
    }

    /// Gripper move acknowledgement limit.
    pub fn move_timeout(&self) -> Duration {
        seconds(self.move_timeout)
    }

    /// Sampling period of the continuous policy. Never zero.
    pub fn frame_period(&self) -> Duration {
        seconds(1.0 / self.capture.frame_rate).max(Duration::from_nanos(1))
    }

    /// Gripper socket I/O timeout.
    pub fn io_timeout(&self) -> Duration {
        seconds(self.devices.io_timeout)
    }

    /// Wrist camera resize target as `(width, height)`.
    pub fn resize_shape(&self) -> Option<(u32, u32)> {
        self.resize_img_shape.map(|[w, h]| (w, h))
    }

    /// Render the settings as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|err| DaqError::Configuration(err.to_string()))
    }

    /// Flatten the settings into named arrays for the dataset config archive.
    ///
    /// Nested keys are joined with `_`; unset optional values are omitted.
    pub fn archive_entries(&self) -> BTreeMap<String, Tensor> {
        let mut entries = BTreeMap::new();
        let mut put = |key: &str, value: Scalar| {
            entries.insert(key.to_string(), Tensor::scalar(value));
        };

        put("host", Scalar::Str(self.host.clone()));
        put("port", Scalar::Int(i64::from(self.port)));
        put("relaxation_time", Scalar::Float(self.relaxation_time));
        put(
            "dataset_dir",
            Scalar::Str(self.dataset_dir.to_string_lossy().into_owned()),
        );
        put("seed", Scalar::Int(self.seed as i64));
        put("min_force", Scalar::Int(i64::from(self.min_force)));
        put("max_force", Scalar::Int(i64::from(self.max_force)));
        put("num_force_bins", Scalar::Int(self.num_force_bins as i64));
        put("min_pos", Scalar::Int(i64::from(self.min_pos)));
        put("max_pos", Scalar::Int(i64::from(self.max_pos)));
        put("speed", Scalar::Int(i64::from(self.speed)));
        put("move_timeout", Scalar::Float(self.move_timeout));
        put("left_digit_serial", Scalar::Str(self.left_digit_serial.clone()));
        put(
            "right_digit_serial",
            Scalar::Str(self.right_digit_serial.clone()),
        );
        put(
            "digit_resolution",
            Scalar::Str(self.digit_resolution.as_str().to_string()),
        );
        put("log_level", Scalar::Str(self.log_level.clone()));
        put(
            "capture_policy",
            Scalar::Str(self.capture.policy.as_str().to_string()),
        );
        put("capture_frame_rate", Scalar::Float(self.capture.frame_rate));
        put(
            "capture_max_samples",
            Scalar::Int(self.capture.max_samples as i64),
        );
        put("devices_simulate", Scalar::Bool(self.devices.simulate));
        put(
            "devices_camera_backend",
            Scalar::Str(self.devices.camera_backend.clone()),
        );
        put("devices_io_timeout", Scalar::Float(self.devices.io_timeout));
        if let Some(width) = self.devices.object_width {
            put("devices_object_width", Scalar::Int(i64::from(width)));
        }

        entries.insert(
            "wrist_camera_resolution".to_string(),
            pair_tensor(self.wrist_camera_resolution),
        );
        if let Some(shape) = self.resize_img_shape {
            entries.insert("resize_img_shape".to_string(), pair_tensor(shape));
        }

        entries
    }
}

fn pair_tensor(pair: [u32; 2]) -> Tensor {
    Tensor::I64(ArrayD::from_shape_fn(IxDyn(&[2]), |idx| {
        i64::from(pair[idx[0]])
    }))
}

/// Seconds as a `Duration`, saturating instead of panicking on out-of-range
/// values. Negative and NaN inputs give zero.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(if value > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

/// Reject time settings that are negative, non-finite, or too large for a
/// `Duration`, and zero unless `allow_zero`.
fn check_seconds(name: &str, value: f64, allow_zero: bool) -> AppResult<Duration> {
    let duration = Duration::try_from_secs_f64(value).map_err(|err| {
        DaqError::Configuration(format!("Invalid {} {}: {}", name, value, err))
    })?;
    if duration.is_zero() && !allow_zero {
        return Err(DaqError::Configuration(format!(
            "Invalid {} {}. Must be > 0",
            name, value
        )));
    }
    Ok(duration)
}
