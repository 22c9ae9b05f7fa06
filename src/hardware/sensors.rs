//! Frame-producing adapters: tactile sensors and the wrist camera.

use crate::config::DigitResolution;
use crate::data::tensor::Tensor;
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::{EpisodeRng, FrameSource, Node, Observation};
use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array3;
use tracing::{debug, info};

/// Tactile imaging sensor identified by serial number.
///
/// Observation: `sensor`, `u8[H, W, 3]`.
pub struct TactileSensor {
    serial: String,
    resolution: DigitResolution,
    source: Box<dyn FrameSource>,
}

impl TactileSensor {
    /// Wrap a frame source streaming at `resolution`.
    ///
    /// Fails if the source reports a different frame size.
    pub fn new(
        serial: impl Into<String>,
        resolution: DigitResolution,
        source: Box<dyn FrameSource>,
    ) -> AppResult<Self> {
        let serial = serial.into();
        if source.resolution() != resolution.dimensions() {
            return Err(DaqError::Configuration(format!(
                "Tactile sensor {} streams {:?}, expected {} {:?}",
                serial,
                source.resolution(),
                resolution.as_str(),
                resolution.dimensions()
            )));
        }
        info!(serial = %serial, mode = resolution.as_str(), "tactile sensor connected");
        Ok(Self {
            serial,
            resolution,
            source,
        })
    }

    /// Serial number.
    pub fn serial(&self) -> &str {
        &self.serial
    }
}

#[async_trait]
impl Node for TactileSensor {
    async fn observe(&mut self) -> AppResult<Observation> {
        let frame = self.source.grab().await?;
        let (width, height) = self.resolution.dimensions();
        if frame.shape() != [height as usize, width as usize, 3] {
            return Err(DaqError::Instrument(format!(
                "Tactile sensor {} returned frame of shape {:?}",
                self.serial,
                frame.shape()
            )));
        }
        let mut obs = Observation::new();
        obs.insert("sensor".to_string(), Tensor::from(frame.into_dyn()));
        Ok(obs)
    }

    async fn initialize_episode(&mut self, rng: &mut EpisodeRng) -> AppResult<()> {
        self.source.reset(rng).await
    }

    async fn close(&mut self) -> AppResult<()> {
        self.source.close().await
    }
}

/// Color camera mounted on the wrist.
///
/// Observation: `image`, `u8[H, W, 3]`, resized to the output shape if one
/// is set.
pub struct WristCamera {
    source: Box<dyn FrameSource>,
    output_shape: Option<(u32, u32)>,
}

impl WristCamera {
    /// Wrap a frame source; `output_shape` is `(width, height)`.
    pub fn new(source: Box<dyn FrameSource>, output_shape: Option<(u32, u32)>) -> Self {
        info!(
            source = source.name(),
            resolution = ?source.resolution(),
            output_shape = ?output_shape,
            "wrist camera connected"
        );
        Self {
            source,
            output_shape,
        }
    }
}

#[async_trait]
impl Node for WristCamera {
    async fn observe(&mut self) -> AppResult<Observation> {
        let frame = self.source.grab().await?;
        let frame = match self.output_shape {
            Some(dsize) => resize_rgb(&frame, dsize)?,
            None => frame,
        };
        let mut obs = Observation::new();
        obs.insert("image".to_string(), Tensor::from(frame.into_dyn()));
        Ok(obs)
    }

    async fn initialize_episode(&mut self, rng: &mut EpisodeRng) -> AppResult<()> {
        self.source.reset(rng).await
    }

    async fn close(&mut self) -> AppResult<()> {
        self.source.close().await
    }
}

/// Resize an `[H, W, 3]` frame to `(width, height)` with a bicubic filter.
pub fn resize_rgb(frame: &Array3<u8>, (width, height): (u32, u32)) -> AppResult<Array3<u8>> {
    let (rows, cols, channels) = frame.dim();
    if channels != 3 {
        return Err(DaqError::Array(format!(
            "Expected 3 color channels, got {}",
            channels
        )));
    }
    if (cols as u32, rows as u32) == (width, height) {
        return Ok(frame.clone());
    }

    let raw: Vec<u8> = frame.iter().copied().collect();
    let img = RgbImage::from_raw(cols as u32, rows as u32, raw).ok_or_else(|| {
        DaqError::Array(format!("Frame buffer does not match {}x{}", cols, rows))
    })?;
    let resized = imageops::resize(&img, width, height, FilterType::CatmullRom);
    debug!(from = ?(cols, rows), to = ?(width, height), "frame resized");
    Ok(Array3::from_shape_vec(
        (height as usize, width as usize, 3),
        resized.into_raw(),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockFrameSource;

    #[tokio::test]
    async fn test_tactile_sensor_observation() {
        let source = MockFrameSource::new("D20591", 320, 240);
        let mut sensor =
            TactileSensor::new("D20591", DigitResolution::Qvga, Box::new(source)).unwrap();
        let obs = sensor.observe().await.unwrap();
        assert_eq!(obs["sensor"].shape(), &[240, 320, 3]);
        assert_eq!(sensor.serial(), "D20591");
    }

    #[test]
    fn test_tactile_sensor_rejects_wrong_mode() {
        let source = MockFrameSource::new("D20591", 320, 240);
        assert!(TactileSensor::new("D20591", DigitResolution::Vga, Box::new(source)).is_err());
    }

    #[tokio::test]
    async fn test_wrist_camera_resizes() {
        let source = MockFrameSource::new("wrist", 64, 48);
        let mut camera = WristCamera::new(Box::new(source), Some((16, 8)));
        let obs = camera.observe().await.unwrap();
        assert_eq!(obs["image"].shape(), &[8, 16, 3]);
    }

    #[tokio::test]
    async fn test_wrist_camera_without_resize() {
        let source = MockFrameSource::new("wrist", 64, 48);
        let mut camera = WristCamera::new(Box::new(source), None);
        let obs = camera.observe().await.unwrap();
        assert_eq!(obs["image"].shape(), &[48, 64, 3]);
    }

    #[test]
    fn test_resize_uniform_frame_stays_uniform() {
        let frame = Array3::<u8>::from_elem((20, 30, 3), 77);
        let resized = resize_rgb(&frame, (10, 5)).unwrap();
        assert_eq!(resized.dim(), (5, 10, 3));
        assert!(resized.iter().all(|&v| v == 77));
    }
}
