//! Shared types for the coproc vision pipeline.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::application::{ApplicationError, RunOptions};
use crate::filter::ColorThresholds;

/// Re-export the image types that travel through the frame slots so
/// downstream crates can implement collaborators without depending on
/// `image` directly.
pub use image::{DynamicImage, GrayImage, RgbImage};

/// Number of image slots in a [`FrameState`](crate::frame::FrameState).
pub const SLOT_COUNT: usize = 4;

/// Names one of the fixed image slots of the frame state.
///
/// The set is closed: slots are never added or removed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotId {
    /// The raw captured frame.
    Origin,
    /// Binary mask produced by color thresholding.
    Filtered,
    /// Contours traced from the mask.
    Contour,
    /// Convex hull and bounding box overlay.
    Bounding,
}

impl SlotId {
    /// Every slot, in pipeline order.
    pub const ALL: [Self; SLOT_COUNT] = [Self::Origin, Self::Filtered, Self::Contour, Self::Bounding];

    /// Position of this slot inside the frame state.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Origin => 0,
            Self::Filtered => 1,
            Self::Contour => 2,
            Self::Bounding => 3,
        }
    }

    /// Short machine name (`"origin"`, `"filtered"`, ...).
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Origin => "origin",
            Self::Filtered => "filtered",
            Self::Contour => "contour",
            Self::Bounding => "bounding",
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A labelled image held in one frame slot.
///
/// The pixel buffer is opaque to the orchestration core: collaborators
/// decide its color type and size. A freshly created slot has an empty
/// label and a zero-sized buffer.
#[derive(Debug, Clone)]
pub struct ImageSlot {
    label: String,
    pixels: DynamicImage,
}

impl ImageSlot {
    /// An unlabelled slot with a zero-sized buffer.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            label: String::new(),
            pixels: DynamicImage::new_rgb8(0, 0),
        }
    }

    /// Human-readable label, used for diagnostics and display.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Replace the label.
    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    /// The pixel buffer.
    #[must_use]
    pub const fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    /// Mutable access to the pixel buffer.
    pub const fn pixels_mut(&mut self) -> &mut DynamicImage {
        &mut self.pixels
    }

    /// Replace the pixel buffer.
    pub fn set_pixels(&mut self, pixels: DynamicImage) {
        self.pixels = pixels;
    }

    /// Buffer size in pixels.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.pixels.width(),
            height: self.pixels.height(),
        }
    }

    /// `true` when no stage has written pixels into this slot yet.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.pixels.width() == 0 || self.pixels.height() == 0
    }

    /// Drop the pixel buffer, keeping the label.
    pub fn release(&mut self) {
        self.pixels = DynamicImage::new_rgb8(0, 0);
    }
}

impl Default for ImageSlot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Center of the detected target's bounding box, in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingPoints {
    /// Horizontal center (pixels from left edge).
    pub center_x: f64,
    /// Vertical center (pixels from top edge).
    pub center_y: f64,
}

/// Which camera port to open and what to call it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device port number.
    pub port: u32,
    /// Human-readable device name.
    pub label: String,
}

impl DeviceConfig {
    /// Default camera port.
    pub const DEFAULT_PORT: u32 = 0;
    /// Default camera name.
    pub const DEFAULT_LABEL: &str = "Input Camera";
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: Self::DEFAULT_PORT,
            label: Self::DEFAULT_LABEL.to_owned(),
        }
    }
}

/// Bounded retry policy for the per-tick `capture` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per tick, including the first. Must be at least 1.
    pub max_attempts: u32,
    /// Pause between attempts, in milliseconds.
    pub backoff_ms: u64,
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub const NONE: Self = Self {
        max_attempts: 1,
        backoff_ms: 0,
    };

    /// Pause between attempts.
    #[must_use]
    pub const fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 5,
        }
    }
}

/// Configuration for the vision pipeline.
///
/// Every field has a constant default; nothing is loaded implicitly.
/// Callers may deserialize a partial JSON document thanks to
/// `#[serde(default)]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Camera selection.
    pub device: DeviceConfig,

    /// HSV threshold window and morphology sizes for the filter stage.
    pub thresholds: ColorThresholds,

    /// Presentation cadence of the display stage, in frames per second.
    pub target_fps: u32,

    /// Per-tick time budget in milliseconds. Overruns are logged and
    /// counted but never abort a tick. `None` disables the check.
    pub tick_budget_ms: Option<u64>,

    /// Stop cooperatively after this many ticks. `None` runs until a
    /// stage requests a halt.
    pub max_ticks: Option<u64>,

    /// Retry policy for frame capture.
    pub capture_retry: RetryPolicy,
}

impl PipelineConfig {
    /// Default display cadence.
    pub const DEFAULT_TARGET_FPS: u32 = 30;

    /// Check value ranges that the type system does not enforce.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;
        if self.target_fps == 0 {
            return Err(ConfigError::ZeroFps);
        }
        if self.capture_retry.max_attempts == 0 {
            return Err(ConfigError::ZeroRetryAttempts);
        }
        if self.tick_budget_ms == Some(0) {
            return Err(ConfigError::ZeroTickBudget);
        }
        Ok(())
    }

    /// The orchestration options derived from this config.
    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            tick_budget: self.tick_budget_ms.map(Duration::from_millis),
            max_ticks: self.max_ticks,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            thresholds: ColorThresholds::default(),
            target_fps: Self::DEFAULT_TARGET_FPS,
            tick_budget_ms: None,
            max_ticks: None,
            capture_retry: RetryPolicy::default(),
        }
    }
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A low bound exceeds its high bound.
    #[error("{channel} range is inverted: low {low} > high {high}")]
    InvertedRange {
        /// Which threshold pair is inverted (`"hue"`, `"saturation"`, ...).
        channel: &'static str,
        /// Configured low bound.
        low: u8,
        /// Configured high bound.
        high: u8,
    },

    /// `target_fps` is zero.
    #[error("target fps must be at least 1")]
    ZeroFps,

    /// `capture_retry.max_attempts` is zero.
    #[error("capture retry policy must allow at least one attempt")]
    ZeroRetryAttempts,

    /// `tick_budget_ms` is zero.
    #[error("tick budget must be at least 1 ms")]
    ZeroTickBudget,
}

/// Errors from assembling the vision pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Configuration failed validation.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// A stage could not be registered.
    #[error(transparent)]
    Application(#[from] ApplicationError),
}
