//! Frame sources for the capture stage.
//!
//! The capture stage only sees the [`Device`] trait. Two sources ship
//! with the crate:
//!
//! - [`FileDevice`]: each port is an image file or a directory of frames
//! - [`PatternDevice`]: a synthetic camera that renders a green square
//!   orbiting the frame center, for demos and tests

use std::path::{Path, PathBuf};

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use tracing::debug;

/// Result of a successful `capture` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    /// A new frame was written.
    Frame,
    /// The source has no more frames; nothing was written.
    EndOfStream,
}

/// Errors reported by a [`Device`].
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The configured port does not exist.
    #[error("no device on port {0}")]
    UnknownPort(u32),

    /// The port's source holds no decodable frames.
    #[error("no frames found at {}", .0.display())]
    EmptySource(PathBuf),

    /// The driver reported a non-zero status during initialization.
    #[error("device initialization returned status {0}")]
    InitStatus(i32),

    /// `capture` was called before a successful `init`.
    #[error("device used before initialization")]
    NotInitialized,

    /// Reading a frame from disk failed.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// The file or directory being read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Decoding a frame failed.
    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        /// The frame file.
        path: PathBuf,
        /// Underlying error.
        source: image::ImageError,
    },
}

/// A camera or frame grabber.
pub trait Device {
    /// Select the port and name the device. Called before [`init`](Self::init).
    fn configure(&mut self, port: u32, label: &str);

    /// Open the device.
    ///
    /// # Errors
    ///
    /// Any [`DeviceError`]; the pipeline treats it as unrecoverable.
    fn init(&mut self) -> Result<(), DeviceError>;

    /// Grab the next frame into `into`.
    ///
    /// # Errors
    ///
    /// Any [`DeviceError`]. The capture stage retries according to its
    /// retry policy before giving up.
    fn capture(&mut self, into: &mut DynamicImage) -> Result<CaptureStatus, DeviceError>;

    /// Close the device. Must be safe to call on a device whose `init`
    /// failed.
    fn release(&mut self) {}
}

/// File extensions [`FileDevice`] treats as frames.
const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp"];

/// Frames read from image files.
///
/// Each port maps to a path: a single image (one frame) or a directory
/// whose image files are played back in file name order.
#[derive(Debug, Clone)]
pub struct FileDevice {
    ports: Vec<PathBuf>,
    port: u32,
    label: String,
    looping: bool,
    frames: Vec<PathBuf>,
    cursor: usize,
    initialized: bool,
}

impl FileDevice {
    /// A device whose port `n` reads from `ports[n]`.
    #[must_use]
    pub fn new(ports: Vec<PathBuf>) -> Self {
        Self {
            ports,
            port: 0,
            label: String::new(),
            looping: false,
            frames: Vec::new(),
            cursor: 0,
            initialized: false,
        }
    }

    /// Restart from the first frame instead of ending the stream.
    #[must_use]
    pub const fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Number of frames found by `init`.
    #[must_use]
    pub const fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

/// List the frame files of `path`, sorted by name.
fn list_frames(path: &Path) -> Result<Vec<PathBuf>, DeviceError> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let io_error = |source| DeviceError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut frames = Vec::new();
    for entry in std::fs::read_dir(path).map_err(io_error)? {
        let entry_path = entry.map_err(io_error)?.path();
        let is_frame = entry_path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if is_frame {
            frames.push(entry_path);
        }
    }
    frames.sort();
    Ok(frames)
}

impl Device for FileDevice {
    fn configure(&mut self, port: u32, label: &str) {
        self.port = port;
        label.clone_into(&mut self.label);
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        let path = usize::try_from(self.port)
            .ok()
            .and_then(|i| self.ports.get(i))
            .ok_or(DeviceError::UnknownPort(self.port))?;
        if !path.exists() {
            return Err(DeviceError::EmptySource(path.clone()));
        }
        let frames = list_frames(path)?;
        if frames.is_empty() {
            return Err(DeviceError::EmptySource(path.clone()));
        }
        debug!(device = %self.label, port = self.port, frames = frames.len(), "file device opened");
        self.frames = frames;
        self.cursor = 0;
        self.initialized = true;
        Ok(())
    }

    fn capture(&mut self, into: &mut DynamicImage) -> Result<CaptureStatus, DeviceError> {
        if !self.initialized {
            return Err(DeviceError::NotInitialized);
        }
        if self.cursor >= self.frames.len() {
            if !self.looping {
                return Ok(CaptureStatus::EndOfStream);
            }
            self.cursor = 0;
        }
        let path = &self.frames[self.cursor];
        *into = image::open(path).map_err(|source| DeviceError::Decode {
            path: path.clone(),
            source,
        })?;
        self.cursor += 1;
        Ok(CaptureStatus::Frame)
    }

    fn release(&mut self) {
        self.frames.clear();
        self.cursor = 0;
        self.initialized = false;
    }
}

/// Color of the synthetic target: pure green, inside the default HSV
/// threshold window.
pub const PATTERN_TARGET: Rgb<u8> = Rgb([0, 255, 0]);

/// Frames per revolution of the synthetic target.
const PATTERN_PERIOD: u64 = 120;

/// A synthetic camera rendering a green square on black.
///
/// The square orbits the frame center once every 120 frames, so
/// consecutive ticks produce different bounding centers.
#[derive(Debug, Clone)]
pub struct PatternDevice {
    width: u32,
    height: u32,
    frame: u64,
    init_status: i32,
    initialized: bool,
    label: String,
}

impl PatternDevice {
    /// A synthetic camera producing `width`x`height` frames.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame: 0,
            init_status: 0,
            initialized: false,
            label: String::new(),
        }
    }

    /// Make `init` fail with the given non-zero driver status.
    #[must_use]
    pub const fn failing(mut self, status: i32) -> Self {
        self.init_status = status;
        self
    }

    /// Side length of the square, in pixels.
    #[must_use]
    pub fn square_size(&self) -> u32 {
        (self.width.min(self.height) / 8).max(2)
    }

    /// Top-left corner of the square in frame `frame`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn square_origin(&self, frame: u64) -> (i32, i32) {
        let angle = std::f64::consts::TAU * (frame % PATTERN_PERIOD) as f64 / PATTERN_PERIOD as f64;
        let radius = f64::from(self.width.min(self.height)) / 4.0;
        let half = f64::from(self.square_size()) / 2.0;
        let cx = radius.mul_add(angle.cos(), f64::from(self.width) / 2.0);
        let cy = radius.mul_add(angle.sin(), f64::from(self.height) / 2.0);
        ((cx - half).round() as i32, (cy - half).round() as i32)
    }

    /// Pixel-space center of the square in frame `frame`.
    ///
    /// The square covers pixels `origin..origin + size`, so its center is
    /// at `origin + (size - 1) / 2`.
    #[must_use]
    pub fn square_center(&self, frame: u64) -> (f64, f64) {
        let (x, y) = self.square_origin(frame);
        let offset = f64::from(self.square_size() - 1) / 2.0;
        (f64::from(x) + offset, f64::from(y) + offset)
    }

    /// Frames rendered so far.
    #[must_use]
    pub const fn frames_rendered(&self) -> u64 {
        self.frame
    }
}

impl Device for PatternDevice {
    fn configure(&mut self, _port: u32, label: &str) {
        label.clone_into(&mut self.label);
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        if self.init_status != 0 {
            return Err(DeviceError::InitStatus(self.init_status));
        }
        self.initialized = true;
        Ok(())
    }

    fn capture(&mut self, into: &mut DynamicImage) -> Result<CaptureStatus, DeviceError> {
        if !self.initialized {
            return Err(DeviceError::NotInitialized);
        }
        let mut canvas = RgbImage::new(self.width, self.height);
        let (x, y) = self.square_origin(self.frame);
        let size = self.square_size();
        draw_filled_rect_mut(&mut canvas, Rect::at(x, y).of_size(size, size), PATTERN_TARGET);
        *into = DynamicImage::ImageRgb8(canvas);
        self.frame += 1;
        Ok(CaptureStatus::Frame)
    }

    fn release(&mut self) {
        self.initialized = false;
    }
}
