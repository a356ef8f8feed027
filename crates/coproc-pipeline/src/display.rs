//! Diagnostic output of the four frame slots.
//!
//! The output stage only sees [`DisplaySink`]. [`MosaicSink`] tiles the
//! slots into a 2x2 mosaic (origin, filtered / contour, bounding), keeps
//! the last composed frame, optionally writes it to disk as a numbered
//! PNG, and paces itself to the requested frame rate. [`NullSink`]
//! discards everything.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use image::{DynamicImage, RgbImage, imageops};

use crate::types::ImageSlot;

/// Errors raised while presenting a frame.
#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    /// Creating the output directory failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or writing a frame failed.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Where finished frames go.
pub trait DisplaySink {
    /// Present the four slots in slot order, aiming for `target_fps`.
    ///
    /// # Errors
    ///
    /// Returns [`DisplayError`] if the frame could not be presented.
    fn display(&mut self, target_fps: u32, slots: [&ImageSlot; 4]) -> Result<(), DisplayError>;

    /// Release any output resources. Called once from detach.
    fn close(&mut self) {}
}

/// Sleeps so consecutive frames are at least one frame period apart.
#[derive(Debug, Default)]
pub struct FramePacer {
    last: Option<Instant>,
}

impl FramePacer {
    /// Block until one period of `target_fps` has passed since the
    /// previous call. The first call returns immediately.
    pub fn wait(&mut self, target_fps: u32) {
        if target_fps > 0
            && let Some(last) = self.last
        {
            let period = Duration::from_secs(1) / target_fps;
            let elapsed = last.elapsed();
            if elapsed < period {
                std::thread::sleep(period - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}

/// 2x2 mosaic display that can record frames as PNG files.
#[derive(Debug)]
pub struct MosaicSink {
    output_dir: Option<PathBuf>,
    pacer: Option<FramePacer>,
    frames: u64,
    last_frame: Option<RgbImage>,
}

impl MosaicSink {
    /// A paced sink that keeps frames in memory only.
    #[must_use]
    pub fn new() -> Self {
        Self {
            output_dir: None,
            pacer: Some(FramePacer::default()),
            frames: 0,
            last_frame: None,
        }
    }

    /// Also write each frame to `dir/frame_NNNNNN.png`.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Present frames as fast as they arrive.
    #[must_use]
    pub fn without_pacing(mut self) -> Self {
        self.pacer = None;
        self
    }

    /// Frames presented so far.
    #[must_use]
    pub const fn frames(&self) -> u64 {
        self.frames
    }

    /// The most recent mosaic.
    #[must_use]
    pub const fn last_frame(&self) -> Option<&RgbImage> {
        self.last_frame.as_ref()
    }
}

impl Default for MosaicSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Tile the slots into a 2x2 grid. Each tile is as large as the largest
/// slot; blank slots stay black.
#[must_use = "returns the composed mosaic"]
pub fn compose_mosaic(slots: [&ImageSlot; 4]) -> RgbImage {
    let tile_w = slots.iter().map(|s| s.pixels().width()).max().unwrap_or(0);
    let tile_h = slots.iter().map(|s| s.pixels().height()).max().unwrap_or(0);
    let mut canvas = RgbImage::new(tile_w * 2, tile_h * 2);
    for (i, slot) in slots.iter().enumerate() {
        if slot.is_blank() {
            continue;
        }
        let (col, row) = (i64::from(i % 2 == 1), i64::from(i >= 2));
        imageops::replace(
            &mut canvas,
            &slot.pixels().to_rgb8(),
            col * i64::from(tile_w),
            row * i64::from(tile_h),
        );
    }
    canvas
}

impl DisplaySink for MosaicSink {
    fn display(&mut self, target_fps: u32, slots: [&ImageSlot; 4]) -> Result<(), DisplayError> {
        let mosaic = compose_mosaic(slots);
        if let Some(dir) = &self.output_dir {
            if self.frames == 0 {
                std::fs::create_dir_all(dir)?;
            }
            let path = dir.join(format!("frame_{:06}.png", self.frames));
            mosaic.save(&path)?;
            tracing::trace!(path = %path.display(), "wrote frame");
        }
        if let Some(pacer) = &mut self.pacer {
            pacer.wait(target_fps);
        }
        self.frames += 1;
        self.last_frame = Some(mosaic);
        Ok(())
    }

    fn close(&mut self) {
        tracing::debug!(frames = self.frames, "mosaic sink closed");
        self.last_frame = None;
    }
}

/// Discards every frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DisplaySink for NullSink {
    fn display(&mut self, _target_fps: u32, _slots: [&ImageSlot; 4]) -> Result<(), DisplayError> {
        Ok(())
    }
}
