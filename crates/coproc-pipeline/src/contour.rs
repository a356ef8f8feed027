//! Contour extraction: outline the blobs of a binary mask.
//!
//! The contours stage only sees the [`ContourDetector`] trait.
//! [`BorderContours`] traces borders with Suzuki-Abe border following
//! (`imageproc::contours::find_contours`) and draws every border point
//! onto a black canvas of the same size.

use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::contours::{BorderType, Contour};

/// Color of traced contour points.
pub const CONTOUR_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// A contour extractor.
pub trait ContourDetector {
    /// Draw the contours found in `source` into `destination`.
    fn detect_contours(&mut self, source: &DynamicImage, destination: &mut DynamicImage);
}

/// Border-following contour detector.
#[derive(Debug, Clone, Copy, Default)]
pub struct BorderContours {
    outer_only: bool,
}

impl BorderContours {
    /// Detector that draws both outer borders and hole borders.
    #[must_use]
    pub const fn new() -> Self {
        Self { outer_only: false }
    }

    /// Skip hole borders.
    #[must_use]
    pub const fn outer_only(mut self, outer_only: bool) -> Self {
        self.outer_only = outer_only;
        self
    }

    /// Trace the borders of every non-zero region of `mask`.
    #[must_use]
    pub fn trace(&self, mask: &GrayImage) -> Vec<Contour<u32>> {
        imageproc::contours::find_contours::<u32>(mask)
            .into_iter()
            .filter(|c| !self.outer_only || c.border_type == BorderType::Outer)
            .collect()
    }
}

impl ContourDetector for BorderContours {
    fn detect_contours(&mut self, source: &DynamicImage, destination: &mut DynamicImage) {
        let mask = source.to_luma8();
        let mut canvas = RgbImage::new(mask.width(), mask.height());
        for contour in self.trace(&mask) {
            for point in contour.points {
                // find_contours only reports in-bounds pixels.
                canvas.put_pixel(point.x, point.y, CONTOUR_COLOR);
            }
        }
        *destination = DynamicImage::ImageRgb8(canvas);
    }
}
