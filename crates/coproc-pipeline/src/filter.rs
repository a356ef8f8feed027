//! Color thresholding: turn a captured frame into a binary target mask.
//!
//! The filter stage only sees the [`ColorFilter`] trait. [`HsvFilter`]
//! converts the frame to HSV (hue on the 8-bit 0..180 scale, saturation
//! and value on 0..255), keeps pixels inside the [`ColorThresholds`]
//! window, then cleans the mask with erosion followed by dilation.

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use imageproc::distance_transform::Norm;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::ConfigError;

/// HSV threshold window and morphology sizes.
///
/// `binary_threshold_low` and `binary_threshold_high` are carried for
/// configuration compatibility and have no effect on filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorThresholds {
    /// Lowest accepted hue.
    pub hue_low: u8,
    /// Highest accepted hue.
    pub hue_high: u8,
    /// Lowest accepted saturation.
    pub sat_low: u8,
    /// Highest accepted saturation.
    pub sat_high: u8,
    /// Lowest accepted value (brightness).
    pub value_low: u8,
    /// Highest accepted value (brightness).
    pub value_high: u8,
    /// Erosion radius in pixels; 0 disables erosion.
    pub erosion_size: u8,
    /// Dilation radius in pixels; 0 disables dilation.
    pub dilation_size: u8,
    /// Unused.
    pub binary_threshold_low: u8,
    /// Unused.
    pub binary_threshold_high: u8,
}

impl ColorThresholds {
    /// Default lowest hue.
    pub const DEFAULT_HUE_LOW: u8 = 21;
    /// Default highest hue.
    pub const DEFAULT_HUE_HIGH: u8 = 104;
    /// Default lowest saturation.
    pub const DEFAULT_SAT_LOW: u8 = 181;
    /// Default highest saturation.
    pub const DEFAULT_SAT_HIGH: u8 = 255;
    /// Default lowest value.
    pub const DEFAULT_VALUE_LOW: u8 = 176;
    /// Default highest value.
    pub const DEFAULT_VALUE_HIGH: u8 = 255;
    /// Default erosion radius.
    pub const DEFAULT_EROSION_SIZE: u8 = 0;
    /// Default dilation radius.
    pub const DEFAULT_DILATION_SIZE: u8 = 2;

    /// Whether an HSV triple lies inside the window (bounds inclusive).
    #[must_use]
    pub const fn contains(&self, [h, s, v]: [u8; 3]) -> bool {
        h >= self.hue_low
            && h <= self.hue_high
            && s >= self.sat_low
            && s <= self.sat_high
            && v >= self.value_low
            && v <= self.value_high
    }

    /// Check that no low bound exceeds its high bound.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvertedRange`] for the first inverted pair.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        let pairs = [
            ("hue", self.hue_low, self.hue_high),
            ("saturation", self.sat_low, self.sat_high),
            ("value", self.value_low, self.value_high),
        ];
        let mut i = 0;
        while i < pairs.len() {
            let (channel, low, high) = pairs[i];
            if low > high {
                return Err(ConfigError::InvertedRange { channel, low, high });
            }
            i += 1;
        }
        Ok(())
    }
}

impl Default for ColorThresholds {
    fn default() -> Self {
        Self {
            hue_low: Self::DEFAULT_HUE_LOW,
            hue_high: Self::DEFAULT_HUE_HIGH,
            sat_low: Self::DEFAULT_SAT_LOW,
            sat_high: Self::DEFAULT_SAT_HIGH,
            value_low: Self::DEFAULT_VALUE_LOW,
            value_high: Self::DEFAULT_VALUE_HIGH,
            erosion_size: Self::DEFAULT_EROSION_SIZE,
            dilation_size: Self::DEFAULT_DILATION_SIZE,
            binary_threshold_low: 0,
            binary_threshold_high: 0,
        }
    }
}

/// A color-threshold filter.
pub trait ColorFilter {
    /// Expose the thresholds for interactive tuning. Side effect only.
    fn create_tuning_ui(&mut self, thresholds: &ColorThresholds) {
        let _ = thresholds;
    }

    /// Write the binary mask of `source` into `destination`.
    fn filter(
        &mut self,
        source: &DynamicImage,
        destination: &mut DynamicImage,
        thresholds: &ColorThresholds,
    );
}

/// HSV in-range threshold with erosion and dilation.
#[derive(Debug, Clone, Copy, Default)]
pub struct HsvFilter;

impl ColorFilter for HsvFilter {
    /// Headless tuning aid: logs the tunable ranges once.
    fn create_tuning_ui(&mut self, thresholds: &ColorThresholds) {
        info!(
            hue = %format!("{}..={}", thresholds.hue_low, thresholds.hue_high),
            saturation = %format!("{}..={}", thresholds.sat_low, thresholds.sat_high),
            value = %format!("{}..={}", thresholds.value_low, thresholds.value_high),
            erosion = thresholds.erosion_size,
            dilation = thresholds.dilation_size,
            "color filter thresholds"
        );
    }

    fn filter(
        &mut self,
        source: &DynamicImage,
        destination: &mut DynamicImage,
        thresholds: &ColorThresholds,
    ) {
        let mask = threshold_mask(&source.to_rgb8(), thresholds);
        *destination = DynamicImage::ImageLuma8(clean_mask(mask, thresholds));
    }
}

/// Convert one RGB pixel to 8-bit HSV.
///
/// Hue is halved to fit a byte (0..180), saturation and value span
/// 0..255. Gray pixels have hue 0.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::many_single_char_names
)]
pub fn rgb_to_hsv(Rgb([r, g, b]): Rgb<u8>) -> [u8; 3] {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = f32::from(max - min);
    let v = max;
    let s = if max == 0 {
        0
    } else {
        (255.0 * delta / f32::from(max)).round() as u8
    };
    if max == min {
        return [0, s, v];
    }
    let (rf, gf, bf) = (f32::from(r), f32::from(g), f32::from(b));
    let mut degrees = if max == r {
        60.0 * (gf - bf) / delta
    } else if max == g {
        60.0f32.mul_add((bf - rf) / delta, 120.0)
    } else {
        60.0f32.mul_add((rf - gf) / delta, 240.0)
    };
    if degrees < 0.0 {
        degrees += 360.0;
    }
    // 360 degrees wraps to hue 0.
    let h = ((degrees / 2.0).round() as u32 % 180) as u8;
    [h, s, v]
}

/// Binary mask: 255 where the pixel's HSV lies inside `thresholds`.
#[must_use = "returns the binary mask"]
pub fn threshold_mask(image: &RgbImage, thresholds: &ColorThresholds) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        if thresholds.contains(rgb_to_hsv(*image.get_pixel(x, y))) {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Erode then dilate the mask by the configured radii.
#[must_use = "returns the cleaned mask"]
pub fn clean_mask(mask: GrayImage, thresholds: &ColorThresholds) -> GrayImage {
    let eroded = if thresholds.erosion_size > 0 {
        imageproc::morphology::erode(&mask, Norm::LInf, thresholds.erosion_size)
    } else {
        mask
    };
    if thresholds.dilation_size > 0 {
        imageproc::morphology::dilate(&eroded, Norm::LInf, thresholds.dilation_size)
    } else {
        eroded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_set(mask: &GrayImage) -> usize {
        mask.pixels().filter(|p| p.0[0] == 255).count()
    }

    #[test]
    fn defaults_match_tuned_values() {
        let t = ColorThresholds::default();
        assert_eq!(
            (t.hue_low, t.hue_high, t.sat_low, t.sat_high),
            (21, 104, 181, 255)
        );
        assert_eq!((t.value_low, t.value_high), (176, 255));
        assert_eq!((t.erosion_size, t.dilation_size), (0, 2));
    }

    #[test]
    fn hsv_of_primaries() {
        assert_eq!(rgb_to_hsv(Rgb([255, 0, 0])), [0, 255, 255]);
        assert_eq!(rgb_to_hsv(Rgb([0, 255, 0])), [60, 255, 255]);
        assert_eq!(rgb_to_hsv(Rgb([0, 0, 255])), [120, 255, 255]);
        assert_eq!(rgb_to_hsv(Rgb([255, 255, 0])), [30, 255, 255]);
    }

    #[test]
    fn hsv_of_grays() {
        assert_eq!(rgb_to_hsv(Rgb([0, 0, 0])), [0, 0, 0]);
        assert_eq!(rgb_to_hsv(Rgb([128, 128, 128])), [0, 0, 128]);
    }

    #[test]
    fn green_passes_red_does_not() {
        let t = ColorThresholds::default();
        assert!(t.contains(rgb_to_hsv(Rgb([0, 255, 0]))));
        assert!(!t.contains(rgb_to_hsv(Rgb([255, 0, 0]))));
        // Too dark.
        assert!(!t.contains(rgb_to_hsv(Rgb([0, 100, 0]))));
    }

    #[test]
    fn mask_marks_target_pixels() {
        let image = RgbImage::from_fn(10, 10, |x, _| {
            if x < 5 {
                Rgb([0, 255, 0])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let mask = threshold_mask(&image, &ColorThresholds::default());
        assert_eq!(count_set(&mask), 50);
        assert_eq!(mask.get_pixel(0, 0).0[0], 255);
        assert_eq!(mask.get_pixel(9, 9).0[0], 0);
    }

    #[test]
    fn erosion_removes_speckle() {
        let mut mask = GrayImage::new(9, 9);
        mask.put_pixel(4, 4, Luma([255]));
        let t = ColorThresholds {
            erosion_size: 1,
            dilation_size: 0,
            ..ColorThresholds::default()
        };
        assert_eq!(count_set(&clean_mask(mask, &t)), 0);
    }

    #[test]
    fn dilation_grows_target() {
        let mut mask = GrayImage::new(9, 9);
        mask.put_pixel(4, 4, Luma([255]));
        // Default: no erosion, dilation radius 2 (5x5 square).
        let cleaned = clean_mask(mask, &ColorThresholds::default());
        assert_eq!(count_set(&cleaned), 25);
    }

    #[test]
    fn unused_thresholds_have_no_effect() {
        let image = RgbImage::from_fn(6, 6, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([0, 255, 0])
            } else {
                Rgb([40, 40, 40])
            }
        });
        let base = ColorThresholds::default();
        let tweaked = ColorThresholds {
            binary_threshold_low: 17,
            binary_threshold_high: 230,
            ..base
        };
        let mut filter = HsvFilter;
        let mut a = DynamicImage::new_luma8(0, 0);
        let mut b = DynamicImage::new_luma8(0, 0);
        filter.filter(&DynamicImage::ImageRgb8(image.clone()), &mut a, &base);
        filter.filter(&DynamicImage::ImageRgb8(image), &mut b, &tweaked);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let t = ColorThresholds {
            sat_low: 200,
            sat_high: 100,
            ..ColorThresholds::default()
        };
        assert_eq!(
            t.validate(),
            Err(ConfigError::InvertedRange {
                channel: "saturation",
                low: 200,
                high: 100,
            })
        );
    }

    #[test]
    fn filter_writes_luma_mask_of_source_size() {
        let source = DynamicImage::ImageRgb8(RgbImage::new(7, 3));
        let mut destination = DynamicImage::new_rgb8(0, 0);
        HsvFilter.filter(&source, &mut destination, &ColorThresholds::default());
        assert_eq!((destination.width(), destination.height()), (7, 3));
        assert!(matches!(destination, DynamicImage::ImageLuma8(_)));
    }
}
