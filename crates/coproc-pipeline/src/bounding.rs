//! Target geometry: convex hull and bounding box of the contour image.
//!
//! [`HullBounds`] collects every lit pixel of its input as a point set,
//! wraps it with a convex hull, and boxes it with an axis-aligned
//! rectangle whose center is the reported target position.

use geo::{BoundingRect, ConvexHull, MultiPoint, Point};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use crate::types::BoundingPoints;

/// Color of the drawn convex hull.
pub const HULL_COLOR: Rgb<u8> = Rgb([0, 0, 255]);

/// Color of the drawn bounding box.
pub const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Hull and box geometry over a contour image.
pub trait BoundingGeometry {
    /// Copy `source` into `destination` with its convex hull drawn on top.
    fn draw_convex_hull(&mut self, source: &DynamicImage, destination: &mut DynamicImage);

    /// Draw the bounding box of `image`'s content onto it and return the
    /// box center, or `None` if the image has no content.
    fn draw_bounding_box(&mut self, image: &mut DynamicImage) -> Option<BoundingPoints>;
}

/// Convex-hull and bounding-box geometry via `geo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HullBounds;

/// Every non-black pixel as a point.
#[must_use]
pub fn lit_points(image: &RgbImage) -> MultiPoint<f64> {
    image
        .enumerate_pixels()
        .filter(|(_, _, p)| p.0 != [0, 0, 0])
        .map(|(x, y, _)| Point::new(f64::from(x), f64::from(y)))
        .collect()
}

#[allow(clippy::cast_possible_truncation)]
fn as_f32(v: f64) -> f32 {
    v as f32
}

impl BoundingGeometry for HullBounds {
    fn draw_convex_hull(&mut self, source: &DynamicImage, destination: &mut DynamicImage) {
        let mut canvas = source.to_rgb8();
        let points = lit_points(&canvas);
        if points.0.len() >= 2 {
            let hull = points.convex_hull();
            for line in hull.exterior().lines() {
                draw_line_segment_mut(
                    &mut canvas,
                    (as_f32(line.start.x), as_f32(line.start.y)),
                    (as_f32(line.end.x), as_f32(line.end.y)),
                    HULL_COLOR,
                );
            }
        }
        *destination = DynamicImage::ImageRgb8(canvas);
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn draw_bounding_box(&mut self, image: &mut DynamicImage) -> Option<BoundingPoints> {
        let mut canvas = image.to_rgb8();
        let bounds = lit_points(&canvas).bounding_rect()?;
        let (min, max) = (bounds.min(), bounds.max());
        // Pixel coordinates: the box spans both end pixels inclusive.
        let rect = Rect::at(min.x as i32, min.y as i32)
            .of_size((max.x - min.x) as u32 + 1, (max.y - min.y) as u32 + 1);
        draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);
        *image = DynamicImage::ImageRgb8(canvas);
        let center = bounds.center();
        Some(BoundingPoints {
            center_x: center.x,
            center_y: center.y,
        })
    }
}
