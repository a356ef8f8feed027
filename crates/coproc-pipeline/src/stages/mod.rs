//! The five vision stages, in the order they run.
//!
//! | Stage    | Reads                               | Writes   |
//! |----------|-------------------------------------|----------|
//! | Capture  | -                                   | origin   |
//! | Filter   | origin                              | filtered |
//! | Contours | filtered                            | contour  |
//! | Bounding | contour                             | bounding |
//! | Output   | origin, filtered, contour, bounding | -        |
//!
//! Each stage labels its own slot in `attach` and wraps exactly one
//! collaborator call per tick.

mod bounding;
mod capture;
mod contours;
mod filter;
mod output;

pub use bounding::BoundingStage;
pub use capture::CaptureStage;
pub use contours::ContoursStage;
pub use filter::FilterStage;
pub use output::OutputStage;
