//! Contour extraction from the filtered mask.

use crate::contour::ContourDetector;
use crate::frame::SlotBinding;
use crate::stage::{Stage, StageContext, StageError, TickOutcome};
use crate::types::SlotId;

/// Traces the filtered slot into the contour slot.
pub struct ContoursStage {
    detector: Box<dyn ContourDetector>,
}

impl ContoursStage {
    /// Stage name.
    pub const NAME: &str = "Contours Layer";
    /// Label given to the contour slot.
    pub const LABEL: &str = "Contour Image";
    /// Slot access.
    pub const BINDING: SlotBinding =
        SlotBinding::new(&[SlotId::Filtered], Some(SlotId::Contour));

    #[must_use]
    pub fn new(detector: Box<dyn ContourDetector>) -> Self {
        Self { detector }
    }
}

impl Stage for ContoursStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn binding(&self) -> SlotBinding {
        Self::BINDING
    }

    fn attach(&mut self, ctx: &mut StageContext<'_>) -> Result<(), StageError> {
        ctx.write()?.set_label(Self::LABEL);
        Ok(())
    }

    fn update(&mut self, ctx: &mut StageContext<'_>) -> Result<TickOutcome, StageError> {
        let source = ctx.read_filled(SlotId::Filtered)?;
        let destination = ctx.write()?;
        self.detector
            .detect_contours(source.pixels(), destination.pixels_mut());
        Ok(TickOutcome::Continue)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{DynamicImage, GrayImage, Luma};

    use super::*;
    use crate::contour::{BorderContours, CONTOUR_COLOR};
    use crate::frame::FrameState;
    use crate::stage::HaltHandle;

    const FILTER_WRITE: SlotBinding = SlotBinding::new(&[], Some(SlotId::Filtered));

    #[test]
    fn traces_filtered_into_contour() {
        let mut frame = FrameState::new();
        let halt = HaltHandle::new();
        let mut mask = GrayImage::new(10, 10);
        for y in 3..7 {
            for x in 3..7 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let mut ctx = StageContext::new(frame.access("setup", FILTER_WRITE), &halt, 0);
        ctx.write().unwrap().set_pixels(DynamicImage::ImageLuma8(mask));

        let mut stage = ContoursStage::new(Box::new(BorderContours::new()));
        let mut ctx = StageContext::new(frame.access(ContoursStage::NAME, ContoursStage::BINDING), &halt, 1);
        stage.attach(&mut ctx).unwrap();
        stage.update(&mut ctx).unwrap();

        let contour = frame.slot(SlotId::Contour);
        assert_eq!(contour.label(), ContoursStage::LABEL);
        assert_eq!(*contour.pixels().to_rgb8().get_pixel(3, 3), CONTOUR_COLOR);
    }
}
