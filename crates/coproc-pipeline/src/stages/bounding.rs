//! Hull, bounding box and target center from the contour image.

use tracing::debug;

use crate::bounding::BoundingGeometry;
use crate::frame::SlotBinding;
use crate::stage::{Stage, StageContext, StageError, TickOutcome};
use crate::types::{BoundingPoints, SlotId};

/// Draws the hull and box of the contour slot into the bounding slot and
/// remembers the latest target center.
pub struct BoundingStage {
    geometry: Box<dyn BoundingGeometry>,
    last_center: Option<BoundingPoints>,
}

impl BoundingStage {
    /// Stage name.
    pub const NAME: &str = "Bounding Layer";
    /// Label given to the bounding slot.
    pub const LABEL: &str = "Bounding Image";
    /// Slot access.
    pub const BINDING: SlotBinding =
        SlotBinding::new(&[SlotId::Contour], Some(SlotId::Bounding));

    #[must_use]
    pub fn new(geometry: Box<dyn BoundingGeometry>) -> Self {
        Self {
            geometry,
            last_center: None,
        }
    }

    /// Center found on the most recent tick; `None` if that tick had no
    /// target.
    #[must_use]
    pub const fn last_center(&self) -> Option<BoundingPoints> {
        self.last_center
    }
}

impl Stage for BoundingStage {
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
        let tick = ctx.tick();
        let source = ctx.read_filled(SlotId::Contour)?;
        let destination = ctx.write()?.pixels_mut();
        self.geometry.draw_convex_hull(source.pixels(), destination);
        self.last_center = self.geometry.draw_bounding_box(destination);
        match self.last_center {
            Some(center) => debug!(tick, x = center.center_x, y = center.center_y, "target center"),
            None => debug!(tick, "no target"),
        }
        Ok(TickOutcome::Continue)
    }
}
