//! Color thresholding of the captured frame.

use crate::filter::{ColorFilter, ColorThresholds};
use crate::frame::SlotBinding;
use crate::stage::{Stage, StageContext, StageError, TickOutcome};
use crate::types::SlotId;

/// Thresholds the origin slot into the filtered slot.
pub struct FilterStage {
    filter: Box<dyn ColorFilter>,
    thresholds: ColorThresholds,
}

impl FilterStage {
    /// Stage name.
    pub const NAME: &str = "Filter Layer";
    /// Label given to the filtered slot.
    pub const LABEL: &str = "Filtered Image";
    /// Slot access.
    pub const BINDING: SlotBinding = SlotBinding::new(&[SlotId::Origin], Some(SlotId::Filtered));

    /// Filter with the given thresholds.
    #[must_use]
    pub fn new(filter: Box<dyn ColorFilter>, thresholds: ColorThresholds) -> Self {
        Self { filter, thresholds }
    }

    /// The thresholds in use.
    #[must_use]
    pub const fn thresholds(&self) -> &ColorThresholds {
        &self.thresholds
    }
}

impl Stage for FilterStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn binding(&self) -> SlotBinding {
        Self::BINDING
    }

    fn attach(&mut self, ctx: &mut StageContext<'_>) -> Result<(), StageError> {
        ctx.write()?.set_label(Self::LABEL);
        self.filter.create_tuning_ui(&self.thresholds);
        Ok(())
    }

    fn update(&mut self, ctx: &mut StageContext<'_>) -> Result<TickOutcome, StageError> {
        let source = ctx.read_filled(SlotId::Origin)?;
        let destination = ctx.write()?;
        self.filter
            .filter(source.pixels(), destination.pixels_mut(), &self.thresholds);
        Ok(TickOutcome::Continue)
    }
}
