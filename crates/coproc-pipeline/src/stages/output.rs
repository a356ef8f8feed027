//! Presentation of all four slots.

use crate::display::DisplaySink;
use crate::frame::SlotBinding;
use crate::stage::{Stage, StageContext, StageError, TickOutcome};
use crate::types::SlotId;

/// Hands every slot to a [`DisplaySink`] once per tick.
pub struct OutputStage {
    sink: Box<dyn DisplaySink>,
    target_fps: u32,
    open: bool,
}

impl OutputStage {
    /// Stage name.
    pub const NAME: &str = "Output Layer";
    /// Slot access.
    pub const BINDING: SlotBinding = SlotBinding::new(&SlotId::ALL, None);

    /// Display through `sink` at `target_fps`.
    #[must_use]
    pub fn new(sink: Box<dyn DisplaySink>, target_fps: u32) -> Self {
        Self {
            sink,
            target_fps,
            open: false,
        }
    }
}

impl Stage for OutputStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn binding(&self) -> SlotBinding {
        Self::BINDING
    }

    fn attach(&mut self, _ctx: &mut StageContext<'_>) -> Result<(), StageError> {
        self.open = true;
        Ok(())
    }

    fn update(&mut self, ctx: &mut StageContext<'_>) -> Result<TickOutcome, StageError> {
        let slots = [
            ctx.read(SlotId::Origin)?,
            ctx.read(SlotId::Filtered)?,
            ctx.read(SlotId::Contour)?,
            ctx.read(SlotId::Bounding)?,
        ];
        self.sink.display(self.target_fps, slots)?;
        Ok(TickOutcome::Continue)
    }

    fn detach(&mut self) {
        if self.open {
            self.sink.close();
            self.open = false;
        }
    }
}
