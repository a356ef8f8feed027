//! The shared frame state and per-stage slot access.
//!
//! [`FrameState`] owns the four image slots. Stages never see it
//! directly: for each call the application lends a [`SlotAccess`] built
//! from the stage's declared [`SlotBinding`], which exposes shared
//! references to the declared read slots and a mutable reference to the
//! single write slot. Access outside the binding is an error, so the
//! data-flow graph documented by the bindings is also the one enforced
//! at runtime.

use crate::stage::StageError;
use crate::types::{ImageSlot, SLOT_COUNT, SlotId};

/// The fixed set of image slots shared by all stages.
#[derive(Debug, Clone, Default)]
pub struct FrameState {
    slots: [ImageSlot; SLOT_COUNT],
}

impl FrameState {
    /// A frame state with four blank, unlabelled slots.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| ImageSlot::empty()),
        }
    }

    /// Read-only view of one slot.
    #[must_use]
    pub const fn slot(&self, id: SlotId) -> &ImageSlot {
        &self.slots[id.index()]
    }

    /// Release every pixel buffer, keeping labels.
    pub fn release(&mut self) {
        for slot in &mut self.slots {
            slot.release();
        }
    }

    /// Lend the slots named by `binding` to the stage called `stage`.
    pub(crate) fn access<'a>(&'a mut self, stage: &'a str, binding: SlotBinding) -> SlotAccess<'a> {
        SlotAccess::new(stage, &mut self.slots, binding)
    }
}

/// The slots a stage reads and the one slot it writes.
///
/// Declared once per stage and validated at registration: no two stages
/// may write the same slot, and every read slot must be written by an
/// earlier stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotBinding {
    reads: &'static [SlotId],
    write: Option<SlotId>,
}

impl SlotBinding {
    /// A binding with the given read-set and optional write slot.
    #[must_use]
    pub const fn new(reads: &'static [SlotId], write: Option<SlotId>) -> Self {
        Self { reads, write }
    }

    /// A stage that neither reads nor writes frame slots.
    #[must_use]
    pub const fn none() -> Self {
        Self::new(&[], None)
    }

    /// Slots this stage reads.
    #[must_use]
    pub const fn reads(&self) -> &'static [SlotId] {
        self.reads
    }

    /// The slot this stage writes, if any.
    #[must_use]
    pub const fn write(&self) -> Option<SlotId> {
        self.write
    }

    /// Whether `slot` is in the read-set.
    #[must_use]
    pub fn can_read(&self, slot: SlotId) -> bool {
        self.reads.contains(&slot)
    }
}

impl Default for SlotBinding {
    fn default() -> Self {
        Self::none()
    }
}

/// Typed access to the slots of one stage for the duration of one call.
pub struct SlotAccess<'a> {
    stage: &'a str,
    readable: [Option<&'a ImageSlot>; SLOT_COUNT],
    writable: Option<&'a mut ImageSlot>,
}

impl<'a> SlotAccess<'a> {
    fn new(stage: &'a str, slots: &'a mut [ImageSlot; SLOT_COUNT], binding: SlotBinding) -> Self {
        let mut readable = [None; SLOT_COUNT];
        let mut writable = None;
        for (id, slot) in SlotId::ALL.into_iter().zip(slots.iter_mut()) {
            if binding.write() == Some(id) {
                writable = Some(slot);
            } else if binding.can_read(id) {
                let slot: &'a ImageSlot = slot;
                readable[id.index()] = Some(slot);
            }
        }
        Self {
            stage,
            readable,
            writable,
        }
    }

    /// Name of the stage holding this access.
    #[must_use]
    pub const fn stage(&self) -> &str {
        self.stage
    }

    /// Read a slot from the stage's read-set.
    ///
    /// The returned reference outlives this borrow of `self`, so a
    /// stage can hold its inputs while writing its output.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::SlotNotReadable`] if `slot` is not in the
    /// stage's declared read-set.
    pub fn read(&self, slot: SlotId) -> Result<&'a ImageSlot, StageError> {
        self.readable[slot.index()].ok_or_else(|| StageError::SlotNotReadable {
            stage: self.stage.to_owned(),
            slot,
        })
    }

    /// The stage's write slot.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::NoWriteSlot`] if the stage declared no
    /// write slot.
    pub fn write(&mut self) -> Result<&mut ImageSlot, StageError> {
        match self.writable.as_deref_mut() {
            Some(slot) => Ok(slot),
            None => Err(StageError::NoWriteSlot {
                stage: self.stage.to_owned(),
            }),
        }
    }
}
