//! The [`Stage`] trait and the context handed to each stage call.
//!
//! A stage is a named processing unit with three lifecycle operations:
//!
//! 1. [`attach`](Stage::attach) once, before the first tick
//! 2. [`update`](Stage::update) once per tick, in registration order
//! 3. [`detach`](Stage::detach) once, after the last tick
//!
//! All three have no-op defaults. The [`Application`](crate::Application)
//! guarantees the call discipline, so implementations do not need to
//! defend against being attached twice.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::device::DeviceError;
use crate::display::DisplayError;
use crate::frame::{SlotAccess, SlotBinding};
use crate::types::{ImageSlot, SlotId};

/// Lifecycle state of one registered stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Registered, `attach` not yet called.
    Unattached,
    /// `attach` has run; `update` may be called.
    Active,
    /// `detach` has run; no further calls are valid.
    Detached,
}

/// What the application should do after a successful `update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "the application needs the outcome to decide whether the tick continues"]
pub enum TickOutcome {
    /// Continue with the next stage.
    Continue,
    /// End this tick early; downstream stages are not updated.
    SkipFrame,
}

/// A fatal error raised by a stage.
///
/// Returned from [`Stage::attach`] it halts the pipeline before any tick
/// runs. Returned from [`Stage::update`] it halts the pipeline and ends
/// the current tick.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The capture device failed.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// The display sink failed.
    #[error("display error: {0}")]
    Display(#[from] DisplayError),

    /// A stage read a slot outside its declared read-set.
    #[error("stage `{stage}` did not declare read access to slot `{slot}`")]
    SlotNotReadable {
        /// Offending stage.
        stage: String,
        /// Requested slot.
        slot: SlotId,
    },

    /// A stage without a write slot asked for one.
    #[error("stage `{stage}` has no write slot")]
    NoWriteSlot {
        /// Offending stage.
        stage: String,
    },

    /// An upstream slot holds no pixels this tick.
    #[error("slot `{0}` holds no image")]
    MissingInput(SlotId),
}

/// Cooperative halt signal shared by the application and its stages.
///
/// Cloning yields another handle to the same signal, so a halt may also
/// be requested from outside the pipeline (another thread, a signal
/// handler). The application only samples it at tick boundaries.
#[derive(Debug, Clone)]
pub struct HaltHandle {
    inner: Arc<HaltState>,
}

#[derive(Debug)]
struct HaltState {
    running: AtomicBool,
    sealed: AtomicBool,
}

impl HaltHandle {
    /// A handle in the running state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HaltState {
                running: AtomicBool::new(true),
                sealed: AtomicBool::new(false),
            }),
        }
    }

    /// Ask the pipeline to stop at the next tick boundary.
    ///
    /// Idempotent. Has no effect once shutdown has begun. Returns `true`
    /// if this call is the one that cleared the running flag.
    pub fn request_halt(&self) -> bool {
        if self.inner.sealed.load(Ordering::Acquire) {
            return false;
        }
        self.inner.running.swap(false, Ordering::AcqRel)
    }

    /// Whether no halt has been requested.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Freeze the flag; later requests are ignored.
    pub(crate) fn seal(&self) {
        self.inner.sealed.store(true, Ordering::Release);
    }
}

impl Default for HaltHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a stage may touch during one lifecycle call.
pub struct StageContext<'a> {
    slots: SlotAccess<'a>,
    halt: &'a HaltHandle,
    tick: u64,
}

impl<'a> StageContext<'a> {
    pub(crate) const fn new(slots: SlotAccess<'a>, halt: &'a HaltHandle, tick: u64) -> Self {
        Self { slots, halt, tick }
    }

    /// Read one of the stage's declared input slots.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::SlotNotReadable`] for an undeclared slot.
    pub fn read(&self, slot: SlotId) -> Result<&'a ImageSlot, StageError> {
        self.slots.read(slot)
    }

    /// Read a declared input slot that must already hold pixels.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::SlotNotReadable`] for an undeclared slot
    /// and [`StageError::MissingInput`] for a blank one.
    pub fn read_filled(&self, slot: SlotId) -> Result<&'a ImageSlot, StageError> {
        let image = self.slots.read(slot)?;
        if image.is_blank() {
            return Err(StageError::MissingInput(slot));
        }
        Ok(image)
    }

    /// The stage's write slot.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::NoWriteSlot`] if none was declared.
    pub fn write(&mut self) -> Result<&mut ImageSlot, StageError> {
        self.slots.write()
    }

    /// Ask the application to stop at the next tick boundary.
    pub fn request_halt(&self) {
        if self.halt.request_halt() {
            tracing::info!(stage = self.slots.stage(), tick = self.tick, "halt requested");
        }
    }

    /// Whether the pipeline is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.halt.is_running()
    }

    /// Zero-based tick number (0 during `attach`).
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Name of the stage this context was built for.
    #[must_use]
    pub const fn stage(&self) -> &str {
        self.slots.stage()
    }
}

/// A pipeline stage.
///
/// Implementations are registered with
/// [`Application::register`](crate::Application::register), which takes
/// ownership and drives the lifecycle.
pub trait Stage {
    /// Human-readable stage name, used in logs and diagnostics.
    fn name(&self) -> &str;

    /// The slots this stage reads and writes.
    fn binding(&self) -> SlotBinding {
        SlotBinding::none()
    }

    /// Acquire resources and label the owned slot.
    ///
    /// Either call [`StageContext::request_halt`] or return an error on
    /// unrecoverable failure; the remaining stages are still attached
    /// and every stage is still detached.
    ///
    /// # Errors
    ///
    /// Any [`StageError`]; the application treats it as a fatal
    /// initialization failure.
    fn attach(&mut self, ctx: &mut StageContext<'_>) -> Result<(), StageError> {
        let _ = ctx;
        Ok(())
    }

    /// Process one tick.
    ///
    /// # Errors
    ///
    /// Any [`StageError`]; the application halts and ends the tick.
    fn update(&mut self, ctx: &mut StageContext<'_>) -> Result<TickOutcome, StageError> {
        let _ = ctx;
        Ok(TickOutcome::Continue)
    }

    /// Release whatever `attach` acquired. Must tolerate a partially
    /// failed `attach`.
    fn detach(&mut self) {}
}
