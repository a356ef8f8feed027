//! The stage registry and lifecycle driver.
//!
//! An [`Application`] owns an ordered list of stages and the single
//! [`FrameState`]. [`Application::run`] drives it through
//! `Initializing -> Running -> ShuttingDown -> Terminated`:
//!
//! - every stage is attached in registration order, even after one of
//!   them requested a halt, so each stage ends up `Active` and can be
//!   detached
//! - while the halt flag is clear, each tick updates every stage in
//!   registration order; the flag is sampled once per tick
//! - every stage is detached exactly once, in reverse registration
//!   order, then destroyed in that same order
//!
//! Execution is single-threaded and run-to-completion: exactly one stage
//! call is in flight at any time.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::diagnostics::{RunDiagnostics, StageDiagnostics};
use crate::frame::{FrameState, SlotBinding};
use crate::stage::{HaltHandle, Stage, StageContext, StageError, StageState, TickOutcome};
use crate::types::SlotId;

/// Lifecycle phase of an [`Application`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Constructed; stages may be registered.
    Assembling,
    /// Attaching stages.
    Initializing,
    /// Running ticks.
    Running,
    /// Detaching stages.
    ShuttingDown,
    /// Finished; not reusable.
    Terminated,
}

/// Orchestration options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Report ticks that take longer than this.
    pub tick_budget: Option<Duration>,
    /// Halt after this many ticks.
    pub max_ticks: Option<u64>,
}

/// Errors from registering stages or running an application.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplicationError {
    /// `register` was called once the lifecycle had started.
    #[error("cannot register stage `{stage}`: application is already {phase:?}")]
    AlreadyStarted {
        /// Rejected stage.
        stage: String,
        /// Phase at the time of the call.
        phase: Phase,
    },

    /// `run` was called on an application that already ran.
    #[error("application `{0}` has already run and cannot be reused")]
    NotReusable(String),

    /// Two stages declared the same write slot.
    #[error("stage `{stage}` writes slot `{slot}`, already written by `{owner}`")]
    SlotAlreadyWritten {
        /// Rejected stage.
        stage: String,
        /// Contested slot.
        slot: SlotId,
        /// Stage that owns the slot.
        owner: String,
    },

    /// A stage reads a slot that no earlier stage writes.
    #[error("stage `{stage}` reads slot `{slot}`, which no earlier stage writes")]
    ReadBeforeWrite {
        /// Rejected stage.
        stage: String,
        /// Unwritten slot.
        slot: SlotId,
    },
}

/// A stage plus the bookkeeping the application keeps for it.
struct RegisteredStage {
    stage: Box<dyn Stage>,
    name: String,
    index: usize,
    binding: SlotBinding,
    state: StageState,
    timing: StageDiagnostics,
}

impl RegisteredStage {
    fn attach(&mut self, frame: &mut FrameState, halt: &HaltHandle) {
        if self.state != StageState::Unattached {
            warn!(stage = %self.name, state = ?self.state, "attach skipped");
            return;
        }
        let mut ctx = StageContext::new(frame.access(&self.name, self.binding), halt, 0);
        let result = self.stage.attach(&mut ctx);
        // Active even on failure so that detach still runs.
        self.state = StageState::Active;
        match result {
            Ok(()) => info!(stage = %self.name, index = self.index, "stage attached"),
            Err(err) => {
                error!(stage = %self.name, index = self.index, error = %err, "stage failed to attach");
                halt.request_halt();
            }
        }
    }

    fn update(
        &mut self,
        frame: &mut FrameState,
        halt: &HaltHandle,
        tick: u64,
    ) -> Result<TickOutcome, StageError> {
        let mut ctx = StageContext::new(frame.access(&self.name, self.binding), halt, tick);
        let started = Instant::now();
        let outcome = self.stage.update(&mut ctx);
        self.timing.record(started.elapsed());
        outcome
    }

    fn detach(&mut self) {
        match self.state {
            StageState::Active => {
                self.stage.detach();
                self.state = StageState::Detached;
                warn!(stage = %self.name, index = self.index, "stage detached");
            }
            StageState::Unattached => {
                self.state = StageState::Detached;
                debug!(stage = %self.name, "stage was never attached; nothing to release");
            }
            StageState::Detached => {
                debug!(stage = %self.name, "stage already detached");
            }
        }
    }
}

/// Owns the stages and the frame state, and runs the lifecycle.
pub struct Application {
    name: String,
    stages: Vec<RegisteredStage>,
    frame: FrameState,
    phase: Phase,
    halt: HaltHandle,
    options: RunOptions,
    diagnostics: RunDiagnostics,
}

impl Application {
    /// An empty application with default options.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_options(name, RunOptions::default())
    }

    /// An empty application with the given options.
    #[must_use]
    pub fn with_options(name: impl Into<String>, options: RunOptions) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            frame: FrameState::new(),
            phase: Phase::Assembling,
            halt: HaltHandle::new(),
            options,
            diagnostics: RunDiagnostics::default(),
        }
    }

    /// Application name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether no halt has been requested.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.halt.is_running()
    }

    /// A handle that can request a halt from outside the pipeline.
    #[must_use]
    pub fn halt_handle(&self) -> HaltHandle {
        self.halt.clone()
    }

    /// Request a cooperative halt. Idempotent; ignored once shutdown has
    /// begun.
    pub fn request_halt(&self) {
        self.halt.request_halt();
    }

    /// Registered stage names, in execution order.
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.name.as_str())
    }

    /// Diagnostics of the last run. Per-stage timing is filled in once
    /// the application is `Terminated`.
    #[must_use]
    pub const fn diagnostics(&self) -> &RunDiagnostics {
        &self.diagnostics
    }

    /// Append a stage; the application takes ownership.
    ///
    /// Returns the stage's registration index.
    ///
    /// # Errors
    ///
    /// Returns [`ApplicationError::AlreadyStarted`] outside the
    /// `Assembling` phase, [`ApplicationError::SlotAlreadyWritten`] if
    /// another stage already writes the stage's write slot, and
    /// [`ApplicationError::ReadBeforeWrite`] if a read slot is not
    /// written by an earlier stage.
    pub fn register(&mut self, stage: impl Stage + 'static) -> Result<usize, ApplicationError> {
        let name = stage.name().to_owned();
        if self.phase != Phase::Assembling {
            return Err(ApplicationError::AlreadyStarted {
                stage: name,
                phase: self.phase,
            });
        }

        let binding = stage.binding();
        if let Some(slot) = binding.write()
            && let Some(owner) = self.writer_of(slot)
        {
            return Err(ApplicationError::SlotAlreadyWritten {
                stage: name,
                slot,
                owner: owner.to_owned(),
            });
        }
        if let Some(&slot) = binding
            .reads()
            .iter()
            .find(|&&slot| self.writer_of(slot).is_none())
        {
            return Err(ApplicationError::ReadBeforeWrite { stage: name, slot });
        }

        let index = self.stages.len();
        info!(app = %self.name, stage = %name, index, "stage registered");
        self.stages.push(RegisteredStage {
            stage: Box::new(stage),
            timing: StageDiagnostics::new(name.clone(), index),
            name,
            index,
            binding,
            state: StageState::Unattached,
        });
        Ok(index)
    }

    fn writer_of(&self, slot: SlotId) -> Option<&str> {
        self.stages
            .iter()
            .find(|s| s.binding.write() == Some(slot))
            .map(|s| s.name.as_str())
    }

    /// Run the full lifecycle and return once every stage is detached.
    ///
    /// Whether the run ended because of an initialization failure, a
    /// stage halt, a tick limit or an external halt is not part of the
    /// return value; see [`diagnostics`](Self::diagnostics).
    ///
    /// # Errors
    ///
    /// Returns [`ApplicationError::NotReusable`] if the application has
    /// already run.
    pub fn run(&mut self) -> Result<(), ApplicationError> {
        if self.phase != Phase::Assembling {
            return Err(ApplicationError::NotReusable(self.name.clone()));
        }

        self.initialize();
        if self.halt.is_running() {
            self.phase = Phase::Running;
            info!(app = %self.name, "running");
            while self.halt.is_running() {
                if let Some(limit) = self.options.max_ticks
                    && self.diagnostics.ticks >= limit
                {
                    info!(app = %self.name, ticks = limit, "tick limit reached");
                    self.halt.request_halt();
                    break;
                }
                self.tick();
            }
        } else {
            self.diagnostics.init_failed = true;
            warn!(app = %self.name, "halt requested during initialization; shutting down");
        }
        self.shut_down();
        Ok(())
    }

    fn initialize(&mut self) {
        self.phase = Phase::Initializing;
        info!(app = %self.name, stages = self.stages.len(), "initializing");
        for registered in &mut self.stages {
            registered.attach(&mut self.frame, &self.halt);
        }
    }

    /// One sweep of `update` over every stage, in registration order.
    fn tick(&mut self) {
        let tick = self.diagnostics.ticks;
        self.diagnostics.ticks += 1;
        let started = Instant::now();
        let mut slowest: Option<(usize, Duration)> = None;

        for registered in &mut self.stages {
            let before = registered.timing.total;
            let outcome = registered.update(&mut self.frame, &self.halt, tick);
            let elapsed = registered.timing.total.saturating_sub(before);
            if slowest.is_none_or(|(_, longest)| elapsed > longest) {
                slowest = Some((registered.index, elapsed));
            }

            match outcome {
                Ok(TickOutcome::Continue) => {}
                Ok(TickOutcome::SkipFrame) => {
                    debug!(stage = %registered.name, tick, "frame skipped");
                    self.diagnostics.skipped_frames += 1;
                    break;
                }
                Err(err) => {
                    error!(stage = %registered.name, tick, error = %err, "stage update failed; halting");
                    self.diagnostics.failed_updates += 1;
                    self.halt.request_halt();
                    break;
                }
            }
        }

        let elapsed = started.elapsed();
        if let Some(budget) = self.options.tick_budget
            && elapsed > budget
        {
            self.diagnostics.budget_overruns += 1;
            let slowest = slowest.map_or("-", |(index, _)| self.stages[index].name.as_str());
            warn!(
                tick,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = budget.as_secs_f64() * 1000.0,
                slowest,
                "tick overran its budget"
            );
        }
    }

    fn shut_down(&mut self) {
        self.phase = Phase::ShuttingDown;
        self.halt.seal();
        info!(app = %self.name, "shutting down");

        for registered in self.stages.iter_mut().rev() {
            registered.detach();
        }

        self.diagnostics.stages = self.stages.iter().map(|s| s.timing.clone()).collect();
        self.destroy_stages();
        self.frame.release();
        self.phase = Phase::Terminated;
        info!(app = %self.name, ticks = self.diagnostics.ticks, "terminated");
    }

    /// Drop stages in reverse registration order.
    fn destroy_stages(&mut self) {
        while let Some(registered) = self.stages.pop() {
            debug!(stage = %registered.name, "stage destroyed");
            drop(registered);
        }
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        self.destroy_stages();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::types::DynamicImage;

    type Log = Rc<RefCell<Vec<String>>>;

    /// Records every lifecycle call into a shared log.
    struct Probe {
        name: &'static str,
        binding: SlotBinding,
        log: Log,
        fail_attach: bool,
        halt_on_tick: Option<u64>,
        skip_on_tick: Option<u64>,
        fail_on_tick: Option<u64>,
    }

    impl Probe {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                binding: SlotBinding::none(),
                log: Rc::clone(log),
                fail_attach: false,
                halt_on_tick: None,
                skip_on_tick: None,
                fail_on_tick: None,
            }
        }

        fn bound(mut self, binding: SlotBinding) -> Self {
            self.binding = binding;
            self
        }

        fn push(&self, call: &str) {
            self.log.borrow_mut().push(format!("{}.{call}", self.name));
        }
    }

    impl Stage for Probe {
        fn name(&self) -> &str {
            self.name
        }

        fn binding(&self) -> SlotBinding {
            self.binding
        }

        fn attach(&mut self, _ctx: &mut StageContext<'_>) -> Result<(), StageError> {
            self.push("attach");
            if self.fail_attach {
                return Err(StageError::MissingInput(SlotId::Origin));
            }
            Ok(())
        }

        fn update(&mut self, ctx: &mut StageContext<'_>) -> Result<TickOutcome, StageError> {
            self.push("update");
            if self.halt_on_tick == Some(ctx.tick()) {
                ctx.request_halt();
            }
            if self.skip_on_tick == Some(ctx.tick()) {
                return Ok(TickOutcome::SkipFrame);
            }
            if self.fail_on_tick == Some(ctx.tick()) {
                return Err(StageError::MissingInput(SlotId::Filtered));
            }
            Ok(TickOutcome::Continue)
        }

        fn detach(&mut self) {
            self.push("detach");
        }
    }

    fn calls(log: &Log, suffix: &str) -> Vec<String> {
        log.borrow()
            .iter()
            .filter(|c| c.ends_with(suffix))
            .cloned()
            .collect()
    }

    #[test]
    fn new_application_is_assembling() {
        let app = Application::new("Vision App");
        assert_eq!(app.phase(), Phase::Assembling);
        assert!(app.is_running());
        assert_eq!(app.name(), "Vision App");
    }

    #[test]
    fn register_returns_indices_in_order() {
        let log = Log::default();
        let mut app = Application::new("app");
        assert_eq!(app.register(Probe::new("a", &log)).unwrap(), 0);
        assert_eq!(app.register(Probe::new("b", &log)).unwrap(), 1);
        assert_eq!(app.stage_names().collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn duplicate_writer_is_rejected() {
        let log = Log::default();
        let mut app = Application::new("app");
        let writes_origin = SlotBinding::new(&[], Some(SlotId::Origin));
        app.register(Probe::new("camera", &log).bound(writes_origin))
            .unwrap();
        let err = app
            .register(Probe::new("second camera", &log).bound(writes_origin))
            .unwrap_err();
        assert_eq!(
            err,
            ApplicationError::SlotAlreadyWritten {
                stage: "second camera".to_owned(),
                slot: SlotId::Origin,
                owner: "camera".to_owned(),
            }
        );
    }

    #[test]
    fn read_without_earlier_writer_is_rejected() {
        let log = Log::default();
        let mut app = Application::new("app");
        let binding = SlotBinding::new(&[SlotId::Origin], Some(SlotId::Filtered));
        let err = app
            .register(Probe::new("filter", &log).bound(binding))
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::ReadBeforeWrite {
                slot: SlotId::Origin,
                ..
            }
        ));
    }

    #[test]
    fn register_after_run_is_a_usage_error() {
        let log = Log::default();
        let mut app = Application::with_options(
            "app",
            RunOptions {
                max_ticks: Some(1),
                ..RunOptions::default()
            },
        );
        app.run().unwrap();
        let err = app.register(Probe::new("late", &log)).unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::AlreadyStarted {
                phase: Phase::Terminated,
                ..
            }
        ));
    }

    #[test]
    fn run_twice_is_rejected() {
        let mut app = Application::with_options(
            "app",
            RunOptions {
                max_ticks: Some(0),
                ..RunOptions::default()
            },
        );
        app.run().unwrap();
        assert_eq!(app.phase(), Phase::Terminated);
        assert_eq!(
            app.run(),
            Err(ApplicationError::NotReusable("app".to_owned()))
        );
    }

    #[test]
    fn tick_limit_bounds_updates() {
        let log = Log::default();
        let mut app = Application::with_options(
            "app",
            RunOptions {
                max_ticks: Some(3),
                ..RunOptions::default()
            },
        );
        app.register(Probe::new("a", &log)).unwrap();
        app.register(Probe::new("b", &log)).unwrap();
        app.run().unwrap();

        assert_eq!(app.diagnostics().ticks, 3);
        assert_eq!(calls(&log, "update").len(), 6);
        assert_eq!(app.diagnostics().stages[1].updates, 3);
    }

    #[test]
    fn halt_mid_tick_finishes_the_tick() {
        let log = Log::default();
        let mut app = Application::new("app");
        let mut first = Probe::new("a", &log);
        first.halt_on_tick = Some(1);
        app.register(first).unwrap();
        app.register(Probe::new("b", &log)).unwrap();
        app.run().unwrap();

        // Tick 0 and tick 1 both complete; tick 2 never starts.
        assert_eq!(
            calls(&log, "update"),
            ["a.update", "b.update", "a.update", "b.update"]
        );
        assert!(!app.is_running());
    }

    #[test]
    fn failed_attach_skips_running_but_detaches_everyone() {
        let log = Log::default();
        let mut app = Application::new("app");
        let mut broken = Probe::new("a", &log);
        broken.fail_attach = true;
        app.register(broken).unwrap();
        app.register(Probe::new("b", &log)).unwrap();
        app.run().unwrap();

        assert_eq!(
            *log.borrow(),
            ["a.attach", "b.attach", "b.detach", "a.detach"]
        );
        assert!(app.diagnostics().init_failed);
        assert_eq!(app.diagnostics().ticks, 0);
    }

    #[test]
    fn skip_frame_ends_the_tick_early() {
        let log = Log::default();
        let mut app = Application::with_options(
            "app",
            RunOptions {
                max_ticks: Some(2),
                ..RunOptions::default()
            },
        );
        let mut first = Probe::new("a", &log);
        first.skip_on_tick = Some(0);
        app.register(first).unwrap();
        app.register(Probe::new("b", &log)).unwrap();
        app.run().unwrap();

        assert_eq!(calls(&log, "update"), ["a.update", "a.update", "b.update"]);
        assert_eq!(app.diagnostics().skipped_frames, 1);
        assert!(app.diagnostics().failed_updates == 0);
    }

    #[test]
    fn update_error_halts_and_ends_the_tick() {
        let log = Log::default();
        let mut app = Application::new("app");
        let mut first = Probe::new("a", &log);
        first.fail_on_tick = Some(2);
        app.register(first).unwrap();
        app.register(Probe::new("b", &log)).unwrap();
        app.run().unwrap();

        assert_eq!(calls(&log, "update").len(), 5);
        assert_eq!(app.diagnostics().failed_updates, 1);
        assert_eq!(app.diagnostics().ticks, 3);
        assert_eq!(calls(&log, "detach").len(), 2);
    }

    #[test]
    fn external_halt_before_run_skips_running() {
        let log = Log::default();
        let mut app = Application::new("app");
        app.register(Probe::new("a", &log)).unwrap();
        app.halt_handle().request_halt();
        app.run().unwrap();
        assert_eq!(*log.borrow(), ["a.attach", "a.detach"]);
    }

    #[test]
    fn detach_runs_in_reverse_registration_order() {
        let log = Log::default();
        let mut app = Application::with_options(
            "app",
            RunOptions {
                max_ticks: Some(1),
                ..RunOptions::default()
            },
        );
        for name in ["a", "b", "c"] {
            app.register(Probe::new(name, &log)).unwrap();
        }
        app.run().unwrap();
        assert_eq!(calls(&log, "detach"), ["c.detach", "b.detach", "a.detach"]);
    }

    #[test]
    fn halt_after_shutdown_has_no_effect() {
        let mut app = Application::with_options(
            "app",
            RunOptions {
                max_ticks: Some(0),
                ..RunOptions::default()
            },
        );
        app.run().unwrap();
        // The tick limit cleared the flag before shutdown; a later
        // request must not panic or change anything.
        app.request_halt();
        assert_eq!(app.phase(), Phase::Terminated);
    }

    /// Writes its slot during every tick so the frame is released at
    /// the end of the run.
    struct Painter;

    impl Stage for Painter {
        fn name(&self) -> &str {
            "painter"
        }

        fn binding(&self) -> SlotBinding {
            SlotBinding::new(&[], Some(SlotId::Origin))
        }

        fn attach(&mut self, ctx: &mut StageContext<'_>) -> Result<(), StageError> {
            ctx.write()?.set_label("Input Image");
            Ok(())
        }

        fn update(&mut self, ctx: &mut StageContext<'_>) -> Result<TickOutcome, StageError> {
            ctx.write()?.set_pixels(DynamicImage::new_rgb8(2, 2));
            Ok(TickOutcome::Continue)
        }
    }

    #[test]
    fn frame_buffers_are_released_at_termination() {
        let mut app = Application::with_options(
            "app",
            RunOptions {
                max_ticks: Some(1),
                ..RunOptions::default()
            },
        );
        app.register(Painter).unwrap();
        app.run().unwrap();
        assert!(app.frame.slot(SlotId::Origin).is_blank());
        assert_eq!(app.frame.slot(SlotId::Origin).label(), "Input Image");
    }

    /// Sleeps long enough to overrun a 1 ms budget.
    struct Slow;

    impl Stage for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn update(&mut self, _ctx: &mut StageContext<'_>) -> Result<TickOutcome, StageError> {
            std::thread::sleep(Duration::from_millis(5));
            Ok(TickOutcome::Continue)
        }
    }

    #[test]
    fn budget_overrun_is_counted_not_fatal() {
        let mut app = Application::with_options(
            "app",
            RunOptions {
                tick_budget: Some(Duration::from_millis(1)),
                max_ticks: Some(2),
            },
        );
        app.register(Slow).unwrap();
        app.run().unwrap();
        assert_eq!(app.diagnostics().ticks, 2);
        assert_eq!(app.diagnostics().budget_overruns, 2);
        assert_eq!(app.diagnostics().failed_updates, 0);
    }
}
