//! coproc-pipeline: fixed-order vision pipeline for a robot co-processor.
//!
//! An [`Application`] owns an ordered list of [`Stage`]s and one
//! [`FrameState`] of four image slots. It attaches every stage, runs
//! ticks that update each stage in registration order until a halt is
//! requested, then detaches everything in reverse.
//!
//! The vision stages are thin wrappers around pluggable collaborators:
//!
//! capture ([`Device`]) -> filter ([`ColorFilter`]) ->
//! contours ([`ContourDetector`]) -> bounding ([`BoundingGeometry`]) ->
//! output ([`DisplaySink`])
//!
//! [`vision_tracking`] wires the five of them together.

pub mod application;
pub mod bounding;
pub mod contour;
pub mod device;
pub mod diagnostics;
pub mod display;
pub mod filter;
pub mod frame;
pub mod stage;
pub mod stages;
pub mod types;

pub use application::{Application, ApplicationError, Phase, RunOptions};
pub use bounding::{BoundingGeometry, HullBounds};
pub use contour::{BorderContours, ContourDetector};
pub use device::{CaptureStatus, Device, DeviceError, FileDevice, PatternDevice};
pub use diagnostics::{RunDiagnostics, StageDiagnostics};
pub use display::{DisplayError, DisplaySink, MosaicSink, NullSink};
pub use filter::{ColorFilter, ColorThresholds, HsvFilter};
pub use frame::{FrameState, SlotBinding};
pub use stage::{HaltHandle, Stage, StageContext, StageError, StageState, TickOutcome};
pub use stages::{BoundingStage, CaptureStage, ContoursStage, FilterStage, OutputStage};
pub use types::{
    BoundingPoints, ConfigError, DeviceConfig, Dimensions, ImageSlot, PipelineConfig,
    PipelineError, RetryPolicy, SlotId,
};

/// Name of the application built by [`vision_tracking`].
pub const VISION_APP_NAME: &str = "Vision App";

/// The external collaborators the vision stages delegate to.
pub struct Collaborators {
    /// Frame source for the capture stage.
    pub device: Box<dyn Device>,
    /// Color filter for the filter stage.
    pub filter: Box<dyn ColorFilter>,
    /// Contour extractor for the contours stage.
    pub contours: Box<dyn ContourDetector>,
    /// Hull and box geometry for the bounding stage.
    pub geometry: Box<dyn BoundingGeometry>,
    /// Output for the display stage.
    pub display: Box<dyn DisplaySink>,
}

impl Collaborators {
    /// The bundled implementations around `device`, displaying through
    /// `display`.
    #[must_use]
    pub fn standard(device: Box<dyn Device>, display: Box<dyn DisplaySink>) -> Self {
        Self {
            device,
            filter: Box::new(HsvFilter),
            contours: Box::new(BorderContours::new()),
            geometry: Box::new(HullBounds),
            display,
        }
    }
}

/// Build the vision tracking application: capture, filter, contours,
/// bounding and output, registered in that order.
///
/// The returned application is ready to [`run`](Application::run).
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `config` fails validation.
pub fn vision_tracking(
    config: &PipelineConfig,
    collaborators: Collaborators,
) -> Result<Application, PipelineError> {
    config.validate()?;
    let Collaborators {
        device,
        filter,
        contours,
        geometry,
        display,
    } = collaborators;

    let mut app = Application::with_options(VISION_APP_NAME, config.run_options());
    app.register(CaptureStage::new(
        device,
        config.device.clone(),
        config.capture_retry,
    ))?;
    app.register(FilterStage::new(filter, config.thresholds))?;
    app.register(ContoursStage::new(contours))?;
    app.register(BoundingStage::new(geometry))?;
    app.register(OutputStage::new(display, config.target_fps))?;
    Ok(app)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn collaborators() -> Collaborators {
        Collaborators::standard(Box::new(PatternDevice::new(32, 24)), Box::new(NullSink))
    }

    #[test]
    fn registers_five_stages_in_order() {
        let app = vision_tracking(&PipelineConfig::default(), collaborators()).unwrap();
        assert_eq!(app.name(), VISION_APP_NAME);
        assert_eq!(app.phase(), Phase::Assembling);
        let names: Vec<&str> = app.stage_names().collect();
        assert_eq!(
            names,
            [
                CaptureStage::NAME,
                FilterStage::NAME,
                ContoursStage::NAME,
                BoundingStage::NAME,
                OutputStage::NAME,
            ]
        );
    }

    #[test]
    fn rejects_invalid_config() {
        let config = PipelineConfig {
            target_fps: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            vision_tracking(&config, collaborators()),
            Err(PipelineError::InvalidConfig(ConfigError::ZeroFps))
        ));
    }

    #[test]
    fn bounded_run_terminates() {
        let config = PipelineConfig {
            max_ticks: Some(3),
            ..PipelineConfig::default()
        };
        let mut app = vision_tracking(&config, collaborators()).unwrap();
        app.run().unwrap();
        assert_eq!(app.phase(), Phase::Terminated);
        let diagnostics = app.diagnostics();
        assert_eq!(diagnostics.ticks, 3);
        assert!(!diagnostics.init_failed);
        assert!(diagnostics.stages.iter().all(|s| s.updates == 3));
    }
}
