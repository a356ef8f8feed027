//! Frame acquisition from a [`Device`].

use tracing::{error, info, warn};

use crate::device::{CaptureStatus, Device, DeviceError};
use crate::frame::SlotBinding;
use crate::stage::{Stage, StageContext, StageError, TickOutcome};
use crate::types::{DeviceConfig, DynamicImage, RetryPolicy, SlotId};

/// Opens the camera on attach and captures one frame per tick into the
/// origin slot.
pub struct CaptureStage {
    device: Box<dyn Device>,
    config: DeviceConfig,
    retry: RetryPolicy,
    acquired: bool,
}

impl CaptureStage {
    /// Stage name.
    pub const NAME: &str = "Camera Layer";
    /// Label given to the origin slot.
    pub const LABEL: &str = "Input Image";
    /// Slot access.
    pub const BINDING: SlotBinding = SlotBinding::new(&[], Some(SlotId::Origin));

    /// Wrap `device`, to be opened with `config`.
    #[must_use]
    pub fn new(device: Box<dyn Device>, config: DeviceConfig, retry: RetryPolicy) -> Self {
        Self {
            device,
            config,
            retry,
            acquired: false,
        }
    }

    /// Whether the device is currently open.
    #[must_use]
    pub const fn is_acquired(&self) -> bool {
        self.acquired
    }

    fn capture_with_retry(&mut self, into: &mut DynamicImage) -> Result<CaptureStatus, DeviceError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.device.capture(into) {
                Ok(status) => return Ok(status),
                Err(err) if attempt < attempts => {
                    warn!(attempt, attempts, error = %err, "capture failed, retrying");
                    std::thread::sleep(self.retry.backoff());
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Stage for CaptureStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn binding(&self) -> SlotBinding {
        Self::BINDING
    }

    fn attach(&mut self, ctx: &mut StageContext<'_>) -> Result<(), StageError> {
        ctx.write()?.set_label(Self::LABEL);
        self.device.configure(self.config.port, &self.config.label);
        match self.device.init() {
            Ok(()) => {
                self.acquired = true;
                info!(port = self.config.port, device = %self.config.label, "camera opened");
            }
            Err(err) => {
                error!(port = self.config.port, device = %self.config.label, error = %err, "camera failed to initialize");
                ctx.request_halt();
            }
        }
        Ok(())
    }

    fn update(&mut self, ctx: &mut StageContext<'_>) -> Result<TickOutcome, StageError> {
        let slot = ctx.write()?;
        match self.capture_with_retry(slot.pixels_mut())? {
            CaptureStatus::Frame => Ok(TickOutcome::Continue),
            CaptureStatus::EndOfStream => {
                info!(tick = ctx.tick(), "camera reached end of stream");
                ctx.request_halt();
                Ok(TickOutcome::SkipFrame)
            }
        }
    }

    fn detach(&mut self) {
        if self.acquired {
            self.device.release();
            self.acquired = false;
            info!(device = %self.config.label, "camera released");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::device::PatternDevice;
    use crate::frame::FrameState;
    use crate::stage::HaltHandle;

    /// Fails a fixed number of captures, then delegates.
    struct Flaky {
        inner: PatternDevice,
        failures: u32,
        releases: Rc<Cell<u32>>,
    }

    impl Device for Flaky {
        fn configure(&mut self, port: u32, label: &str) {
            self.inner.configure(port, label);
        }

        fn init(&mut self) -> Result<(), DeviceError> {
            self.inner.init()
        }

        fn capture(&mut self, into: &mut DynamicImage) -> Result<CaptureStatus, DeviceError> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(DeviceError::NotInitialized);
            }
            self.inner.capture(into)
        }

        fn release(&mut self) {
            self.releases.set(self.releases.get() + 1);
            self.inner.release();
        }
    }

    fn flaky(failures: u32) -> (Box<dyn Device>, Rc<Cell<u32>>) {
        let releases = Rc::new(Cell::new(0));
        let device = Flaky {
            inner: PatternDevice::new(8, 8),
            failures,
            releases: Rc::clone(&releases),
        };
        (Box::new(device), releases)
    }

    fn no_backoff(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_ms: 0,
        }
    }

    #[test]
    fn retries_transient_failures() {
        let (device, _) = flaky(2);
        let mut stage = CaptureStage::new(device, DeviceConfig::default(), no_backoff(3));
        stage.device.init().unwrap();
        let mut frame = DynamicImage::new_rgb8(0, 0);
        assert_eq!(
            stage.capture_with_retry(&mut frame).unwrap(),
            CaptureStatus::Frame
        );
        assert_eq!(frame.width(), 8);
    }

    #[test]
    fn exhausted_retries_surface_the_error() {
        let (device, _) = flaky(3);
        let mut stage = CaptureStage::new(device, DeviceConfig::default(), no_backoff(3));
        stage.device.init().unwrap();
        let mut frame = DynamicImage::new_rgb8(0, 0);
        assert!(matches!(
            stage.capture_with_retry(&mut frame),
            Err(DeviceError::NotInitialized)
        ));
    }

    #[test]
    fn detach_releases_once() {
        let (device, releases) = flaky(0);
        let mut stage = CaptureStage::new(device, DeviceConfig::default(), RetryPolicy::NONE);
        stage.device.init().unwrap();
        stage.acquired = true;
        stage.detach();
        stage.detach();
        assert_eq!(releases.get(), 1);
        assert!(!stage.is_acquired());
    }

    #[test]
    fn detach_without_acquire_releases_nothing() {
        let (device, releases) = flaky(0);
        let mut stage = CaptureStage::new(device, DeviceConfig::default(), RetryPolicy::NONE);
        stage.detach();
        assert_eq!(releases.get(), 0);
    }

    #[test]
    fn attach_labels_origin_and_opens_device() {
        let mut frame = FrameState::new();
        let halt = HaltHandle::new();
        let mut stage = CaptureStage::new(
            Box::new(PatternDevice::new(8, 8)),
            DeviceConfig::default(),
            RetryPolicy::NONE,
        );
        let mut ctx = StageContext::new(frame.access(CaptureStage::NAME, CaptureStage::BINDING), &halt, 0);
        stage.attach(&mut ctx).unwrap();
        assert!(stage.is_acquired());
        assert!(halt.is_running());
        assert_eq!(frame.slot(SlotId::Origin).label(), CaptureStage::LABEL);
    }

    #[test]
    fn failed_init_requests_halt() {
        let mut frame = FrameState::new();
        let halt = HaltHandle::new();
        let mut stage = CaptureStage::new(
            Box::new(PatternDevice::new(8, 8).failing(-1)),
            DeviceConfig::default(),
            RetryPolicy::NONE,
        );
        let mut ctx = StageContext::new(frame.access(CaptureStage::NAME, CaptureStage::BINDING), &halt, 0);
        stage.attach(&mut ctx).unwrap();
        assert!(!stage.is_acquired());
        assert!(!halt.is_running());
    }

    #[test]
    fn update_fills_origin() {
        let mut frame = FrameState::new();
        let halt = HaltHandle::new();
        let mut stage = CaptureStage::new(
            Box::new(PatternDevice::new(12, 9)),
            DeviceConfig::default(),
            RetryPolicy::NONE,
        );
        let mut ctx = StageContext::new(frame.access(CaptureStage::NAME, CaptureStage::BINDING), &halt, 0);
        stage.attach(&mut ctx).unwrap();
        let outcome = stage.update(&mut ctx).unwrap();
        assert_eq!(outcome, TickOutcome::Continue);
        drop(ctx);
        assert!(!frame.slot(SlotId::Origin).is_blank());
    }
}
