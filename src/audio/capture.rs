use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::Result;

/// Receives mono f32 sample buffers from the capture thread
pub type SampleCallback = Arc<dyn Fn(&[f32]) + Send + Sync>;

/// Source of microphone audio
pub trait AudioCapture: Send + Sync {
    fn start_capture(&self, on_samples: SampleCallback) -> Result<()>;

    fn stop_capture(&self);

    fn is_capturing(&self) -> bool;
}

/// Capture without a device: tracks start/stop, never produces samples.
/// Used when transcripts come from an engine with its own audio path.
#[derive(Default)]
pub struct NullCapture {
    callback: Mutex<Option<SampleCallback>>,
}

impl NullCapture {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioCapture for NullCapture {
    fn start_capture(&self, on_samples: SampleCallback) -> Result<()> {
        debug!("Null capture started");
        *self.callback.lock() = Some(on_samples);
        Ok(())
    }

    fn stop_capture(&self) {
        if self.callback.lock().take().is_some() {
            debug!("Null capture stopped");
        }
    }

    fn is_capturing(&self) -> bool {
        self.callback.lock().is_some()
    }
}
