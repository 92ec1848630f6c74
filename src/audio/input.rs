use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use super::capture::{AudioCapture, SampleCallback};
use crate::{AssistError, Result};

struct StreamThread {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Default input device through cpal, downmixed to mono.
///
/// cpal streams are not `Send`, so each capture session builds and owns its
/// stream on a dedicated thread.
pub struct CpalCapture {
    device_name: String,
    is_recording: Arc<AtomicBool>,
    stream_thread: Mutex<Option<StreamThread>>,
}

impl CpalCapture {
    /// Create a capture bound to the default input device
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| AssistError::AudioDeviceError("No input device available".into()))?;

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using input device: {}", device_name);

        Ok(Self {
            device_name,
            is_recording: Arc::new(AtomicBool::new(false)),
            stream_thread: Mutex::new(None),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

fn run_stream(
    on_samples: SampleCallback,
    is_recording: Arc<AtomicBool>,
    ready_tx: Sender<Result<u32>>,
    stop_rx: crossbeam_channel::Receiver<()>,
) {
    let host = cpal::default_host();
    let device = match host.default_input_device() {
        Some(device) => device,
        None => {
            let _ = ready_tx.send(Err(AssistError::AudioDeviceError(
                "No input device available".into(),
            )));
            return;
        }
    };

    let config: cpal::StreamConfig = match device.default_input_config() {
        Ok(config) => config.into(),
        Err(e) => {
            let _ = ready_tx.send(Err(AssistError::AudioDeviceError(format!(
                "Failed to get input config: {}",
                e
            ))));
            return;
        }
    };

    let channels = config.channels as usize;
    let sample_rate = config.sample_rate.0;
    let recording = is_recording.clone();

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if !recording.load(Ordering::Relaxed) {
                return;
            }

            if channels == 1 {
                on_samples(data);
            } else {
                let mono: Vec<f32> = data
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                    .collect();
                on_samples(&mono);
            }
        },
        |err| error!("Audio input stream error: {}", err),
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(AssistError::AudioDeviceError(format!(
                "Failed to build input stream: {}",
                e
            ))));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(AssistError::AudioDeviceError(format!(
            "Failed to start input stream: {}",
            e
        ))));
        return;
    }

    is_recording.store(true, Ordering::SeqCst);
    let _ = ready_tx.send(Ok(sample_rate));

    // Block until stop_capture drops the sender
    let _ = stop_rx.recv();

    is_recording.store(false, Ordering::SeqCst);
    drop(stream);
    debug!("Input stream closed");
}

impl AudioCapture for CpalCapture {
    fn start_capture(&self, on_samples: SampleCallback) -> Result<()> {
        let mut stream_thread = self.stream_thread.lock();
        if stream_thread.is_some() {
            warn!("Already recording");
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let is_recording = self.is_recording.clone();

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || run_stream(on_samples, is_recording, ready_tx, stop_rx))
            .map_err(|e| AssistError::AudioDeviceError(format!("Failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(sample_rate)) => {
                info!("Started audio recording at {} Hz", sample_rate);
                *stream_thread = Some(StreamThread { stop_tx, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AssistError::AudioDeviceError(
                    "Capture thread exited before the stream started".into(),
                ))
            }
        }
    }

    fn stop_capture(&self) {
        let stream_thread = self.stream_thread.lock().take();
        if let Some(StreamThread { stop_tx, handle }) = stream_thread {
            drop(stop_tx);
            if handle.join().is_err() {
                error!("Audio capture thread panicked");
            }
            info!("Stopped audio recording");
        }
    }

    fn is_capturing(&self) -> bool {
        self.is_recording.load(Ordering::SeqCst)
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_capture_creation() {
        // Machines without an input device skip this
        if let Ok(capture) = CpalCapture::new() {
            assert!(!capture.device_name().is_empty());
            assert!(!capture.is_capturing());
        }
    }

    #[test]
    fn test_recording_state() {
        if let Ok(capture) = CpalCapture::new() {
            let frames = Arc::new(AtomicUsize::new(0));
            let counter = frames.clone();

            if capture
                .start_capture(Arc::new(move |samples| {
                    counter.fetch_add(samples.len(), Ordering::Relaxed);
                }))
                .is_ok()
            {
                assert!(capture.is_capturing());
                capture.stop_capture();
                assert!(!capture.is_capturing());
            }
        }
    }
}
