//! Audio output sinks
//!
//! An [`AudioOutputSink`] enumerates devices and drives an [`AudioRenderer`]
//! at a fixed buffer size. [`ClockedSink`] is a software clock on the tokio
//! runtime (headless operation and tests); [`CpalSink`] plays through the
//! host audio API when built with the `cpal-output` feature.

use crate::audio::renderer::AudioRenderer;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Output device description
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub input_channels: usize,
    pub output_channels: usize,
}

/// Output collaborator pulling frames from the renderer
pub trait AudioOutputSink: Send + Sync {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Frames per callback
    fn buffer_size(&self) -> usize;

    fn sample_rate(&self) -> u32;

    /// Open `device_id` (None = default) and start rendering
    ///
    /// Any running stream is stopped first. Returns the opened device.
    fn start(&self, device_id: Option<&str>, renderer: AudioRenderer) -> Result<DeviceInfo>;

    /// Stop rendering; idempotent
    fn stop(&self);

    fn is_running(&self) -> bool;
}

struct ClockedRun {
    device: DeviceInfo,
    task: JoinHandle<()>,
}

/// Software-clocked sink driving the renderer from a tokio interval
///
/// Keeps the last rendered buffer so callers can meter the output.
pub struct ClockedSink {
    devices: Vec<DeviceInfo>,
    sample_rate: u32,
    buffer_size: usize,
    run: Mutex<Option<ClockedRun>>,
    last_buffer: Arc<Mutex<Vec<f32>>>,
}

impl ClockedSink {
    /// Sink exposing one virtual device with `output_channels` outputs
    pub fn new(sample_rate: u32, buffer_size: usize, output_channels: usize) -> Self {
        Self {
            devices: vec![DeviceInfo {
                id: "clock".to_string(),
                name: "Software Clock".to_string(),
                input_channels: 0,
                output_channels,
            }],
            sample_rate,
            buffer_size,
            run: Mutex::new(None),
            last_buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Offer an additional virtual device
    pub fn with_device(mut self, device: DeviceInfo) -> Self {
        self.devices.push(device);
        self
    }

    pub fn period(&self) -> Duration {
        let nanos = self.buffer_size as u64 * 1_000_000_000 / u64::from(self.sample_rate.max(1));
        Duration::from_nanos(nanos)
    }

    /// Copy of the most recently rendered interleaved buffer
    pub fn last_buffer(&self) -> Vec<f32> {
        self.last_buffer.lock().clone()
    }

    /// Peak absolute sample per device output in the last buffer
    pub fn last_peaks(&self) -> Vec<f32> {
        let channels = self
            .run
            .lock()
            .as_ref()
            .map_or(0, |run| run.device.output_channels);
        let buffer = self.last_buffer.lock();
        let mut peaks = vec![0.0f32; channels];
        if channels == 0 {
            return peaks;
        }
        for frame in buffer.chunks_exact(channels) {
            for (peak, sample) in peaks.iter_mut().zip(frame) {
                *peak = peak.max(sample.abs());
            }
        }
        peaks
    }

    fn find_device(&self, device_id: Option<&str>) -> Result<DeviceInfo> {
        match device_id {
            None => self
                .devices
                .first()
                .cloned()
                .ok_or_else(|| Error::DeviceNotFound("default".to_string())),
            Some(id) => self
                .devices
                .iter()
                .find(|d| d.id == id)
                .cloned()
                .ok_or_else(|| Error::DeviceNotFound(id.to_string())),
        }
    }
}

impl AudioOutputSink for ClockedSink {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.clone())
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&self, device_id: Option<&str>, mut renderer: AudioRenderer) -> Result<DeviceInfo> {
        let device = self.find_device(device_id)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::AudioOutput(format!("Clocked sink needs a tokio runtime: {}", e)))?;
        self.stop();

        let channels = device.output_channels;
        let period = self.period();
        let frames = self.buffer_size;
        let last_buffer = Arc::clone(&self.last_buffer);

        let task = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
            let mut buffer = vec![0.0f32; frames * channels];
            loop {
                interval.tick().await;
                let began = Instant::now();
                renderer.process(&mut buffer, channels);
                renderer.graph().stats().record_timing(began.elapsed(), period);
                let mut last = last_buffer.lock();
                last.clear();
                last.extend_from_slice(&buffer);
            }
        });

        info!(
            "Clocked sink started on '{}' ({} ch, {} Hz, {} frames)",
            device.name, channels, self.sample_rate, frames
        );
        *self.run.lock() = Some(ClockedRun {
            device: device.clone(),
            task,
        });
        Ok(device)
    }

    fn stop(&self) {
        if let Some(run) = self.run.lock().take() {
            run.task.abort();
            debug!("Clocked sink stopped on '{}'", run.device.name);
        }
    }

    fn is_running(&self) -> bool {
        self.run.lock().is_some()
    }
}

impl Drop for ClockedSink {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(feature = "cpal-output")]
pub use cpal_sink::CpalSink;

#[cfg(feature = "cpal-output")]
mod cpal_sink {
    use super::{AudioOutputSink, DeviceInfo};
    use crate::audio::renderer::AudioRenderer;
    use crate::error::{Error, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::thread::JoinHandle;
    use tracing::{error, info, warn};

    struct CpalRun {
        stop_tx: mpsc::Sender<()>,
        thread: JoinHandle<()>,
    }

    /// Host audio output via cpal
    ///
    /// The cpal stream is not `Send`, so it lives on a dedicated thread that
    /// holds it until [`AudioOutputSink::stop`].
    pub struct CpalSink {
        sample_rate: u32,
        buffer_size: usize,
        run: Mutex<Option<CpalRun>>,
    }

    impl CpalSink {
        pub fn new(sample_rate: u32, buffer_size: usize) -> Self {
            Self {
                sample_rate,
                buffer_size,
                run: Mutex::new(None),
            }
        }

        fn describe(device: &cpal::Device) -> Option<DeviceInfo> {
            let name = device.name().ok()?;
            let output_channels = device
                .default_output_config()
                .map(|c| usize::from(c.channels()))
                .unwrap_or(0);
            let input_channels = device
                .default_input_config()
                .map(|c| usize::from(c.channels()))
                .unwrap_or(0);
            Some(DeviceInfo {
                id: name.clone(),
                name,
                input_channels,
                output_channels,
            })
        }
    }

    impl AudioOutputSink for CpalSink {
        fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
            let host = cpal::default_host();
            let devices = host
                .output_devices()
                .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
                .filter_map(|d| Self::describe(&d))
                .collect();
            Ok(devices)
        }

        fn buffer_size(&self) -> usize {
            self.buffer_size
        }

        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn start(&self, device_id: Option<&str>, mut renderer: AudioRenderer) -> Result<DeviceInfo> {
            self.stop();

            let host = cpal::default_host();
            let device = match device_id {
                Some(id) => host
                    .output_devices()
                    .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
                    .find(|d| d.name().ok().as_deref() == Some(id))
                    .ok_or_else(|| Error::DeviceNotFound(id.to_string()))?,
                None => host
                    .default_output_device()
                    .ok_or_else(|| Error::DeviceNotFound("default".to_string()))?,
            };
            let info = Self::describe(&device)
                .ok_or_else(|| Error::AudioOutput("Device has no name".to_string()))?;
            let channels = info.output_channels.max(1);

            let config = cpal::StreamConfig {
                channels: channels as u16,
                sample_rate: cpal::SampleRate(self.sample_rate),
                buffer_size: cpal::BufferSize::Fixed(self.buffer_size as u32),
            };

            let (stop_tx, stop_rx) = mpsc::channel::<()>();
            let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
            let thread = std::thread::Builder::new()
                .name("cueforge-cpal".to_string())
                .spawn(move || {
                    let stream = device.build_output_stream(
                        &config,
                        move |data: &mut [f32], _| renderer.process(data, channels),
                        |e| error!("Audio stream error: {}", e),
                        None,
                    );
                    let stream = match stream {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(Error::AudioOutput(format!("Failed to build stream: {}", e))));
                            return;
                        }
                    };
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(Error::AudioOutput(format!("Failed to start stream: {}", e))));
                        return;
                    }
                    let _ = ready_tx.send(Ok(()));
                    let _ = stop_rx.recv();
                })?;

            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(Error::AudioOutput("Audio thread exited".to_string())),
            }

            info!("cpal output started on '{}' ({} ch)", info.name, channels);
            *self.run.lock() = Some(CpalRun { stop_tx, thread });
            Ok(info)
        }

        fn stop(&self) {
            if let Some(run) = self.run.lock().take() {
                let _ = run.stop_tx.send(());
                if run.thread.join().is_err() {
                    warn!("Audio thread panicked during shutdown");
                }
            }
        }

        fn is_running(&self) -> bool {
            self.run.lock().is_some()
        }
    }

    impl Drop for CpalSink {
        fn drop(&mut self) {
            self.stop();
        }
    }
}
