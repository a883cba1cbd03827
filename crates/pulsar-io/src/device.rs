//! Audio device playback backend via cpal.
//!
//! The VM thread writes each finished frame into a lock-free ring buffer; the
//! cpal output callback drains it. `begin_frame` blocks until the ring has
//! room for a whole frame, so the device clock paces the frame loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host};
use parking_lot::{Condvar, Mutex};
use pulsar_core::{
    Backend, BackendError, BackendParameters, DEFAULT_FRAME_SIZE, FrameContext, samples_from_bytes,
};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};

use crate::{Error, Result};

/// Default ring capacity, in frames of the configured frame size.
pub const DEFAULT_LATENCY_FRAMES: usize = 4;

/// Longest `begin_frame` waits for ring space before reporting a stall.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on a single wait; callbacks notify without taking the lock.
const WAIT_SLICE: Duration = Duration::from_millis(5);

/// Extract device name via `description()` (cpal 0.17+).
fn device_name(device: &Device) -> std::result::Result<String, cpal::DeviceNameError> {
    device.description().map(|d| d.name().to_string())
}

/// Audio output device information.
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Human-readable device name.
    pub name: String,
    /// Default output channel count.
    pub channels: u16,
    /// Default sample rate in Hz.
    pub default_sample_rate: u32,
    /// Whether this is the host's default output device.
    pub is_default: bool,
}

fn describe(device: &Device, default_name: Option<&str>) -> Option<AudioDevice> {
    let name = device_name(device).ok()?;
    let config = device.default_output_config().ok()?;
    Some(AudioDevice {
        is_default: default_name == Some(name.as_str()),
        name,
        channels: config.channels(),
        default_sample_rate: config.sample_rate(),
    })
}

/// Lists all output-capable audio devices of the default host.
pub fn list_devices() -> Result<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let default_name = host
        .default_output_device()
        .and_then(|d| device_name(&d).ok());
    let mut devices = Vec::new();
    if let Ok(outputs) = host.output_devices() {
        devices.extend(outputs.filter_map(|d| describe(&d, default_name.as_deref())));
    }
    Ok(devices)
}

/// Returns the default output device, if the host has one.
pub fn default_output_device() -> Result<Option<AudioDevice>> {
    let host = cpal::default_host();
    Ok(host.default_output_device().and_then(|d| {
        let name = device_name(&d).ok();
        describe(&d, name.as_deref())
    }))
}

/// Find an output device by case-insensitive substring, or return the default.
fn find_output_device(host: &Host, name: Option<&str>) -> Result<Device> {
    match name {
        Some(search) => {
            let search_lower = search.to_lowercase();
            let devices = host
                .output_devices()
                .map_err(|e| Error::Stream(e.to_string()))?;
            for device in devices {
                if let Ok(dev_name) = device_name(&device)
                    && dev_name.to_lowercase().contains(&search_lower)
                {
                    return Ok(device);
                }
            }
            Err(Error::DeviceNotFound(format!(
                "no output device matching '{search}'"
            )))
        }
        None => host.default_output_device().ok_or(Error::NoDevice),
    }
}

/// State shared between the VM thread and the audio callback.
#[derive(Default)]
struct StreamShared {
    space: Mutex<()>,
    space_freed: Condvar,
    failed: AtomicBool,
    underruns: AtomicU64,
}

/// A running stream. The cpal stream lives on its own thread, which keeps it
/// alive until `stop` is signalled.
struct ActiveStream {
    producer: HeapProd<f32>,
    stop: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl ActiveStream {
    fn shutdown(mut self) {
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::error!("audio stream thread panicked");
        }
    }
}

/// Plays the VM's output channels on an audio device.
///
/// Channels map to device channels in the order given. The ring buffer holds
/// `latency_frames` frames; a device callback that finds the ring empty
/// plays silence and counts an underrun.
pub struct DeviceBackend {
    device_name: Option<String>,
    channels: Vec<String>,
    frame_size: usize,
    /// Frame size requested while the stream is open, applied by the next
    /// `begin_frame`.
    pending_frame_size: Option<usize>,
    latency_frames: usize,
    shared: Arc<StreamShared>,
    stream: Option<ActiveStream>,
    frame: Vec<f32>,
    stopped: bool,
}

impl DeviceBackend {
    /// Creates a backend for the named device (substring match) or the default.
    pub fn new<I, S>(device_name: Option<String>, channels: I, frame_size: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            device_name,
            channels: channels.into_iter().map(Into::into).collect(),
            frame_size: if frame_size == 0 {
                DEFAULT_FRAME_SIZE
            } else {
                frame_size
            },
            pending_frame_size: None,
            latency_frames: DEFAULT_LATENCY_FRAMES,
            shared: Arc::new(StreamShared::default()),
            stream: None,
            frame: Vec::new(),
            stopped: false,
        }
    }

    /// Sets the ring capacity in frames (at least 2).
    pub fn with_latency_frames(mut self, frames: usize) -> Self {
        self.latency_frames = frames.max(2);
        self
    }

    /// Number of device callbacks that found the ring short of samples.
    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }

    fn frame_samples(&self) -> usize {
        self.frame_size * self.channels.len()
    }

    fn open(&self, sample_rate: u32) -> Result<ActiveStream> {
        let capacity = self.frame_samples() * self.latency_frames;
        let (producer, mut consumer) = HeapRb::<f32>::new(capacity).split();
        let config = cpal::StreamConfig {
            channels: self.channels.len() as u16,
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };
        let device_name = self.device_name.clone();
        let shared = Arc::clone(&self.shared);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("pulsar-audio".into())
            .spawn(move || {
                let host = cpal::default_host();
                let built = find_output_device(&host, device_name.as_deref()).and_then(|device| {
                    let name = device_name_or_unknown(&device);
                    let callback_shared = Arc::clone(&shared);
                    let error_shared = Arc::clone(&shared);
                    let stream = device
                        .build_output_stream(
                            &config,
                            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                                let popped = consumer.pop_slice(data);
                                if popped < data.len() {
                                    data[popped..].fill(0.0);
                                    callback_shared.underruns.fetch_add(1, Ordering::Relaxed);
                                }
                                callback_shared.space_freed.notify_one();
                            },
                            move |err| {
                                tracing::error!("audio stream error: {err}");
                                error_shared.failed.store(true, Ordering::SeqCst);
                                error_shared.space_freed.notify_one();
                            },
                            None,
                        )
                        .map_err(|e| Error::Stream(e.to_string()))?;
                    stream.play().map_err(|e| Error::Stream(e.to_string()))?;
                    tracing::info!(
                        device = %name,
                        channels = config.channels,
                        sample_rate = config.sample_rate,
                        "output stream started"
                    );
                    Ok(stream)
                });
                match built {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        let _ = stop_rx.recv();
                        drop(stream);
                        tracing::info!("output stream stopped");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })?;

        let ready = ready_rx
            .recv()
            .map_err(|_| Error::Stream("audio thread exited during setup".into()))
            .and_then(|r| r);
        if let Err(e) = ready {
            let _ = thread.join();
            return Err(e);
        }
        Ok(ActiveStream {
            producer,
            stop: stop_tx,
            thread: Some(thread),
        })
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.shutdown();
        }
    }
}

fn device_name_or_unknown(device: &Device) -> String {
    device_name(device).unwrap_or_else(|_| "<unknown>".to_string())
}

impl Backend for DeviceBackend {
    fn name(&self) -> &str {
        "device"
    }

    fn setup(&mut self, sample_rate: u32) -> std::result::Result<(), BackendError> {
        if self.channels.is_empty() {
            return Err(BackendError::Setup(
                "device backend needs at least one channel".into(),
            ));
        }
        self.close();
        self.shared.failed.store(false, Ordering::SeqCst);
        self.stream = Some(self.open(sample_rate)?);
        self.stopped = false;
        Ok(())
    }

    fn cleanup(&mut self) {
        self.close();
    }

    fn begin_frame(&mut self, ctx: &mut FrameContext) -> std::result::Result<(), BackendError> {
        if let Some(frame_size) = self.pending_frame_size.take() {
            self.frame_size = frame_size;
        }
        let needed = self.frame_samples();
        let Some(stream) = self.stream.as_ref() else {
            self.stopped = true;
            return Ok(());
        };
        if needed > stream.producer.capacity().get() {
            return Err(BackendError::InvalidParameter(format!(
                "frame of {needed} samples exceeds ring capacity {}",
                stream.producer.capacity()
            )));
        }
        let deadline = Instant::now() + STALL_TIMEOUT;
        let mut guard = self.shared.space.lock();
        while stream.producer.vacant_len() < needed {
            if self.shared.failed.load(Ordering::SeqCst) {
                return Err(BackendError::Output("audio stream failed".into()));
            }
            if Instant::now() >= deadline {
                return Err(BackendError::Output("audio device stalled".into()));
            }
            self.shared.space_freed.wait_for(&mut guard, WAIT_SLICE);
        }
        drop(guard);

        self.frame.clear();
        self.frame.resize(needed, 0.0);
        ctx.duration = self.frame_size;
        Ok(())
    }

    fn end_frame(&mut self, _ctx: &FrameContext) -> std::result::Result<(), BackendError> {
        if let Some(stream) = self.stream.as_mut() {
            let pushed = stream.producer.push_slice(&self.frame);
            if pushed < self.frame.len() {
                tracing::warn!(
                    dropped = self.frame.len() - pushed,
                    "ring buffer full, samples dropped"
                );
            }
        }
        Ok(())
    }

    fn output(&mut self, channel: &str, bytes: &[u8]) -> std::result::Result<(), BackendError> {
        if self.stream.is_none() {
            return Ok(());
        }
        let index = self
            .channels
            .iter()
            .position(|c| c == channel)
            .ok_or_else(|| BackendError::UnknownChannel(channel.to_string()))?;
        let stride = self.channels.len();
        for (i, s) in samples_from_bytes(bytes)
            .into_iter()
            .take(self.frame_size)
            .enumerate()
        {
            self.frame[i * stride + index] += s;
        }
        Ok(())
    }

    fn stopped(&self) -> bool {
        self.stopped
    }

    fn set_parameters(&mut self, params: &BackendParameters) -> std::result::Result<(), BackendError> {
        if let Some(frame_size) = params.checked_frame_size()? {
            if self.stream.is_some() && frame_size * self.channels.len() > self.ring_capacity() {
                return Err(BackendError::InvalidParameter(format!(
                    "frame size {frame_size} too large for the open stream"
                )));
            }
            if self.stream.is_some() {
                self.pending_frame_size = Some(frame_size);
            } else {
                self.frame_size = frame_size;
            }
        }
        Ok(())
    }
}

impl DeviceBackend {
    fn ring_capacity(&self) -> usize {
        self.stream
            .as_ref()
            .map_or(0, |s| s.producer.capacity().get())
    }
}

impl Drop for DeviceBackend {
    fn drop(&mut self) {
        self.close();
    }
}
