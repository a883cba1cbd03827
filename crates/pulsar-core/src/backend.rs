//! Frame backends.
//!
//! A [`Backend`] drives the VM's frame clock and receives its output. The
//! execution thread calls [`begin_frame`](Backend::begin_frame), which may
//! block until the sink can accept another frame and stamps the frame
//! duration, then runs the spec (every `OUTPUT` opcode lands in
//! [`output`](Backend::output)), then calls [`end_frame`](Backend::end_frame).
//!
//! Two in-process implementations live here:
//!
//! - [`NullBackend`]: discards output, optionally paced in real time.
//! - [`CaptureBackend`]: records every output call for inspection.
//!
//! Device and file backends are provided by `pulsar-io`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::buffer_type::samples_from_bytes;
use crate::context::FrameContext;
use crate::error::BackendError;

/// Default frame size in samples.
pub const DEFAULT_FRAME_SIZE: usize = 128;

/// Runtime-adjustable backend parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendParameters {
    /// New frame size in samples. Takes effect on the next `begin_frame`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_size: Option<usize>,
}

impl BackendParameters {
    /// Validates and returns the requested frame size, if any.
    pub fn checked_frame_size(&self) -> Result<Option<usize>, BackendError> {
        match self.frame_size {
            Some(0) => Err(BackendError::InvalidParameter(
                "frame_size must be at least 1".to_string(),
            )),
            other => Ok(other),
        }
    }
}

/// Sink and clock of the frame loop.
///
/// All methods are called from the VM's execution thread, except `setup`,
/// `cleanup` and `set_parameters`, which run on the caller thread while the
/// VM holds its write lock.
pub trait Backend: Send {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Prepares the backend for the given sample rate.
    fn setup(&mut self, sample_rate: u32) -> Result<(), BackendError>;

    /// Releases all resources. Output received afterwards is discarded.
    fn cleanup(&mut self);

    /// Waits for the next frame slot and stamps `ctx.duration`.
    fn begin_frame(&mut self, ctx: &mut FrameContext) -> Result<(), BackendError>;

    /// Completes the current frame.
    fn end_frame(&mut self, ctx: &FrameContext) -> Result<(), BackendError>;

    /// Receives one `FloatArray` buffer for the named channel.
    fn output(&mut self, channel: &str, bytes: &[u8]) -> Result<(), BackendError>;

    /// Returns true once the backend will produce no more frames.
    fn stopped(&self) -> bool;

    /// Applies runtime parameters.
    fn set_parameters(&mut self, params: &BackendParameters) -> Result<(), BackendError>;
}

/// Discards output.
///
/// With `realtime` enabled, `begin_frame` sleeps so that frames are produced
/// at the sample rate; otherwise frames run as fast as the VM can process
/// them. An optional frame limit stops the backend.
#[derive(Debug)]
pub struct NullBackend {
    frame_size: usize,
    sample_rate: u32,
    realtime: bool,
    max_frames: Option<u64>,
    frames: u64,
    deadline: Option<Instant>,
    stopped: bool,
}

impl NullBackend {
    /// Creates an unpaced backend with no frame limit.
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            sample_rate: 44100,
            realtime: false,
            max_frames: None,
            frames: 0,
            deadline: None,
            stopped: false,
        }
    }

    /// Enables real-time pacing.
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Stops after `frames` frames.
    pub fn with_max_frames(mut self, frames: u64) -> Self {
        self.max_frames = Some(frames);
        self
    }

    /// Number of frames begun so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(self.frame_size as f64 / f64::from(self.sample_rate.max(1)))
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_SIZE)
    }
}

impl Backend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn setup(&mut self, sample_rate: u32) -> Result<(), BackendError> {
        if sample_rate == 0 {
            return Err(BackendError::Setup("sample rate must be non-zero".into()));
        }
        self.sample_rate = sample_rate;
        self.deadline = None;
        Ok(())
    }

    fn cleanup(&mut self) {
        self.deadline = None;
    }

    fn begin_frame(&mut self, ctx: &mut FrameContext) -> Result<(), BackendError> {
        if let Some(max) = self.max_frames
            && self.frames >= max
        {
            self.stopped = true;
            return Ok(());
        }

        if self.realtime {
            let now = Instant::now();
            let deadline = *self.deadline.get_or_insert(now);
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
            self.deadline = Some(deadline + self.frame_period());
        }

        self.frames += 1;
        ctx.duration = self.frame_size;
        Ok(())
    }

    fn end_frame(&mut self, _ctx: &FrameContext) -> Result<(), BackendError> {
        Ok(())
    }

    fn output(&mut self, _channel: &str, _bytes: &[u8]) -> Result<(), BackendError> {
        Ok(())
    }

    fn stopped(&self) -> bool {
        self.stopped
    }

    fn set_parameters(&mut self, params: &BackendParameters) -> Result<(), BackendError> {
        if let Some(frame_size) = params.checked_frame_size()? {
            self.frame_size = frame_size;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CaptureData {
    channels: BTreeMap<String, Vec<Vec<f32>>>,
    frames_begun: u64,
    frames_ended: u64,
}

/// Shared view of everything a [`CaptureBackend`] received.
#[derive(Clone, Debug, Default)]
pub struct Capture {
    inner: Arc<Mutex<CaptureData>>,
}

impl Capture {
    /// Names of all channels that received output.
    pub fn channels(&self) -> Vec<String> {
        self.inner.lock().channels.keys().cloned().collect()
    }

    /// Every output call for `channel`, one sample vector per call.
    pub fn outputs(&self, channel: &str) -> Vec<Vec<f32>> {
        self.inner
            .lock()
            .channels
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of output calls for `channel`.
    pub fn output_count(&self, channel: &str) -> usize {
        self.inner.lock().channels.get(channel).map_or(0, Vec::len)
    }

    /// All samples of `channel`, concatenated in call order.
    pub fn samples(&self, channel: &str) -> Vec<f32> {
        self.inner
            .lock()
            .channels
            .get(channel)
            .map(|calls| calls.concat())
            .unwrap_or_default()
    }

    /// Number of frames begun.
    pub fn frames_begun(&self) -> u64 {
        self.inner.lock().frames_begun
    }

    /// Number of frames ended.
    pub fn frames_ended(&self) -> u64 {
        self.inner.lock().frames_ended
    }
}

/// Records output into a shared [`Capture`] and stops after a frame limit.
#[derive(Debug)]
pub struct CaptureBackend {
    frame_size: usize,
    max_frames: u64,
    capture: Capture,
    stopped: bool,
    active: bool,
}

impl CaptureBackend {
    /// Creates a backend that runs `max_frames` frames of `frame_size` samples.
    pub fn new(frame_size: usize, max_frames: u64) -> Self {
        Self {
            frame_size,
            max_frames,
            capture: Capture::default(),
            stopped: false,
            active: false,
        }
    }

    /// Returns a handle to the recorded data.
    pub fn capture(&self) -> Capture {
        self.capture.clone()
    }
}

impl Backend for CaptureBackend {
    fn name(&self) -> &str {
        "capture"
    }

    fn setup(&mut self, _sample_rate: u32) -> Result<(), BackendError> {
        self.active = true;
        Ok(())
    }

    fn cleanup(&mut self) {
        self.active = false;
    }

    fn begin_frame(&mut self, ctx: &mut FrameContext) -> Result<(), BackendError> {
        let mut data = self.capture.inner.lock();
        if data.frames_begun >= self.max_frames {
            self.stopped = true;
            return Ok(());
        }
        data.frames_begun += 1;
        ctx.duration = self.frame_size;
        Ok(())
    }

    fn end_frame(&mut self, _ctx: &FrameContext) -> Result<(), BackendError> {
        if self.stopped {
            return Ok(());
        }
        self.capture.inner.lock().frames_ended += 1;
        Ok(())
    }

    fn output(&mut self, channel: &str, bytes: &[u8]) -> Result<(), BackendError> {
        if !self.active {
            return Ok(());
        }
        let samples = samples_from_bytes(bytes);
        self.capture
            .inner
            .lock()
            .channels
            .entry(channel.to_string())
            .or_default()
            .push(samples);
        Ok(())
    }

    fn stopped(&self) -> bool {
        self.stopped
    }

    fn set_parameters(&mut self, params: &BackendParameters) -> Result<(), BackendError> {
        if let Some(frame_size) = params.checked_frame_size()? {
            self.frame_size = frame_size;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_backend_stamps_duration() {
        let mut backend = NullBackend::new(64);
        backend.setup(48000).unwrap();
        let mut ctx = FrameContext::new();
        backend.begin_frame(&mut ctx).unwrap();
        assert_eq!(ctx.duration, 64);
        assert!(!backend.stopped());
    }

    #[test]
    fn test_null_backend_frame_limit() {
        let mut backend = NullBackend::new(16).with_max_frames(2);
        let mut ctx = FrameContext::new();
        for _ in 0..2 {
            backend.begin_frame(&mut ctx).unwrap();
            assert!(!backend.stopped());
        }
        backend.begin_frame(&mut ctx).unwrap();
        assert!(backend.stopped());
        assert_eq!(backend.frames(), 2);
    }

    #[test]
    fn test_null_backend_realtime_paces() {
        let mut backend = NullBackend::new(441).with_realtime(true);
        backend.setup(44100).unwrap();
        let mut ctx = FrameContext::new();
        let start = Instant::now();
        for _ in 0..3 {
            backend.begin_frame(&mut ctx).unwrap();
        }
        // Three frames of 10 ms: the first is immediate, then two waits.
        assert!(start.elapsed() >= Duration::from_millis(19));
    }

    #[test]
    fn test_set_parameters_rejects_zero_frame_size() {
        let mut backend = NullBackend::default();
        let params = BackendParameters {
            frame_size: Some(0),
        };
        assert!(matches!(
            backend.set_parameters(&params),
            Err(BackendError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_capture_records_outputs() {
        let mut backend = CaptureBackend::new(2, 1);
        let capture = backend.capture();
        backend.setup(44100).unwrap();
        let mut ctx = FrameContext::new();
        backend.begin_frame(&mut ctx).unwrap();
        let bytes: Vec<u8> = [0.25f32, -0.5].iter().flat_map(|v| v.to_ne_bytes()).collect();
        backend.output("left", &bytes).unwrap();
        backend.end_frame(&ctx).unwrap();

        assert_eq!(capture.outputs("left"), vec![vec![0.25, -0.5]]);
        assert_eq!(capture.output_count("right"), 0);
        assert_eq!(capture.frames_ended(), 1);

        backend.begin_frame(&mut ctx).unwrap();
        assert!(backend.stopped());
    }

    #[test]
    fn test_capture_ignores_output_after_cleanup() {
        let mut backend = CaptureBackend::new(1, 10);
        let capture = backend.capture();
        backend.setup(44100).unwrap();
        backend.cleanup();
        backend.output("left", &1.0f32.to_ne_bytes()).unwrap();
        assert!(capture.channels().is_empty());
    }
}
