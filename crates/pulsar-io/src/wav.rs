//! WAV file renderer backend.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use pulsar_core::{
    Backend, BackendError, BackendParameters, DEFAULT_FRAME_SIZE, FrameContext, samples_from_bytes,
};

use crate::Result;

/// Renders the VM's output channels into a 32-bit float WAV file.
///
/// Each configured channel becomes one interleaved WAV channel, in the order
/// given. Frames are not paced, so rendering runs as fast as the VM does.
/// Outputs addressed to the same channel within one frame are summed; a
/// channel that receives nothing in a frame is written as silence.
pub struct WavBackend {
    path: PathBuf,
    channels: Vec<String>,
    frame_size: usize,
    /// Frame size requested mid-frame, applied by the next `begin_frame`.
    pending_frame_size: Option<usize>,
    max_frames: Option<u64>,
    writer: Option<WavWriter<BufWriter<File>>>,
    /// Interleaved samples of the frame in progress.
    frame: Vec<f32>,
    frames: u64,
    stopped: bool,
}

impl WavBackend {
    /// Creates a renderer writing `channels` to `path` on setup.
    pub fn new<I, S>(path: impl AsRef<Path>, channels: I, frame_size: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.as_ref().to_path_buf(),
            channels: channels.into_iter().map(Into::into).collect(),
            frame_size: if frame_size == 0 {
                DEFAULT_FRAME_SIZE
            } else {
                frame_size
            },
            pending_frame_size: None,
            max_frames: None,
            writer: None,
            frame: Vec::new(),
            frames: 0,
            stopped: false,
        }
    }

    /// Stops the backend after `frames` frames.
    pub fn with_max_frames(mut self, frames: u64) -> Self {
        self.max_frames = Some(frames);
        self
    }

    /// Output file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames written so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn finalize(&mut self) {
        if let Some(writer) = self.writer.take() {
            match writer.finalize() {
                Ok(()) => tracing::info!(
                    path = %self.path.display(),
                    frames = self.frames,
                    "wav file finalized"
                ),
                Err(e) => tracing::error!(path = %self.path.display(), "failed to finalize wav: {e}"),
            }
        }
    }
}

impl Backend for WavBackend {
    fn name(&self) -> &str {
        "wav"
    }

    fn setup(&mut self, sample_rate: u32) -> std::result::Result<(), BackendError> {
        if self.channels.is_empty() {
            return Err(BackendError::Setup("wav backend needs at least one channel".into()));
        }
        self.finalize();
        let spec = WavSpec {
            channels: self.channels.len() as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(&self.path, spec).map_err(crate::Error::from)?;
        tracing::info!(
            path = %self.path.display(),
            channels = self.channels.len(),
            sample_rate,
            "wav output opened"
        );
        self.writer = Some(writer);
        self.frames = 0;
        self.stopped = false;
        Ok(())
    }

    fn cleanup(&mut self) {
        self.finalize();
    }

    fn begin_frame(&mut self, ctx: &mut FrameContext) -> std::result::Result<(), BackendError> {
        if self.writer.is_none() {
            self.stopped = true;
            return Ok(());
        }
        if let Some(max) = self.max_frames
            && self.frames >= max
        {
            self.stopped = true;
            return Ok(());
        }
        if let Some(frame_size) = self.pending_frame_size.take() {
            self.frame_size = frame_size;
        }
        self.frame.clear();
        self.frame
            .resize(self.frame_size * self.channels.len(), 0.0);
        ctx.duration = self.frame_size;
        Ok(())
    }

    fn end_frame(&mut self, _ctx: &FrameContext) -> std::result::Result<(), BackendError> {
        if self.stopped {
            return Ok(());
        }
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        for &s in &self.frame {
            writer
                .write_sample(s)
                .map_err(|e| BackendError::Output(e.to_string()))?;
        }
        self.frames += 1;
        Ok(())
    }

    fn output(&mut self, channel: &str, bytes: &[u8]) -> std::result::Result<(), BackendError> {
        if self.writer.is_none() {
            return Ok(());
        }
        let index = self
            .channels
            .iter()
            .position(|c| c == channel)
            .ok_or_else(|| BackendError::UnknownChannel(channel.to_string()))?;
        let stride = self.channels.len();
        let samples = samples_from_bytes(bytes);
        if samples.len() != self.frame_size {
            return Err(BackendError::Output(format!(
                "channel '{channel}' delivered {} samples, frame has {}",
                samples.len(),
                self.frame_size
            )));
        }
        for (i, s) in samples.into_iter().enumerate() {
            self.frame[i * stride + index] += s;
        }
        Ok(())
    }

    fn stopped(&self) -> bool {
        self.stopped
    }

    fn set_parameters(&mut self, params: &BackendParameters) -> std::result::Result<(), BackendError> {
        if let Some(frame_size) = params.checked_frame_size()? {
            self.pending_frame_size = Some(frame_size);
        }
        Ok(())
    }
}

impl Drop for WavBackend {
    fn drop(&mut self) {
        self.finalize();
    }
}

/// Reads a float or integer WAV file into one sample vector per channel.
///
/// Returns the per-channel samples and the file's sample rate.
pub fn read_wav_channels<P: AsRef<Path>>(path: P) -> Result<(Vec<Vec<f32>>, u32)> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    let mut out = vec![Vec::with_capacity(samples.len() / channels); channels];
    for frame in samples.chunks_exact(channels) {
        for (ch, &s) in frame.iter().enumerate() {
            out[ch].push(s);
        }
    }
    Ok((out, spec.sample_rate))
}
