//! Audio I/O backends for the pulsar pipeline VM.
//!
//! This crate provides:
//!
//! - **WAV rendering**: [`WavBackend`] writes the VM's output channels into a
//!   WAV file, as fast as the VM produces frames
//! - **Device playback**: [`DeviceBackend`] plays the output channels on an
//!   audio device through a ring buffer that paces the frame loop
//! - **Device enumeration**: [`list_devices`] and [`default_output_device`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pulsar_core::PipelineVm;
//! use pulsar_io::WavBackend;
//!
//! let vm = PipelineVm::new(44100, 128);
//! // ... build the graph, update_spec() ...
//! let backend = WavBackend::new("out.wav", ["mono"], 128).with_max_frames(1000);
//! vm.set_backend(Some(Box::new(backend)))?;
//! vm.setup()?;
//! ```

mod device;
mod wav;

pub use device::{AudioDevice, DeviceBackend, default_output_device, list_devices};
pub use wav::{WavBackend, read_wav_channels};

use pulsar_core::BackendError;

/// Error types for audio I/O operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// WAV file read/write error.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// Audio stream setup or runtime error.
    #[error("Audio stream error: {0}")]
    Stream(String),

    /// No audio device available on the system.
    #[error("No audio device available")]
    NoDevice,

    /// The requested audio device was not found.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for audio I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for BackendError {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => BackendError::Io(e),
            other => BackendError::Setup(other.to_string()),
        }
    }
}
