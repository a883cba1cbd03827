//! Configuration for the pulsar pipeline VM.
//!
//! - **VM settings**: [`VmConfig`] holds sample rate, frame size, noise seed
//!   and the backend selection, loaded from and saved to TOML
//! - **Backends**: [`BackendConfig`] picks the null, WAV or device backend
//! - **Paths**: platform config directory and default config file location
//!
//! # Example
//!
//! ```rust,no_run
//! use pulsar_config::{VmConfig, paths};
//!
//! let config = VmConfig::load_or_default(None).unwrap();
//! println!("{} Hz, {} samples/frame", config.sample_rate, config.frame_size);
//! config.save(paths::default_config_path()).unwrap();
//! ```

mod config;
mod error;

/// Platform-specific configuration paths.
pub mod paths;

pub use config::{BackendConfig, MAX_FRAME_SIZE, MAX_SAMPLE_RATE, VmConfig};
pub use error::ConfigError;
pub use paths::{default_config_path, user_config_dir};
