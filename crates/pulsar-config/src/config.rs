//! VM configuration file format and operations.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use pulsar_core::{BackendParameters, DEFAULT_FRAME_SIZE, DEFAULT_NOISE_SEED, DEFAULT_SAMPLE_RATE};

use crate::error::ConfigError;
use crate::paths;

/// Largest accepted sample rate in Hz.
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// Largest accepted frame size in samples.
pub const MAX_FRAME_SIZE: usize = 8192;

/// Pipeline VM settings.
///
/// # TOML Format
///
/// ```toml
/// sample_rate = 44100
/// frame_size = 128
/// seed = 305419896
///
/// [backend]
/// type = "wav"
/// path = "out.wav"
/// max_frames = 3445
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VmConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per frame.
    pub frame_size: usize,
    /// Base seed of the noise generators.
    pub seed: u32,
    /// Backend selection.
    pub backend: BackendConfig,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            seed: DEFAULT_NOISE_SEED,
            backend: BackendConfig::default(),
        }
    }
}

/// Which backend drives the frame loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Discard output.
    Null {
        /// Pace frames at the sample rate.
        #[serde(default)]
        realtime: bool,
        /// Stop after this many frames.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_frames: Option<u64>,
    },
    /// Render to a WAV file.
    Wav {
        /// Output file.
        path: PathBuf,
        /// Stop after this many frames.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_frames: Option<u64>,
    },
    /// Play on an audio device.
    Device {
        /// Case-insensitive substring of the device name; default device if unset.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_name: Option<String>,
        /// Ring buffer capacity in frames.
        #[serde(default = "default_latency_frames")]
        latency_frames: usize,
    },
}

fn default_latency_frames() -> usize {
    4
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Null {
            realtime: false,
            max_frames: None,
        }
    }
}

impl BackendConfig {
    /// Config-file name of the backend kind.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Null { .. } => "null",
            BackendConfig::Wav { .. } => "wav",
            BackendConfig::Device { .. } => "device",
        }
    }
}

impl VmConfig {
    /// Load a configuration from a TOML file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Self::from_toml(&content)
    }

    /// Load from `path`, or from the default location if it exists, or
    /// fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match paths::find_config(path) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Parse and validate a configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: VmConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration to a TOML file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }

    /// Convert the configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks every setting against its accepted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 || self.sample_rate > MAX_SAMPLE_RATE {
            return Err(ConfigError::invalid(
                "sample_rate",
                format!("{} is outside 1..={MAX_SAMPLE_RATE}", self.sample_rate),
            ));
        }
        if self.frame_size == 0 || self.frame_size > MAX_FRAME_SIZE {
            return Err(ConfigError::invalid(
                "frame_size",
                format!("{} is outside 1..={MAX_FRAME_SIZE}", self.frame_size),
            ));
        }
        match &self.backend {
            BackendConfig::Wav { path, .. } if path.as_os_str().is_empty() => {
                Err(ConfigError::invalid("backend.path", "must not be empty"))
            }
            BackendConfig::Device { latency_frames, .. } if *latency_frames < 2 => Err(
                ConfigError::invalid("backend.latency_frames", "must be at least 2"),
            ),
            _ => Ok(()),
        }
    }

    /// Backend parameters carrying this configuration's frame size.
    pub fn backend_parameters(&self) -> BackendParameters {
        BackendParameters {
            frame_size: Some(self.frame_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VmConfig::default();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.frame_size, 128);
        assert_eq!(config.backend.kind(), "null");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = VmConfig::from_toml("frame_size = 256").unwrap();
        assert_eq!(config.frame_size, 256);
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.backend, BackendConfig::default());
    }

    #[test]
    fn test_wav_backend_table() {
        let config = VmConfig::from_toml(
            r#"
            sample_rate = 48000
            [backend]
            type = "wav"
            path = "render.wav"
            max_frames = 100
            "#,
        )
        .unwrap();
        assert_eq!(
            config.backend,
            BackendConfig::Wav {
                path: PathBuf::from("render.wav"),
                max_frames: Some(100),
            }
        );
    }

    #[test]
    fn test_device_latency_default() {
        let config = VmConfig::from_toml("[backend]\ntype = \"device\"").unwrap();
        assert_eq!(
            config.backend,
            BackendConfig::Device {
                device_name: None,
                latency_frames: 4,
            }
        );
    }

    #[test]
    fn test_unknown_backend_type_rejected() {
        let err = VmConfig::from_toml("[backend]\ntype = \"jack\"").unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse(_)));
    }

    #[test]
    fn test_validate_ranges() {
        let zero_frame = VmConfig {
            frame_size: 0,
            ..VmConfig::default()
        };
        assert!(matches!(
            zero_frame.validate(),
            Err(ConfigError::Invalid { field: "frame_size", .. })
        ));

        let huge_rate = VmConfig {
            sample_rate: 1_000_000,
            ..VmConfig::default()
        };
        assert!(matches!(
            huge_rate.validate(),
            Err(ConfigError::Invalid { field: "sample_rate", .. })
        ));

        let tight = VmConfig {
            backend: BackendConfig::Device {
                device_name: None,
                latency_frames: 1,
            },
            ..VmConfig::default()
        };
        assert!(tight.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = VmConfig {
            seed: 7,
            backend: BackendConfig::Null {
                realtime: true,
                max_frames: Some(10),
            },
            ..VmConfig::default()
        };
        let text = config.to_toml().unwrap();
        assert_eq!(VmConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_backend_parameters() {
        let config = VmConfig {
            frame_size: 64,
            ..VmConfig::default()
        };
        assert_eq!(config.backend_parameters().frame_size, Some(64));
    }
}
