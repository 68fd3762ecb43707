//! Converter configuration using Figment
//!
//! Configuration is layered from:
//! 1. Built-in defaults (the values the lab's conversions have always used)
//! 2. An optional TOML file (`tdt2nwb.toml` or `--config <FILE>`)
//! 3. Environment variables prefixed with `TDT2NWB_` (nested keys split on `__`)
//!
//! # Example
//! ```no_run
//! use tdt2nwb::config::ConverterConfig;
//!
//! let config = ConverterConfig::load()?;
//! println!("Device: {}", config.session.device);
//! # Ok::<(), tdt2nwb::error::ConvertError>(())
//! ```

use crate::error::{AppResult, ConvertError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tdt2nwb.toml";

/// Top-level converter configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConverterConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Session-level NWB metadata
    #[serde(default)]
    pub session: SessionConfig,
    /// Which TDT stores feed which acquisitions
    #[serde(default)]
    pub streams: StreamConfig,
    /// Eye-tracker capture settings
    #[serde(default)]
    pub eye_tracking: EyeTrackingConfig,
    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// NWB session and hardware description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Human-readable session description written to the file root
    pub session_description: String,
    /// Acquisition device name
    pub device: String,
    /// Electrode group name
    pub electrode_group: String,
    /// Electrode group description
    pub electrode_group_description: String,
    /// Electrode group location
    pub electrode_group_location: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_description: "test_reading_TDT_file".to_string(),
            device: "PZ5".to_string(),
            electrode_group: "tetrode".to_string(),
            electrode_group_description: "electrode array".to_string(),
            electrode_group_location: "brain".to_string(),
        }
    }
}

/// Mapping of TDT stores onto NWB acquisitions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stores concatenated (in order) along the channel axis into the EEG series
    pub eeg_stores: Vec<String>,
    /// Name of the primary electrical series
    pub eeg_series_name: String,
    /// Name of the electrode table region scoping the EEG series
    pub eeg_region_name: String,
    /// Auxiliary single-store series (audio etc.)
    pub auxiliary: Vec<AuxiliaryStream>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            eeg_stores: vec!["EEG1".to_string(), "EEG2".to_string()],
            eeg_series_name: "EEG Data".to_string(),
            eeg_region_name: "EEG_electrodes".to_string(),
            auxiliary: vec![
                AuxiliaryStream {
                    store: "Wav5".to_string(),
                    name: "audio".to_string(),
                    comments: "audio".to_string(),
                    description: String::new(),
                    unit: "NA".to_string(),
                    required: true,
                },
                AuxiliaryStream {
                    store: "Wav6".to_string(),
                    name: "Wav6".to_string(),
                    comments: "audio2".to_string(),
                    description: String::new(),
                    unit: "NA".to_string(),
                    required: false,
                },
            ],
        }
    }
}

/// One TDT store written as a generic time series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuxiliaryStream {
    /// TDT store name (four characters)
    pub store: String,
    /// Acquisition name in the NWB file
    pub name: String,
    /// Free-text comments
    #[serde(default)]
    pub comments: String,
    /// Free-text description
    #[serde(default)]
    pub description: String,
    /// Data unit
    #[serde(default = "default_unit")]
    pub unit: String,
    /// Whether a missing store aborts the conversion
    #[serde(default = "default_required")]
    pub required: bool,
}

/// Eye-tracker capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EyeTrackingConfig {
    /// Tobii sampling rate in Hz
    pub rate: f64,
    /// Where the trials live in the capture file
    pub layout: CaptureLayout,
}

impl Default for EyeTrackingConfig {
    fn default() -> Self {
        Self {
            rate: 300.0,
            layout: CaptureLayout::default(),
        }
    }
}

/// Location of the per-eye arrays inside an eye-tracker HDF5 capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureLayout {
    /// One dataset per eye holding one (2-D) or several (3-D) trials
    Movie {
        /// Group holding both datasets
        group: String,
        /// Left eye dataset
        left: String,
        /// Right eye dataset
        right: String,
    },
    /// One entry per eye holding a 2-D (13 × T) array per trial: a MATLAB
    /// v7.3 cell array (dataset of object references) or a subgroup whose
    /// datasets are taken in name order
    Trials {
        /// Group holding both subgroups
        group: String,
        /// Left eye cell array or subgroup
        left: String,
        /// Right eye cell array or subgroup
        right: String,
    },
}

impl Default for CaptureLayout {
    fn default() -> Self {
        CaptureLayout::Movie {
            group: "Eye_movie".to_string(),
            left: "leftEye".to_string(),
            right: "rightEye".to_string(),
        }
    }
}

impl CaptureLayout {
    /// The per-trial layout used by the fixed-viewing captures
    pub fn fixed_viewing() -> Self {
        CaptureLayout::Trials {
            group: "Eye_fv".to_string(),
            left: "LEC_fv".to_string(),
            right: "REC_fv".to_string(),
        }
    }
}

/// Output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory the NWB file is written to
    pub output_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
        }
    }
}

fn default_unit() -> String {
    "NA".to_string()
}

fn default_required() -> bool {
    true
}

impl ConverterConfig {
    /// Load configuration from `tdt2nwb.toml` (if present) and environment variables
    ///
    /// Environment variables override the file with prefix `TDT2NWB_`.
    /// Example: `TDT2NWB_SESSION__DEVICE=RZ2`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and the environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(ConverterConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TDT2NWB_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ConvertError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.streams.eeg_stores.is_empty() {
            return Err(ConvertError::Configuration(
                "streams.eeg_stores must name at least one store".to_string(),
            ));
        }

        if !(self.eye_tracking.rate.is_finite() && self.eye_tracking.rate > 0.0) {
            return Err(ConvertError::Configuration(format!(
                "eye_tracking.rate must be positive and finite, got {}",
                self.eye_tracking.rate
            )));
        }

        for aux in &self.streams.auxiliary {
            if aux.name == self.streams.eeg_series_name {
                return Err(ConvertError::Configuration(format!(
                    "Auxiliary stream '{}' reuses the EEG series name",
                    aux.store
                )));
            }
        }

        Ok(())
    }
}
