//! Custom error types for the converter.
//!
//! This module defines the primary error type, `ConvertError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the failures that can occur while turning a recording into an NWB file.
//!
//! ## Error Hierarchy
//!
//! - **`MissingColumn`**: the electrode sheet lacks a column the table builder needs.
//! - **`MissingCoordinates`**: an electrode row has no usable 3D position. No default
//!   position is ever synthesized.
//! - **`Csv`** / **`Workbook`**: the electrode sheet cannot be parsed at all.
//! - **`InvalidCell`**: a cell holds text that cannot be read as the expected type.
//! - **`ElectrodeOrder`**: electrode ids were pushed out of order or repeated.
//! - **`ShapeMismatch`**: arrays that must be concatenated disagree on a dimension.
//! - **`UpstreamRead`**: a source file (TDT tank, eye-tracker capture) cannot be parsed.
//! - **`MissingStream`**: the block does not contain a store the conversion requires.
//! - **`Writer`**: the NWB writer failed to persist or re-read the file.
//! - **`FeatureNotEnabled`**: the code reached functionality (such as HDF5 storage)
//!   that was not compiled in. The message tells the user how to enable it.
//!
//! Every variant is fatal. The binary prints the message and exits non-zero.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, ConvertError>;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata sheet error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Workbook error: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("Missing column '{0}' in electrode metadata")]
    MissingColumn(String),

    #[error("Electrode row {row} ('{label}') has no coordinates")]
    MissingCoordinates { row: usize, label: String },

    #[error("Invalid value '{value}' in column '{column}' of row {row}")]
    InvalidCell {
        row: usize,
        column: String,
        value: String,
    },

    #[error("Electrode id {id} does not follow id {previous}; ids must be strictly increasing")]
    ElectrodeOrder { id: usize, previous: usize },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Failed to read upstream data: {0}")]
    UpstreamRead(String),

    #[error("Block has no stream named '{0}'")]
    MissingStream(String),

    #[error("Acquisition '{0}' already exists in the NWB file")]
    DuplicateAcquisition(String),

    #[error("Device '{0}' has not been created")]
    UnknownDevice(String),

    #[error("Electrode group '{0}' has not been created")]
    UnknownElectrodeGroup(String),

    #[error("NWB writer error: {0}")]
    Writer(String),

    #[error("Unsupported input format: {0}")]
    UnsupportedFormat(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for ConvertError {
    fn from(value: figment::Error) -> Self {
        ConvertError::Config(Box::new(value))
    }
}

impl ConvertError {
    /// Wrap an `anyhow` chain from the HDF5 layer as a writer failure.
    pub fn writer(err: anyhow::Error) -> Self {
        ConvertError::Writer(format!("{err:#}"))
    }

    /// Wrap an `anyhow` chain from a source reader as an upstream failure.
    pub fn upstream(err: anyhow::Error) -> Self {
        ConvertError::UpstreamRead(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn missing_coordinates_names_row_and_label() {
        let err = ConvertError::MissingCoordinates {
            row: 4,
            label: "LA1".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("row 4"));
        assert!(msg.contains("LA1"));
    }

    #[test]
    fn writer_keeps_context_chain() {
        let inner: anyhow::Result<()> = Err(anyhow::anyhow!("disk full"));
        let err = ConvertError::writer(inner.context("Failed to write /acquisition").unwrap_err());
        match err {
            ConvertError::Writer(msg) => {
                assert!(msg.contains("Failed to write /acquisition"));
                assert!(msg.contains("disk full"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn electrode_order_names_both_ids() {
        let err = ConvertError::ElectrodeOrder { id: 2, previous: 5 };
        let msg = err.to_string();
        assert!(msg.contains("id 2"));
        assert!(msg.contains("id 5"));
    }

    #[test]
    fn feature_not_enabled_mentions_flag() {
        let err = ConvertError::FeatureNotEnabled("storage_hdf5".into());
        assert!(err.to_string().contains("--features storage_hdf5"));
    }
}
