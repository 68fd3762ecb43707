//! # tdt2nwb
//!
//! Converts Tucker-Davis Technologies recording blocks into Neurodata Without
//! Borders (NWB) files, and appends Tobii eye-tracker captures to existing NWB
//! files. The binary (`main.rs`) is a thin CLI over this library so the same
//! pipeline can be driven from tests or other tools.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-layered `ConverterConfig` (defaults, TOML file, environment).
//! - **`convert`**: The `Converter` that assembles an NWB file from a block and an
//!   electrode sheet, and appends eye tracking.
//! - **`electrodes`**: Electrode table arena, custom columns and the EEG/reference
//!   boundary region.
//! - **`error`**: The `ConvertError` enum shared by every module.
//! - **`eyetracker`**: Eye-tracker capture sources (HDF5 and in-memory).
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`metadata`**: Loader for the electrode metadata sheet (workbook or CSV/TSV).
//! - **`nwb`**: Logical NWB model and its writers (HDF5 and in-memory).
//! - **`stream`**: Channel-major to time-major adaptation and trial concatenation.
//! - **`tdt`**: TDT block model, the native TSQ/TEV tank reader and an in-memory fake.
//!
//! HDF5 I/O is behind the `storage_hdf5` feature, which is on by default. A build
//! with `--no-default-features` keeps the in-memory collaborators; its HDF5 writer
//! and capture source return `ConvertError::FeatureNotEnabled`.

pub mod config;
pub mod convert;
pub mod electrodes;
pub mod error;
pub mod eyetracker;
pub mod logging;
pub mod metadata;
pub mod nwb;
pub mod stream;
pub mod tdt;

pub use convert::Converter;
pub use error::{AppResult, ConvertError};
