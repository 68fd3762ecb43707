//! Storage seam for NWB files.

use super::model::{Acquisition, NwbFile};
use crate::electrodes::ElectrodeTable;
use crate::error::{AppResult, ConvertError};
use crate::stream::TimeSeries;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Capability to persist NWB files
///
/// `write_file` always overwrites whatever exists at `path`.
pub trait TimeSeriesWriter {
    /// Write a complete file
    fn write_file(&mut self, path: &Path, file: &NwbFile) -> AppResult<()>;

    /// Add generic time series to the acquisitions of an existing file
    ///
    /// Either every series is added or none is.
    fn append_acquisitions(&mut self, path: &Path, series: &[TimeSeries]) -> AppResult<()>;

    /// Names of the acquisitions stored in a file
    fn acquisition_names(&self, path: &Path) -> AppResult<Vec<String>>;

    /// Read the electrode table back from a file
    fn read_electrodes(&self, path: &Path) -> AppResult<ElectrodeTable>;
}

/// Keeps written files in memory, keyed by path
#[derive(Debug, Clone, Default)]
pub struct InMemoryNwbWriter {
    files: HashMap<PathBuf, NwbFile>,
}

impl InMemoryNwbWriter {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// File written at `path`, if any
    pub fn file(&self, path: &Path) -> Option<&NwbFile> {
        self.files.get(path)
    }

    /// Paths written so far
    pub fn paths(&self) -> Vec<&Path> {
        self.files.keys().map(PathBuf::as_path).collect()
    }

    fn existing(&self, path: &Path) -> AppResult<&NwbFile> {
        self.files
            .get(path)
            .ok_or_else(|| ConvertError::Writer(format!("no NWB file at {}", path.display())))
    }
}

impl TimeSeriesWriter for InMemoryNwbWriter {
    fn write_file(&mut self, path: &Path, file: &NwbFile) -> AppResult<()> {
        if self.files.insert(path.to_path_buf(), file.clone()).is_some() {
            info!(path = %path.display(), "Overwrote existing NWB file");
        }
        Ok(())
    }

    fn append_acquisitions(&mut self, path: &Path, series: &[TimeSeries]) -> AppResult<()> {
        let mut file = self.existing(path)?.clone();
        for ts in series {
            file.add_acquisition(Acquisition::Generic(ts.clone()))?;
        }
        self.files.insert(path.to_path_buf(), file);
        Ok(())
    }

    fn acquisition_names(&self, path: &Path) -> AppResult<Vec<String>> {
        Ok(self
            .existing(path)?
            .acquisitions
            .iter()
            .map(|a| a.name().to_string())
            .collect())
    }

    fn read_electrodes(&self, path: &Path) -> AppResult<ElectrodeTable> {
        Ok(self.existing(path)?.electrodes.clone())
    }
}
