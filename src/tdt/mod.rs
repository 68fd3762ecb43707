//! TDT block access.
//!
//! A block is one recording session: a set of named stores (4-character codes
//! such as `EEG1` or `Wav5`), each with its own sampling rate and onset. The
//! [`BlockReader`] trait is the only thing the converter knows about TDT; the
//! native tank parser and the in-memory fake both implement it.

pub mod memory;
pub mod tank;
pub mod tsq;

pub use memory::{BlockBuilder, InMemoryBlockReader};
pub use tank::TankReader;

use crate::error::AppResult;
use chrono::{DateTime, Utc};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::path::Path;

/// One continuous store of a block
#[derive(Debug, Clone, PartialEq)]
pub struct TdtStream {
    /// Store name
    pub name: String,
    /// Sampling rate in Hz
    pub fs: f64,
    /// Onset of the first sample relative to the block start, in seconds
    pub start_time: f64,
    /// Samples, (channel × time)
    pub data: Array2<f64>,
}

impl TdtStream {
    /// Number of channels
    pub fn num_channels(&self) -> usize {
        self.data.nrows()
    }

    /// Number of samples per channel
    pub fn num_samples(&self) -> usize {
        self.data.ncols()
    }
}

/// A decoded recording block
#[derive(Debug, Clone, PartialEq)]
pub struct TdtBlock {
    /// Block name (the block directory name)
    pub block_name: String,
    /// Wall-clock start of the recording
    pub start_date: DateTime<Utc>,
    /// Wall-clock end of the recording, when the stop mark was written
    pub stop_date: Option<DateTime<Utc>>,
    /// Continuous stores by name
    pub streams: BTreeMap<String, TdtStream>,
}

impl TdtBlock {
    /// Look a store up by name
    pub fn stream(&self, name: &str) -> Option<&TdtStream> {
        self.streams.get(name)
    }

    /// Recording duration, when known
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.stop_date.map(|stop| stop - self.start_date)
    }
}

/// Capability to decode a block from disk
pub trait BlockReader {
    /// Read every continuous store of the block at `path`
    ///
    /// Failures are reported as `ConvertError::UpstreamRead`.
    fn read_block(&self, path: &Path) -> AppResult<TdtBlock>;
}
