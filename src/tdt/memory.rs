//! In-memory block reader for tests and dry runs.

use super::{BlockReader, TdtBlock, TdtStream};
use crate::error::{AppResult, ConvertError};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Serves pre-built blocks keyed by path
#[derive(Debug, Clone, Default)]
pub struct InMemoryBlockReader {
    blocks: HashMap<PathBuf, TdtBlock>,
}

impl InMemoryBlockReader {
    /// Empty reader; every path fails with `UpstreamRead`
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a block under a path
    pub fn insert(&mut self, path: impl Into<PathBuf>, block: TdtBlock) {
        self.blocks.insert(path.into(), block);
    }

    /// Builder-style `insert`
    pub fn with_block(mut self, path: impl Into<PathBuf>, block: TdtBlock) -> Self {
        self.insert(path, block);
        self
    }
}

impl BlockReader for InMemoryBlockReader {
    fn read_block(&self, path: &Path) -> AppResult<TdtBlock> {
        self.blocks
            .get(path)
            .cloned()
            .ok_or_else(|| ConvertError::UpstreamRead(format!("no block at {}", path.display())))
    }
}

/// Fluent construction of a block for tests
#[derive(Debug, Clone)]
pub struct BlockBuilder {
    block: TdtBlock,
}

impl BlockBuilder {
    /// Start a block with a name and start date
    pub fn new(block_name: impl Into<String>, start_date: DateTime<Utc>) -> Self {
        Self {
            block: TdtBlock {
                block_name: block_name.into(),
                start_date,
                stop_date: None,
                streams: BTreeMap::new(),
            },
        }
    }

    /// Add a (channel × time) store
    pub fn stream(mut self, name: &str, fs: f64, start_time: f64, data: Array2<f64>) -> Self {
        self.block.streams.insert(
            name.to_string(),
            TdtStream {
                name: name.to_string(),
                fs,
                start_time,
                data,
            },
        );
        self
    }

    /// Finish the block
    pub fn build(self) -> TdtBlock {
        self.block
    }
}
