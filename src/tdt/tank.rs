//! Native reader for TDT tank blocks (`.tsq` + `.tev`).

use super::tsq::{self, TsqRecord, EVMARK_STARTBLOCK, EVMARK_STOPBLOCK};
use super::{BlockReader, TdtBlock, TdtStream};
use crate::error::{AppResult, ConvertError};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Reads blocks written by TDT Synapse/OpenEx into a tank directory
#[derive(Debug, Clone, Default)]
pub struct TankReader {
    stores: Option<Vec<String>>,
}

impl TankReader {
    /// Reader that decodes every continuous store
    pub fn new() -> Self {
        Self::default()
    }

    /// Reader that only decodes the named stores
    pub fn with_stores<I, S>(stores: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stores: Some(stores.into_iter().map(Into::into).collect()),
        }
    }

    fn wants(&self, store: &str) -> bool {
        self.stores
            .as_ref()
            .map_or(true, |s| s.iter().any(|name| name == store))
    }

    /// `.sev` files in the block whose name mentions a store this reader decodes
    fn sev_files(&self, block: &Path) -> Result<Vec<PathBuf>> {
        let mut found: Vec<PathBuf> = fs::read_dir(block)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| has_extension(p, "sev"))
            .filter(|p| {
                p.file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|stem| stem.split('_').any(|token| self.wants(token)))
            })
            .collect();
        found.sort();
        Ok(found)
    }

    fn read(&self, path: &Path) -> Result<TdtBlock> {
        let tsq_path = find_tsq(path)?;
        let sev = self.sev_files(path)?;
        if !sev.is_empty() {
            let names: Vec<String> = sev
                .iter()
                .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
                .collect();
            bail!(
                "{} keeps stream data in .sev files ({}); only .tev stream storage can be read",
                path.display(),
                names.join(", ")
            );
        }
        let tev_path = tsq_path.with_extension("tev");
        let block_name = block_name(path)?;

        let index = fs::read(&tsq_path)
            .with_context(|| format!("Failed to read {}", tsq_path.display()))?;
        let records = tsq::read_records(&index).context("Malformed TSQ index")?;

        let (start, stop) = block_marks(&records)?;
        let start_date = epoch_to_utc(start)?;
        let stop_date = stop.map(epoch_to_utc).transpose()?;

        let mut tev = fs::File::open(&tev_path)
            .with_context(|| format!("Failed to open {}", tev_path.display()))?;
        let tev_len = tev.metadata()?.len();

        let mut builders: BTreeMap<String, StoreBuilder> = BTreeMap::new();
        for record in records.iter().filter(|r| r.is_stream()) {
            let name = record.store_name();
            if !self.wants(&name) {
                continue;
            }
            let format = record
                .data_format()
                .ok_or_else(|| anyhow!("Store {name} uses unknown data format {}", record.format))?;

            let len = record.data_len().ok_or_else(|| {
                anyhow!("Store {name} has a chunk with invalid size {} words", record.size)
            })?;
            let in_bounds = record
                .data_offset()
                .checked_add(len as u64)
                .is_some_and(|end| end <= tev_len);
            if !in_bounds {
                bail!(
                    "Store {name} chunk at offset {} ({len} bytes) runs past the end of {} ({tev_len} bytes)",
                    record.data_offset(),
                    tev_path.display()
                );
            }

            let mut payload = vec![0u8; len];
            tev.seek(SeekFrom::Start(record.data_offset()))?;
            tev.read_exact(&mut payload).with_context(|| {
                format!(
                    "TEV too short for {name} chunk at offset {}",
                    record.data_offset()
                )
            })?;
            let samples = format.decode(&payload)?;

            builders
                .entry(name.clone())
                .or_insert_with(|| StoreBuilder::new(&name, record, start))
                .push(record.channel, samples)?;
        }

        let mut streams = BTreeMap::new();
        for (name, builder) in builders {
            let stream = builder.finish()?;
            debug!(
                store = %name,
                channels = stream.num_channels(),
                samples = stream.num_samples(),
                fs = stream.fs,
                "Decoded store"
            );
            streams.insert(name, stream);
        }

        Ok(TdtBlock {
            block_name,
            start_date,
            stop_date,
            streams,
        })
    }
}

impl BlockReader for TankReader {
    #[instrument(skip_all, fields(path = %path.display()))]
    fn read_block(&self, path: &Path) -> AppResult<TdtBlock> {
        let block = self.read(path).map_err(ConvertError::upstream)?;
        info!(
            block = %block.block_name,
            stores = block.streams.len(),
            start = %block.start_date,
            "Read TDT block"
        );
        Ok(block)
    }
}

/// Per-store accumulation of channel chunks
struct StoreBuilder {
    name: String,
    fs: f64,
    start_time: f64,
    channels: BTreeMap<u16, Vec<f64>>,
}

impl StoreBuilder {
    fn new(name: &str, first: &TsqRecord, block_start: f64) -> Self {
        Self {
            name: name.to_string(),
            fs: f64::from(first.frequency),
            start_time: first.timestamp - block_start,
            channels: BTreeMap::new(),
        }
    }

    fn push(&mut self, channel: u16, samples: Vec<f64>) -> Result<()> {
        if channel == 0 {
            bail!("Store {} has a chunk on channel 0", self.name);
        }
        self.channels.entry(channel).or_default().extend(samples);
        Ok(())
    }

    fn finish(self) -> Result<TdtStream> {
        let num_channels = self.channels.keys().next_back().copied().unwrap_or(0) as usize;
        if self.channels.len() != num_channels {
            bail!(
                "Store {} is missing channels ({} of {} present)",
                self.name,
                self.channels.len(),
                num_channels
            );
        }

        let shortest = self.channels.values().map(Vec::len).min().unwrap_or(0);
        let longest = self.channels.values().map(Vec::len).max().unwrap_or(0);
        if shortest != longest {
            warn!(
                store = %self.name,
                shortest,
                longest,
                "Channels differ in length; truncating to the shortest"
            );
        }

        let mut flat = Vec::with_capacity(num_channels * shortest);
        for samples in self.channels.values() {
            flat.extend_from_slice(&samples[..shortest]);
        }
        let data = Array2::from_shape_vec((num_channels, shortest), flat)?;

        Ok(TdtStream {
            name: self.name,
            fs: self.fs,
            start_time: self.start_time,
            data,
        })
    }
}

fn find_tsq(block: &Path) -> Result<PathBuf> {
    if !block.is_dir() {
        bail!("{} is not a block directory", block.display());
    }
    let mut candidates: Vec<PathBuf> = fs::read_dir(block)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| has_extension(p, "tsq"))
        .collect();
    candidates.sort();
    match candidates.len() {
        0 => bail!("No .tsq file in {}", block.display()),
        1 => Ok(candidates.remove(0)),
        n => bail!("{n} .tsq files in {}; expected one", block.display()),
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

fn block_name(block: &Path) -> Result<String> {
    block
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Cannot derive a block name from {}", block.display()))
}

/// Start time from the second record, stop time from the last
fn block_marks(records: &[TsqRecord]) -> Result<(f64, Option<f64>)> {
    let start = records
        .get(1)
        .filter(|r| r.code_value() == EVMARK_STARTBLOCK)
        .ok_or_else(|| anyhow!("TSQ index has no start-of-block mark"))?;
    let stop = records
        .last()
        .filter(|r| r.code_value() == EVMARK_STOPBLOCK)
        .map(|r| r.timestamp);
    if stop.is_none() {
        warn!("TSQ index has no stop-of-block mark; recording may have been interrupted");
    }
    Ok((start.timestamp, stop))
}

fn epoch_to_utc(seconds: f64) -> Result<DateTime<Utc>> {
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    Utc.timestamp_opt(whole as i64, nanos)
        .single()
        .ok_or_else(|| anyhow!("Block timestamp {seconds} is out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tdt::tsq::DataFormat;
    use std::io::Write;

    const START: f64 = 1_600_000_000.5;

    fn write_block(dir: &Path, chunks: &[(&str, u16, f64, Vec<f32>)], with_stop: bool) {
        let mut tsq = Vec::new();
        let mut tev = Vec::new();
        TsqRecord::mark(0, 0.0).write_to(&mut tsq).unwrap();
        TsqRecord::mark(EVMARK_STARTBLOCK, START).write_to(&mut tsq).unwrap();
        for (store, channel, ts, samples) in chunks {
            let offset = tev.len() as u64;
            for s in samples {
                tev.extend_from_slice(&s.to_le_bytes());
            }
            TsqRecord::stream_chunk(
                store,
                *channel,
                START + ts,
                offset,
                samples.len() * 4,
                DataFormat::Float,
                1000.0,
            )
            .write_to(&mut tsq)
            .unwrap();
        }
        if with_stop {
            TsqRecord::mark(EVMARK_STOPBLOCK, START + 60.0)
                .write_to(&mut tsq)
                .unwrap();
        }
        fs::File::create(dir.join("Tank_Block-1.tsq"))
            .unwrap()
            .write_all(&tsq)
            .unwrap();
        fs::File::create(dir.join("Tank_Block-1.tev"))
            .unwrap()
            .write_all(&tev)
            .unwrap();
    }

    #[test]
    fn decodes_multichannel_store() {
        let tmp = tempfile::tempdir().unwrap();
        let block = tmp.path().join("Block-1");
        fs::create_dir(&block).unwrap();
        write_block(
            &block,
            &[
                ("EEG1", 1, 0.25, vec![1.0, 2.0]),
                ("EEG1", 2, 0.25, vec![10.0, 20.0]),
                ("EEG1", 1, 0.252, vec![3.0]),
                ("EEG1", 2, 0.252, vec![30.0]),
                ("Wav5", 1, 0.5, vec![0.5, 0.25, 0.125]),
            ],
            true,
        );

        let data = TankReader::new().read_block(&block).unwrap();
        assert_eq!(data.block_name, "Block-1");
        assert_eq!(data.start_date.timestamp(), 1_600_000_000);
        assert_eq!(data.duration().unwrap().num_seconds(), 60);

        let eeg = data.stream("EEG1").unwrap();
        assert_eq!(eeg.data.dim(), (2, 3));
        assert_eq!(eeg.data.row(0).to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(eeg.data.row(1).to_vec(), vec![10.0, 20.0, 30.0]);
        assert_eq!(eeg.fs, 1000.0);
        assert!((eeg.start_time - 0.25).abs() < 1e-9);

        let wav = data.stream("Wav5").unwrap();
        assert_eq!(wav.data.dim(), (1, 3));
    }

    #[test]
    fn store_filter_skips_other_stores() {
        let tmp = tempfile::tempdir().unwrap();
        write_block(
            tmp.path(),
            &[("EEG1", 1, 0.0, vec![1.0]), ("Wav5", 1, 0.0, vec![2.0])],
            true,
        );
        let data = TankReader::with_stores(["Wav5"]).read_block(tmp.path()).unwrap();
        assert!(data.stream("EEG1").is_none());
        assert!(data.stream("Wav5").is_some());
    }

    #[test]
    fn uneven_channels_truncate_to_shortest() {
        let tmp = tempfile::tempdir().unwrap();
        write_block(
            tmp.path(),
            &[("EEG2", 1, 0.0, vec![1.0, 2.0, 3.0]), ("EEG2", 2, 0.0, vec![4.0, 5.0])],
            false,
        );
        let data = TankReader::new().read_block(tmp.path()).unwrap();
        assert!(data.stop_date.is_none());
        assert_eq!(data.stream("EEG2").unwrap().data.dim(), (2, 2));
    }

    #[test]
    fn missing_index_is_upstream_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let err = TankReader::new().read_block(tmp.path()).unwrap_err();
        assert!(matches!(err, ConvertError::UpstreamRead(ref m) if m.contains("No .tsq")));
    }

    #[test]
    fn missing_start_mark_is_upstream_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let mut tsq = Vec::new();
        TsqRecord::mark(0, 0.0).write_to(&mut tsq).unwrap();
        TsqRecord::mark(EVMARK_STOPBLOCK, 1.0).write_to(&mut tsq).unwrap();
        fs::write(tmp.path().join("x.tsq"), &tsq).unwrap();
        fs::write(tmp.path().join("x.tev"), b"").unwrap();
        let err = TankReader::new().read_block(tmp.path()).unwrap_err();
        assert!(matches!(err, ConvertError::UpstreamRead(ref m) if m.contains("start-of-block")));
    }

    /// Index with a single stream record, over a four-byte TEV
    fn write_single_record(dir: &Path, record: TsqRecord) {
        let mut tsq = Vec::new();
        TsqRecord::mark(0, 0.0).write_to(&mut tsq).unwrap();
        TsqRecord::mark(EVMARK_STARTBLOCK, START).write_to(&mut tsq).unwrap();
        record.write_to(&mut tsq).unwrap();
        fs::write(dir.join("x.tsq"), &tsq).unwrap();
        fs::write(dir.join("x.tev"), 1.0f32.to_le_bytes()).unwrap();
    }

    #[test]
    fn corrupt_chunk_size_is_upstream_failure() {
        for (size, expected) in [
            (i32::MIN, "invalid size"),
            (tsq::HEADER_WORDS - 1, "invalid size"),
            (i32::MAX, "past the end"),
        ] {
            let tmp = tempfile::tempdir().unwrap();
            let mut record =
                TsqRecord::stream_chunk("EEG1", 1, START, 0, 4, DataFormat::Float, 1000.0);
            record.size = size;
            write_single_record(tmp.path(), record);

            let err = TankReader::new().read_block(tmp.path()).unwrap_err();
            assert!(
                matches!(err, ConvertError::UpstreamRead(ref m) if m.contains(expected)),
                "size {size}: {err}"
            );
        }
    }

    #[test]
    fn chunk_offset_past_tev_end_is_upstream_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let record =
            TsqRecord::stream_chunk("EEG1", 1, START, u64::MAX - 1, 4, DataFormat::Float, 1000.0);
        write_single_record(tmp.path(), record);
        let err = TankReader::new().read_block(tmp.path()).unwrap_err();
        assert!(matches!(err, ConvertError::UpstreamRead(ref m) if m.contains("past the end")));
    }

    #[test]
    fn sev_stream_storage_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_block(tmp.path(), &[("Wav5", 1, 0.0, vec![1.0])], true);
        fs::write(tmp.path().join("Tank_Block-1_EEG1_Ch1.sev"), b"").unwrap();

        let err = TankReader::new().read_block(tmp.path()).unwrap_err();
        assert!(matches!(
            err,
            ConvertError::UpstreamRead(ref m) if m.contains(".sev") && m.contains("Tank_Block-1_EEG1_Ch1.sev")
        ));
    }

    #[test]
    fn sev_files_of_skipped_stores_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        write_block(tmp.path(), &[("Wav5", 1, 0.0, vec![1.0])], true);
        fs::write(tmp.path().join("Tank_Block-1_RAW1_Ch1.sev"), b"").unwrap();

        let data = TankReader::with_stores(["Wav5"]).read_block(tmp.path()).unwrap();
        assert!(data.stream("Wav5").is_some());
    }

    #[test]
    fn fractional_epoch_seconds() {
        let date = epoch_to_utc(START).unwrap();
        assert_eq!(date.timestamp_subsec_millis(), 500);
    }
}
