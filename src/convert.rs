//! Assembly of NWB files from TDT blocks and eye-tracker captures.
//!
//! The [`Converter`] owns its collaborators and runs each subcommand as one
//! sequential pass. Everything that can fail is checked while the logical
//! [`NwbFile`] is being built; the writer is only called once the file is
//! complete, so a failed run never leaves a partial output behind.

use crate::config::{AuxiliaryStream, ConverterConfig};
use crate::electrodes::{build_electrode_table, eeg_region};
use crate::error::{AppResult, ConvertError};
use crate::eyetracker::EyeCaptureSource;
use crate::metadata::{load_metadata, MetadataSheet};
use crate::nwb::{Acquisition, ElectricalSeries, NwbFile, TimeSeriesWriter};
use crate::stream::{concat_channels, TimeSeries};
use crate::tdt::{BlockReader, TdtBlock};
use ndarray::ArrayView2;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Runs conversions against a block reader, an NWB writer and an eye capture source
pub struct Converter<R, W, E> {
    config: ConverterConfig,
    reader: R,
    writer: W,
    eye_source: E,
}

impl<R, W, E> Converter<R, W, E>
where
    R: BlockReader,
    W: TimeSeriesWriter,
    E: EyeCaptureSource,
{
    /// Wire a converter from its collaborators
    pub fn new(config: ConverterConfig, reader: R, writer: W, eye_source: E) -> Self {
        Self {
            config,
            reader,
            writer,
            eye_source,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// The writer, e.g. to inspect an in-memory store
    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Path the file of a subject and block is written to
    pub fn output_path(&self, subject_id: &str, block_name: &str) -> PathBuf {
        self.config
            .output
            .output_dir
            .join(format!("{subject_id}_{block_name}.nwb"))
    }

    /// Convert one TDT block and its electrode sheet into an NWB file
    ///
    /// Returns the path of the written file. Any existing file at that path is
    /// replaced.
    #[instrument(skip_all, fields(block = %block_path.display(), subject = subject_id))]
    pub fn convert_block(
        &mut self,
        block_path: &Path,
        metadata_path: &Path,
        subject_id: &str,
    ) -> AppResult<PathBuf> {
        let block = self.reader.read_block(block_path)?;
        let sheet = load_metadata(metadata_path)?;
        let nwb = self.assemble(&block, &sheet, subject_id)?;

        let path = self.output_path(subject_id, &block.block_name);
        self.writer.write_file(&path, &nwb)?;
        info!(
            path = %path.display(),
            electrodes = nwb.electrodes.len(),
            acquisitions = nwb.acquisitions.len(),
            "Conversion complete"
        );
        Ok(path)
    }

    /// Build the logical NWB file of a block without writing it
    pub fn assemble(
        &self,
        block: &TdtBlock,
        sheet: &MetadataSheet,
        subject_id: &str,
    ) -> AppResult<NwbFile> {
        let session = &self.config.session;
        let streams = &self.config.streams;

        let electrodes = build_electrode_table(sheet, &session.electrode_group)?;
        let eeg = self.eeg_series(block)?;

        let mut nwb = NwbFile::new(&session.session_description, subject_id, block.start_date);
        nwb.create_device(&session.device);
        nwb.create_electrode_group(
            &session.electrode_group,
            &session.electrode_group_description,
            &session.electrode_group_location,
            &session.device,
        )?;
        nwb.set_electrodes(electrodes)?;

        let region = eeg_region(sheet, &streams.eeg_region_name);
        let region = nwb.create_electrode_table_region(&region.name, region.range)?;
        debug!(region = %region.name, electrodes = region.len(), "Created electrode region");
        nwb.add_acquisition(Acquisition::Electrical(ElectricalSeries {
            series: eeg,
            electrodes: region,
        }))?;

        for aux in &streams.auxiliary {
            match auxiliary_series(block, aux)? {
                Some(series) => nwb.add_acquisition(Acquisition::Generic(series))?,
                None => warn!(store = %aux.store, name = %aux.name, "Optional store not in block, skipping"),
            }
        }

        Ok(nwb)
    }

    /// The EEG stores concatenated along channels, time-major
    fn eeg_series(&self, block: &TdtBlock) -> AppResult<TimeSeries> {
        let streams = &self.config.streams;
        let stores = streams
            .eeg_stores
            .iter()
            .map(|name| {
                block
                    .stream(name)
                    .ok_or_else(|| ConvertError::MissingStream(name.clone()))
            })
            .collect::<AppResult<Vec<_>>>()?;
        let first = stores
            .first()
            .ok_or_else(|| ConvertError::Configuration("no EEG stores configured".to_string()))?;

        for store in &stores[1..] {
            if store.fs != first.fs {
                warn!(
                    store = %store.name,
                    fs = store.fs,
                    expected = first.fs,
                    "EEG store sampled at a different rate than the first"
                );
            }
        }

        let views: Vec<ArrayView2<'_, f64>> = stores.iter().map(|s| s.data.view()).collect();
        let channel_major = concat_channels(&views)?;
        Ok(
            TimeSeries::from_channel_major(&streams.eeg_series_name, channel_major.view(), first.fs)
                .with_starting_time(first.start_time),
        )
    }

    /// Append the left and right eye-tracking series to an existing NWB file
    ///
    /// Returns the names of the added acquisitions.
    #[instrument(skip_all, fields(nwb = %nwb_path.display(), capture = %capture_path.display()))]
    pub fn add_eye_tracking(&mut self, nwb_path: &Path, capture_path: &Path) -> AppResult<Vec<String>> {
        let trials = self.eye_source.read_trials(capture_path)?;
        let series = trials.into_series(self.config.eye_tracking.rate)?;
        self.writer.append_acquisitions(nwb_path, &series)?;

        let names: Vec<String> = series.iter().map(|s| s.name.clone()).collect();
        info!(
            series = ?names,
            samples = ?series.iter().map(TimeSeries::num_samples).collect::<Vec<_>>(),
            "Added eye tracking"
        );
        Ok(names)
    }
}

/// One configured auxiliary store as a generic series; `None` when an optional store is absent
fn auxiliary_series(block: &TdtBlock, aux: &AuxiliaryStream) -> AppResult<Option<TimeSeries>> {
    let Some(stream) = block.stream(&aux.store) else {
        if aux.required {
            return Err(ConvertError::MissingStream(aux.store.clone()));
        }
        return Ok(None);
    };
    Ok(Some(
        TimeSeries::from_channel_major(&aux.name, stream.data.view(), stream.fs)
            .with_comments(&aux.comments)
            .with_description(&aux.description)
            .with_unit(&aux.unit),
    ))
}
