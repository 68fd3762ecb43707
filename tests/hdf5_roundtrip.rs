//! HDF5 round trips of converted files (requires `storage_hdf5`).
#![cfg(feature = "storage_hdf5")]

use chrono::{TimeZone, Utc};
use ndarray::Array2;
use std::fs;
use std::path::Path;
use tdt2nwb::config::ConverterConfig;
use tdt2nwb::electrodes::build_electrode_table;
use tdt2nwb::eyetracker::{EyeTrials, InMemoryEyeCapture};
use tdt2nwb::metadata::load_metadata;
use tdt2nwb::nwb::{Hdf5NwbWriter, TimeSeriesWriter};
use tdt2nwb::stream::EyeMeasure;
use tdt2nwb::tdt::{BlockBuilder, InMemoryBlockReader};
use tdt2nwb::{ConvertError, Converter};
use tempfile::TempDir;

const SHEET: &str = "\
Label\tLEPTO_coords_1\tLEPTO_coords_2\tLEPTO_coords_3\tFS_vol\tFS_label\tSpec\tNotes\tHemi\tOut
RTG1\t51.5\t-3.25\t8.0\tRight-Cerebral-Cortex\tctx-rh-insula\tAdTech\t\tR\tno
RTG2\t52.0\t-4.5\t8.5\tRight-Cerebral-Cortex\tctx-rh-insula\tAdTech\t\tR\tyes
RefA\t\t\t\t\t\t\t\t\t
";

#[test]
fn electrode_table_and_eye_tracking_survive_hdf5() {
    let tmp = TempDir::new().unwrap();
    let sheet_path = tmp.path().join("electrodes.tsv");
    fs::write(&sheet_path, SHEET).unwrap();

    let start = Utc.with_ymd_and_hms(2022, 2, 14, 9, 0, 0).unwrap();
    let block = BlockBuilder::new("Block-1", start)
        .stream("EEG1", 3051.7578, 0.0, Array2::from_elem((1, 64), 0.25))
        .stream("EEG2", 3051.7578, 0.0, Array2::from_elem((1, 64), 0.5))
        .stream("Wav5", 24414.0625, 0.0, Array2::zeros((1, 512)))
        .build();
    let capture = Path::new("/eye/capture.h5");
    let eye = InMemoryEyeCapture::new().with_capture(
        capture,
        EyeTrials {
            left: vec![Array2::ones((EyeMeasure::COUNT, 9))],
            right: vec![Array2::ones((EyeMeasure::COUNT, 9))],
        },
    );

    let mut config = ConverterConfig::default();
    config.output.output_dir = tmp.path().to_path_buf();
    let mut converter = Converter::new(
        config,
        InMemoryBlockReader::new().with_block("/tanks/Block-1", block),
        Hdf5NwbWriter::new(),
        eye,
    );

    let path = converter
        .convert_block(Path::new("/tanks/Block-1"), &sheet_path, "EC11")
        .unwrap();
    assert!(path.exists());

    let expected = build_electrode_table(&load_metadata(&sheet_path).unwrap(), "tetrode").unwrap();
    let table = converter.writer().read_electrodes(&path).unwrap();
    assert_eq!(table, expected);
    assert!(table.get(1).unwrap().outside_brain);

    converter.add_eye_tracking(&path, capture).unwrap();
    let mut names = converter.writer().acquisition_names(&path).unwrap();
    names.sort();
    assert_eq!(
        names,
        vec!["EEG Data", "Left Eye Tracking", "Right Eye Tracking", "audio"]
    );

    let err = converter.add_eye_tracking(&path, capture).unwrap_err();
    assert!(matches!(err, ConvertError::DuplicateAcquisition(_)));
}

#[test]
fn failed_conversion_leaves_no_file() {
    let tmp = TempDir::new().unwrap();
    let sheet_path = tmp.path().join("electrodes.tsv");
    fs::write(&sheet_path, SHEET).unwrap();

    let start = Utc.with_ymd_and_hms(2022, 2, 14, 9, 0, 0).unwrap();
    let block = BlockBuilder::new("Block-2", start)
        .stream("EEG1", 3051.7578, 0.0, Array2::zeros((1, 16)))
        .stream("EEG2", 3051.7578, 0.0, Array2::zeros((1, 16)))
        .stream("Wav5", 24414.0625, 0.0, Array2::zeros((1, 128)))
        .build();

    let mut config = ConverterConfig::default();
    config.output.output_dir = tmp.path().to_path_buf();
    // the group name collides with the electrode table
    config.session.electrode_group = "electrodes".to_string();
    let mut converter = Converter::new(
        config,
        InMemoryBlockReader::new().with_block("/tanks/Block-2", block),
        Hdf5NwbWriter::new(),
        InMemoryEyeCapture::new(),
    );

    let err = converter
        .convert_block(Path::new("/tanks/Block-2"), &sheet_path, "EC11")
        .unwrap_err();
    assert!(matches!(err, ConvertError::Writer(_)));
    assert!(!tmp.path().join("EC11_Block-2.nwb").exists());
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
}
