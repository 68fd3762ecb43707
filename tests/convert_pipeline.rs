//! End-to-end conversion tests over the in-memory collaborators and a
//! synthetic TDT tank.
//!
//! - Electrode table and EEG region built from a CSV sheet
//! - Optional auxiliary store skipped with a warning
//! - Fatal metadata problems leave no output behind
//! - Eye tracking appended to an existing file, duplicates rejected

use chrono::{TimeZone, Utc};
use ndarray::Array2;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tdt2nwb::config::ConverterConfig;
use tdt2nwb::eyetracker::{EyeTrials, InMemoryEyeCapture};
use tdt2nwb::nwb::{Acquisition, InMemoryNwbWriter, TimeSeriesWriter};
use tdt2nwb::stream::EyeMeasure;
use tdt2nwb::tdt::tsq::{DataFormat, TsqRecord, EVMARK_STARTBLOCK, EVMARK_STOPBLOCK};
use tdt2nwb::tdt::{BlockBuilder, InMemoryBlockReader, TankReader, TdtBlock};
use tdt2nwb::{ConvertError, Converter};
use tempfile::TempDir;
use tracing_test::traced_test;

const BLOCK_PATH: &str = "/tanks/EC09/Block-12";

const SHEET: &str = "\
Label,LEPTO_coords_1,LEPTO_coords_2,LEPTO_coords_3,FS_vol,FS_label,Spec,Notes,Hemi,Out
LTG1,-52.1,10.0,4.5,Left-Cerebral-Cortex,ctx-lh-superiortemporal,PMT 2110,,L,0
LTG2,-53.0,12.2,5.0,Left-Cerebral-Cortex,ctx-lh-middletemporal,PMT 2110,,L,0
LTG3,-54.4,13.9,5.5,Left-Cerebral-Cortex,ctx-lh-middletemporal,PMT 2110,,L,1
Ref1,,,,,,,,,
EKG1,0,0,0,Unknown,none,surface,,,1
";

fn write_sheet(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("electrodes.csv");
    fs::File::create(&path)
        .unwrap()
        .write_all(contents.as_bytes())
        .unwrap();
    path
}

fn block(with_wav6: bool) -> TdtBlock {
    let start = Utc.with_ymd_and_hms(2019, 8, 21, 13, 45, 0).unwrap();
    let eeg1 = Array2::from_shape_fn((2, 100), |(c, t)| (c * 1000 + t) as f64);
    let eeg2 = Array2::from_shape_fn((2, 100), |(c, t)| ((c + 2) * 1000 + t) as f64);
    let mut builder = BlockBuilder::new("Block-12", start)
        .stream("EEG1", 3051.7578, 0.0, eeg1)
        .stream("EEG2", 3051.7578, 0.0, eeg2)
        .stream("Wav5", 24414.0625, 0.0, Array2::zeros((1, 800)));
    if with_wav6 {
        builder = builder.stream("Wav6", 24414.0625, 0.0, Array2::zeros((1, 800)));
    }
    builder.build()
}

fn converter(
    output_dir: &Path,
    block: TdtBlock,
    eye: InMemoryEyeCapture,
) -> Converter<InMemoryBlockReader, InMemoryNwbWriter, InMemoryEyeCapture> {
    let mut config = ConverterConfig::default();
    config.output.output_dir = output_dir.to_path_buf();
    Converter::new(
        config,
        InMemoryBlockReader::new().with_block(BLOCK_PATH, block),
        InMemoryNwbWriter::new(),
        eye,
    )
}

fn trials(lengths: &[usize]) -> Vec<Array2<f64>> {
    lengths
        .iter()
        .map(|t| Array2::from_elem((EyeMeasure::COUNT, *t), *t as f64))
        .collect()
}

#[test]
fn converts_block_into_named_file() {
    let tmp = TempDir::new().unwrap();
    let sheet = write_sheet(tmp.path(), SHEET);
    let mut converter = converter(tmp.path(), block(true), InMemoryEyeCapture::new());

    let path = converter
        .convert_block(Path::new(BLOCK_PATH), &sheet, "EC09")
        .unwrap();
    assert_eq!(path, tmp.path().join("EC09_Block-12.nwb"));

    let nwb = converter.writer().file(&path).unwrap();
    assert_eq!(nwb.identifier, "EC09");
    assert_eq!(nwb.session_description, "test_reading_TDT_file");
    assert_eq!(nwb.devices[0].name, "PZ5");
    assert_eq!(nwb.electrode_groups[0].name, "tetrode");

    // Ref1 (row 3) is dropped, EKG1 keeps its sheet row index
    assert_eq!(nwb.electrodes.ids(), vec![0, 1, 2, 4]);
    let ekg = nwb.electrodes.get(4).unwrap();
    assert!(ekg.outside_brain);
    assert_eq!(ekg.spec, "surface");
    assert_eq!(nwb.electrodes.get(1).unwrap().label, "ctx-lh-middletemporal");

    let Some(Acquisition::Electrical(eeg)) = nwb.acquisition("EEG Data") else {
        panic!("EEG Data is not an electrical series");
    };
    assert_eq!(eeg.series.data.dim(), (100, 4));
    assert_eq!(eeg.series.data[[7, 3]], 3007.0);
    assert_eq!(eeg.electrodes.indices(), vec![0, 1, 2]);

    let names: Vec<&str> = nwb.acquisitions.iter().map(|a| a.name()).collect();
    assert_eq!(names, vec!["EEG Data", "audio", "Wav6"]);
}

#[traced_test]
#[test]
fn missing_optional_store_is_skipped_with_warning() {
    let tmp = TempDir::new().unwrap();
    let sheet = write_sheet(tmp.path(), SHEET);
    let mut converter = converter(tmp.path(), block(false), InMemoryEyeCapture::new());

    let path = converter
        .convert_block(Path::new(BLOCK_PATH), &sheet, "EC09")
        .unwrap();
    let nwb = converter.writer().file(&path).unwrap();
    assert!(nwb.acquisition("Wav6").is_none());
    assert!(nwb.acquisition("audio").is_some());
    assert!(logs_contain("Optional store not in block"));
}

#[test]
fn missing_coordinates_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let sheet = write_sheet(
        tmp.path(),
        "Label,LEPTO_coords_1,LEPTO_coords_2,LEPTO_coords_3,FS_vol,FS_label,Spec,a,b,Out\n\
         LTG1,1,2,3,v,l,s,,,0\n\
         LTG2,,2,3,v,l,s,,,0\n",
    );
    let mut converter = converter(tmp.path(), block(true), InMemoryEyeCapture::new());

    let err = converter
        .convert_block(Path::new(BLOCK_PATH), &sheet, "EC09")
        .unwrap_err();
    assert!(matches!(
        err,
        ConvertError::MissingCoordinates { row: 1, ref label } if label == "LTG2"
    ));
    assert!(converter.writer().paths().is_empty());
}

#[test]
fn unreadable_block_is_upstream_failure() {
    let tmp = TempDir::new().unwrap();
    let sheet = write_sheet(tmp.path(), SHEET);
    let mut converter = converter(tmp.path(), block(true), InMemoryEyeCapture::new());

    let err = converter
        .convert_block(Path::new("/tanks/EC09/Block-99"), &sheet, "EC09")
        .unwrap_err();
    assert!(matches!(err, ConvertError::UpstreamRead(_)));
}

#[test]
fn corrupt_workbook_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let workbook = tmp.path().join("electrodes.xlsx");
    fs::write(&workbook, b"PK").unwrap();
    let mut converter = converter(tmp.path(), block(true), InMemoryEyeCapture::new());

    let err = converter
        .convert_block(Path::new(BLOCK_PATH), &workbook, "EC09")
        .unwrap_err();
    assert!(matches!(err, ConvertError::Workbook(_)));
    assert!(converter.writer().paths().is_empty());
}

#[test]
fn eye_tracking_is_appended_once() {
    let tmp = TempDir::new().unwrap();
    let sheet = write_sheet(tmp.path(), SHEET);
    let capture = PathBuf::from("/eye/EC09_movie.h5");
    let eye = InMemoryEyeCapture::new().with_capture(
        &capture,
        EyeTrials {
            left: trials(&[30, 20]),
            right: trials(&[50]),
        },
    );
    let mut converter = converter(tmp.path(), block(true), eye);
    let nwb_path = converter
        .convert_block(Path::new(BLOCK_PATH), &sheet, "EC09")
        .unwrap();

    let added = converter.add_eye_tracking(&nwb_path, &capture).unwrap();
    assert_eq!(added, vec!["Left Eye Tracking", "Right Eye Tracking"]);

    let nwb = converter.writer().file(&nwb_path).unwrap();
    let left = nwb.acquisition("Left Eye Tracking").unwrap().series();
    assert_eq!(left.data.dim(), (50, 13));
    assert_eq!(left.data[[29, 0]], 30.0);
    assert_eq!(left.data[[30, 0]], 20.0);
    assert_eq!(left.rate, 300.0);
    assert!(left.description.contains("PupilDiameter"));
    assert_eq!(
        left.comments,
        "Eye tracking from the left eye using the Tobii eye tracker"
    );

    let err = converter.add_eye_tracking(&nwb_path, &capture).unwrap_err();
    assert!(matches!(err, ConvertError::DuplicateAcquisition(_)));
    assert_eq!(
        converter
            .writer()
            .acquisition_names(&nwb_path)
            .unwrap()
            .len(),
        5
    );
}

/// Write a two-store tank the way Synapse lays it out
fn write_tank(block_dir: &Path, start: f64) {
    let mut tsq = Vec::new();
    let mut tev = Vec::new();
    TsqRecord::mark(0, 0.0).write_to(&mut tsq).unwrap();
    TsqRecord::mark(EVMARK_STARTBLOCK, start)
        .write_to(&mut tsq)
        .unwrap();

    let chunks: [(&str, u16, f32, f64); 6] = [
        ("EEG1", 1, 1.0, 508.6),
        ("EEG1", 2, 2.0, 508.6),
        ("EEG2", 1, 3.0, 508.6),
        ("EEG2", 2, 4.0, 508.6),
        ("EEG2", 3, 5.0, 508.6),
        ("Wav5", 1, 0.5, 24414.0625),
    ];
    for (store, channel, value, fs) in chunks {
        let offset = tev.len() as u64;
        for _ in 0..8 {
            tev.extend_from_slice(&value.to_le_bytes());
        }
        TsqRecord::stream_chunk(store, channel, start, offset, 32, DataFormat::Float, fs as f32)
            .write_to(&mut tsq)
            .unwrap();
    }
    TsqRecord::mark(EVMARK_STOPBLOCK, start + 30.0)
        .write_to(&mut tsq)
        .unwrap();

    fs::write(block_dir.join("EC09_Block-4.tsq"), tsq).unwrap();
    fs::write(block_dir.join("EC09_Block-4.tev"), tev).unwrap();
}

#[test]
fn converts_native_tank() {
    let tmp = TempDir::new().unwrap();
    let block_dir = tmp.path().join("Block-4");
    fs::create_dir(&block_dir).unwrap();
    write_tank(&block_dir, 1_566_395_100.0);
    let sheet = write_sheet(tmp.path(), SHEET);

    let mut config = ConverterConfig::default();
    config.output.output_dir = tmp.path().to_path_buf();
    let mut converter = Converter::new(
        config,
        TankReader::new(),
        InMemoryNwbWriter::new(),
        InMemoryEyeCapture::new(),
    );

    let path = converter.convert_block(&block_dir, &sheet, "EC09").unwrap();
    assert_eq!(path, tmp.path().join("EC09_Block-4.nwb"));

    let nwb = converter.writer().file(&path).unwrap();
    assert_eq!(
        nwb.session_start_time,
        Utc.with_ymd_and_hms(2019, 8, 21, 13, 45, 0).unwrap()
    );
    let eeg = nwb.acquisition("EEG Data").unwrap().series();
    assert_eq!(eeg.data.dim(), (8, 5));
    assert_eq!(eeg.data.row(0).to_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    assert!((eeg.rate - 508.6).abs() < 1e-3);
    assert_eq!(nwb.acquisition("audio").unwrap().series().data.dim(), (8, 1));
}
