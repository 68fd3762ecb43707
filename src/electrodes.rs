//! Electrode table construction.
//!
//! Maps metadata sheet rows onto the NWB electrode table. Each record keeps the
//! sheet row index as its explicit `id`, so identity never depends on iteration
//! order. Reference contacts (label contains `Ref`) are left out of the table.
//!
//! The EEG region is the index range `[0, k)` where `k` is the position of the
//! first `Ref` row in the sheet, scanning in file order. Rows after that first
//! reference are still loaded into the table when they are not references
//! themselves, but never counted in the region.

use crate::error::{AppResult, ConvertError};
use crate::metadata::{MetadataRow, MetadataSheet};
use std::ops::Range;
use tracing::{debug, info};

/// Substring marking a reference contact
pub const REFERENCE_MARKER: &str = "Ref";

/// Coordinate columns of the LEPTO localization
pub const COORDINATE_COLUMNS: [&str; 3] = ["LEPTO_coords_1", "LEPTO_coords_2", "LEPTO_coords_3"];
/// FreeSurfer volume label, used as the anatomical location
pub const LOCATION_COLUMN: &str = "FS_vol";
/// FreeSurfer surface label
pub const FS_LABEL_COLUMN: &str = "FS_label";
/// Fixed position of the electrode spec column
pub const SPEC_POSITION: usize = 6;
/// Fixed position of the outside-the-brain column
pub const OUTSIDE_BRAIN_POSITION: usize = 9;

/// Placeholder impedance; the sheets do not carry measurements
pub const UNKNOWN_IMPEDANCE: f64 = -1.0;

/// Description of a custom electrode column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name in the NWB table
    pub name: &'static str,
    /// Column description
    pub description: &'static str,
}

/// Custom columns added to the NWB electrode table, in write order
pub const CUSTOM_COLUMNS: [ColumnSpec; 7] = [
    ColumnSpec {
        name: "label",
        description: "Freesurfer Label",
    },
    ColumnSpec {
        name: "chan_type",
        description: "type of channel (EEG/EKG/HR)",
    },
    ColumnSpec {
        name: "seizure_onset",
        description: "seizure onset zone",
    },
    ColumnSpec {
        name: "interictal_activity",
        description: "shows interictal activity",
    },
    ColumnSpec {
        name: "out",
        description: "outside the brain",
    },
    ColumnSpec {
        name: "spec",
        description: "intracranial electrode spec",
    },
    ColumnSpec {
        name: "bad",
        description: "bad_electrodes",
    },
];

/// Kind of signal a contact records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    /// Intracranial EEG
    Eeg,
    /// Electrocardiogram
    Ekg,
    /// Heart rate
    HeartRate,
}

impl ChannelType {
    /// Name written to the `chan_type` column
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Eeg => "EEG",
            ChannelType::Ekg => "EKG",
            ChannelType::HeartRate => "HR",
        }
    }

    /// Parse a `chan_type` cell
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "EEG" => Some(ChannelType::Eeg),
            "EKG" => Some(ChannelType::Ekg),
            "HR" => Some(ChannelType::HeartRate),
            _ => None,
        }
    }
}

/// One row of the NWB electrode table
#[derive(Debug, Clone, PartialEq)]
pub struct ElectrodeRecord {
    /// Stable key: the row index in the metadata sheet
    pub id: usize,
    /// LEPTO x coordinate
    pub x: f64,
    /// LEPTO y coordinate
    pub y: f64,
    /// LEPTO z coordinate
    pub z: f64,
    /// Impedance (unknown, -1)
    pub impedance: f64,
    /// Anatomical location (FreeSurfer volume label)
    pub location: String,
    /// FreeSurfer surface label
    pub label: String,
    /// Filtering applied before digitization
    pub filtering: String,
    /// Electrode group this contact belongs to
    pub group: String,
    /// Channel type
    pub channel_type: ChannelType,
    /// Contact lies in the seizure onset zone
    pub seizure_onset: bool,
    /// Contact shows interictal activity
    pub interictal_activity: bool,
    /// Intracranial electrode spec
    pub spec: String,
    /// Contact lies outside the brain
    pub outside_brain: bool,
    /// Contact flagged as bad
    pub bad: bool,
}

/// Arena of electrode records keyed by their explicit id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElectrodeTable {
    records: Vec<ElectrodeRecord>,
}

impl ElectrodeTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Ids must be strictly increasing.
    pub fn push(&mut self, record: ElectrodeRecord) -> AppResult<()> {
        if let Some(last) = self.records.last() {
            if record.id <= last.id {
                return Err(ConvertError::ElectrodeOrder {
                    id: record.id,
                    previous: last.id,
                });
            }
        }
        self.records.push(record);
        Ok(())
    }

    /// Records in table order
    pub fn records(&self) -> &[ElectrodeRecord] {
        &self.records
    }

    /// Look a record up by its id
    pub fn get(&self, id: usize) -> Option<&ElectrodeRecord> {
        self.records
            .binary_search_by_key(&id, |r| r.id)
            .ok()
            .map(|pos| &self.records[pos])
    }

    /// Table position of a record id
    pub fn position(&self, id: usize) -> Option<usize> {
        self.records.binary_search_by_key(&id, |r| r.id).ok()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the table holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record ids in table order
    pub fn ids(&self) -> Vec<usize> {
        self.records.iter().map(|r| r.id).collect()
    }
}

/// A named index range into the electrode table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectrodeTableRegion {
    /// Region name, also used as its description
    pub name: String,
    /// Table positions covered by the region
    pub range: Range<usize>,
}

impl ElectrodeTableRegion {
    /// Table positions as a list, the way NWB stores them
    pub fn indices(&self) -> Vec<usize> {
        self.range.clone().collect()
    }

    /// Number of electrodes in the region
    pub fn len(&self) -> usize {
        self.range.len()
    }

    /// True when the region covers no electrode
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// True when a label names a reference contact
pub fn is_reference(label: &str) -> bool {
    label.contains(REFERENCE_MARKER)
}

/// Position of the first reference row, or the row count when there is none
pub fn eeg_boundary<'a, I>(labels: I) -> usize
where
    I: IntoIterator<Item = &'a str>,
{
    let mut boundary = 0;
    for label in labels {
        if is_reference(label) {
            break;
        }
        boundary += 1;
    }
    boundary
}

/// EEG region of a sheet: `[0, first Ref row)`
pub fn eeg_region(sheet: &MetadataSheet, name: &str) -> ElectrodeTableRegion {
    let boundary = eeg_boundary(sheet.labels());
    debug!(boundary, rows = sheet.len(), "EEG/reference boundary");
    ElectrodeTableRegion {
        name: name.to_string(),
        range: 0..boundary,
    }
}

/// Build the electrode table from a metadata sheet
///
/// Fails with `MissingCoordinates` on the first non-reference row without a
/// usable position and with `MissingColumn` when a required column is absent.
pub fn build_electrode_table(sheet: &MetadataSheet, group: &str) -> AppResult<ElectrodeTable> {
    let coordinates = COORDINATE_COLUMNS.map(|name| sheet.column(name));
    let location_column = sheet.column(LOCATION_COLUMN);
    let label_column = sheet.column(FS_LABEL_COLUMN);

    let mut table = ElectrodeTable::new();
    let mut skipped = 0usize;

    for row in sheet.rows() {
        let sheet_label = sheet.label(row);
        if is_reference(sheet_label) {
            skipped += 1;
            continue;
        }

        let [Some(cx), Some(cy), Some(cz)] = coordinates else {
            return Err(ConvertError::MissingCoordinates {
                row: row.index,
                label: sheet_label.to_string(),
            });
        };
        let x = coordinate(row, cx, sheet_label)?;
        let y = coordinate(row, cy, sheet_label)?;
        let z = coordinate(row, cz, sheet_label)?;

        let location_column =
            location_column.ok_or_else(|| ConvertError::MissingColumn(LOCATION_COLUMN.into()))?;
        let label_column =
            label_column.ok_or_else(|| ConvertError::MissingColumn(FS_LABEL_COLUMN.into()))?;

        let spec = fixed_cell(row, SPEC_POSITION)?.to_string();
        let outside_raw = fixed_cell(row, OUTSIDE_BRAIN_POSITION)?;
        let outside_brain = parse_flag(outside_raw).ok_or_else(|| ConvertError::InvalidCell {
            row: row.index,
            column: sheet
                .headers()
                .get(OUTSIDE_BRAIN_POSITION)
                .cloned()
                .unwrap_or_else(|| format!("column {OUTSIDE_BRAIN_POSITION}")),
            value: outside_raw.to_string(),
        })?;

        table.push(ElectrodeRecord {
            id: row.index,
            x,
            y,
            z,
            impedance: UNKNOWN_IMPEDANCE,
            location: row.cell(location_column).unwrap_or("").to_string(),
            label: row.cell(label_column).unwrap_or("").to_string(),
            filtering: "none".to_string(),
            group: group.to_string(),
            channel_type: ChannelType::Eeg,
            seizure_onset: false,
            interictal_activity: false,
            spec,
            outside_brain,
            bad: false,
        })?;
    }

    info!(
        electrodes = table.len(),
        references = skipped,
        "Built electrode table"
    );
    Ok(table)
}

fn coordinate(row: &MetadataRow, position: usize, label: &str) -> AppResult<f64> {
    row.cell(position)
        .filter(|c| !c.is_empty())
        .and_then(|c| c.parse::<f64>().ok())
        .filter(|v| !v.is_nan())
        .ok_or_else(|| ConvertError::MissingCoordinates {
            row: row.index,
            label: label.to_string(),
        })
}

fn fixed_cell(row: &MetadataRow, position: usize) -> AppResult<&str> {
    row.cell(position)
        .ok_or_else(|| ConvertError::MissingColumn(format!("column {position}")))
}

/// Read a yes/no style cell. Empty means no.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "0.0" | "false" | "no" | "n" => Some(false),
        "1" | "1.0" | "true" | "yes" | "y" => Some(true),
        _ => None,
    }
}
