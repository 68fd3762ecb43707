//! Electrode metadata sheet loading.
//!
//! The lab keeps electrode localizations in a spreadsheet with one row per
//! recorded contact. This module reads the first worksheet of that workbook,
//! or a delimited export of it, into raw rows without interpreting them; the
//! table builder in [`crate::electrodes`] decides what each column means.

use crate::error::{AppResult, ConvertError};
use calamine::{open_workbook_auto, Data, Range, Reader};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

/// Column that names each contact. Required in every sheet.
pub const LABEL_COLUMN: &str = "Label";

/// A raw row of the metadata sheet
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRow {
    /// Zero-based position of the row in the sheet (header excluded)
    pub index: usize,
    /// Cell contents, trimmed, in column order
    pub cells: Vec<String>,
}

impl MetadataRow {
    /// Cell at a fixed column position, if the row is long enough
    pub fn cell(&self, position: usize) -> Option<&str> {
        self.cells.get(position).map(String::as_str)
    }
}

/// All rows of an electrode metadata sheet, in file order
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataSheet {
    headers: Vec<String>,
    label_column: usize,
    rows: Vec<MetadataRow>,
}

impl MetadataSheet {
    /// Build a sheet from headers and rows, checking the `Label` column exists
    pub fn new(headers: Vec<String>, rows: Vec<MetadataRow>) -> AppResult<Self> {
        let label_column = headers
            .iter()
            .position(|h| h == LABEL_COLUMN)
            .ok_or_else(|| ConvertError::MissingColumn(LABEL_COLUMN.to_string()))?;
        Ok(Self {
            headers,
            label_column,
            rows,
        })
    }

    /// Convenience constructor from string slices, mostly for tests
    pub fn from_records(headers: &[&str], rows: &[&[&str]]) -> AppResult<Self> {
        let headers = headers.iter().map(|h| h.to_string()).collect();
        let rows = rows
            .iter()
            .enumerate()
            .map(|(index, cells)| MetadataRow {
                index,
                cells: cells.iter().map(|c| c.trim().to_string()).collect(),
            })
            .collect();
        Self::new(headers, rows)
    }

    /// Header names in column order
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Rows in file order
    pub fn rows(&self) -> &[MetadataRow] {
        &self.rows
    }

    /// Number of rows (header excluded)
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the sheet has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a named column
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Position of a named column, failing with `MissingColumn`
    pub fn require_column(&self, name: &str) -> AppResult<usize> {
        self.column(name)
            .ok_or_else(|| ConvertError::MissingColumn(name.to_string()))
    }

    /// Label of a row (empty if the row is too short to reach the column)
    pub fn label<'a>(&self, row: &'a MetadataRow) -> &'a str {
        row.cell(self.label_column).unwrap_or("")
    }

    /// Labels of every row, in file order
    pub fn labels(&self) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(move |row| self.label(row))
    }
}

/// Spreadsheet extensions read through `calamine`
pub const WORKBOOK_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// Load an electrode metadata sheet
///
/// Workbooks (see [`WORKBOOK_EXTENSIONS`]) are read from their first
/// worksheet. `.tsv` and `.txt` files are read as tab separated, `.csv` and
/// files without an extension as comma separated.
pub fn load_metadata(path: &Path) -> AppResult<MetadataSheet> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let sheet = match extension.as_str() {
        ext if WORKBOOK_EXTENSIONS.contains(&ext) => read_workbook(path)?,
        "tsv" | "txt" => read_metadata(File::open(path)?, b'\t')?,
        "csv" | "" => read_metadata(File::open(path)?, b',')?,
        other => {
            return Err(ConvertError::UnsupportedFormat(format!(
                "{} has extension '.{other}'; expected a workbook, .csv or .tsv",
                path.display()
            )))
        }
    };
    info!(
        path = %path.display(),
        rows = sheet.len(),
        columns = sheet.headers().len(),
        "Loaded electrode metadata"
    );
    Ok(sheet)
}

/// Read the first worksheet of a workbook
pub fn read_workbook(path: &Path) -> AppResult<MetadataSheet> {
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook.worksheet_range_at(0).ok_or_else(|| {
        ConvertError::UnsupportedFormat(format!("{} has no worksheets", path.display()))
    })??;
    sheet_from_range(&range)
}

/// Turn a worksheet range into a sheet; the first row holds the headers
pub fn sheet_from_range(range: &Range<Data>) -> AppResult<MetadataSheet> {
    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .map(|header| header.iter().map(cell_text).collect())
        .unwrap_or_default();
    debug!(?headers, "Worksheet headers");

    let rows = rows
        .enumerate()
        .map(|(index, cells)| MetadataRow {
            index,
            cells: cells.iter().map(cell_text).collect(),
        })
        .collect();
    MetadataSheet::new(headers, rows)
}

/// Cell as the text a delimited export would hold
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string().trim().to_string(),
    }
}

/// Read a metadata sheet from any reader
pub fn read_metadata<R: std::io::Read>(reader: R, delimiter: u8) -> AppResult<MetadataSheet> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();
    debug!(?headers, "Metadata headers");

    let mut rows = Vec::new();
    for (index, record) in csv_reader.records().enumerate() {
        let record = record?;
        rows.push(MetadataRow {
            index,
            cells: record.iter().map(str::to_string).collect(),
        });
    }

    MetadataSheet::new(headers, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_rows_in_file_order() {
        let data = "Label,LEPTO_coords_1\nA1,1.5\nRef1,0\nB2,2.5\n";
        let sheet = read_metadata(data.as_bytes(), b',').unwrap();
        assert_eq!(sheet.len(), 3);
        assert_eq!(sheet.labels().collect::<Vec<_>>(), vec!["A1", "Ref1", "B2"]);
        assert_eq!(sheet.rows()[2].index, 2);
        assert_eq!(sheet.column("LEPTO_coords_1"), Some(1));
    }

    #[test]
    fn label_column_is_required() {
        let data = "Name,x\nA1,1\n";
        let err = read_metadata(data.as_bytes(), b',').unwrap_err();
        assert!(matches!(err, ConvertError::MissingColumn(ref c) if c == "Label"));
    }

    #[test]
    fn ragged_rows_are_kept() {
        let data = "Label,a,b\nA1\nA2,1,2\n";
        let sheet = read_metadata(data.as_bytes(), b',').unwrap();
        assert_eq!(sheet.rows()[0].cells.len(), 1);
        assert_eq!(sheet.rows()[0].cell(2), None);
        assert_eq!(sheet.rows()[1].cell(2), Some("2"));
    }

    #[test]
    fn byte_order_mark_is_stripped() {
        let data = "\u{feff}Label,x\nA1,1\n";
        let sheet = read_metadata(data.as_bytes(), b',').unwrap();
        assert_eq!(sheet.column(LABEL_COLUMN), Some(0));
    }

    #[test]
    fn tab_separated_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("electrodes.tsv");
        let mut file = File::create(&path).unwrap();
        write!(file, "Label\tFS_label\nA1\tctx-lh-insula\n").unwrap();

        let sheet = load_metadata(&path).unwrap();
        assert_eq!(sheet.headers(), &["Label".to_string(), "FS_label".to_string()]);
        assert_eq!(sheet.rows()[0].cell(1), Some("ctx-lh-insula"));
    }

    #[test]
    fn worksheet_cells_become_text() {
        let mut range = Range::new((0, 0), (2, 3));
        for (col, header) in ["Label", "LEPTO_coords_1", "FS_label", "Out"].iter().enumerate() {
            range.set_value((0, col as u32), Data::String(header.to_string()));
        }
        range.set_value((1, 0), Data::String(" LTG1 ".into()));
        range.set_value((1, 1), Data::Float(-52.25));
        range.set_value((1, 3), Data::Float(1.0));
        range.set_value((2, 0), Data::String("Ref1".into()));
        range.set_value((2, 3), Data::Int(0));

        let sheet = sheet_from_range(&range).unwrap();
        assert_eq!(sheet.headers().len(), 4);
        assert_eq!(sheet.labels().collect::<Vec<_>>(), vec!["LTG1", "Ref1"]);
        assert_eq!(sheet.rows()[0].cells, vec!["LTG1", "-52.25", "", "1"]);
        assert_eq!(sheet.rows()[1].cell(3), Some("0"));
        assert_eq!(sheet.rows()[1].index, 1);
    }

    #[test]
    fn worksheet_without_label_header_is_rejected() {
        let mut range = Range::new((0, 0), (1, 0));
        range.set_value((0, 0), Data::String("Name".into()));
        range.set_value((1, 0), Data::String("LTG1".into()));
        let err = sheet_from_range(&range).unwrap_err();
        assert!(matches!(err, ConvertError::MissingColumn(ref c) if c == "Label"));
    }

    #[test]
    fn corrupt_workbook_is_a_workbook_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("electrodes.xlsx");
        std::fs::write(&path, b"PK").unwrap();
        let err = load_metadata(&path).unwrap_err();
        assert!(matches!(err, ConvertError::Workbook(_)));
    }

    #[test]
    fn unknown_extensions_are_rejected() {
        let err = load_metadata(Path::new("electrodes.json")).unwrap_err();
        assert!(matches!(err, ConvertError::UnsupportedFormat(ref m) if m.contains(".json")));
    }
}
