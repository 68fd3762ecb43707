//! NWB 2.x on-disk layout over HDF5.
//!
//! ```text
//! /                                   NWBFile (namespace, nwb_version, object_id)
//! ├── identifier, session_description, session_start_time,
//! │   timestamps_reference_time, file_create_date
//! ├── acquisition/<series>            TimeSeries | ElectricalSeries
//! │   ├── data                        (time × channel), unit/conversion/resolution/offset
//! │   ├── starting_time               rate, unit = "seconds"
//! │   └── electrodes                  DynamicTableRegion (ElectricalSeries only)
//! ├── analysis/  processing/  stimulus/{presentation,templates}/
//! └── general/
//!     ├── devices/<device>
//!     └── extracellular_ephys/
//!         ├── <group>                 ElectrodeGroup, soft link `device`
//!         └── electrodes              DynamicTable: id + one VectorData per column,
//!                                     `group` holds object references to <group>
//! ```
//!
//! The `table` attribute of a region is an object reference to the electrode
//! table. Files are staged next to their target and renamed into place, so a
//! failed write or append leaves the previous file untouched.

use super::model::NwbFile;
use super::writer::TimeSeriesWriter;
use crate::electrodes::ElectrodeTable;
use crate::error::{AppResult, ConvertError};
use crate::stream::TimeSeries;
use std::path::Path;
#[cfg(feature = "storage_hdf5")]
use tracing::info;
use tracing::instrument;

/// Absolute path of the electrode table
pub const ELECTRODES_PATH: &str = "/general/extracellular_ephys/electrodes";

/// Writes NWB files with the HDF5 library
#[derive(Debug, Clone, Copy, Default)]
pub struct Hdf5NwbWriter;

impl Hdf5NwbWriter {
    /// New writer
    pub fn new() -> Self {
        Self
    }
}

impl TimeSeriesWriter for Hdf5NwbWriter {
    #[instrument(skip_all, fields(path = %path.display()))]
    fn write_file(&mut self, path: &Path, file: &NwbFile) -> AppResult<()> {
        #[cfg(feature = "storage_hdf5")]
        {
            layout::write_file(path, file).map_err(ConvertError::writer)?;
            info!(acquisitions = file.acquisitions.len(), "Wrote NWB file");
            Ok(())
        }
        #[cfg(not(feature = "storage_hdf5"))]
        {
            let _ = (path, file);
            Err(ConvertError::FeatureNotEnabled("storage_hdf5".to_string()))
        }
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    fn append_acquisitions(&mut self, path: &Path, series: &[TimeSeries]) -> AppResult<()> {
        let existing = self.acquisition_names(path)?;
        let mut seen = existing.clone();
        for ts in series {
            if seen.contains(&ts.name) {
                return Err(ConvertError::DuplicateAcquisition(ts.name.clone()));
            }
            seen.push(ts.name.clone());
        }
        #[cfg(feature = "storage_hdf5")]
        {
            layout::append_acquisitions(path, series).map_err(ConvertError::writer)?;
            info!(added = series.len(), "Appended acquisitions");
            Ok(())
        }
        #[cfg(not(feature = "storage_hdf5"))]
        {
            Err(ConvertError::FeatureNotEnabled("storage_hdf5".to_string()))
        }
    }

    fn acquisition_names(&self, path: &Path) -> AppResult<Vec<String>> {
        #[cfg(feature = "storage_hdf5")]
        {
            layout::acquisition_names(path).map_err(ConvertError::writer)
        }
        #[cfg(not(feature = "storage_hdf5"))]
        {
            let _ = path;
            Err(ConvertError::FeatureNotEnabled("storage_hdf5".to_string()))
        }
    }

    fn read_electrodes(&self, path: &Path) -> AppResult<ElectrodeTable> {
        #[cfg(feature = "storage_hdf5")]
        {
            layout::read_electrodes(path).map_err(ConvertError::writer)
        }
        #[cfg(not(feature = "storage_hdf5"))]
        {
            let _ = path;
            Err(ConvertError::FeatureNotEnabled("storage_hdf5".to_string()))
        }
    }
}

#[cfg(feature = "storage_hdf5")]
mod layout {
    use super::ELECTRODES_PATH;
    use crate::electrodes::{ChannelType, ElectrodeRecord, ElectrodeTable, CUSTOM_COLUMNS};
    use crate::nwb::model::{Acquisition, NwbFile, ELECTRICAL_SERIES_UNIT, NWB_VERSION};
    use crate::stream::TimeSeries;
    use anyhow::{anyhow, bail, Context, Result};
    use ::hdf5::types::VarLenUnicode;
    use ::hdf5::{File, Group, H5Type, Location, ObjectReference1, ReferencedObject};
    use std::fs;
    use std::path::Path;
    use tempfile::NamedTempFile;

    const CORE: &str = "core";
    const HDMF_COMMON: &str = "hdmf-common";
    const UNKNOWN_UNIT: &str = "unknown";
    const EPHYS_PATH: &str = "/general/extracellular_ephys";

    pub(super) fn write_file(path: &Path, nwb: &NwbFile) -> Result<()> {
        let staging = staging_file(path)?;
        if let Ok(existing) = fs::metadata(path) {
            fs::set_permissions(staging.path(), existing.permissions())?;
        }
        write_layout(staging.path(), nwb)?;
        persist(staging, path)
    }

    fn write_layout(path: &Path, nwb: &NwbFile) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        str_attr(&file, "namespace", CORE)?;
        str_attr(&file, "neurodata_type", "NWBFile")?;
        str_attr(&file, "nwb_version", NWB_VERSION)?;
        str_attr(&file, "object_id", &object_id())?;

        let start = nwb.session_start_time.to_rfc3339();
        scalar_str(&file, "identifier", &nwb.identifier)?;
        scalar_str(&file, "session_description", &nwb.session_description)?;
        scalar_str(&file, "session_start_time", &start)?;
        scalar_str(&file, "timestamps_reference_time", &start)?;
        str_dataset(&file, "file_create_date", &[nwb.file_create_date.to_rfc3339()])?;

        let acquisition = file.create_group("acquisition")?;
        file.create_group("analysis")?;
        file.create_group("processing")?;
        let stimulus = file.create_group("stimulus")?;
        stimulus.create_group("presentation")?;
        stimulus.create_group("templates")?;

        let general = file.create_group("general")?;
        let devices = general.create_group("devices")?;
        for device in &nwb.devices {
            let group = devices.create_group(&device.name)?;
            typed(&group, CORE, "Device")?;
            if !device.description.is_empty() {
                str_attr(&group, "description", &device.description)?;
            }
        }

        let ephys = general.create_group("extracellular_ephys")?;
        for electrode_group in &nwb.electrode_groups {
            let group = ephys.create_group(&electrode_group.name)?;
            typed(&group, CORE, "ElectrodeGroup")?;
            str_attr(&group, "description", &electrode_group.description)?;
            str_attr(&group, "location", &electrode_group.location)?;
            group.link_soft(
                &format!("/general/devices/{}", electrode_group.device),
                "device",
            )?;
        }
        write_electrode_table(&ephys, &nwb.electrodes)
            .context("Failed to write electrode table")?;

        for entry in &nwb.acquisitions {
            write_series(&acquisition, entry)
                .with_context(|| format!("Failed to write acquisition '{}'", entry.name()))?;
        }

        file.flush()?;
        Ok(())
    }

    pub(super) fn append_acquisitions(path: &Path, series: &[TimeSeries]) -> Result<()> {
        let staging = staging_file(path)?;
        fs::copy(path, staging.path())
            .with_context(|| format!("Failed to stage {} for appending", path.display()))?;
        append_layout(staging.path(), series)?;
        persist(staging, path)
    }

    fn append_layout(path: &Path, series: &[TimeSeries]) -> Result<()> {
        let file = File::open_rw(path)
            .with_context(|| format!("Failed to open {} for appending", path.display()))?;
        let acquisition = file
            .group("acquisition")
            .context("NWB file missing /acquisition group")?;
        for ts in series {
            write_series(&acquisition, &Acquisition::Generic(ts.clone()))
                .with_context(|| format!("Failed to write acquisition '{}'", ts.name))?;
        }
        file.flush()?;
        Ok(())
    }

    /// Empty file beside `target`, removed again unless persisted
    fn staging_file(target: &Path) -> Result<NamedTempFile> {
        let dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        tempfile::Builder::new()
            .prefix(".tdt2nwb-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .with_context(|| format!("Failed to create a staging file in {}", dir.display()))
    }

    fn persist(staging: NamedTempFile, target: &Path) -> Result<()> {
        staging
            .persist(target)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to move staged file to {}", target.display()))?;
        Ok(())
    }

    pub(super) fn acquisition_names(path: &Path) -> Result<Vec<String>> {
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let acquisition = file
            .group("acquisition")
            .context("NWB file missing /acquisition group")?;
        Ok(acquisition.member_names()?)
    }

    pub(super) fn read_electrodes(path: &Path) -> Result<ElectrodeTable> {
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let table = file
            .group(ELECTRODES_PATH)
            .context("NWB file missing electrode table")?;

        let ids = read_vec::<i64>(&table, "id")?;
        let x = read_vec::<f64>(&table, "x")?;
        let y = read_vec::<f64>(&table, "y")?;
        let z = read_vec::<f64>(&table, "z")?;
        let imp = read_vec::<f64>(&table, "imp")?;
        let location = read_strings(&table, "location")?;
        let filtering = read_strings(&table, "filtering")?;
        let group = read_strings(&table, "group_name")?;
        let group_refs = read_vec::<ObjectReference1>(&table, "group")?;
        let label = read_strings(&table, "label")?;
        let chan_type = read_strings(&table, "chan_type")?;
        let seizure_onset = read_vec::<bool>(&table, "seizure_onset")?;
        let interictal = read_vec::<bool>(&table, "interictal_activity")?;
        let out = read_vec::<bool>(&table, "out")?;
        let spec = read_strings(&table, "spec")?;
        let bad = read_vec::<bool>(&table, "bad")?;

        let n = ids.len();
        let lengths = [
            x.len(),
            y.len(),
            z.len(),
            imp.len(),
            location.len(),
            filtering.len(),
            group.len(),
            group_refs.len(),
            label.len(),
            chan_type.len(),
            seizure_onset.len(),
            interictal.len(),
            out.len(),
            spec.len(),
            bad.len(),
        ];
        if lengths.iter().any(|len| *len != n) {
            bail!("Electrode table columns have inconsistent lengths");
        }

        for (name, reference) in group.iter().zip(&group_refs) {
            let target = referenced_group(&file, reference)?;
            if target != format!("{EPHYS_PATH}/{name}") {
                bail!("Electrode group reference {target} disagrees with group_name '{name}'");
            }
        }

        let mut electrodes = ElectrodeTable::new();
        for i in 0..n {
            let channel_type = ChannelType::parse(&chan_type[i])
                .ok_or_else(|| anyhow!("Unknown channel type '{}'", chan_type[i]))?;
            let id = usize::try_from(ids[i]).context("Negative electrode id")?;
            electrodes
                .push(ElectrodeRecord {
                    id,
                    x: x[i],
                    y: y[i],
                    z: z[i],
                    impedance: imp[i],
                    location: location[i].clone(),
                    label: label[i].clone(),
                    filtering: filtering[i].clone(),
                    group: group[i].clone(),
                    channel_type,
                    seizure_onset: seizure_onset[i],
                    interictal_activity: interictal[i],
                    spec: spec[i].clone(),
                    outside_brain: out[i],
                    bad: bad[i],
                })
                .map_err(|e| anyhow!("{e}"))?;
        }
        Ok(electrodes)
    }

    fn write_electrode_table(parent: &Group, electrodes: &ElectrodeTable) -> Result<()> {
        let table = parent.create_group("electrodes")?;
        typed(&table, HDMF_COMMON, "DynamicTable")?;
        str_attr(&table, "description", "metadata about extracellular electrodes")?;

        let records = electrodes.records();
        let ids: Vec<i64> = records.iter().map(|r| r.id as i64).collect();
        let ids_ds = numeric_dataset(&table, "id", &ids)?;
        typed(&ids_ds, HDMF_COMMON, "ElementIdentifiers")?;

        let mut colnames: Vec<&str> = Vec::new();
        let mut column_f64 = |name: &'static str, description: &str, f: fn(&ElectrodeRecord) -> f64| -> Result<()> {
            let values: Vec<f64> = records.iter().map(f).collect();
            let ds = numeric_dataset(&table, name, &values)?;
            vector_data(&ds, description)?;
            colnames.push(name);
            Ok(())
        };
        column_f64("x", "x coordinate of the channel location", |r| r.x)?;
        column_f64("y", "y coordinate of the channel location", |r| r.y)?;
        column_f64("z", "z coordinate of the channel location", |r| r.z)?;
        column_f64("imp", "the impedance of the channel", |r| r.impedance)?;

        let string_columns: [(&str, &str, fn(&ElectrodeRecord) -> String); 2] = [
            ("location", "the location of channel within the subject e.g. brain region", |r| {
                r.location.clone()
            }),
            ("filtering", "description of hardware filtering", |r| r.filtering.clone()),
        ];
        for (name, description, f) in string_columns {
            let values: Vec<String> = records.iter().map(f).collect();
            let ds = str_dataset(&table, name, &values)?;
            vector_data(&ds, description)?;
            colnames.push(name);
        }

        let group_refs = records
            .iter()
            .map(|r| {
                parent
                    .reference::<ObjectReference1>(&format!("{EPHYS_PATH}/{}", r.group))
                    .with_context(|| format!("Electrode group '{}' is not in the file", r.group))
            })
            .collect::<Result<Vec<_>>>()?;
        let ds = table
            .new_dataset::<ObjectReference1>()
            .shape([group_refs.len()])
            .create("group")?;
        if !group_refs.is_empty() {
            ds.write_raw(group_refs.as_slice())?;
        }
        vector_data(&ds, "a reference to the ElectrodeGroup this electrode is a part of")?;
        colnames.push("group");

        let names: Vec<String> = records.iter().map(|r| r.group.clone()).collect();
        let ds = str_dataset(&table, "group_name", &names)?;
        vector_data(&ds, "the name of the ElectrodeGroup this electrode is a part of")?;
        colnames.push("group_name");

        for column in &CUSTOM_COLUMNS {
            let ds = match column.name {
                "label" => {
                    let v: Vec<String> = records.iter().map(|r| r.label.clone()).collect();
                    str_dataset(&table, column.name, &v)?
                }
                "chan_type" => {
                    let v: Vec<String> = records
                        .iter()
                        .map(|r| r.channel_type.as_str().to_string())
                        .collect();
                    str_dataset(&table, column.name, &v)?
                }
                "spec" => {
                    let v: Vec<String> = records.iter().map(|r| r.spec.clone()).collect();
                    str_dataset(&table, column.name, &v)?
                }
                "seizure_onset" => {
                    let v: Vec<bool> = records.iter().map(|r| r.seizure_onset).collect();
                    numeric_dataset(&table, column.name, &v)?
                }
                "interictal_activity" => {
                    let v: Vec<bool> = records.iter().map(|r| r.interictal_activity).collect();
                    numeric_dataset(&table, column.name, &v)?
                }
                "out" => {
                    let v: Vec<bool> = records.iter().map(|r| r.outside_brain).collect();
                    numeric_dataset(&table, column.name, &v)?
                }
                "bad" => {
                    let v: Vec<bool> = records.iter().map(|r| r.bad).collect();
                    numeric_dataset(&table, column.name, &v)?
                }
                other => bail!("No writer for electrode column '{other}'"),
            };
            vector_data(&ds, column.description)?;
            colnames.push(column.name);
        }

        str_list_attr(&table, "colnames", &colnames)?;
        Ok(())
    }

    fn write_series(parent: &Group, entry: &Acquisition) -> Result<()> {
        let ts = entry.series();
        let group = parent.create_group(&ts.name)?;
        typed(&group, CORE, entry.neurodata_type())?;
        str_attr(&group, "comments", &ts.comments)?;
        str_attr(&group, "description", &ts.description)?;

        let (rows, cols) = ts.data.dim();
        let standard = ts.data.as_standard_layout();
        let flat = standard
            .as_slice()
            .ok_or_else(|| anyhow!("Series '{}' is not contiguous", ts.name))?;
        let data = group.new_dataset::<f64>().shape([rows, cols]).create("data")?;
        if !flat.is_empty() {
            data.write_raw(flat)?;
        }
        let unit = match entry {
            Acquisition::Electrical(_) => ELECTRICAL_SERIES_UNIT,
            Acquisition::Generic(ts) => ts.unit.as_deref().unwrap_or(UNKNOWN_UNIT),
        };
        str_attr(&data, "unit", unit)?;
        f64_attr(&data, "conversion", 1.0)?;
        f64_attr(&data, "resolution", -1.0)?;
        f64_attr(&data, "offset", 0.0)?;

        let starting_time = group.new_dataset::<f64>().shape(()).create("starting_time")?;
        starting_time.write_scalar(&ts.starting_time)?;
        f64_attr(&starting_time, "rate", ts.rate)?;
        str_attr(&starting_time, "unit", "seconds")?;

        if let Acquisition::Electrical(es) = entry {
            let indices: Vec<i64> = es.electrodes.indices().iter().map(|i| *i as i64).collect();
            let region = numeric_dataset(&group, "electrodes", &indices)?;
            typed(&region, HDMF_COMMON, "DynamicTableRegion")?;
            str_attr(&region, "description", &es.electrodes.name)?;
            let table: ObjectReference1 = group.reference(ELECTRODES_PATH)?;
            region
                .new_attr::<ObjectReference1>()
                .create("table")?
                .write_scalar(&table)?;
        }
        Ok(())
    }

    /// Path of the group an object reference points at
    pub(super) fn referenced_group(location: &Location, reference: &ObjectReference1) -> Result<String> {
        match location.dereference(reference)? {
            ReferencedObject::Group(group) => Ok(group.name()),
            _ => bail!("Object reference does not point at a group"),
        }
    }

    fn object_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn vlu(value: &str) -> Result<VarLenUnicode> {
        Ok(value.parse::<VarLenUnicode>()?)
    }

    fn typed(location: &Location, namespace: &str, neurodata_type: &str) -> Result<()> {
        str_attr(location, "namespace", namespace)?;
        str_attr(location, "neurodata_type", neurodata_type)?;
        str_attr(location, "object_id", &object_id())
    }

    fn vector_data(location: &Location, description: &str) -> Result<()> {
        typed(location, HDMF_COMMON, "VectorData")?;
        str_attr(location, "description", description)
    }

    fn str_attr(location: &Location, name: &str, value: &str) -> Result<()> {
        location
            .new_attr::<VarLenUnicode>()
            .create(name)?
            .write_scalar(&vlu(value)?)?;
        Ok(())
    }

    fn f64_attr(location: &Location, name: &str, value: f64) -> Result<()> {
        location.new_attr::<f64>().create(name)?.write_scalar(&value)?;
        Ok(())
    }

    fn str_list_attr(location: &Location, name: &str, values: &[&str]) -> Result<()> {
        let data = values.iter().map(|v| vlu(v)).collect::<Result<Vec<_>>>()?;
        let attr = location
            .new_attr::<VarLenUnicode>()
            .shape([data.len()])
            .create(name)?;
        if !data.is_empty() {
            attr.write_raw(data.as_slice())?;
        }
        Ok(())
    }

    fn scalar_str(group: &Group, name: &str, value: &str) -> Result<()> {
        group
            .new_dataset::<VarLenUnicode>()
            .shape(())
            .create(name)?
            .write_scalar(&vlu(value)?)?;
        Ok(())
    }

    fn str_dataset<S: AsRef<str>>(group: &Group, name: &str, values: &[S]) -> Result<::hdf5::Dataset> {
        let data = values
            .iter()
            .map(|v| vlu(v.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let ds = group
            .new_dataset::<VarLenUnicode>()
            .shape([data.len()])
            .create(name)?;
        if !data.is_empty() {
            ds.write_raw(data.as_slice())?;
        }
        Ok(ds)
    }

    fn numeric_dataset<T: H5Type>(group: &Group, name: &str, values: &[T]) -> Result<::hdf5::Dataset> {
        let ds = group.new_dataset::<T>().shape([values.len()]).create(name)?;
        if !values.is_empty() {
            ds.write_raw(values)?;
        }
        Ok(ds)
    }

    fn read_vec<T: H5Type>(group: &Group, name: &str) -> Result<Vec<T>> {
        let ds = group
            .dataset(name)
            .with_context(|| format!("Electrode table missing column '{name}'"))?;
        if ds.size() == 0 {
            return Ok(Vec::new());
        }
        Ok(ds.read_raw::<T>()?)
    }

    fn read_strings(group: &Group, name: &str) -> Result<Vec<String>> {
        Ok(read_vec::<VarLenUnicode>(group, name)?
            .into_iter()
            .map(|s| s.as_str().to_string())
            .collect())
    }
}

#[cfg(all(test, not(feature = "storage_hdf5")))]
mod tests {
    use super::*;

    #[test]
    fn reports_missing_feature() {
        let mut writer = Hdf5NwbWriter::new();
        let err = writer
            .read_electrodes(Path::new("out.nwb"))
            .unwrap_err();
        assert!(matches!(err, ConvertError::FeatureNotEnabled(ref f) if f == "storage_hdf5"));
        let err = writer.append_acquisitions(Path::new("out.nwb"), &[]).unwrap_err();
        assert!(matches!(err, ConvertError::FeatureNotEnabled(_)));
    }
}
