//! Logical structure of an NWB file.
//!
//! These types describe what goes into the file, independent of how it is laid
//! out on disk. The writers in [`super::writer`] turn them into bytes.

use crate::electrodes::{ElectrodeTable, ElectrodeTableRegion};
use crate::error::{AppResult, ConvertError};
use crate::stream::TimeSeries;
use chrono::{DateTime, Utc};
use std::ops::Range;
use tracing::{debug, warn};

/// NWB schema version written to the file root
pub const NWB_VERSION: &str = "2.6.0";

/// Acquisition hardware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Device name
    pub name: String,
    /// Free-text description
    pub description: String,
}

/// A group of electrodes recorded by one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectrodeGroup {
    /// Group name
    pub name: String,
    /// Free-text description
    pub description: String,
    /// Anatomical location
    pub location: String,
    /// Name of the device that records the group
    pub device: String,
}

/// Voltage recordings scoped to a region of the electrode table
#[derive(Debug, Clone, PartialEq)]
pub struct ElectricalSeries {
    /// Samples and timing
    pub series: TimeSeries,
    /// Electrodes the channels were recorded from
    pub electrodes: ElectrodeTableRegion,
}

/// Unit of every electrical series
pub const ELECTRICAL_SERIES_UNIT: &str = "volts";

/// An entry of `/acquisition`
#[derive(Debug, Clone, PartialEq)]
pub enum Acquisition {
    /// Extracellular voltage series
    Electrical(ElectricalSeries),
    /// Any other time series
    Generic(TimeSeries),
}

impl Acquisition {
    /// Acquisition name
    pub fn name(&self) -> &str {
        &self.series().name
    }

    /// Underlying time series
    pub fn series(&self) -> &TimeSeries {
        match self {
            Acquisition::Electrical(es) => &es.series,
            Acquisition::Generic(ts) => ts,
        }
    }

    /// NWB neurodata type of the entry
    pub fn neurodata_type(&self) -> &'static str {
        match self {
            Acquisition::Electrical(_) => "ElectricalSeries",
            Acquisition::Generic(_) => "TimeSeries",
        }
    }
}

/// In-memory NWB file
#[derive(Debug, Clone, PartialEq)]
pub struct NwbFile {
    /// Human-readable session description
    pub session_description: String,
    /// Unique session identifier
    pub identifier: String,
    /// Start of the recording session
    pub session_start_time: DateTime<Utc>,
    /// When the file was assembled
    pub file_create_date: DateTime<Utc>,
    /// Registered devices
    pub devices: Vec<Device>,
    /// Registered electrode groups
    pub electrode_groups: Vec<ElectrodeGroup>,
    /// Electrode table
    pub electrodes: ElectrodeTable,
    /// Acquisitions in insertion order
    pub acquisitions: Vec<Acquisition>,
}

impl NwbFile {
    /// New file with the required session fields
    pub fn new(
        session_description: impl Into<String>,
        identifier: impl Into<String>,
        session_start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            session_description: session_description.into(),
            identifier: identifier.into(),
            session_start_time,
            file_create_date: Utc::now(),
            devices: Vec::new(),
            electrode_groups: Vec::new(),
            electrodes: ElectrodeTable::new(),
            acquisitions: Vec::new(),
        }
    }

    /// Register a device; registering the same name twice is a no-op
    pub fn create_device(&mut self, name: &str) -> &Device {
        if let Some(pos) = self.devices.iter().position(|d| d.name == name) {
            return &self.devices[pos];
        }
        self.devices.push(Device {
            name: name.to_string(),
            description: String::new(),
        });
        &self.devices[self.devices.len() - 1]
    }

    /// Look a device up by name
    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Register an electrode group recorded by an existing device
    pub fn create_electrode_group(
        &mut self,
        name: &str,
        description: &str,
        location: &str,
        device: &str,
    ) -> AppResult<&ElectrodeGroup> {
        if self.device(device).is_none() {
            return Err(ConvertError::UnknownDevice(device.to_string()));
        }
        self.electrode_groups.push(ElectrodeGroup {
            name: name.to_string(),
            description: description.to_string(),
            location: location.to_string(),
            device: device.to_string(),
        });
        Ok(&self.electrode_groups[self.electrode_groups.len() - 1])
    }

    /// Look an electrode group up by name
    pub fn electrode_group(&self, name: &str) -> Option<&ElectrodeGroup> {
        self.electrode_groups.iter().find(|g| g.name == name)
    }

    /// Attach the electrode table; every record must name a registered group
    pub fn set_electrodes(&mut self, electrodes: ElectrodeTable) -> AppResult<()> {
        if let Some(record) = electrodes
            .records()
            .iter()
            .find(|r| self.electrode_group(&r.group).is_none())
        {
            return Err(ConvertError::UnknownElectrodeGroup(record.group.clone()));
        }
        self.electrodes = electrodes;
        Ok(())
    }

    /// Create a named region over table positions
    pub fn create_electrode_table_region(
        &self,
        name: &str,
        range: Range<usize>,
    ) -> AppResult<ElectrodeTableRegion> {
        if range.end > self.electrodes.len() {
            return Err(ConvertError::ShapeMismatch(format!(
                "region '{name}' ends at {} but the electrode table has {} rows",
                range.end,
                self.electrodes.len()
            )));
        }
        Ok(ElectrodeTableRegion {
            name: name.to_string(),
            range,
        })
    }

    /// Add an acquisition; names must be unique
    pub fn add_acquisition(&mut self, acquisition: Acquisition) -> AppResult<()> {
        if self.acquisition(acquisition.name()).is_some() {
            return Err(ConvertError::DuplicateAcquisition(
                acquisition.name().to_string(),
            ));
        }
        if let Acquisition::Electrical(es) = &acquisition {
            if es.series.num_channels() != es.electrodes.len() {
                warn!(
                    series = %es.series.name,
                    channels = es.series.num_channels(),
                    electrodes = es.electrodes.len(),
                    "Channel count does not match the electrode region"
                );
            }
        }
        debug!(
            name = acquisition.name(),
            kind = acquisition.neurodata_type(),
            shape = ?acquisition.series().data.dim(),
            "Added acquisition"
        );
        self.acquisitions.push(acquisition);
        Ok(())
    }

    /// Look an acquisition up by name
    pub fn acquisition(&self, name: &str) -> Option<&Acquisition> {
        self.acquisitions.iter().find(|a| a.name() == name)
    }
}
