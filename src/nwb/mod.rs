//! Neurodata Without Borders output.
//!
//! [`model`] holds the logical file, [`writer`] the storage seam with an
//! in-memory implementation, and [`hdf5`] the on-disk HDF5 layout.

pub mod hdf5;
pub mod model;
pub mod writer;

pub use self::hdf5::Hdf5NwbWriter;
pub use model::{Acquisition, Device, ElectricalSeries, ElectrodeGroup, NwbFile};
pub use writer::{InMemoryNwbWriter, TimeSeriesWriter};
