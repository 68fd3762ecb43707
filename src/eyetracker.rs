//! Tobii eye-tracker captures.
//!
//! A capture is an HDF5 file written by the stimulus software. Each eye is a
//! list of trials; a trial is a channel-major (13 × T) array whose rows follow
//! [`EyeMeasure::ALL`](crate::stream::EyeMeasure::ALL).

use crate::config::CaptureLayout;
use crate::error::{AppResult, ConvertError};
use crate::stream::{eye_tracking_series, Eye, TimeSeries};
use ndarray::Array2;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Trials of both eyes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EyeTrials {
    /// Left eye trials, (13 × T) each
    pub left: Vec<Array2<f64>>,
    /// Right eye trials, (13 × T) each
    pub right: Vec<Array2<f64>>,
}

impl EyeTrials {
    /// Trials of one eye
    pub fn eye(&self, eye: Eye) -> &[Array2<f64>] {
        match eye {
            Eye::Left => &self.left,
            Eye::Right => &self.right,
        }
    }

    /// Build the left and right series at `rate`
    pub fn into_series(&self, rate: f64) -> AppResult<Vec<TimeSeries>> {
        [Eye::Left, Eye::Right]
            .into_iter()
            .map(|eye| eye_tracking_series(eye, self.eye(eye), rate))
            .collect()
    }
}

/// Capability to read eye-tracker trials
pub trait EyeCaptureSource {
    /// Read the trials of both eyes from the capture at `path`
    ///
    /// Failures are reported as `ConvertError::UpstreamRead`.
    fn read_trials(&self, path: &Path) -> AppResult<EyeTrials>;
}

/// Serves pre-built trials keyed by path
#[derive(Debug, Clone, Default)]
pub struct InMemoryEyeCapture {
    captures: HashMap<PathBuf, EyeTrials>,
}

impl InMemoryEyeCapture {
    /// Empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration of a capture
    pub fn with_capture(mut self, path: impl Into<PathBuf>, trials: EyeTrials) -> Self {
        self.captures.insert(path.into(), trials);
        self
    }
}

impl EyeCaptureSource for InMemoryEyeCapture {
    fn read_trials(&self, path: &Path) -> AppResult<EyeTrials> {
        self.captures
            .get(path)
            .cloned()
            .ok_or_else(|| ConvertError::UpstreamRead(format!("no capture at {}", path.display())))
    }
}

/// Reads captures with the HDF5 library
#[derive(Debug, Clone, Default)]
pub struct Hdf5EyeCapture {
    layout: CaptureLayout,
}

impl Hdf5EyeCapture {
    /// Reader for the given layout
    pub fn new(layout: CaptureLayout) -> Self {
        Self { layout }
    }

    /// Layout the reader expects
    pub fn layout(&self) -> &CaptureLayout {
        &self.layout
    }
}

impl EyeCaptureSource for Hdf5EyeCapture {
    #[instrument(skip_all, fields(path = %path.display()))]
    fn read_trials(&self, path: &Path) -> AppResult<EyeTrials> {
        #[cfg(feature = "storage_hdf5")]
        {
            let trials = capture::read(path, &self.layout).map_err(ConvertError::upstream)?;
            debug!(
                left = trials.left.len(),
                right = trials.right.len(),
                "Read eye-tracker capture"
            );
            Ok(trials)
        }
        #[cfg(not(feature = "storage_hdf5"))]
        {
            let _ = path;
            debug!(layout = ?self.layout, "HDF5 support not compiled in");
            Err(ConvertError::FeatureNotEnabled("storage_hdf5".to_string()))
        }
    }
}

#[cfg(feature = "storage_hdf5")]
mod capture {
    use super::EyeTrials;
    use crate::config::CaptureLayout;
    use anyhow::{bail, Context, Result};
    use hdf5::{Dataset, File, Group, ObjectReference1, ReferencedObject};
    use ndarray::{Array2, Array3, Axis};
    use std::path::Path;

    pub(super) fn read(path: &Path, layout: &CaptureLayout) -> Result<EyeTrials> {
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        match layout {
            CaptureLayout::Movie { group, left, right } => {
                let group = file
                    .group(group)
                    .with_context(|| format!("Capture has no group '{group}'"))?;
                Ok(EyeTrials {
                    left: movie_trials(&group, left)?,
                    right: movie_trials(&group, right)?,
                })
            }
            CaptureLayout::Trials { group, left, right } => {
                let group = file
                    .group(group)
                    .with_context(|| format!("Capture has no group '{group}'"))?;
                Ok(EyeTrials {
                    left: per_trial(&file, &group, left)?,
                    right: per_trial(&file, &group, right)?,
                })
            }
        }
    }

    /// 2-D: one (13 × T) trial. 3-D: (13 × T × N), trial axis last.
    fn movie_trials(group: &Group, name: &str) -> Result<Vec<Array2<f64>>> {
        let ds = group
            .dataset(name)
            .with_context(|| format!("Capture has no dataset '{name}'"))?;
        match ds.shape().as_slice() {
            [_, _] => Ok(vec![read_2d(&ds)?]),
            &[measures, samples, trials] => {
                let flat = ds.read_raw::<f64>()?;
                let cube = Array3::from_shape_vec((measures, samples, trials), flat)
                    .context("Dataset size does not match its shape")?;
                Ok(cube
                    .axis_iter(Axis(2))
                    .map(|trial| trial.to_owned())
                    .collect())
            }
            other => bail!("Dataset '{name}' has unsupported shape {other:?}"),
        }
    }

    /// A cell array of trials, or a subgroup of trial datasets ordered by name
    fn per_trial(file: &File, group: &Group, name: &str) -> Result<Vec<Array2<f64>>> {
        if let Ok(cells) = group.dataset(name) {
            return cell_array(file, &cells, name);
        }
        let eye = group
            .group(name)
            .with_context(|| format!("Capture has no dataset or group '{name}'"))?;
        let mut names = eye.member_names()?;
        names.sort();
        names
            .iter()
            .map(|trial| {
                let ds = eye
                    .dataset(trial)
                    .with_context(|| format!("Trial '{trial}' is not a dataset"))?;
                read_2d(&ds).with_context(|| format!("Failed to read trial '{trial}'"))
            })
            .collect()
    }

    /// MATLAB v7.3 cell array: object references in cell order, each to one trial
    fn cell_array(file: &File, cells: &Dataset, name: &str) -> Result<Vec<Array2<f64>>> {
        let refs = cells
            .read_raw::<ObjectReference1>()
            .with_context(|| format!("'{name}' is not a cell array of object references"))?;
        refs.iter()
            .enumerate()
            .map(|(i, reference)| match file.dereference(reference)? {
                ReferencedObject::Dataset(ds) => {
                    read_2d(&ds).with_context(|| format!("Failed to read cell {i} of '{name}'"))
                }
                _ => bail!("Cell {i} of '{name}' does not reference a dataset"),
            })
            .collect()
    }

    fn read_2d(ds: &Dataset) -> Result<Array2<f64>> {
        let shape = ds.shape();
        let [rows, cols] = shape.as_slice() else {
            bail!("Expected a 2-D trial, found shape {shape:?}");
        };
        let flat = ds.read_raw::<f64>()?;
        Ok(Array2::from_shape_vec((*rows, *cols), flat)?)
    }
}
