//! Stream adaptation: channel-major buffers to time-major series.
//!
//! Acquisition systems hand out samples as (channel × time). NWB expects the
//! leading dimension of every series to be time, so everything that reaches the
//! assembler goes through [`to_time_major`].

use crate::error::{AppResult, ConvertError};
use ndarray::{concatenate, Array2, ArrayView2, Axis};

/// A named, time-major acquisition series
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    /// Acquisition name
    pub name: String,
    /// Samples, (time × channel)
    pub data: Array2<f64>,
    /// Sampling rate in Hz
    pub rate: f64,
    /// Offset of the first sample from the session start, in seconds
    pub starting_time: f64,
    /// Free-text comments
    pub comments: String,
    /// Free-text description
    pub description: String,
    /// Data unit; `None` when the measure has no single unit
    pub unit: Option<String>,
}

impl TimeSeries {
    /// Build a series from an already time-major array
    pub fn new(name: impl Into<String>, data: Array2<f64>, rate: f64) -> Self {
        Self {
            name: name.into(),
            data,
            rate,
            starting_time: 0.0,
            comments: String::new(),
            description: String::new(),
            unit: None,
        }
    }

    /// Build a series from a (channel × time) array
    pub fn from_channel_major(name: impl Into<String>, data: ArrayView2<'_, f64>, rate: f64) -> Self {
        Self::new(name, to_time_major(data), rate)
    }

    /// Set the comments text
    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = comments.into();
        self
    }

    /// Set the description text
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the data unit
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set the starting time in seconds
    pub fn with_starting_time(mut self, starting_time: f64) -> Self {
        self.starting_time = starting_time;
        self
    }

    /// Number of samples along time
    pub fn num_samples(&self) -> usize {
        self.data.nrows()
    }

    /// Number of channels (or measures)
    pub fn num_channels(&self) -> usize {
        self.data.ncols()
    }
}

/// Transpose (channel × time) into an owned, row-major (time × channel) array
pub fn to_time_major(channel_major: ArrayView2<'_, f64>) -> Array2<f64> {
    channel_major.t().as_standard_layout().into_owned()
}

/// Stack channel-major blocks along the channel axis
///
/// Every block must have the same number of samples.
pub fn concat_channels(blocks: &[ArrayView2<'_, f64>]) -> AppResult<Array2<f64>> {
    let Some(first) = blocks.first() else {
        return Err(ConvertError::ShapeMismatch(
            "no channel blocks to concatenate".to_string(),
        ));
    };
    let samples = first.ncols();
    if let Some((i, block)) = blocks
        .iter()
        .enumerate()
        .find(|(_, b)| b.ncols() != samples)
    {
        return Err(ConvertError::ShapeMismatch(format!(
            "block {i} has {} samples per channel, block 0 has {samples}",
            block.ncols()
        )));
    }
    concatenate(Axis(0), blocks).map_err(|e| ConvertError::ShapeMismatch(e.to_string()))
}

/// The 13 Tobii measures, in the order consumers index them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeMeasure {
    /// EyePosition3d.x
    EyePositionX,
    /// EyePosition3d.y
    EyePositionY,
    /// EyePosition3d.z
    EyePositionZ,
    /// EyePosition3dRelative.x
    RelativeEyePositionX,
    /// EyePosition3dRelative.y
    RelativeEyePositionY,
    /// EyePosition3dRelative.z
    RelativeEyePositionZ,
    /// GazePoint2d.x
    GazePoint2dX,
    /// GazePoint2d.y
    GazePoint2dY,
    /// GazePoint3d.x
    GazePoint3dX,
    /// GazePoint3d.y
    GazePoint3dY,
    /// GazePoint3d.z
    GazePoint3dZ,
    /// PupilDiameter
    PupilDiameter,
    /// Validity
    Validity,
}

impl EyeMeasure {
    /// All measures in column order
    pub const ALL: [EyeMeasure; 13] = [
        EyeMeasure::EyePositionX,
        EyeMeasure::EyePositionY,
        EyeMeasure::EyePositionZ,
        EyeMeasure::RelativeEyePositionX,
        EyeMeasure::RelativeEyePositionY,
        EyeMeasure::RelativeEyePositionZ,
        EyeMeasure::GazePoint2dX,
        EyeMeasure::GazePoint2dY,
        EyeMeasure::GazePoint3dX,
        EyeMeasure::GazePoint3dY,
        EyeMeasure::GazePoint3dZ,
        EyeMeasure::PupilDiameter,
        EyeMeasure::Validity,
    ];

    /// Number of measures per sample
    pub const COUNT: usize = 13;

    /// Column of this measure in an eye-tracking series
    pub fn column(self) -> usize {
        self as usize
    }

    /// Tobii SDK name of the measure
    pub fn tobii_name(self) -> &'static str {
        match self {
            EyeMeasure::EyePositionX => "EyePosition3d.x",
            EyeMeasure::EyePositionY => "EyePosition3d.y",
            EyeMeasure::EyePositionZ => "EyePosition3d.z",
            EyeMeasure::RelativeEyePositionX => "EyePosition3dRelative.x",
            EyeMeasure::RelativeEyePositionY => "EyePosition3dRelative.y",
            EyeMeasure::RelativeEyePositionZ => "EyePosition3dRelative.z",
            EyeMeasure::GazePoint2dX => "GazePoint2d.x",
            EyeMeasure::GazePoint2dY => "GazePoint2d.y",
            EyeMeasure::GazePoint3dX => "GazePoint3d.x",
            EyeMeasure::GazePoint3dY => "GazePoint3d.y",
            EyeMeasure::GazePoint3dZ => "GazePoint3d.z",
            EyeMeasure::PupilDiameter => "PupilDiameter",
            EyeMeasure::Validity => "Validity",
        }
    }
}

/// Description attached to both eye-tracking series
pub fn eye_tracking_description() -> String {
    let measures: Vec<&str> = EyeMeasure::ALL.iter().map(|m| m.tobii_name()).collect();
    format!(
        "Data is organized in (t x m) format where t=time and m=measure. The {} measures are, in order: {}",
        EyeMeasure::COUNT,
        measures.join(" ")
    )
}

/// Concatenate channel-major eye-tracking trials into one (time × 13) array
///
/// Each trial is (13 × T_i); the result is (ΣT_i × 13).
pub fn concat_trials(trials: &[Array2<f64>]) -> AppResult<Array2<f64>> {
    if trials.is_empty() {
        return Err(ConvertError::ShapeMismatch(
            "eye-tracking capture holds no trials".to_string(),
        ));
    }
    if let Some((i, trial)) = trials
        .iter()
        .enumerate()
        .find(|(_, t)| t.nrows() != EyeMeasure::COUNT)
    {
        return Err(ConvertError::ShapeMismatch(format!(
            "trial {i} has {} measures, expected {}",
            trial.nrows(),
            EyeMeasure::COUNT
        )));
    }

    let transposed: Vec<ArrayView2<'_, f64>> = trials.iter().map(|t| t.t()).collect();
    concatenate(Axis(0), &transposed)
        .map(|a| a.as_standard_layout().into_owned())
        .map_err(|e| ConvertError::ShapeMismatch(e.to_string()))
}

/// Which eye a series was recorded from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eye {
    /// Left eye
    Left,
    /// Right eye
    Right,
}

impl Eye {
    /// Acquisition name of the eye's series
    pub fn series_name(self) -> &'static str {
        match self {
            Eye::Left => "Left Eye Tracking",
            Eye::Right => "Right Eye Tracking",
        }
    }

    fn word(self) -> &'static str {
        match self {
            Eye::Left => "left",
            Eye::Right => "right",
        }
    }
}

/// Build the eye-tracking series of one eye from its trials
pub fn eye_tracking_series(eye: Eye, trials: &[Array2<f64>], rate: f64) -> AppResult<TimeSeries> {
    let data = concat_trials(trials)?;
    Ok(TimeSeries::new(eye.series_name(), data, rate)
        .with_comments(format!(
            "Eye tracking from the {} eye using the Tobii eye tracker",
            eye.word()
        ))
        .with_description(eye_tracking_description()))
}
