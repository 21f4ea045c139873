//! All of the ways a transformation can fail.

use std::ops::Range;

use thiserror::Error;

use crate::reindex::IndexDimension;

/// Problems with a transformation request. These are raised by
/// [`crate::configure`] before anything is read or written.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("No bands were supplied; there is nothing to transform")]
    NoBands,

    #[error("Band {0} was supplied more than once")]
    DuplicateBand(u32),

    #[error("Band {id} is invalid: {reason}")]
    InvalidBand { id: u32, reason: String },

    #[error("Channel selection {range:?} for band {band} is outside of its {num_chans} channels")]
    BadChannelSelection {
        band: u32,
        range: Range<usize>,
        num_chans: usize,
    },

    #[error("A channel selection was given for band {0}, which is not in the band list")]
    SelectionForUnknownBand(u32),

    #[error("The channel bin width was 0; this is not permitted")]
    ZeroChannelBin,

    #[error("Got {got} channel bin widths for {expected} bands; give one width, or one per band")]
    ChannelBinCount { got: usize, expected: usize },

    #[error("Unknown averaging kernel '{0}'")]
    UnknownAverageKernel(String),

    #[error("The time bin was {0} s; it must be positive")]
    NonPositiveTimeBin(f64),

    #[error("The number of output bands was 0; this is not permitted")]
    ZeroOutputBands,

    #[error("Cannot split {num_chans} output channels into {num_bands} bands")]
    TooManyOutputBands { num_bands: usize, num_chans: usize },

    #[error("Unknown interpolation method '{0}'")]
    UnknownInterpolation(String),

    #[error("Unknown frequency reference frame '{0}'")]
    UnknownFrame(String),

    #[error("Splitting band {band} into {num_pieces} bands gives ids beyond the largest band id")]
    BandIdOverflow { band: u32, num_pieces: usize },

    #[error("Regrid {what} was {value}; it must be positive")]
    NonPositiveRegrid { what: &'static str, value: f64 },

    #[error("Converting frequencies from {from} to {to} requires a phase centre, array position and reference time, but none were supplied")]
    NoFrameContext { from: String, to: String },

    #[error("Bands to be combined must have the same number of selected channels; band {band} has {got}, expected {expected}")]
    UnequalCombinedChannels {
        band: u32,
        got: usize,
        expected: usize,
    },

    #[error("The requested output grid has no channels inside the input span")]
    EmptyOutputGrid,
}

/// Problems with the data handed to the engine while running. Any of these
/// halts processing of further buffers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataInconsistencyError {
    #[error("No {dimension} index mapping exists for value {value}")]
    MissingIndex {
        dimension: IndexDimension,
        value: u32,
    },

    #[error("The {cube} cube has shape {got:?}, but {expected:?} was expected")]
    ShapeMismatch {
        cube: &'static str,
        got: Vec<usize>,
        expected: Vec<usize>,
    },

    #[error("Row {row} belongs to band {band}, which is not part of the plan")]
    UnplannedBand { row: usize, band: u32 },

    #[error("Band {band} has {got} channels in the buffer, but the plan expects {expected}")]
    ChannelCount {
        band: u32,
        got: usize,
        expected: usize,
    },

    #[error("No contributing row was found for a baseline group")]
    EmptyGroup,
}

/// A failure reported by an output sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Could not reserve {requested} more output rows: {reason}")]
    Extend { requested: usize, reason: String },

    #[error("Output row {row} is outside of the reserved rows {reserved:?}")]
    RowOutOfRange { row: usize, reserved: Range<usize> },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

/// A failure reported by a row-chunk provider.
#[derive(Error, Debug)]
pub enum ReadError {
    #[error(transparent)]
    Inconsistent(#[from] DataInconsistencyError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

/// The error type of [`crate::run`].
#[derive(Error, Debug)]
pub enum TransformError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Data(#[from] DataInconsistencyError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("Processing was cancelled")]
    Cancelled,
}
