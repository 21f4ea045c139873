//! Spectral and time transformations of interferometric visibilities:
//! channel selection, averaging, Hanning smoothing, regridding (optionally
//! into another frequency frame), band combination and band splitting.
//!
//! A [`TransformRequest`] is validated once by [`configure`] into an
//! immutable [`Plan`]. [`run`] then pulls [`VisibilityBuffer`]s from a
//! [`read::VisRead`] provider and writes the transformed rows to a
//! [`write::VisWrite`] sink.

pub mod averaging;
mod error;
pub mod freq;
pub mod plan;
pub mod read;
pub mod regrid;
pub mod reindex;
pub mod transform;
pub mod write;

pub use error::{
    ConfigurationError, DataInconsistencyError, ReadError, SinkError, TransformError,
};
pub use plan::{configure, Plan, RegridRequest, TimeSpan, TransformRequest};
pub use transform::{run, run_with_progress};

use hifitime::{Duration, Epoch};
use marlu::{c32, UVW};
use ndarray::prelude::*;

/// The metadata of a single visibility row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowMeta {
    pub antenna1: u32,
    pub antenna2: u32,

    /// The centroid of the integration.
    pub timestamp: Epoch,

    /// The time span covered by this row.
    pub interval: Duration,

    /// The effective integration time. This can be shorter than `interval`.
    pub exposure: Duration,

    pub scan: u32,
    pub field: u32,

    /// The band (data description) this row's channels belong to.
    pub band: u32,

    pub processor: u32,

    /// The scan-intent (sub-scan state) identifier.
    pub state: u32,

    pub observation: u32,
    pub array: u32,

    /// \[metres\]
    pub uvw: UVW,

    /// Is this whole row flagged?
    pub flag_row: bool,
}

/// One chunk of visibilities, as yielded by a row-chunk provider.
///
/// All cubes are stored as `[row][channel][correlation]`, so that each row
/// owns one contiguous `[channel][correlation]` plane. Every row in a buffer
/// has the same number of channels and correlations.
#[derive(Debug, Clone)]
pub struct VisibilityBuffer {
    pub rows: Vec<RowMeta>,

    /// `[row][channel][correlation]`
    pub data: Array3<c32>,

    /// `[row][channel][correlation]`
    pub flags: Array3<bool>,

    /// `[row][channel][correlation]`. When this is absent, all channels of a
    /// row/correlation share that row's `weight`.
    pub weight_spectrum: Option<Array3<f32>>,

    /// `[row][correlation]`
    pub weight: Array2<f32>,

    /// `[row][correlation]`
    pub sigma: Array2<f32>,
}

impl VisibilityBuffer {
    /// Assemble a buffer, checking that all of the cubes agree on their
    /// shapes.
    pub fn new(
        rows: Vec<RowMeta>,
        data: Array3<c32>,
        flags: Array3<bool>,
        weight_spectrum: Option<Array3<f32>>,
        weight: Array2<f32>,
        sigma: Array2<f32>,
    ) -> Result<VisibilityBuffer, DataInconsistencyError> {
        let buffer = VisibilityBuffer {
            rows,
            data,
            flags,
            weight_spectrum,
            weight,
            sigma,
        };
        buffer.validate()?;
        Ok(buffer)
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_chans(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn num_corrs(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    /// Check that every cube and matrix agrees with the data cube and the
    /// number of row descriptors.
    pub fn validate(&self) -> Result<(), DataInconsistencyError> {
        let (num_rows, num_chans, num_corrs) = self.data.dim();
        if num_rows != self.rows.len() {
            return Err(DataInconsistencyError::ShapeMismatch {
                cube: "data",
                got: self.data.shape().to_vec(),
                expected: vec![self.rows.len(), num_chans, num_corrs],
            });
        }
        let expected = vec![num_rows, num_chans, num_corrs];
        if self.flags.shape() != expected.as_slice() {
            return Err(DataInconsistencyError::ShapeMismatch {
                cube: "flag",
                got: self.flags.shape().to_vec(),
                expected,
            });
        }
        if let Some(ws) = self.weight_spectrum.as_ref() {
            if ws.shape() != expected.as_slice() {
                return Err(DataInconsistencyError::ShapeMismatch {
                    cube: "weight spectrum",
                    got: ws.shape().to_vec(),
                    expected,
                });
            }
        }
        for (name, m) in [("weight", &self.weight), ("sigma", &self.sigma)] {
            if m.dim() != (num_rows, num_corrs) {
                return Err(DataInconsistencyError::ShapeMismatch {
                    cube: name,
                    got: m.shape().to_vec(),
                    expected: vec![num_rows, num_corrs],
                });
            }
        }
        Ok(())
    }
}
