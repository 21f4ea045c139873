//! Output sinks.
//!
//! A sink is asked to reserve rows for a whole buffer up front. Rows are then
//! written by absolute index, in whatever order the workers finish them.


use std::ops::Range;

use crossbeam_channel::Receiver;
use crossbeam_utils::atomic::AtomicCell;
use log::{debug, trace};
use marlu::c32;
use ndarray::prelude::*;

use crate::{RowMeta, SinkError};

/// The cubes of one output row. Everything is `[channel][correlation]`,
/// except the per-correlation `weight` and `sigma`.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub data: Array2<c32>,
    pub flags: Array2<bool>,
    pub weight_spectrum: Option<Array2<f32>>,
    pub weight: Array1<f32>,
    pub sigma: Array1<f32>,
}

impl Plane {
    pub fn view(&self) -> PlaneView<'_> {
        PlaneView {
            data: self.data.view(),
            flags: self.flags.view(),
            weight_spectrum: self.weight_spectrum.as_ref().map(|w| w.view()),
            weight: self.weight.view(),
            sigma: self.sigma.view(),
        }
    }

    pub fn num_chans(&self) -> usize {
        self.data.len_of(Axis(0))
    }
}

/// A borrowed [`Plane`].
#[derive(Debug, Clone, Copy)]
pub struct PlaneView<'a> {
    pub data: ArrayView2<'a, c32>,
    pub flags: ArrayView2<'a, bool>,
    pub weight_spectrum: Option<ArrayView2<'a, f32>>,
    pub weight: ArrayView1<'a, f32>,
    pub sigma: ArrayView1<'a, f32>,
}

impl<'a> PlaneView<'a> {
    pub fn to_plane(self) -> Plane {
        Plane {
            data: self.data.to_owned(),
            flags: self.flags.to_owned(),
            weight_spectrum: self.weight_spectrum.map(|w| w.to_owned()),
            weight: self.weight.to_owned(),
            sigma: self.sigma.to_owned(),
        }
    }
}

/// A finished output row, addressed to an absolute row index of the sink.
#[derive(Debug, Clone)]
pub struct OutputRow {
    pub row: usize,
    pub meta: RowMeta,
    pub plane: Plane,
}

/// Something that visibilities can be written to.
pub trait VisWrite {
    /// Add `num_rows` rows to the output. Returns the indices of the new
    /// rows.
    fn extend_rows(&mut self, num_rows: usize) -> Result<Range<usize>, SinkError>;

    fn write_row_meta(&mut self, row: usize, meta: &RowMeta) -> Result<(), SinkError>;

    fn write_plane(&mut self, row: usize, plane: PlaneView) -> Result<(), SinkError>;
}

/// A sink that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    /// Refuse to hold more rows than this.
    max_rows: Option<usize>,

    metas: Vec<Option<RowMeta>>,
    planes: Vec<Option<Plane>>,
}

impl MemoryWriter {
    pub fn new() -> MemoryWriter {
        MemoryWriter::default()
    }

    pub fn with_max_rows(max_rows: usize) -> MemoryWriter {
        MemoryWriter {
            max_rows: Some(max_rows),
            ..Default::default()
        }
    }

    pub fn num_rows(&self) -> usize {
        self.metas.len()
    }

    /// A row, if both its metadata and its plane have been written.
    pub fn row(&self, row: usize) -> Option<(&RowMeta, &Plane)> {
        match (self.metas.get(row), self.planes.get(row)) {
            (Some(Some(meta)), Some(Some(plane))) => Some((meta, plane)),
            _ => None,
        }
    }

    /// Every row, in order. `None` for rows that were reserved but never
    /// fully written.
    pub fn rows(&self) -> Vec<Option<(&RowMeta, &Plane)>> {
        (0..self.num_rows()).map(|i| self.row(i)).collect()
    }

    fn check_row(&self, row: usize) -> Result<(), SinkError> {
        if row < self.num_rows() {
            Ok(())
        } else {
            Err(SinkError::RowOutOfRange {
                row,
                reserved: 0..self.num_rows(),
            })
        }
    }
}

impl VisWrite for MemoryWriter {
    fn extend_rows(&mut self, num_rows: usize) -> Result<Range<usize>, SinkError> {
        let start = self.num_rows();
        let end = start + num_rows;
        if let Some(max_rows) = self.max_rows {
            if end > max_rows {
                return Err(SinkError::Extend {
                    requested: num_rows,
                    reason: format!("the sink is limited to {max_rows} rows"),
                });
            }
        }
        self.metas.resize(end, None);
        self.planes.resize(end, None);
        Ok(start..end)
    }

    fn write_row_meta(&mut self, row: usize, meta: &RowMeta) -> Result<(), SinkError> {
        self.check_row(row)?;
        self.metas[row] = Some(meta.clone());
        Ok(())
    }

    fn write_plane(&mut self, row: usize, plane: PlaneView) -> Result<(), SinkError> {
        self.check_row(row)?;
        self.planes[row] = Some(plane.to_plane());
        Ok(())
    }
}

/// Receive finished rows from other threads and write them to `sink`. Every
/// row must lie within `reserved`.
///
/// # Arguments
///
/// * `rx` - the channel to receive rows from. Writing stops when every
///   sender has hung up.
/// * `error` - a thread-safe [`bool`] to indicate if an error has occurred.
///   If this is `true`, another thread has failed and nothing more is
///   written. It is set when writing fails.
///
/// # Returns
///
/// * The number of rows written.
pub fn write_vis<W: VisWrite + ?Sized>(
    sink: &mut W,
    reserved: Range<usize>,
    rx: Receiver<Vec<OutputRow>>,
    error: &AtomicCell<bool>,
) -> Result<usize, SinkError> {
    let mut num_written = 0;
    for rows in rx.iter() {
        // Should we continue?
        if error.load() {
            return Ok(num_written);
        }

        for row in rows {
            trace!("Writing row {}", row.row);
            let result = if reserved.contains(&row.row) {
                sink.write_row_meta(row.row, &row.meta)
                    .and_then(|()| sink.write_plane(row.row, row.plane.view()))
            } else {
                Err(SinkError::RowOutOfRange {
                    row: row.row,
                    reserved: reserved.clone(),
                })
            };
            if let Err(e) = result {
                error.store(true);
                return Err(e);
            }
            num_written += 1;
        }
    }

    debug!("Wrote {num_written} rows into {reserved:?}");
    Ok(num_written)
}
