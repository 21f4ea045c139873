//! Row-chunk providers.


use std::{
    collections::{HashMap, VecDeque},
    ops::Range,
};

use log::{debug, trace};
use ndarray::prelude::*;

use crate::{
    averaging::{timestamps_to_timeblocks, unique_timestamps},
    plan::Plan,
    DataInconsistencyError, ReadError, VisibilityBuffer,
};

/// Something that yields [`VisibilityBuffer`]s, one at a time.
///
/// Buffers must be sorted by the plan's sort columns, carry only the selected
/// channels of each band and hold whole time blocks: a baseline's time block
/// may not be split across buffers.
pub trait VisRead {
    /// The next buffer, or `None` when there are no more rows.
    fn next_buffer(&mut self) -> Result<Option<VisibilityBuffer>, ReadError>;
}

/// The rows of one time block of one group of sort-column ids. Units are
/// never split across buffers.
#[derive(Debug)]
struct Unit {
    rows: Vec<usize>,

    /// The number of selected channels.
    num_chans: usize,
}

/// A provider over a buffer that is already in memory. The rows are sorted by
/// the plan's sort columns, rows of bands outside the plan are dropped and
/// each band's channel selection is applied.
#[derive(Debug)]
pub struct MemoryReader {
    source: VisibilityBuffer,
    units: VecDeque<Unit>,

    /// The selected channels of each band.
    selections: HashMap<u32, Range<usize>>,

    /// The most rows that go into one buffer. A single time block larger
    /// than this still goes into one buffer.
    max_rows: usize,
}

impl MemoryReader {
    pub fn new(
        source: VisibilityBuffer,
        plan: &Plan,
        max_rows: usize,
    ) -> Result<MemoryReader, ReadError> {
        source.validate()?;

        let mut keyed = Vec::with_capacity(source.num_rows());
        for (i_row, row) in source.rows.iter().enumerate() {
            let band = match plan.bands.get(&row.band) {
                Some(b) => b,
                None => continue,
            };
            if band.input.num_chans() != source.num_chans() {
                return Err(DataInconsistencyError::ChannelCount {
                    band: row.band,
                    got: source.num_chans(),
                    expected: band.input.num_chans(),
                }
                .into());
            }
            keyed.push((plan.group_ids(row), row.timestamp, i_row));
        }
        let num_dropped = source.num_rows() - keyed.len();
        if num_dropped > 0 {
            debug!("Dropping {num_dropped} rows that belong to unselected bands");
        }

        // A stable sort keeps the original baseline order within a timestamp.
        keyed.sort_by(|(ids_a, t_a, _), (ids_b, t_b, _)| {
            ids_a
                .cmp(ids_b)
                .then(t_a.to_gpst_seconds().total_cmp(&t_b.to_gpst_seconds()))
        });

        let mut units = VecDeque::new();
        let mut start = 0;
        while start < keyed.len() {
            let ids = &keyed[start].0;
            let end = start + keyed[start..].iter().take_while(|(i, _, _)| i == ids).count();
            let segment = &keyed[start..end];

            let timestamps = unique_timestamps(segment.iter().map(|(_, t, _)| t));
            let timeblocks = timestamps_to_timeblocks(&timestamps, plan.time_bin);
            let mut i_row = 0;
            for timeblock in timeblocks {
                let last = timeblock.timestamps.last().to_gpst_seconds();
                let rows: Vec<usize> = segment[i_row..]
                    .iter()
                    .take_while(|(_, t, _)| t.to_gpst_seconds() <= last)
                    .map(|&(_, _, r)| r)
                    .collect();
                i_row += rows.len();

                let band = source.rows[rows[0]].band;
                let num_chans = plan.bands[&band].selection.len();
                units.push_back(Unit { rows, num_chans });
            }
            start = end;
        }
        trace!("{} units of whole time blocks", units.len());

        Ok(MemoryReader {
            source,
            units,
            selections: plan
                .bands
                .iter()
                .map(|(&id, b)| (id, b.selection.clone()))
                .collect(),
            max_rows: max_rows.max(1),
        })
    }
}

impl VisRead for MemoryReader {
    fn next_buffer(&mut self) -> Result<Option<VisibilityBuffer>, ReadError> {
        let first = match self.units.pop_front() {
            Some(u) => u,
            None => return Ok(None),
        };
        let num_chans = first.num_chans;
        let mut rows = first.rows;
        // Buffers hold one channel count, so units with a different selection
        // width start a new buffer.
        while let Some(next) = self.units.front() {
            if rows.len() + next.rows.len() > self.max_rows || next.num_chans != num_chans {
                break;
            }
            if let Some(next) = self.units.pop_front() {
                rows.extend(next.rows);
            }
        }

        let source = &self.source;
        let num_corrs = source.num_corrs();
        let mut data = Array3::zeros((rows.len(), num_chans, num_corrs));
        let mut flags = Array3::from_elem((rows.len(), num_chans, num_corrs), false);
        let mut weight_spectrum = source
            .weight_spectrum
            .as_ref()
            .map(|_| Array3::zeros((rows.len(), num_chans, num_corrs)));
        let mut weight = Array2::zeros((rows.len(), num_corrs));
        let mut sigma = Array2::zeros((rows.len(), num_corrs));
        let mut metas = Vec::with_capacity(rows.len());
        for (i_out, &i_row) in rows.iter().enumerate() {
            let row = &source.rows[i_row];
            let range = self.selections[&row.band].clone();
            data.slice_mut(s![i_out, .., ..])
                .assign(&source.data.slice(s![i_row, range.clone(), ..]));
            flags
                .slice_mut(s![i_out, .., ..])
                .assign(&source.flags.slice(s![i_row, range.clone(), ..]));
            if let (Some(out), Some(ws)) =
                (weight_spectrum.as_mut(), source.weight_spectrum.as_ref())
            {
                out.slice_mut(s![i_out, .., ..])
                    .assign(&ws.slice(s![i_row, range, ..]));
            }
            weight.row_mut(i_out).assign(&source.weight.row(i_row));
            sigma.row_mut(i_out).assign(&source.sigma.row(i_row));
            metas.push(row.clone());
        }

        debug!("Yielding a buffer of {} rows", metas.len());
        let buffer = VisibilityBuffer::new(metas, data, flags, weight_spectrum, weight, sigma)?;
        Ok(Some(buffer))
    }
}
