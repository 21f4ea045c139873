//! The cube transform orchestrator.
//!
//! Each buffer from the provider is validated and gathered into baseline
//! groups. Groups are transformed in parallel and their rows are streamed to
//! a writer thread, which owns the sink. A buffer is completely written
//! before the next one is requested.

mod combine;
mod cube;
mod group;

pub(crate) use cube::Stripes;

use std::thread::scope;

use crossbeam_channel::bounded;
use crossbeam_utils::atomic::AtomicCell;
use indicatif::ProgressBar;
use log::{debug, info};
use rayon::prelude::*;

use crate::{
    plan::Plan,
    read::VisRead,
    write::{write_vis, VisWrite},
    DataInconsistencyError, TransformError, VisibilityBuffer,
};

/// Transform everything that `reader` yields and write it to `sink`. Returns
/// the number of rows written.
pub fn run<R, W>(plan: &Plan, reader: &mut R, sink: &mut W) -> Result<usize, TransformError>
where
    R: VisRead + ?Sized,
    W: VisWrite + Send + ?Sized,
{
    run_with_progress(plan, reader, sink, None, None)
}

/// [`run`], advancing `progress_bar` once per buffer. If `cancel` becomes
/// `true`, processing stops before the next buffer.
pub fn run_with_progress<R, W>(
    plan: &Plan,
    reader: &mut R,
    sink: &mut W,
    progress_bar: Option<ProgressBar>,
    cancel: Option<&AtomicCell<bool>>,
) -> Result<usize, TransformError>
where
    R: VisRead + ?Sized,
    W: VisWrite + Send + ?Sized,
{
    let mut rows_written = 0;
    let mut i_buffer = 0;
    while let Some(buffer) = reader.next_buffer()? {
        if cancel.map(|c| c.load()).unwrap_or(false) {
            info!("Cancelled after {i_buffer} buffers");
            return Err(TransformError::Cancelled);
        }
        debug!("Transforming buffer {i_buffer} ({} rows)", buffer.num_rows());
        rows_written += transform_buffer(plan, &buffer, sink)?;

        if let Some(progress_bar) = progress_bar.as_ref() {
            progress_bar.inc(1);
        }
        i_buffer += 1;
    }

    if let Some(progress_bar) = progress_bar.as_ref() {
        progress_bar.abandon_with_message("Finished transforming visibilities");
    }
    info!("Wrote {rows_written} rows from {i_buffer} buffers");
    Ok(rows_written)
}

/// Check that a buffer matches the plan.
fn validate_buffer(plan: &Plan, buffer: &VisibilityBuffer) -> Result<(), DataInconsistencyError> {
    buffer.validate()?;
    for (i_row, row) in buffer.rows.iter().enumerate() {
        let band = plan
            .bands
            .get(&row.band)
            .ok_or(DataInconsistencyError::UnplannedBand {
                row: i_row,
                band: row.band,
            })?;
        if band.selected.num_chans() != buffer.num_chans() {
            return Err(DataInconsistencyError::ChannelCount {
                band: row.band,
                got: buffer.num_chans(),
                expected: band.selected.num_chans(),
            });
        }
    }
    Ok(())
}

fn transform_buffer<W>(
    plan: &Plan,
    buffer: &VisibilityBuffer,
    sink: &mut W,
) -> Result<usize, TransformError>
where
    W: VisWrite + Send + ?Sized,
{
    validate_buffer(plan, buffer)?;
    let groups = group::group_rows(plan, buffer);
    let rows_per_group = plan.rows_per_group();
    let reserved = sink.extend_rows(groups.len() * rows_per_group)?;
    debug!("{} baseline groups into rows {reserved:?}", groups.len());

    // Groups are small, so a short queue is enough to keep the writer busy.
    let (tx, rx) = bounded(rayon::current_num_threads() * 2);
    let error = AtomicCell::new(false);
    let first_row = reserved.start;

    let (write_result, transform_result) = scope(|s| {
        let writer = s.spawn(|| write_vis(sink, reserved, rx, &error));

        let transform_result = groups
            .par_iter()
            .enumerate()
            .try_for_each_with(tx, |tx, (i_group, group)| {
                // Should we continue?
                if error.load() {
                    return Err(TransformError::Cancelled);
                }
                let rows = cube::process_group(
                    plan,
                    buffer,
                    group,
                    first_row + i_group * rows_per_group,
                )?;
                tx.send(rows).map_err(|_| TransformError::Cancelled)
            });
        if transform_result.is_err() {
            error.store(true);
        }

        let write_result = match writer.join() {
            Ok(r) => r,
            Err(e) => std::panic::resume_unwind(e),
        };
        (write_result, transform_result)
    });

    // A failed write is the root cause of any cancellation.
    let rows_written = write_result?;
    transform_result?;
    Ok(rows_written)
}
