//! Gathering the rows of a buffer into baseline groups.

use std::collections::BTreeMap;

use hifitime::Epoch;
use log::trace;

use crate::{
    averaging::{timestamps_to_timeblocks, unique_timestamps},
    plan::Plan,
    VisibilityBuffer,
};

/// Identifies a baseline group: the non-time sort-column ids, the time block
/// and the baseline.
type GroupKey = (Vec<u32>, usize, u32, u32);

/// Gather the rows of `buffer` that collapse into the same output row(s).
///
/// Time blocks are formed independently for each set of non-time sort-column
/// ids. Groups are ordered by their keys, and rows within a group keep their
/// buffer order.
pub(crate) fn group_rows(plan: &Plan, buffer: &VisibilityBuffer) -> Vec<Vec<usize>> {
    let ids: Vec<Vec<u32>> = buffer.rows.iter().map(|r| plan.group_ids(r)).collect();

    let mut segments: BTreeMap<&[u32], Vec<Epoch>> = BTreeMap::new();
    for (row, ids) in buffer.rows.iter().zip(ids.iter()) {
        segments.entry(ids.as_slice()).or_default().push(row.timestamp);
    }
    // For each segment, the unique timestamps and the time block each one
    // falls in.
    let blocks: BTreeMap<&[u32], (Vec<f64>, Vec<usize>)> = segments
        .into_iter()
        .map(|(ids, timestamps)| {
            let unique = unique_timestamps(&timestamps);
            let mut block_of = vec![0; unique.len()];
            for timeblock in timestamps_to_timeblocks(&unique, plan.time_bin) {
                for i in timeblock.range {
                    block_of[i] = timeblock.index;
                }
            }
            let unique = unique.iter().map(|t| t.to_gpst_seconds()).collect();
            (ids, (unique, block_of))
        })
        .collect();

    let mut keyed: Vec<(GroupKey, usize)> = buffer
        .rows
        .iter()
        .zip(ids.iter())
        .enumerate()
        .map(|(i_row, (row, ids))| {
            let (unique, block_of) = &blocks[ids.as_slice()];
            let t = row.timestamp.to_gpst_seconds();
            let i_time = unique
                .partition_point(|&u| u < t)
                .min(unique.len() - 1);
            let key = (ids.clone(), block_of[i_time], row.antenna1, row.antenna2);
            (key, i_row)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));

    let mut groups: Vec<Vec<usize>> = vec![];
    let mut last_key: Option<&GroupKey> = None;
    for (key, i_row) in &keyed {
        match (last_key, groups.last_mut()) {
            (Some(last), Some(group)) if last == key => group.push(*i_row),
            _ => groups.push(vec![*i_row]),
        }
        last_key = Some(key);
    }
    trace!("{} rows form {} baseline groups", buffer.num_rows(), groups.len());
    groups
}
