//! Old-to-new index maps for the re-indexable metadata dimensions, and the
//! merging of several input rows into one output row.


use std::collections::HashMap;

use hifitime::Duration;
use log::trace;
use strum_macros::{Display, EnumIter};

use crate::{averaging::average_epoch, DataInconsistencyError, RowMeta};

/// The metadata dimensions that can be re-indexed when rows are selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum IndexDimension {
    #[strum(serialize = "observation")]
    Observation,

    #[strum(serialize = "array")]
    Array,

    /// The scan-intent (sub-scan state).
    #[strum(serialize = "state")]
    State,

    #[strum(serialize = "field")]
    Field,

    #[strum(serialize = "antenna")]
    Antenna,

    /// The band (data description).
    #[strum(serialize = "band")]
    Band,
}

/// One map per dimension. `None` means the dimension is not re-indexed, and
/// every value maps to itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexMaps {
    pub observation: Option<HashMap<u32, u32>>,
    pub array: Option<HashMap<u32, u32>>,
    pub state: Option<HashMap<u32, u32>>,
    pub field: Option<HashMap<u32, u32>>,
    pub antenna: Option<HashMap<u32, u32>>,
    pub band: Option<HashMap<u32, u32>>,
}

impl IndexMaps {
    fn get(&self, dimension: IndexDimension) -> Option<&HashMap<u32, u32>> {
        match dimension {
            IndexDimension::Observation => self.observation.as_ref(),
            IndexDimension::Array => self.array.as_ref(),
            IndexDimension::State => self.state.as_ref(),
            IndexDimension::Field => self.field.as_ref(),
            IndexDimension::Antenna => self.antenna.as_ref(),
            IndexDimension::Band => self.band.as_ref(),
        }
    }

    /// The new index of `value` along `dimension`.
    pub fn map(&self, dimension: IndexDimension, value: u32) -> Result<u32, DataInconsistencyError> {
        match self.get(dimension) {
            None => Ok(value),
            Some(map) => map
                .get(&value)
                .copied()
                .ok_or(DataInconsistencyError::MissingIndex { dimension, value }),
        }
    }

    /// Copy a row, replacing every re-indexable id with its new index. The
    /// band is mapped too; callers that split or combine bands overwrite it.
    pub fn reindex_row(&self, row: &RowMeta) -> Result<RowMeta, DataInconsistencyError> {
        Ok(RowMeta {
            antenna1: self.map(IndexDimension::Antenna, row.antenna1)?,
            antenna2: self.map(IndexDimension::Antenna, row.antenna2)?,
            observation: self.map(IndexDimension::Observation, row.observation)?,
            array: self.map(IndexDimension::Array, row.array)?,
            state: self.map(IndexDimension::State, row.state)?,
            field: self.map(IndexDimension::Field, row.field)?,
            band: self.map(IndexDimension::Band, row.band)?,
            ..row.clone()
        })
    }
}

/// Collapse several input rows into one output row.
///
/// The ids and UVW come from the first row. The timestamp and exposure are
/// the means of all rows, the interval is the span covered by all rows and
/// the row is only flagged if every contributor is.
pub fn merge_rows<'a, I>(rows: I, maps: &IndexMaps) -> Result<RowMeta, DataInconsistencyError>
where
    I: IntoIterator<Item = &'a RowMeta>,
{
    let rows: Vec<&RowMeta> = rows.into_iter().collect();
    let first = rows.first().ok_or(DataInconsistencyError::EmptyGroup)?;
    let mut merged = maps.reindex_row(first)?;
    if rows.len() == 1 {
        return Ok(merged);
    }
    trace!("Merging {} rows into one", rows.len());

    // Every contributor must be mappable, even if only the first one's ids
    // are kept.
    for row in &rows[1..] {
        maps.reindex_row(row)?;
    }

    let num_rows = rows.len() as f64;
    merged.exposure = Duration::from_seconds(
        rows.iter().map(|r| r.exposure.to_seconds()).sum::<f64>() / num_rows,
    );

    let start = rows
        .iter()
        .map(|r| r.timestamp - r.interval / 2)
        .min_by(|a, b| a.to_gpst_seconds().total_cmp(&b.to_gpst_seconds()));
    let end = rows
        .iter()
        .map(|r| r.timestamp + r.interval / 2)
        .max_by(|a, b| a.to_gpst_seconds().total_cmp(&b.to_gpst_seconds()));
    if let (Some(start), Some(end)) = (start, end) {
        merged.interval = end - start;
    }

    if let Some(timestamp) = average_epoch(rows.iter().map(|r| &r.timestamp)) {
        merged.timestamp = timestamp;
    }
    merged.flag_row = rows.iter().all(|r| r.flag_row);
    Ok(merged)
}
