//! Combination of several bands onto one continuous channel grid.

use std::collections::BTreeMap;

use log::{debug, warn};

use super::{BandDescriptor, FreqFrame, GridSpan};
use crate::ConfigurationError;

/// Overlaps this close to a whole output channel are treated as whole.
const UNITY_TOLERANCE: f64 = 1e-9;

/// How much one source channel contributes to one combined channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelContribution {
    pub source_band: u32,
    pub source_channel: usize,
    pub output_channel: usize,

    /// The length of the intersection of the source and output channels,
    /// divided by the output channel width.
    pub overlap: f64,

    /// Whether this contribution is flagged. This is always `false` in a
    /// [`CombinationMap`]; it is filled in per sample while combining.
    pub flag: bool,
}

impl ChannelContribution {
    pub fn is_unity(&self) -> bool {
        self.overlap >= 1.0
    }
}

/// All contributions to each channel of a combined grid.
#[derive(Debug, Clone)]
pub struct CombinationMap {
    /// The combined grid.
    pub grid: BandDescriptor,

    /// The contributions to each output channel, in order of source channel
    /// centre frequency.
    pub contributions: Vec<Vec<ChannelContribution>>,
}

struct SourceChannel {
    band: u32,
    channel: usize,
    centre: f64,
    lower: f64,
    upper: f64,
}

/// The contributions of every source channel of `bands` to each channel of
/// `grid`.
fn overlaps(bands: &[BandDescriptor], grid: &BandDescriptor) -> Vec<Vec<ChannelContribution>> {
    // Merge all source channels into one list sorted by frequency.
    let mut sources: Vec<SourceChannel> = bands
        .iter()
        .flat_map(|band| {
            band.chan_freqs
                .iter()
                .zip(band.chan_widths.iter())
                .enumerate()
                .map(move |(channel, (&centre, &width))| SourceChannel {
                    band: band.id,
                    channel,
                    centre,
                    lower: centre - width.abs() / 2.0,
                    upper: centre + width.abs() / 2.0,
                })
        })
        .collect();
    sources.sort_by(|a, b| a.centre.total_cmp(&b.centre));

    grid.chan_freqs
        .iter()
        .zip(grid.chan_widths.iter())
        .enumerate()
        .map(|(output_channel, (&centre, &width))| {
            let width = width.abs();
            let lower = centre - width / 2.0;
            let upper = centre + width / 2.0;
            sources
                .iter()
                .filter_map(|s| {
                    let intersection = s.upper.min(upper) - s.lower.max(lower);
                    if intersection <= UNITY_TOLERANCE * width {
                        return None;
                    }
                    let mut overlap = intersection / width;
                    if overlap > 1.0 - UNITY_TOLERANCE {
                        overlap = 1.0;
                    }
                    Some(ChannelContribution {
                        source_band: s.band,
                        source_channel: s.channel,
                        output_channel,
                        overlap,
                        flag: false,
                    })
                })
                .collect()
        })
        .collect()
}

impl CombinationMap {
    /// Map every source channel onto the channels of `grid`. If
    /// `drop_partial_tail` is set and the last combined channel is not fully
    /// covered by source channels, it is removed from the grid.
    pub fn new(
        bands: &[BandDescriptor],
        grid: BandDescriptor,
        drop_partial_tail: bool,
    ) -> Result<CombinationMap, ConfigurationError> {
        let mut contributions = overlaps(bands, &grid);

        let mut grid = grid;
        if drop_partial_tail && contributions.len() > 1 {
            let coverage: f64 = contributions
                .last()
                .map(|c| c.iter().map(|c| c.overlap).sum())
                .unwrap_or(0.0);
            if coverage < 1.0 - UNITY_TOLERANCE {
                warn!(
                    "Dropping the last combined channel; it is only {:.1}% covered",
                    coverage * 100.0
                );
                contributions.pop();
                let n = contributions.len();
                grid = grid.select(0..n)?;
            }
        }

        debug!(
            "Combined {} bands into {} channels",
            bands.len(),
            grid.num_chans()
        );
        Ok(CombinationMap {
            grid,
            contributions,
        })
    }

    /// The same grid, fed by `bands` instead. Used when the source channels
    /// move with time.
    pub fn remapped(&self, bands: &[BandDescriptor]) -> CombinationMap {
        CombinationMap {
            grid: self.grid.clone(),
            contributions: overlaps(bands, &self.grid),
        }
    }

    pub fn num_chans(&self) -> usize {
        self.contributions.len()
    }

    /// The total overlap contributed by each source band to each output
    /// channel.
    pub fn band_overlap_sums(&self) -> BTreeMap<u32, Vec<f64>> {
        let mut sums: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        for (i_chan, contributions) in self.contributions.iter().enumerate() {
            for c in contributions {
                sums.entry(c.source_band)
                    .or_insert_with(|| vec![0.0; self.num_chans()])[i_chan] += c.overlap;
            }
        }
        sums
    }
}

/// The default combined grid: uniform channels as wide as the coarsest source
/// channel, from the lowest source edge to the highest.
pub fn combined_grid(
    bands: &[BandDescriptor],
    id: u32,
    frame: FreqFrame,
) -> Result<BandDescriptor, ConfigurationError> {
    let span = GridSpan::of_bands(bands);
    let width = bands
        .iter()
        .flat_map(|b| b.chan_widths.iter())
        .map(|w| w.abs())
        .fold(0.0, f64::max);
    let num_chans = ((span.upper - span.lower) / width - 1e-9).ceil().max(1.0) as usize;
    BandDescriptor::uniform(id, span.lower + width / 2.0, width, num_chans, frame)
}
