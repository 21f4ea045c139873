//! Frequency grids: band descriptors, output grid planning, band combination
//! and reference-frame conversion.

mod combine;
mod frame;
mod grid;

pub use combine::{combined_grid, ChannelContribution, CombinationMap};
pub use frame::{FrameContext, FreqFrame, FREQ_FRAMES};
pub use grid::{
    auto_pre_average, averaged_grid, convert_band, output_grid, GridSpan, RegridMode,
    VelocityConvention,
};

use std::ops::Range;

use vec1::Vec1;

use crate::ConfigurationError;

/// The channels of one band.
#[derive(Debug, Clone, PartialEq)]
pub struct BandDescriptor {
    pub id: u32,

    /// The centre frequency of each channel \[Hz\]. These are strictly
    /// monotonic, but may be descending.
    pub chan_freqs: Vec1<f64>,

    /// The width of each channel \[Hz\]. Descending bands may report negative
    /// widths.
    pub chan_widths: Vec1<f64>,

    /// The reference frame that the frequencies are expressed in.
    pub frame: FreqFrame,
}

impl BandDescriptor {
    pub fn new(
        id: u32,
        chan_freqs: Vec<f64>,
        chan_widths: Vec<f64>,
        frame: FreqFrame,
    ) -> Result<BandDescriptor, ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidBand {
            id,
            reason: reason.to_string(),
        };

        if chan_freqs.len() != chan_widths.len() {
            return Err(invalid("the number of channel frequencies and widths differ"));
        }
        if chan_freqs.iter().chain(&chan_widths).any(|f| !f.is_finite()) {
            return Err(invalid("non-finite channel frequency or width"));
        }
        if chan_widths.iter().any(|&w| w == 0.0) {
            return Err(invalid("a channel has zero width"));
        }
        let ascending = chan_freqs.windows(2).all(|w| w[1] > w[0]);
        let descending = chan_freqs.windows(2).all(|w| w[1] < w[0]);
        if !ascending && !descending {
            return Err(invalid("channel frequencies are not monotonic"));
        }

        let chan_freqs = Vec1::try_from_vec(chan_freqs).map_err(|_| invalid("no channels"))?;
        let chan_widths = Vec1::try_from_vec(chan_widths).map_err(|_| invalid("no channels"))?;
        Ok(BandDescriptor {
            id,
            chan_freqs,
            chan_widths,
            frame,
        })
    }

    /// A band with `num_chans` contiguous channels of equal `width`, the first
    /// centred on `first_centre`.
    pub fn uniform(
        id: u32,
        first_centre: f64,
        width: f64,
        num_chans: usize,
        frame: FreqFrame,
    ) -> Result<BandDescriptor, ConfigurationError> {
        let freqs = (0..num_chans)
            .map(|i| first_centre + i as f64 * width)
            .collect();
        BandDescriptor::new(id, freqs, vec![width; num_chans], frame)
    }

    pub fn num_chans(&self) -> usize {
        self.chan_freqs.len()
    }

    pub fn is_ascending(&self) -> bool {
        self.chan_freqs.last() >= self.chan_freqs.first()
    }

    /// The lowest frequency covered by any channel \[Hz\].
    pub fn lower_edge(&self) -> f64 {
        self.chan_freqs
            .iter()
            .zip(self.chan_widths.iter())
            .map(|(f, w)| f - w.abs() / 2.0)
            .fold(f64::INFINITY, f64::min)
    }

    /// The highest frequency covered by any channel \[Hz\].
    pub fn upper_edge(&self) -> f64 {
        self.chan_freqs
            .iter()
            .zip(self.chan_widths.iter())
            .map(|(f, w)| f + w.abs() / 2.0)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// The sum of all channel widths \[Hz\].
    pub fn total_bandwidth(&self) -> f64 {
        self.chan_widths.iter().map(|w| w.abs()).sum()
    }

    /// The span between the outermost channel edges \[Hz\].
    pub fn effective_bandwidth(&self) -> f64 {
        self.upper_edge() - self.lower_edge()
    }

    /// The mean channel width \[Hz\].
    pub fn resolution(&self) -> f64 {
        self.total_bandwidth() / self.num_chans() as f64
    }

    /// Are all channels the same width?
    pub fn is_uniform(&self) -> bool {
        let first = self.chan_widths.first().abs();
        self.chan_widths
            .iter()
            .all(|w| (w.abs() - first).abs() <= 1e-6 * first)
    }

    /// The channels inside `range`.
    pub fn select(&self, range: Range<usize>) -> Result<BandDescriptor, ConfigurationError> {
        let bad = || ConfigurationError::BadChannelSelection {
            band: self.id,
            range: range.clone(),
            num_chans: self.num_chans(),
        };
        if range.end > self.num_chans() || range.start >= range.end {
            return Err(bad());
        }
        let chan_freqs = Vec1::try_from_vec(self.chan_freqs[range.clone()].to_vec()).map_err(|_| bad())?;
        let chan_widths = Vec1::try_from_vec(self.chan_widths[range.clone()].to_vec()).map_err(|_| bad())?;
        Ok(BandDescriptor {
            id: self.id,
            chan_freqs,
            chan_widths,
            frame: self.frame,
        })
    }

    /// Every frequency and width multiplied by a positive `factor`, e.g. a
    /// Doppler factor.
    pub fn scaled(&self, factor: f64) -> BandDescriptor {
        BandDescriptor {
            id: self.id,
            chan_freqs: self.chan_freqs.mapped_ref(|f| f * factor),
            chan_widths: self.chan_widths.mapped_ref(|w| w * factor),
            frame: self.frame,
        }
    }

    pub fn with_id(mut self, id: u32) -> BandDescriptor {
        self.id = id;
        self
    }
}
