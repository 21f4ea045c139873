//! Planning of intermediate and output channel grids.

use hifitime::Epoch;
use itertools::Itertools;
use log::{debug, info};
use marlu::constants::VEL_C;
use strum_macros::{Display, EnumIter, EnumString};

use super::{BandDescriptor, FrameContext, FreqFrame};
use crate::{averaging::averaged_len, ConfigurationError};

/// How velocities are related to frequencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum VelocityConvention {
    /// v = c (1 - f/f0)
    #[strum(serialize = "radio")]
    Radio,

    /// v = c (f0/f - 1)
    #[strum(serialize = "optical")]
    Optical,
}

impl VelocityConvention {
    fn to_freq(self, rest_frequency: f64, velocity: f64) -> f64 {
        match self {
            VelocityConvention::Radio => rest_frequency * (1.0 - velocity / VEL_C),
            VelocityConvention::Optical => rest_frequency / (1.0 + velocity / VEL_C),
        }
    }
}

/// The ways of specifying a regridded output grid. All output grids are
/// uniform and ascending in frequency.
#[derive(Debug, Clone, PartialEq)]
pub enum RegridMode {
    /// This many equal channels across the input span.
    NumChannels(usize),

    /// Explicit channels \[Hz\]. Anything left unspecified is derived from the
    /// input: the width defaults to the input resolution, the first channel
    /// starts at the lowest input edge and the channel count fills the span.
    Frequency {
        start: Option<f64>,
        width: Option<f64>,
        num_chans: Option<usize>,
    },

    /// Channels evenly spaced in velocity \[m/s\], relative to a rest
    /// frequency \[Hz\].
    Velocity {
        rest_frequency: f64,
        start: f64,
        width: f64,
        num_chans: usize,
        convention: VelocityConvention,
    },
}

/// The frequency extent of one or more bands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpan {
    pub lower: f64,
    pub upper: f64,

    /// The mean channel width \[Hz\].
    pub resolution: f64,
}

impl GridSpan {
    pub fn of_band(band: &BandDescriptor) -> GridSpan {
        GridSpan {
            lower: band.lower_edge(),
            upper: band.upper_edge(),
            resolution: band.resolution(),
        }
    }

    /// The span of several bands, with the coarsest resolution among them.
    pub fn of_bands(bands: &[BandDescriptor]) -> GridSpan {
        GridSpan {
            lower: bands.iter().map(|b| b.lower_edge()).fold(f64::INFINITY, f64::min),
            upper: bands
                .iter()
                .map(|b| b.upper_edge())
                .fold(f64::NEG_INFINITY, f64::max),
            resolution: bands.iter().map(|b| b.resolution()).fold(0.0, f64::max),
        }
    }
}

fn positive(what: &'static str, value: f64) -> Result<f64, ConfigurationError> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(ConfigurationError::NonPositiveRegrid { what, value })
    }
}

fn positive_count(what: &'static str, count: usize) -> Result<usize, ConfigurationError> {
    if count == 0 {
        Err(ConfigurationError::NonPositiveRegrid { what, value: 0.0 })
    } else {
        Ok(count)
    }
}

/// Compute the uniform output grid for `mode` over `span`.
pub fn output_grid(
    span: &GridSpan,
    mode: &RegridMode,
    id: u32,
    frame: FreqFrame,
) -> Result<BandDescriptor, ConfigurationError> {
    let (first_centre, width, num_chans) = match *mode {
        RegridMode::NumChannels(n) => {
            let n = positive_count("channel count", n)?;
            let width = (span.upper - span.lower) / n as f64;
            (span.lower + width / 2.0, width, n)
        }

        RegridMode::Frequency {
            start,
            width,
            num_chans,
        } => {
            let width = positive("width", width.unwrap_or(span.resolution))?;
            let start = start.unwrap_or(span.lower + width / 2.0);
            let num_chans = match num_chans {
                Some(n) => positive_count("channel count", n)?,
                None => {
                    let fit = (span.upper - (start - width / 2.0)) / width + 1e-6;
                    if fit < 1.0 {
                        return Err(ConfigurationError::EmptyOutputGrid);
                    }
                    fit.floor() as usize
                }
            };
            (start, width, num_chans)
        }

        RegridMode::Velocity {
            rest_frequency,
            start,
            width,
            num_chans,
            convention,
        } => {
            let rest_frequency = positive("rest frequency", rest_frequency)?;
            let num_chans = positive_count("channel count", num_chans)?;
            if width == 0.0 || !width.is_finite() {
                return Err(ConfigurationError::NonPositiveRegrid {
                    what: "velocity width",
                    value: width,
                });
            }
            let first = convention.to_freq(rest_frequency, start);
            let last = convention.to_freq(rest_frequency, start + (num_chans - 1) as f64 * width);
            let freq_width = if num_chans == 1 {
                (convention.to_freq(rest_frequency, start - width / 2.0)
                    - convention.to_freq(rest_frequency, start + width / 2.0))
                .abs()
            } else {
                (last - first).abs() / (num_chans - 1) as f64
            };
            // Increasing velocity means decreasing frequency; the grid is
            // always stored ascending.
            (first.min(last), freq_width, num_chans)
        }
    };

    debug!("Output grid: {num_chans} channels of {width} Hz from {first_centre} Hz");
    BandDescriptor::uniform(id, first_centre, width, num_chans, frame)
}

/// The grid after averaging `band` in groups of `width` channels. Each new
/// channel is centred on the mean of its members and is as wide as their
/// sum.
pub fn averaged_grid(
    band: &BandDescriptor,
    width: usize,
    keep_tail: bool,
) -> Result<BandDescriptor, ConfigurationError> {
    let width = width.max(1);
    let num_out = averaged_len(band.num_chans(), width, keep_tail);
    let (freqs, widths): (Vec<f64>, Vec<f64>) = (0..num_out)
        .map(|i| {
            let range = i * width..((i + 1) * width).min(band.num_chans());
            let members = range.len() as f64;
            (
                band.chan_freqs[range.clone()].iter().sum::<f64>() / members,
                band.chan_widths[range].iter().sum::<f64>(),
            )
        })
        .unzip();
    BandDescriptor::new(band.id, freqs, widths, band.frame)
}

/// When the output channels are much coarser than the input channels, the
/// input is averaged before interpolating so that no input channel is
/// skipped over. Returns the averaging width (1 means none).
pub fn auto_pre_average(input: &BandDescriptor, output: &BandDescriptor) -> usize {
    let ratio = (output.resolution() / input.resolution()).abs();
    let width = (ratio + 0.001).floor() as usize;
    if width >= 2 && 2 * width <= input.num_chans() {
        info!(
            "Band {}: output channels are {ratio:.3}x the input width; pre-averaging by {width}",
            input.id
        );
        width
    } else {
        1
    }
}

/// Express a band in another frame. Frequencies observed at `from_epoch` are
/// converted into `to` at `to_epoch`; widths scale with their channel.
pub fn convert_band(
    band: &BandDescriptor,
    context: &FrameContext,
    from_epoch: Epoch,
    to: FreqFrame,
    to_epoch: Epoch,
) -> Result<BandDescriptor, ConfigurationError> {
    let (freqs, widths): (Vec<f64>, Vec<f64>) = band
        .chan_freqs
        .iter()
        .zip_eq(band.chan_widths.iter())
        .map(|(&f, &w)| {
            let converted = context.convert(f, band.frame, from_epoch, to, to_epoch);
            (converted, w * converted / f)
        })
        .unzip();
    BandDescriptor::new(band.id, freqs, widths, to)
}
