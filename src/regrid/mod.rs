//! Resampling of stripes from one channel grid onto another.

mod fft;
mod interp;

pub use fft::fft_shift;
pub use interp::interpolate;

use itertools::Itertools;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::averaging::{Stripe, StripeMut, StripeView};

lazy_static::lazy_static! {
    pub static ref INTERPOLATION_METHODS: String = InterpolationMethod::iter().join(", ");
}

/// How samples are placed onto a new channel grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum InterpolationMethod {
    #[strum(serialize = "nearest")]
    Nearest,

    #[strum(serialize = "linear")]
    Linear,

    /// 4-point Lagrange interpolation.
    #[strum(serialize = "cubic")]
    Cubic,

    /// Natural cubic spline.
    #[strum(serialize = "spline")]
    Spline,

    /// Linear interpolation followed by a sub-channel shift in the Fourier
    /// domain.
    #[strum(serialize = "fftshift")]
    FftShift,
}

/// Resample `input`, sampled at `source` frequencies, onto `target`
/// frequencies. Target channels outside of the source domain are flagged.
/// `shift` is only used by [`InterpolationMethod::FftShift`]; it is in
/// channels, and positive values move features to higher channel indices.
/// Interpolated weights are multiplied by `weight_scale`.
pub fn regrid(
    method: InterpolationMethod,
    source: &[f64],
    target: &[f64],
    shift: f64,
    weight_scale: f32,
    input: StripeView,
    output: StripeMut,
) {
    match method {
        InterpolationMethod::FftShift => {
            let mut intermediate = Stripe::new(output.len(), output.weights.is_some());
            interpolate(
                InterpolationMethod::Linear,
                source,
                target,
                weight_scale,
                input,
                intermediate.view_mut(),
            );
            fft_shift(shift, intermediate.view(), output);
        }

        _ => interpolate(method, source, target, weight_scale, input, output),
    }
}
