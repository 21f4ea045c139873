//! The composed per-stripe transform.

use strum_macros::Display;

use crate::{
    averaging::{average, hanning_smooth, AverageKernel, Stripe, StripeMut, StripeView},
    regrid::{regrid, InterpolationMethod},
};

/// Which stripe kernels run, in order. Averaging always runs before
/// smoothing, and both run before regridding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StripeTransform {
    #[strum(serialize = "copy")]
    Copy,

    #[strum(serialize = "average")]
    Average,

    #[strum(serialize = "smooth")]
    Smooth,

    #[strum(serialize = "regrid")]
    Regrid,

    #[strum(serialize = "average + smooth")]
    AverageSmooth,

    #[strum(serialize = "average + regrid")]
    AverageRegrid,

    #[strum(serialize = "smooth + regrid")]
    SmoothRegrid,

    #[strum(serialize = "average + smooth + regrid")]
    AverageSmoothRegrid,
}

/// The parameters of a regridding stage.
#[derive(Debug, Clone, Copy)]
pub struct RegridStage<'a> {
    pub method: InterpolationMethod,
    pub source: &'a [f64],
    pub target: &'a [f64],

    /// \[channels\]. Only used by [`InterpolationMethod::FftShift`].
    pub shift: f64,

    pub weight_scale: f32,
}

/// Everything the stages of a [`StripeTransform`] need to know about one
/// band.
#[derive(Debug, Clone, Copy)]
pub struct StripeStages<'a> {
    pub average_width: usize,
    pub kernel: AverageKernel,

    /// The length of a stripe after averaging.
    pub averaged_len: usize,

    /// Absent if no regridding is done. The regridding stages then copy.
    pub regrid: Option<RegridStage<'a>>,
}

impl StripeTransform {
    pub fn select(average: bool, smooth: bool, regrid: bool) -> StripeTransform {
        match (average, smooth, regrid) {
            (false, false, false) => StripeTransform::Copy,
            (true, false, false) => StripeTransform::Average,
            (false, true, false) => StripeTransform::Smooth,
            (false, false, true) => StripeTransform::Regrid,
            (true, true, false) => StripeTransform::AverageSmooth,
            (true, false, true) => StripeTransform::AverageRegrid,
            (false, true, true) => StripeTransform::SmoothRegrid,
            (true, true, true) => StripeTransform::AverageSmoothRegrid,
        }
    }

    /// Run the stages over `input`, writing into `output`, which must already
    /// have the final length.
    pub fn apply(self, stages: &StripeStages, input: StripeView, output: StripeMut) {
        let with_weights = input.weights.is_some();
        let averaged = |input: StripeView| {
            let mut out = Stripe::new(stages.averaged_len, with_weights);
            average(stages.average_width, stages.kernel, input, out.view_mut());
            out
        };
        let smoothed = |input: StripeView| {
            let mut out = Stripe::new(input.len(), with_weights);
            hanning_smooth(input, out.view_mut());
            out
        };

        match self {
            StripeTransform::Copy => copy(input, output),
            StripeTransform::Average => {
                average(stages.average_width, stages.kernel, input, output)
            }
            StripeTransform::Smooth => hanning_smooth(input, output),
            StripeTransform::Regrid => regrid_or_copy(stages, input, output),
            StripeTransform::AverageSmooth => hanning_smooth(averaged(input).view(), output),
            StripeTransform::AverageRegrid => {
                regrid_or_copy(stages, averaged(input).view(), output)
            }
            StripeTransform::SmoothRegrid => {
                regrid_or_copy(stages, smoothed(input).view(), output)
            }
            StripeTransform::AverageSmoothRegrid => {
                let averaged = averaged(input);
                regrid_or_copy(stages, smoothed(averaged.view()).view(), output)
            }
        }
    }
}

fn copy(input: StripeView, output: StripeMut) {
    output.data.copy_from_slice(input.data);
    output.flags.copy_from_slice(input.flags);
    if let (Some(out_w), Some(in_w)) = (output.weights, input.weights) {
        out_w.copy_from_slice(in_w);
    }
}

fn regrid_or_copy(stages: &StripeStages, input: StripeView, output: StripeMut) {
    match stages.regrid {
        Some(r) => regrid(
            r.method,
            r.source,
            r.target,
            r.shift,
            r.weight_scale,
            input,
            output,
        ),
        None => copy(input, output),
    }
}
