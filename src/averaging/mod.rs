//! Averaging and smoothing kernels that work on one 1-D stripe of samples (a
//! fixed row and correlation across channels), and helpers for bucketing
//! timestamps into time blocks.

#[cfg(test)]
mod tests;

use std::ops::Range;

use hifitime::{Duration, Epoch};
use itertools::Itertools;
use marlu::c32;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use vec1::Vec1;

lazy_static::lazy_static! {
    pub static ref AVERAGE_KERNELS: String = AverageKernel::iter().join(", ");
}

/// An owned stripe of samples. This is used for the intermediate results
/// between stripe transforms.
#[derive(Debug, Clone, PartialEq)]
pub struct Stripe {
    pub data: Vec<c32>,
    pub flags: Vec<bool>,

    /// Per-channel weights. Absent when the input has no weight spectrum.
    pub weights: Option<Vec<f32>>,
}

impl Stripe {
    /// A zeroed, unflagged stripe of length `len`.
    pub fn new(len: usize, with_weights: bool) -> Stripe {
        Stripe {
            data: vec![c32::default(); len],
            flags: vec![false; len],
            weights: with_weights.then(|| vec![0.0; len]),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn view(&self) -> StripeView<'_> {
        StripeView {
            data: &self.data,
            flags: &self.flags,
            weights: self.weights.as_deref(),
        }
    }

    pub fn view_mut(&mut self) -> StripeMut<'_> {
        StripeMut {
            data: &mut self.data,
            flags: &mut self.flags,
            weights: self.weights.as_deref_mut(),
        }
    }
}

/// A borrowed, read-only stripe.
#[derive(Debug, Clone, Copy)]
pub struct StripeView<'a> {
    pub data: &'a [c32],
    pub flags: &'a [bool],
    pub weights: Option<&'a [f32]>,
}

impl<'a> StripeView<'a> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_stripe(self) -> Stripe {
        Stripe {
            data: self.data.to_vec(),
            flags: self.flags.to_vec(),
            weights: self.weights.map(|w| w.to_vec()),
        }
    }
}

/// A borrowed, writable stripe. Kernels write into every element up to its
/// length.
#[derive(Debug)]
pub struct StripeMut<'a> {
    pub data: &'a mut [c32],
    pub flags: &'a mut [bool],
    pub weights: Option<&'a mut [f32]>,
}

impl<'a> StripeMut<'a> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// How a group of samples is reduced to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString)]
pub enum AverageKernel {
    /// Mean of all samples. Flags and weights don't affect the value.
    #[strum(serialize = "simple")]
    Simple,

    /// Mean of the unflagged samples.
    #[strum(serialize = "flags")]
    Flag,

    /// Mean of all samples, weighted by the weight spectrum. Flags are not
    /// consulted.
    #[strum(serialize = "spectrum")]
    Weight,

    /// Mean of the unflagged samples, weighted by the weight spectrum.
    #[strum(serialize = "flags+spectrum")]
    FlagWeight,
}

impl AverageKernel {
    /// The kernel used unless one is requested. Weighted averaging is only
    /// meaningful when there are per-channel weights.
    pub fn for_input(has_weight_spectrum: bool) -> AverageKernel {
        if has_weight_spectrum {
            AverageKernel::FlagWeight
        } else {
            AverageKernel::Flag
        }
    }

    /// Reduce a group of samples into (value, flag, weight).
    pub fn reduce(self, data: &[c32], flags: &[bool], weights: Option<&[f32]>) -> (c32, bool, f32) {
        match self {
            AverageKernel::Simple => simple_average(data, flags, weights),
            AverageKernel::Flag => flag_average(data, flags, weights),
            AverageKernel::Weight => weight_average(data, flags, weights),
            AverageKernel::FlagWeight => flag_weight_average(data, flags, weights),
        }
    }
}

fn unweighted_mean(data: &[c32]) -> c32 {
    if data.is_empty() {
        return c32::default();
    }
    data.iter().sum::<c32>() / data.len() as f32
}

/// The arithmetic mean of every member. The output is flagged only if every
/// member is; the weight is the sum of all weights.
pub fn simple_average(data: &[c32], flags: &[bool], weights: Option<&[f32]>) -> (c32, bool, f32) {
    let weight = weights.map(|w| w.iter().sum()).unwrap_or(0.0);
    (unweighted_mean(data), flags.iter().all(|&f| f), weight)
}

/// The arithmetic mean of the unflagged members. If every member is flagged,
/// the output is flagged and holds the mean of all members. The returned
/// weight is the sum of the weights that went into the value.
pub fn flag_average(data: &[c32], flags: &[bool], weights: Option<&[f32]>) -> (c32, bool, f32) {
    let mut sum = c32::default();
    let mut weight_sum = 0.0;
    let mut count = 0;
    for (i, (&v, &f)) in data.iter().zip(flags).enumerate() {
        if !f {
            sum += v;
            weight_sum += weights.map(|w| w[i]).unwrap_or(0.0);
            count += 1;
        }
    }

    if count > 0 {
        (sum / count as f32, false, weight_sum)
    } else {
        let all_weights = weights.map(|w| w.iter().sum()).unwrap_or(0.0);
        (unweighted_mean(data), true, all_weights)
    }
}

/// The weighted mean of every member, flagged or not. The output is flagged
/// only when the total weight is zero; then it holds the unweighted mean and
/// a weight of zero. Missing weights count as 1.
pub fn weight_average(data: &[c32], _flags: &[bool], weights: Option<&[f32]>) -> (c32, bool, f32) {
    let mut sum = c32::default();
    let mut weight_sum = 0.0;
    for (i, &v) in data.iter().enumerate() {
        let w = weights.map(|w| w[i]).unwrap_or(1.0);
        sum += v * w;
        weight_sum += w;
    }

    if weight_sum != 0.0 {
        (sum / weight_sum, false, weight_sum)
    } else {
        (unweighted_mean(data), true, 0.0)
    }
}

/// The weighted mean of the members, where flagged members have a weight of
/// zero. The output is flagged only when that total weight is zero; then it
/// holds the unweighted mean of all members and the sum of all of their
/// weights, as if the flagged members were averaged among themselves.
/// Missing weights count as 1.
pub fn flag_weight_average(
    data: &[c32],
    flags: &[bool],
    weights: Option<&[f32]>,
) -> (c32, bool, f32) {
    let mut sum = c32::default();
    let mut weight_sum = 0.0;
    let mut raw_weight_sum = 0.0;
    for (i, (&v, &f)) in data.iter().zip(flags).enumerate() {
        let w = weights.map(|w| w[i]).unwrap_or(1.0);
        raw_weight_sum += w;
        if !f {
            sum += v * w;
            weight_sum += w;
        }
    }

    if weight_sum != 0.0 {
        (sum / weight_sum, false, weight_sum)
    } else {
        (unweighted_mean(data), true, raw_weight_sum)
    }
}

/// Average contiguous groups of `width` input samples. The number of groups
/// produced is the length of `output`, which is decided by the caller: a
/// shorter trailing group is only reduced when its output slot exists,
/// otherwise it is dropped. A width of 1 copies, whatever the kernel.
pub fn average(width: usize, kernel: AverageKernel, input: StripeView, mut output: StripeMut) {
    let width = width.max(1);
    let n = input.len();
    if width == 1 && output.len() == n {
        output.data.copy_from_slice(input.data);
        output.flags.copy_from_slice(input.flags);
        if let (Some(out_w), Some(in_w)) = (output.weights.as_deref_mut(), input.weights) {
            out_w.copy_from_slice(in_w);
        }
        return;
    }
    for i_out in 0..output.len() {
        let start = i_out * width;
        if start >= n {
            output.data[i_out] = c32::default();
            output.flags[i_out] = true;
            if let Some(w) = output.weights.as_deref_mut() {
                w[i_out] = 0.0;
            }
            continue;
        }
        let end = (start + width).min(n);
        let (v, f, w) = kernel.reduce(
            &input.data[start..end],
            &input.flags[start..end],
            input.weights.map(|w| &w[start..end]),
        );
        output.data[i_out] = v;
        output.flags[i_out] = f;
        if let Some(out_w) = output.weights.as_deref_mut() {
            out_w[i_out] = w;
        }
    }
}

/// The number of output channels when averaging `num_chans` by `width`. The
/// trailing partial group is kept only when `keep_tail` is set.
pub fn averaged_len(num_chans: usize, width: usize, keep_tail: bool) -> usize {
    let width = width.max(1);
    if keep_tail {
        (num_chans + width - 1) / width
    } else {
        num_chans / width
    }
}

/// 3-tap [0.25, 0.5, 0.25] smoothing. The edges are handled by replicating
/// the first and last samples. An output is flagged if any of its taps is
/// flagged. Weights are passed through.
pub fn hanning_smooth(input: StripeView, mut output: StripeMut) {
    let n = input.len();
    for i in 0..n {
        let lo = i.saturating_sub(1);
        let hi = (i + 1).min(n - 1);
        output.data[i] = input.data[lo] * 0.25 + input.data[i] * 0.5 + input.data[hi] * 0.25;
        output.flags[i] = input.flags[lo] || input.flags[i] || input.flags[hi];
    }
    if let (Some(out_w), Some(in_w)) = (output.weights.as_deref_mut(), input.weights) {
        out_w.copy_from_slice(in_w);
    }
}

/// A collection of timesteps that are averaged into one output row.
#[derive(Debug, Clone)]
pub struct Timeblock {
    /// The timeblock index within its buffer.
    pub index: usize,

    /// The range of indices into the unique timestamps that were bucketed.
    ///
    /// The timestamps in a timeblock are always contiguous in that list.
    pub range: Range<usize>,

    /// The timestamps comprising this timeblock.
    pub timestamps: Vec1<Epoch>,
}

/// Sort and deduplicate timestamps.
pub fn unique_timestamps<'a, I: IntoIterator<Item = &'a Epoch>>(timestamps: I) -> Vec<Epoch> {
    let mut unique: Vec<Epoch> = timestamps.into_iter().copied().collect();
    unique.sort_by(|a, b| a.to_gpst_seconds().total_cmp(&b.to_gpst_seconds()));
    unique.dedup();
    unique
}

/// Bucket sorted, unique timestamps into timeblocks of length `time_bin`.
///
/// Each timeblock starts at the first timestamp not belonging to the previous
/// one, so a list that starts at a timeblock boundary always produces the
/// same timeblocks, no matter where the list was cut. Without a bin, every
/// timestamp is its own timeblock.
pub fn timestamps_to_timeblocks(timestamps: &[Epoch], time_bin: Option<Duration>) -> Vec<Timeblock> {
    // Absorbs floating-point noise in timestamps that sit exactly on a boundary.
    const TOLERANCE_S: f64 = 1e-6;

    let bin_s = time_bin.map(|d| d.to_seconds()).unwrap_or(0.0);
    let mut timeblocks: Vec<Timeblock> = vec![];
    let mut i = 0;
    while i < timestamps.len() {
        let start = timestamps[i];
        let mut block = Vec1::new(start);
        let mut j = i + 1;
        while j < timestamps.len() && (timestamps[j] - start).to_seconds() < bin_s - TOLERANCE_S {
            block.push(timestamps[j]);
            j += 1;
        }
        timeblocks.push(Timeblock {
            index: timeblocks.len(),
            range: i..j,
            timestamps: block,
        });
        i = j;
    }
    timeblocks
}

/// The mean of some timestamps.
pub fn average_epoch<'a, I: IntoIterator<Item = &'a Epoch>>(timestamps: I) -> Option<Epoch> {
    let mut iter = timestamps.into_iter();
    let first = *iter.next()?;
    let mut offset_sum = 0.0;
    let mut count = 1;
    for t in iter {
        offset_sum += (*t - first).to_seconds();
        count += 1;
    }
    Some(first + Duration::from_seconds(offset_sum / count as f64))
}
