//! Turning one baseline group into its output rows.

use std::{collections::BTreeMap, ops::Range};

use hifitime::Epoch;
use log::trace;
use marlu::c32;
use ndarray::prelude::*;

use super::combine::combine_planes;
use crate::{
    averaging::{flag_weight_average, Stripe},
    freq::{BandDescriptor, CombinationMap},
    plan::{BandPlan, Combination, CombinedDrift, CubeStrategy, Plan, StripeStages, StripeTransform},
    regrid::InterpolationMethod,
    reindex::merge_rows,
    write::{OutputRow, Plane},
    DataInconsistencyError, VisibilityBuffer,
};

/// All of the stripes of one plane, `[correlation][channel]`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Stripes {
    pub(crate) data: Array2<c32>,
    pub(crate) flags: Array2<bool>,
    pub(crate) weights: Option<Array2<f32>>,
}

impl Stripes {
    pub(crate) fn new(num_corrs: usize, num_chans: usize, with_weights: bool) -> Stripes {
        Stripes {
            data: Array2::zeros((num_corrs, num_chans)),
            flags: Array2::from_elem((num_corrs, num_chans), false),
            weights: with_weights.then(|| Array2::zeros((num_corrs, num_chans))),
        }
    }

    fn num_corrs(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    fn num_chans(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    fn load(&self, i_corr: usize, stripe: &mut Stripe) {
        stripe.data.clear();
        stripe.data.extend(self.data.row(i_corr).iter().copied());
        stripe.flags.clear();
        stripe.flags.extend(self.flags.row(i_corr).iter().copied());
        if let (Some(out), Some(w)) = (stripe.weights.as_mut(), self.weights.as_ref()) {
            out.clear();
            out.extend(w.row(i_corr).iter().copied());
        }
    }

    fn store(&mut self, i_corr: usize, stripe: &Stripe) {
        self.data
            .row_mut(i_corr)
            .assign(&ArrayView1::from(stripe.data.as_slice()));
        self.flags
            .row_mut(i_corr)
            .assign(&ArrayView1::from(stripe.flags.as_slice()));
        if let (Some(out), Some(w)) = (self.weights.as_mut(), stripe.weights.as_ref()) {
            out.row_mut(i_corr).assign(&ArrayView1::from(w.as_slice()));
        }
    }
}

/// Collapse the rows of one band in a group into one plane. A single row is
/// copied. Otherwise each sample is the weighted mean of the unflagged
/// samples, weighted by the weight spectrum or, without one, the row weight.
/// If every sample is flagged, the unweighted mean is kept, flagged.
pub(crate) fn time_average(buffer: &VisibilityBuffer, rows: &[usize]) -> Stripes {
    let (_, num_chans, num_corrs) = buffer.data.dim();
    let ws = buffer.weight_spectrum.as_ref();

    if let [row] = rows {
        return Stripes {
            data: buffer.data.slice(s![*row, .., ..]).t().to_owned(),
            flags: buffer.flags.slice(s![*row, .., ..]).t().to_owned(),
            weights: ws.map(|ws| ws.slice(s![*row, .., ..]).t().to_owned()),
        };
    }

    let mut plane = Stripes::new(num_corrs, num_chans, ws.is_some());
    let mut values = Vec::with_capacity(rows.len());
    let mut flags = Vec::with_capacity(rows.len());
    let mut weights = Vec::with_capacity(rows.len());
    for i_chan in 0..num_chans {
        for i_corr in 0..num_corrs {
            values.clear();
            flags.clear();
            weights.clear();
            for &r in rows {
                values.push(buffer.data[[r, i_chan, i_corr]]);
                flags.push(buffer.flags[[r, i_chan, i_corr]]);
                weights.push(match ws {
                    Some(ws) => ws[[r, i_chan, i_corr]],
                    None => buffer.weight[[r, i_corr]],
                });
            }
            let (v, f, w) = flag_weight_average(&values, &flags, Some(&weights));
            plane.data[[i_corr, i_chan]] = v;
            plane.flags[[i_corr, i_chan]] = f;
            if let Some(pw) = plane.weights.as_mut() {
                pw[[i_corr, i_chan]] = w;
            }
        }
    }
    plane
}

/// Run the stripe transform over every correlation of `plane`.
fn transform_stripes(
    transform: StripeTransform,
    stages: &StripeStages,
    plane: &Stripes,
    num_out_chans: usize,
) -> Stripes {
    let with_weights = plane.weights.is_some();
    let mut out = Stripes::new(plane.num_corrs(), num_out_chans, with_weights);
    let mut input = Stripe::new(plane.num_chans(), with_weights);
    let mut output = Stripe::new(num_out_chans, with_weights);
    for i_corr in 0..plane.num_corrs() {
        plane.load(i_corr, &mut input);
        transform.apply(stages, input.view(), output.view_mut());
        out.store(i_corr, &output);
    }
    out
}

/// The regrid source grid and FFT shift for a group observed at `timestamp`.
///
/// When a band changes frame, its intermediate frequencies are converted from
/// the row time to the reference time. With the FFT shift method the source
/// grid stays at the reference time, and the drift of the central channel
/// becomes a shift instead.
fn regrid_for_time(plan: &Plan, band: &BandPlan, timestamp: Epoch) -> (Option<Vec<f64>>, f64) {
    let (frame, regrid) = match (plan.frame.as_ref(), band.regrid.as_ref()) {
        (Some(f), Some(r)) if r.converts => (f, r),
        _ => return (None, 0.0),
    };
    let context = &frame.context;
    let reference_time = context.reference_time;
    let from = band.intermediate.frame;

    if regrid.method == InterpolationMethod::FftShift {
        let centre = band.intermediate.chan_freqs[band.intermediate.num_chans() / 2];
        let now = context.convert(centre, from, timestamp, frame.output_frame, reference_time);
        let then = context.convert(centre, from, reference_time, frame.output_frame, reference_time);
        let shift = (now - then) / band.output.resolution();
        trace!("Band {}: FFT shift of {shift} channels", band.input.id);
        (None, shift)
    } else {
        // Conversions are proportional to frequency.
        let factor = context.convert(1.0, from, timestamp, frame.output_frame, reference_time);
        let source = band.intermediate.chan_freqs.iter().map(|f| f * factor).collect();
        (Some(source), 0.0)
    }
}

/// How far a band's frequencies have drifted at `timestamp`, as a factor of
/// its frequencies at the reference time. Bands already in the output frame
/// don't drift.
fn drift_factor(plan: &Plan, band: &BandPlan, timestamp: Epoch) -> f64 {
    let frame = match plan.frame.as_ref() {
        Some(f) if band.selected.frame != f.output_frame => f,
        _ => return 1.0,
    };
    let context = &frame.context;
    let reference_time = context.reference_time;
    let from = band.selected.frame;
    let now = context.convert(1.0, from, timestamp, frame.output_frame, reference_time);
    let then = context.convert(1.0, from, reference_time, frame.output_frame, reference_time);
    now / then
}

/// The combination map and FFT shift for a group observed at `timestamp`.
/// `None` means the reference-time map applies.
fn combination_for_time(
    plan: &Plan,
    combination: &Combination,
    timestamp: Epoch,
) -> (Option<CombinationMap>, f64) {
    match combination.drift {
        None => (None, 0.0),

        Some(CombinedDrift::Remap) => {
            let sources: Vec<BandDescriptor> = combination
                .sources
                .iter()
                .map(|source| match plan.bands.get(&source.id) {
                    Some(band) => source.scaled(drift_factor(plan, band, timestamp)),
                    None => source.clone(),
                })
                .collect();
            (Some(combination.map.remapped(&sources)), 0.0)
        }

        Some(CombinedDrift::FftShift) => {
            let factor = plan
                .bands
                .values()
                .map(|band| drift_factor(plan, band, timestamp))
                .find(|&f| f != 1.0)
                .unwrap_or(1.0);
            let output = &combination.output;
            let centre = output.chan_freqs[output.num_chans() / 2];
            let shift = centre * (factor - 1.0) / output.resolution();
            trace!("Combined band: FFT shift of {shift} channels");
            (None, shift)
        }
    }
}

fn median(values: ArrayView1<f32>) -> f32 {
    let mut sorted = values.to_vec();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// The per-correlation weight and sigma of one piece of output. With a weight
/// spectrum, the weight is the median over the piece. Otherwise it is the
/// first input row's weight, scaled by the band's weight factor.
fn row_weights(
    buffer: &VisibilityBuffer,
    first_row: usize,
    band: &BandPlan,
    output: &Stripes,
    piece: &Range<usize>,
) -> (Array1<f32>, Array1<f32>) {
    match output.weights.as_ref() {
        Some(w) => {
            let weight: Array1<f32> = w
                .slice(s![.., piece.clone()])
                .outer_iter()
                .map(median)
                .collect();
            let sigma = weight.mapv(|w| if w > 0.0 { 1.0 / w.sqrt() } else { 0.0 });
            (weight, sigma)
        }

        None => {
            let factor = band.weight_factor as f32;
            let weight = buffer.weight.row(first_row).mapv(|w| w * factor);
            let sigma = buffer.sigma.row(first_row).mapv(|s| s / factor.sqrt());
            (weight, sigma)
        }
    }
}

/// `[channel][correlation]` copies of a piece of a plane.
fn to_channel_major<T: Clone>(a: &Array2<T>, piece: &Range<usize>) -> Array2<T> {
    a.slice(s![.., piece.clone()]).t().as_standard_layout().into_owned()
}

/// Transform one baseline group. `first_out_row` is the output row index of
/// its first piece; pieces take consecutive rows.
pub(crate) fn process_group(
    plan: &Plan,
    buffer: &VisibilityBuffer,
    group: &[usize],
    first_out_row: usize,
) -> Result<Vec<OutputRow>, DataInconsistencyError> {
    let merged = merge_rows(group.iter().map(|&r| &buffer.rows[r]), &plan.index_maps)?;
    let first_row = *group.first().ok_or(DataInconsistencyError::EmptyGroup)?;
    let num_corrs = buffer.num_corrs();

    let mut band_rows: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for &r in group {
        band_rows.entry(buffer.rows[r].band).or_default().push(r);
    }
    let planes: BTreeMap<u32, Stripes> = band_rows
        .iter()
        .map(|(&band, rows)| (band, time_average(buffer, rows)))
        .collect();
    let band_plan = |band: u32| {
        plan.bands
            .get(&band)
            .ok_or(DataInconsistencyError::UnplannedBand {
                row: first_row,
                band,
            })
    };
    let has_weight_spectrum = buffer.weight_spectrum.is_some();

    let (output, band) = match &plan.strategy {
        CubeStrategy::PerBand => {
            let (&band_id, plane) = planes
                .iter()
                .next()
                .ok_or(DataInconsistencyError::EmptyGroup)?;
            let band = band_plan(band_id)?;
            let (source, shift) = regrid_for_time(plan, band, merged.timestamp);
            let stages = plan.stripe_stages(band, has_weight_spectrum, source.as_deref(), shift);
            let output = transform_stripes(plan.stripe, &stages, plane, band.output.num_chans());
            (output, band)
        }

        CubeStrategy::Combine(combination) => {
            let band = band_plan(buffer.rows[first_row].band)?;
            let (remapped, shift) = combination_for_time(plan, combination, merged.timestamp);
            let map = remapped.as_ref().unwrap_or(&combination.map);
            let combined = combine_planes(map, &planes, num_corrs, has_weight_spectrum);
            let stages = plan.stripe_stages(band, has_weight_spectrum, None, shift);
            let output = transform_stripes(
                plan.stripe,
                &stages,
                &combined,
                combination.output.num_chans(),
            );
            (output, band)
        }
    };

    let rows = plan
        .layout
        .pieces(output.num_chans())
        .into_iter()
        .zip(band.output_band_ids.iter())
        .enumerate()
        .map(|(k, (piece, &band_id))| {
            let (weight, sigma) = row_weights(buffer, first_row, band, &output, &piece);
            let mut meta = merged.clone();
            meta.band = band_id;
            OutputRow {
                row: first_out_row + k,
                meta,
                plane: Plane {
                    data: to_channel_major(&output.data, &piece),
                    flags: to_channel_major(&output.flags, &piece),
                    weight_spectrum: output.weights.as_ref().map(|w| to_channel_major(w, &piece)),
                    weight,
                    sigma,
                },
            }
        })
        .collect();
    Ok(rows)
}
