use std::f64::consts::TAU;

use marlu::c32;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::averaging::{StripeMut, StripeView};

/// Shift a uniformly-sampled stripe by `shift` channels (which need not be
/// an integer) by applying a phase gradient in the Fourier domain. Positive
/// shifts move features to higher channel indices.
///
/// Flagged samples are zeroed before transforming and the stripe is
/// zero-padded to twice its length, so nothing wraps around. An output is
/// flagged if it came from outside the stripe or from next to a flagged
/// sample. Weights are shifted by linear interpolation.
pub fn fft_shift(shift: f64, input: StripeView, mut output: StripeMut) {
    let n = input.len();
    if shift == 0.0 {
        output.data.copy_from_slice(input.data);
        output.flags.copy_from_slice(input.flags);
        if let (Some(out_w), Some(in_w)) = (output.weights.as_deref_mut(), input.weights) {
            out_w.copy_from_slice(in_w);
        }
        return;
    }
    if n == 0 {
        return;
    }

    let m = 2 * n;
    let mut buffer: Vec<Complex<f64>> = input
        .data
        .iter()
        .zip(input.flags)
        .map(|(v, &f)| {
            if f {
                Complex::default()
            } else {
                Complex::new(f64::from(v.re), f64::from(v.im))
            }
        })
        .chain(std::iter::repeat(Complex::default()).take(m - n))
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(m).process(&mut buffer);
    for (k, value) in buffer.iter_mut().enumerate() {
        let k = if k < m / 2 { k as f64 } else { k as f64 - m as f64 };
        *value *= Complex::from_polar(1.0, -TAU * k * shift / m as f64);
    }
    planner.plan_fft_inverse(m).process(&mut buffer);

    let norm = 1.0 / m as f64;
    for i in 0..n {
        let v = buffer[i] * norm;
        output.data[i] = c32::new(v.re as f32, v.im as f32);

        // Where this output came from.
        let position = i as f64 - shift;
        let in_range = position > -1e-9 && position < (n - 1) as f64 + 1e-9;
        let (lo, hi, frac) = if in_range {
            let position = position.clamp(0.0, (n - 1) as f64);
            let lo = position.floor() as usize;
            let hi = position.ceil() as usize;
            (lo, hi, (position - lo as f64) as f32)
        } else {
            (0, 0, 0.0)
        };

        output.flags[i] = !in_range || input.flags[lo] || input.flags[hi];
        if let (Some(out_w), Some(in_w)) = (output.weights.as_deref_mut(), input.weights) {
            out_w[i] = if in_range {
                in_w[lo] * (1.0 - frac) + in_w[hi] * frac
            } else {
                0.0
            };
        }
    }
}
