use marlu::{c32, c64};

use super::InterpolationMethod;
use crate::averaging::{StripeMut, StripeView};

/// The samples of an ascending source grid, promoted to double precision.
struct Source {
    x: Vec<f64>,
    y: Vec<c64>,
    flags: Vec<bool>,
    weights: Option<Vec<f32>>,
}

impl Source {
    /// Copy the input so that the grid is ascending.
    fn new(x: &[f64], input: StripeView) -> Source {
        let descending = x.len() > 1 && x[0] > x[x.len() - 1];
        let mut src = Source {
            x: x.to_vec(),
            y: input
                .data
                .iter()
                .map(|v| c64::new(f64::from(v.re), f64::from(v.im)))
                .collect(),
            flags: input.flags.to_vec(),
            weights: input.weights.map(|w| w.to_vec()),
        };
        if descending {
            src.x.reverse();
            src.y.reverse();
            src.flags.reverse();
            if let Some(w) = src.weights.as_mut() {
                w.reverse();
            }
        }
        src
    }

    fn len(&self) -> usize {
        self.x.len()
    }

    /// The index `j` such that `x[j] <= t <= x[j + 1]`, and the fractional
    /// position of `t` between them. `None` if `t` is outside the grid.
    fn bracket(&self, t: f64) -> Option<(usize, f64)> {
        let n = self.len();
        if n == 0 {
            return None;
        }
        let spacing = if n > 1 {
            (self.x[n - 1] - self.x[0]) / (n - 1) as f64
        } else {
            1.0
        };
        let tolerance = 1e-6 * spacing;
        if t < self.x[0] - tolerance || t > self.x[n - 1] + tolerance {
            return None;
        }
        if n == 1 {
            return Some((0, 0.0));
        }
        let j = self.x.partition_point(|&x| x <= t).clamp(1, n - 1) - 1;
        let frac = ((t - self.x[j]) / (self.x[j + 1] - self.x[j])).clamp(0.0, 1.0);
        Some((j, frac))
    }
}

/// Second derivatives of a natural cubic spline through (x, y).
fn spline_second_derivatives(x: &[f64], y: &[c64]) -> Vec<c64> {
    let n = x.len();
    let mut y2 = vec![c64::default(); n];
    if n < 3 {
        return y2;
    }
    let mut factor = vec![0.0; n];
    let mut u = vec![c64::default(); n];
    for i in 1..n - 1 {
        let sig = (x[i] - x[i - 1]) / (x[i + 1] - x[i - 1]);
        let p = sig * factor[i - 1] + 2.0;
        factor[i] = (sig - 1.0) / p;
        let slope_change =
            (y[i + 1] - y[i]) / (x[i + 1] - x[i]) - (y[i] - y[i - 1]) / (x[i] - x[i - 1]);
        u[i] = (slope_change * (6.0 / (x[i + 1] - x[i - 1])) - u[i - 1] * sig) / p;
    }
    for k in (0..n - 1).rev() {
        y2[k] = y2[k + 1] * factor[k] + u[k];
    }
    y2
}

fn lagrange(x: &[f64], y: &[c64], t: f64) -> c64 {
    let mut sum = c64::default();
    for k in 0..x.len() {
        let mut basis = 1.0;
        for m in 0..x.len() {
            if m != k {
                basis *= (t - x[m]) / (x[k] - x[m]);
            }
        }
        sum += y[k] * basis;
    }
    sum
}

/// Interpolate `input`, sampled at `source`, onto `target`.
///
/// The output flag is the OR of the flags of the source samples that carry
/// weight in the interpolation; a target that lands exactly on a source
/// channel therefore only inherits that channel's flag. Targets outside the
/// source domain are zeroed and flagged. Weights are linearly interpolated
/// and scaled by `weight_scale`.
///
/// [`InterpolationMethod::FftShift`] is treated as linear here.
pub fn interpolate(
    method: InterpolationMethod,
    source: &[f64],
    target: &[f64],
    weight_scale: f32,
    input: StripeView,
    mut output: StripeMut,
) {
    // Fractions this close to a source channel count as landing on it.
    const ON_CHANNEL: f64 = 1e-9;

    let src = Source::new(source, input);
    let n = src.len();
    let y2 = match method {
        InterpolationMethod::Spline => spline_second_derivatives(&src.x, &src.y),
        _ => vec![],
    };

    for (i_out, &t) in target.iter().enumerate() {
        let (j, frac) = match src.bracket(t) {
            Some(b) => b,
            None => {
                output.data[i_out] = c32::default();
                output.flags[i_out] = true;
                if let Some(w) = output.weights.as_deref_mut() {
                    w[i_out] = 0.0;
                }
                continue;
            }
        };

        // The source samples that carry weight.
        let (lo, hi) = if n == 1 || frac <= ON_CHANNEL {
            (j, j)
        } else if frac >= 1.0 - ON_CHANNEL {
            (j + 1, j + 1)
        } else if method == InterpolationMethod::Nearest {
            let k = if frac < 0.5 { j } else { j + 1 };
            (k, k)
        } else {
            (j, j + 1)
        };

        let value = if lo == hi {
            src.y[lo]
        } else {
            match method {
                InterpolationMethod::Cubic if n >= 4 => {
                    let start = j.saturating_sub(1).min(n - 4);
                    lagrange(&src.x[start..start + 4], &src.y[start..start + 4], t)
                }

                InterpolationMethod::Spline if n >= 3 => {
                    let h = src.x[hi] - src.x[lo];
                    let a = (src.x[hi] - t) / h;
                    let b = (t - src.x[lo]) / h;
                    src.y[lo] * a
                        + src.y[hi] * b
                        + (y2[lo] * (a * a * a - a) + y2[hi] * (b * b * b - b)) * (h * h / 6.0)
                }

                _ => src.y[lo] * (1.0 - frac) + src.y[hi] * frac,
            }
        };

        output.data[i_out] = c32::new(value.re as f32, value.im as f32);
        output.flags[i_out] = src.flags[lo] || src.flags[hi];
        if let (Some(out_w), Some(in_w)) = (output.weights.as_deref_mut(), src.weights.as_ref()) {
            let w = if lo == hi {
                in_w[lo]
            } else {
                in_w[lo] * (1.0 - frac as f32) + in_w[hi] * frac as f32
            };
            out_w[i_out] = w * weight_scale;
        }
    }
}
