use std::str::FromStr;

use approx::assert_abs_diff_eq;
use strum::IntoEnumIterator;
use vec1::vec1;

use super::*;

fn c(re: f32) -> c32 {
    c32::new(re, 0.0)
}

fn stripe(data: &[f32], flags: &[bool], weights: Option<&[f32]>) -> Stripe {
    Stripe {
        data: data.iter().copied().map(c).collect(),
        flags: flags.to_vec(),
        weights: weights.map(|w| w.to_vec()),
    }
}

#[test]
fn test_flag_average_ignores_flagged_members() {
    let (v, f, _) = flag_average(&[c(1.0), c(3.0), c(100.0)], &[false, false, true], None);
    assert_abs_diff_eq!(v.re, 2.0);
    assert!(!f);
}

#[test]
fn test_flag_average_all_flagged_gives_flagged_mean() {
    let data = [c(1.0), c(2.0), c(6.0)];
    let (v, f, w) = flag_average(&data, &[true, true, true], Some(&[1.0, 2.0, 3.0][..]));
    assert!(f);
    assert_abs_diff_eq!(v.re, 3.0);
    assert_abs_diff_eq!(w, 6.0);
}

#[test]
fn test_simple_average_ignores_flags_and_weights() {
    let (v, f, w) = simple_average(
        &[c(1.0), c(3.0), c(8.0)],
        &[false, true, false],
        Some(&[1.0, 0.0, 5.0][..]),
    );
    assert_abs_diff_eq!(v.re, 4.0);
    assert!(!f);
    assert_abs_diff_eq!(w, 6.0);

    let (v, f, w) = simple_average(&[c(2.0), c(4.0)], &[true, true], None);
    assert_abs_diff_eq!(v.re, 3.0);
    assert!(f);
    assert_eq!(w, 0.0);
}

#[test]
fn test_weight_average_ignores_flags() {
    let (v, f, w) = weight_average(
        &[c(1.0), c(4.0), c(50.0)],
        &[false, false, true],
        Some(&[3.0, 1.0, 1.0][..]),
    );
    assert!(!f);
    assert_abs_diff_eq!(v.re, (3.0 + 4.0 + 50.0) / 5.0);
    assert_abs_diff_eq!(w, 5.0);

    // All members flagged, but with weight: still a valid mean.
    let (v, f, w) = weight_average(&[c(1.0), c(3.0)], &[true, true], Some(&[1.0, 1.0][..]));
    assert!(!f);
    assert_abs_diff_eq!(v.re, 2.0);
    assert_abs_diff_eq!(w, 2.0);
}

#[test]
fn test_weight_average_zero_weight_is_flagged() {
    let (v, f, w) = weight_average(&[c(2.0), c(4.0)], &[false, false], Some(&[0.0, 0.0][..]));
    assert!(f);
    assert_abs_diff_eq!(v.re, 3.0);
    assert_eq!(w, 0.0);
}

#[test]
fn test_flag_weight_average() {
    let (v, f, w) = flag_weight_average(
        &[c(1.0), c(4.0), c(50.0)],
        &[false, false, true],
        Some(&[3.0, 1.0, 10.0][..]),
    );
    assert!(!f);
    assert_abs_diff_eq!(v.re, (3.0 + 4.0) / 4.0);
    assert_abs_diff_eq!(w, 4.0);
}

#[test]
fn test_flag_weight_average_all_flagged() {
    let (v, f, w) = flag_weight_average(&[c(2.0), c(4.0)], &[true, true], Some(&[1.0, 1.0][..]));
    assert!(f);
    assert_abs_diff_eq!(v.re, 3.0);
    assert_abs_diff_eq!(w, 2.0);

    let (_, f, _) =
        flag_weight_average(&[c(2.0), c(4.0)], &[false, false], Some(&[0.0, 0.0][..]));
    assert!(f);
}

#[test]
fn test_kernel_names_and_defaults() {
    for kernel in AverageKernel::iter() {
        assert_eq!(AverageKernel::from_str(&kernel.to_string()), Ok(kernel));
    }
    assert_eq!(AverageKernel::for_input(true), AverageKernel::FlagWeight);
    assert_eq!(AverageKernel::for_input(false), AverageKernel::Flag);
    assert_eq!(*AVERAGE_KERNELS, "simple, flags, spectrum, flags+spectrum");
}

#[test]
fn test_average_with_each_kernel() {
    let input = stripe(
        &[1.0, 3.0, 5.0, 7.0],
        &[false, true, false, false],
        Some(&[1.0, 1.0, 3.0, 1.0][..]),
    );
    let expected = [
        (AverageKernel::Simple, [2.0, 6.0]),
        (AverageKernel::Flag, [1.0, 6.0]),
        (AverageKernel::Weight, [2.0, 5.5]),
        (AverageKernel::FlagWeight, [1.0, 5.5]),
    ];
    for (kernel, values) in expected {
        let mut output = Stripe::new(2, true);
        average(2, kernel, input.view(), output.view_mut());
        assert_abs_diff_eq!(output.data[0].re, values[0]);
        assert_abs_diff_eq!(output.data[1].re, values[1]);
        assert_eq!(output.flags, vec![false, false], "{kernel}");
    }
}

#[test]
fn test_average_width_one_is_identity() {
    let input = stripe(
        &[1.0, -2.0, 3.5, 7.0, 0.25],
        &[false, true, false, true, false],
        Some(&[1.0, 2.0, 0.5, 4.0, 8.0][..]),
    );
    for kernel in AverageKernel::iter() {
        let mut output = Stripe::new(input.len(), true);
        average(1, kernel, input.view(), output.view_mut());
        assert_eq!(output, input, "{kernel:?}");
    }

    let input = stripe(&[1.0, 2.0], &[true, false], None);
    let mut output = Stripe::new(2, false);
    average(1, AverageKernel::Flag, input.view(), output.view_mut());
    assert_eq!(output, input);
}

#[test]
fn test_average_drops_tail_without_output_slot() {
    let input = stripe(&[1.0, 3.0, 5.0, 7.0, 9.0], &[false; 5], None);
    let len = averaged_len(input.len(), 2, false);
    assert_eq!(len, 2);
    let mut output = Stripe::new(len, false);
    average(2, AverageKernel::Flag, input.view(), output.view_mut());
    assert_abs_diff_eq!(output.data[0].re, 2.0);
    assert_abs_diff_eq!(output.data[1].re, 6.0);
}

#[test]
fn test_average_keeps_tail_with_output_slot() {
    let input = stripe(&[1.0, 3.0, 5.0, 7.0, 9.0], &[false; 5], None);
    let len = averaged_len(input.len(), 2, true);
    assert_eq!(len, 3);
    let mut output = Stripe::new(len, false);
    average(2, AverageKernel::Flag, input.view(), output.view_mut());
    assert_abs_diff_eq!(output.data[2].re, 9.0);
    assert!(!output.flags[2]);
}

#[test]
fn test_average_flagged_channel_excluded() {
    let input = stripe(&[1.0, 3.0, 5.0, 7.0], &[false, false, false, true], None);
    let mut output = Stripe::new(2, false);
    average(2, AverageKernel::Flag, input.view(), output.view_mut());
    assert_abs_diff_eq!(output.data[0].re, 2.0);
    assert_abs_diff_eq!(output.data[1].re, 5.0);
    assert_eq!(output.flags, vec![false, false]);
}

#[test]
fn test_hanning_smooth() {
    let input = stripe(&[4.0, 8.0, 0.0, 4.0], &[false, false, true, false], Some(&[1.0; 4][..]));
    let mut output = Stripe::new(4, true);
    hanning_smooth(input.view(), output.view_mut());
    // Edges replicate the outermost sample.
    assert_abs_diff_eq!(output.data[0].re, 0.25 * 4.0 + 0.5 * 4.0 + 0.25 * 8.0);
    assert_abs_diff_eq!(output.data[1].re, 0.25 * 4.0 + 0.5 * 8.0);
    assert_abs_diff_eq!(output.data[3].re, 0.25 * 0.0 + 0.75 * 4.0);
    assert_eq!(output.flags, vec![false, true, true, true]);
    assert_eq!(output.weights, input.weights);
}

#[test]
fn test_hanning_smooth_constant_is_unchanged() {
    let input = stripe(&[3.0; 6], &[false; 6], None);
    let mut output = Stripe::new(6, false);
    hanning_smooth(input.view(), output.view_mut());
    for v in output.data {
        assert_abs_diff_eq!(v.re, 3.0);
    }
}

#[test]
fn test_timestamps_to_timeblocks() {
    let timestamps: Vec<Epoch> = [0.0, 2.0, 4.0, 6.0, 10.0]
        .into_iter()
        .map(|s| Epoch::from_gpst_seconds(1065880128.0 + s))
        .collect();

    let timeblocks = timestamps_to_timeblocks(&timestamps, None);
    assert_eq!(timeblocks.len(), 5);
    assert_eq!(timeblocks[3].range, 3..4);

    let timeblocks = timestamps_to_timeblocks(&timestamps, Some(Duration::from_seconds(4.0)));
    assert_eq!(timeblocks.len(), 3);
    assert_eq!(timeblocks[0].range, 0..2);
    assert_eq!(timeblocks[1].range, 2..4);
    assert_eq!(timeblocks[2].range, 4..5);
    assert_eq!(timeblocks[2].index, 2);
    assert_eq!(timeblocks[2].timestamps, vec1![timestamps[4]]);

    // Cutting the list at a timeblock boundary gives the same blocks.
    let tail = timestamps_to_timeblocks(&timestamps[2..], Some(Duration::from_seconds(4.0)));
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].timestamps, timeblocks[1].timestamps);
}

#[test]
fn test_unique_and_average_epoch() {
    let t0 = Epoch::from_gpst_seconds(1000.0);
    let t1 = Epoch::from_gpst_seconds(1002.0);
    let unique = unique_timestamps(&[t1, t0, t1]);
    assert_eq!(unique, vec![t0, t1]);
    let mean = average_epoch(&unique).unwrap();
    assert_abs_diff_eq!(mean.to_gpst_seconds(), 1001.0, epsilon = 1e-6);
    assert!(average_epoch(&Vec::<Epoch>::new()).is_none());
}
