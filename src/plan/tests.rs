use std::collections::HashMap;

use approx::assert_abs_diff_eq;
use marlu::c32;

use super::*;
use crate::averaging::Stripe;

fn band(id: u32, first_centre: f64, num_chans: usize) -> BandDescriptor {
    BandDescriptor::uniform(id, first_centre, 1.0, num_chans, FreqFrame::Topo).unwrap()
}

fn request(bands: Vec<BandDescriptor>) -> TransformRequest {
    TransformRequest {
        bands,
        ..Default::default()
    }
}

fn regrid_request(mode: RegridMode, interpolation: &str) -> Option<RegridRequest> {
    Some(RegridRequest {
        mode,
        interpolation: interpolation.to_string(),
        output_frame: None,
    })
}

#[test]
fn test_stripe_transform_table() {
    let expected = [
        ((false, false, false), StripeTransform::Copy),
        ((true, false, false), StripeTransform::Average),
        ((false, true, false), StripeTransform::Smooth),
        ((false, false, true), StripeTransform::Regrid),
        ((true, true, false), StripeTransform::AverageSmooth),
        ((true, false, true), StripeTransform::AverageRegrid),
        ((false, true, true), StripeTransform::SmoothRegrid),
        ((true, true, true), StripeTransform::AverageSmoothRegrid),
    ];
    for ((a, s, r), transform) in expected {
        let selected = StripeTransform::select(a, s, r);
        assert_eq!(selected, transform);
        let name = selected.to_string();
        assert_eq!(
            (name.contains("average"), name.contains("smooth"), name.contains("regrid")),
            (a, s, r)
        );
    }
    assert_eq!(
        StripeTransform::AverageSmoothRegrid.to_string(),
        "average + smooth + regrid"
    );
}

#[test]
fn test_average_then_smooth() {
    let input = Stripe {
        data: [0.0, 0.0, 4.0, 4.0, 8.0, 8.0]
            .iter()
            .map(|&v| c32::new(v, 0.0))
            .collect(),
        flags: vec![false; 6],
        weights: None,
    };
    let stages = StripeStages {
        average_width: 2,
        kernel: AverageKernel::Flag,
        averaged_len: 3,
        regrid: None,
    };
    let mut output = Stripe::new(3, false);
    StripeTransform::AverageSmooth.apply(&stages, input.view(), output.view_mut());
    let values: Vec<f32> = output.data.iter().map(|v| v.re).collect();
    assert_eq!(values, vec![1.0, 4.0, 7.0]);

    // Without a regrid stage, "regridding" copies.
    let mut output = Stripe::new(3, false);
    StripeTransform::AverageRegrid.apply(&stages, input.view(), output.view_mut());
    let values: Vec<f32> = output.data.iter().map(|v| v.re).collect();
    assert_eq!(values, vec![0.0, 4.0, 8.0]);
}

#[test]
fn test_output_layout_pieces() {
    assert_eq!(OutputLayout::Block.pieces(7), vec![0..7]);
    assert_eq!(OutputLayout::Slices(3).pieces(10), vec![0..3, 3..6, 6..10]);
    assert_eq!(OutputLayout::Slices(2).num_pieces(), 2);
}

#[test]
fn test_configuration_errors() {
    assert_eq!(
        configure(request(vec![])).unwrap_err(),
        ConfigurationError::NoBands
    );
    assert_eq!(
        configure(request(vec![band(1, 0.5, 4), band(1, 10.5, 4)])).unwrap_err(),
        ConfigurationError::DuplicateBand(1)
    );

    let mut r = request(vec![band(0, 0.5, 4)]);
    r.chan_average = vec![0];
    assert_eq!(configure(r).unwrap_err(), ConfigurationError::ZeroChannelBin);

    let mut r = request(vec![band(0, 0.5, 4)]);
    r.time_bin = Some(Duration::from_seconds(-2.0));
    assert!(matches!(
        configure(r).unwrap_err(),
        ConfigurationError::NonPositiveTimeBin(_)
    ));

    let mut r = request(vec![band(0, 0.5, 4)]);
    r.output_bands = 0;
    assert_eq!(configure(r).unwrap_err(), ConfigurationError::ZeroOutputBands);

    let mut r = request(vec![band(0, 0.5, 4)]);
    r.output_bands = 5;
    assert_eq!(
        configure(r).unwrap_err(),
        ConfigurationError::TooManyOutputBands {
            num_bands: 5,
            num_chans: 4
        }
    );

    let mut r = request(vec![band(0, 0.5, 4)]);
    r.regrid = regrid_request(RegridMode::NumChannels(2), "sinc");
    assert_eq!(
        configure(r).unwrap_err(),
        ConfigurationError::UnknownInterpolation("sinc".to_string())
    );

    let mut r = request(vec![band(0, 0.5, 4)]);
    r.regrid = Some(RegridRequest {
        mode: RegridMode::NumChannels(2),
        interpolation: "linear".to_string(),
        output_frame: Some("GALACTO".to_string()),
    });
    assert_eq!(
        configure(r).unwrap_err(),
        ConfigurationError::UnknownFrame("GALACTO".to_string())
    );

    let mut r = request(vec![band(0, 0.5, 4)]);
    r.regrid = Some(RegridRequest {
        mode: RegridMode::NumChannels(2),
        interpolation: "linear".to_string(),
        output_frame: Some("lsrk".to_string()),
    });
    assert_eq!(
        configure(r).unwrap_err(),
        ConfigurationError::NoFrameContext {
            from: "TOPO".to_string(),
            to: "LSRK".to_string()
        }
    );

    let mut r = request(vec![band(0, 0.5, 4)]);
    r.channel_selection = HashMap::from([(3, 0..2)]);
    assert_eq!(
        configure(r).unwrap_err(),
        ConfigurationError::SelectionForUnknownBand(3)
    );

    let mut r = request(vec![band(0, 0.5, 4)]);
    r.channel_selection = HashMap::from([(0, 2..6)]);
    assert!(matches!(
        configure(r).unwrap_err(),
        ConfigurationError::BadChannelSelection { band: 0, .. }
    ));

    let mut r = request(vec![band(0, 0.5, 4), band(1, 4.5, 3)]);
    r.combine_bands = true;
    assert_eq!(
        configure(r).unwrap_err(),
        ConfigurationError::UnequalCombinedChannels {
            band: 1,
            got: 3,
            expected: 4
        }
    );
}

#[test]
fn test_combining_one_band_is_not_combining() {
    let mut r = request(vec![band(0, 0.5, 4)]);
    r.combine_bands = true;
    let plan = configure(r).unwrap();
    assert!(matches!(plan.strategy, CubeStrategy::PerBand));
    assert!(plan.sort_columns.contains(&SortColumn::Band));
    assert_eq!(plan.stripe, StripeTransform::Copy);
}

#[test]
fn test_sort_columns() {
    let mut r = request(vec![band(0, 0.5, 4), band(1, 4.5, 4)]);
    r.combine_bands = true;
    r.time_bin = Some(Duration::from_seconds(10.0));
    r.time_span = TimeSpan {
        scan: true,
        state: false,
        field: true,
    };
    let plan = configure(r).unwrap();
    assert_eq!(
        plan.sort_columns,
        vec![
            SortColumn::Observation,
            SortColumn::Array,
            SortColumn::State,
            SortColumn::Time
        ]
    );

    // Spans are ignored without time averaging.
    let mut r = request(vec![band(0, 0.5, 4)]);
    r.time_span.scan = true;
    let plan = configure(r).unwrap();
    assert!(plan.sort_columns.contains(&SortColumn::Scan));
    assert_eq!(plan.sort_columns.last(), Some(&SortColumn::Time));
}

#[test]
fn test_average_plan() {
    let mut r = request(vec![band(0, 0.5, 10)]);
    r.chan_average = vec![3];
    r.channel_selection = HashMap::from([(0, 2..9)]);
    let plan = configure(r).unwrap();
    assert_eq!(plan.stripe, StripeTransform::Average);

    let b = &plan.bands[&0];
    assert_eq!(b.selected.num_chans(), 7);
    assert_abs_diff_eq!(b.selection_factor, 0.7);
    assert!(!b.keep_tail);
    // 7 channels in groups of 3 leaves a dropped tail.
    assert_eq!(b.output.num_chans(), 2);
    assert_abs_diff_eq!(b.output.chan_freqs[0], 3.5);
    assert_abs_diff_eq!(b.weight_factor, 2.1, epsilon = 1e-12);
    assert_eq!(plan.output_bands.len(), 1);
}

#[test]
fn test_regrid_plan_pre_averages() {
    let mut r = request(vec![band(0, 100.5, 16)]);
    r.regrid = regrid_request(RegridMode::NumChannels(4), "Cubic");
    let plan = configure(r).unwrap();
    assert_eq!(plan.stripe, StripeTransform::AverageRegrid);
    assert!(plan.frame.is_none());

    let b = &plan.bands[&0];
    assert_eq!(b.pre_average, 4);
    assert!(b.keep_tail);
    assert_eq!(b.intermediate.num_chans(), 4);
    let regrid = b.regrid.as_ref().unwrap();
    assert_eq!(regrid.method, InterpolationMethod::Cubic);
    assert!(!regrid.converts);
    assert_abs_diff_eq!(regrid.weight_scale, 1.0, epsilon = 1e-12);
    assert_eq!(regrid.target, vec![102.0, 106.0, 110.0, 114.0]);
    assert_abs_diff_eq!(b.weight_factor, 4.0, epsilon = 1e-12);

    let stages = plan.stripe_stages(b, false, None, 0.0);
    assert_eq!(stages.average_width, 4);
    assert_eq!(stages.averaged_len, 4);
    assert_eq!(stages.regrid.unwrap().source, regrid.source.as_slice());
}

#[test]
fn test_split_band_ids() {
    let mut r = request(vec![band(2, 0.5, 5), band(7, 10.5, 5)]);
    r.output_bands = 2;
    r.index_maps.band = Some(HashMap::from([(2, 0), (7, 1)]));
    let plan = configure(r).unwrap();
    assert_eq!(plan.layout, OutputLayout::Slices(2));
    assert_eq!(plan.rows_per_group(), 2);
    assert_eq!(plan.bands[&2].output_band_ids, vec![0, 1]);
    assert_eq!(plan.bands[&7].output_band_ids, vec![2, 3]);

    let ids: Vec<u32> = plan.output_bands.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);
    let sizes: Vec<usize> = plan.output_bands.iter().map(|b| b.num_chans()).collect();
    assert_eq!(sizes, vec![2, 3, 2, 3]);

    let mut r = request(vec![band(2, 0.5, 5)]);
    r.index_maps.band = Some(HashMap::from([(3, 0)]));
    assert!(matches!(
        configure(r).unwrap_err(),
        ConfigurationError::InvalidBand { id: 2, .. }
    ));
}

#[test]
fn test_combine_plan() {
    let mut r = request(vec![band(0, 0.5, 4), band(1, 4.5, 4)]);
    r.combine_bands = true;
    r.output_bands = 2;
    r.chan_average = vec![2];
    let plan = configure(r).unwrap();
    assert!(!plan.sort_columns.contains(&SortColumn::Band));
    assert_eq!(plan.stripe, StripeTransform::Average);

    let combination = match &plan.strategy {
        CubeStrategy::Combine(c) => c,
        CubeStrategy::PerBand => unreachable!(),
    };
    assert_eq!(combination.map.num_chans(), 8);
    assert_eq!(combination.post_average, 2);
    assert_eq!(combination.output.num_chans(), 4);
    assert_eq!(combination.sources.len(), 2);
    // Nothing changes frame.
    assert!(combination.drift.is_none());

    let ids: Vec<u32> = plan.output_bands.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![0, 1]);
    for b in plan.bands.values() {
        assert_eq!(b.output_band_ids, vec![0, 1]);
        assert_abs_diff_eq!(b.weight_factor, 2.0, epsilon = 1e-12);
    }
}

#[test]
fn test_per_band_channel_bins() {
    let mut r = request(vec![band(0, 0.5, 8), band(1, 10.5, 8)]);
    r.chan_average = vec![2, 4];
    let plan = configure(r).unwrap();
    assert_eq!(plan.stripe, StripeTransform::Average);
    assert_eq!(plan.bands[&0].pre_average, 2);
    assert_eq!(plan.bands[&0].output.num_chans(), 4);
    assert_eq!(plan.bands[&1].pre_average, 4);
    assert_eq!(plan.bands[&1].output.num_chans(), 2);

    // One width applies to every band.
    let mut r = request(vec![band(0, 0.5, 8), band(1, 10.5, 8)]);
    r.chan_average = vec![4];
    let plan = configure(r).unwrap();
    assert!(plan.bands.values().all(|b| b.pre_average == 4));

    let mut r = request(vec![band(0, 0.5, 8), band(1, 10.5, 8), band(2, 20.5, 8)]);
    r.chan_average = vec![2, 4];
    assert_eq!(
        configure(r).unwrap_err(),
        ConfigurationError::ChannelBinCount {
            got: 2,
            expected: 3
        }
    );

    let mut r = request(vec![band(0, 0.5, 8), band(1, 10.5, 8)]);
    r.chan_average = vec![2, 0];
    assert_eq!(configure(r).unwrap_err(), ConfigurationError::ZeroChannelBin);
}

#[test]
fn test_average_kernel_selection() {
    let plan = configure(request(vec![band(0, 0.5, 4)])).unwrap();
    assert!(plan.average_kernel.is_none());
    let b = &plan.bands[&0];
    assert_eq!(plan.stripe_stages(b, false, None, 0.0).kernel, AverageKernel::Flag);
    assert_eq!(plan.stripe_stages(b, true, None, 0.0).kernel, AverageKernel::FlagWeight);

    let mut r = request(vec![band(0, 0.5, 4)]);
    r.average_kernel = Some("simple".to_string());
    let plan = configure(r).unwrap();
    assert_eq!(plan.average_kernel, Some(AverageKernel::Simple));
    let b = &plan.bands[&0];
    assert_eq!(plan.stripe_stages(b, true, None, 0.0).kernel, AverageKernel::Simple);

    let mut r = request(vec![band(0, 0.5, 4)]);
    r.average_kernel = Some("median".to_string());
    assert_eq!(
        configure(r).unwrap_err(),
        ConfigurationError::UnknownAverageKernel("median".to_string())
    );
}

#[test]
fn test_split_band_ids_must_fit() {
    let big = u32::MAX / 2 + 1;
    let mut r = request(vec![band(big, 0.5, 4)]);
    r.output_bands = 2;
    assert_eq!(
        configure(r).unwrap_err(),
        ConfigurationError::BandIdOverflow {
            band: big,
            num_pieces: 2
        }
    );

    // The largest id that still fits.
    let mut r = request(vec![band(big - 1, 0.5, 4)]);
    r.output_bands = 2;
    let plan = configure(r).unwrap();
    assert_eq!(plan.bands[&(big - 1)].output_band_ids, vec![u32::MAX - 1, u32::MAX]);
}
