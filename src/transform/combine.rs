//! Merging the planes of several bands onto one combined channel grid.

use std::collections::BTreeMap;

use marlu::c32;

use super::Stripes;
use crate::freq::{ChannelContribution, CombinationMap};

/// Combine the (time-averaged) planes of each band of a baseline group onto
/// the grid of `map`. A band missing from `planes` counts as flagged.
///
/// Each contribution is weighted by its overlap and, if there is a weight
/// spectrum, its weight. Where a band contributes an odd number of unflagged
/// partial channels to an output channel that also has whole-channel
/// contributors, that band's partial channels are left out, so that flags on
/// one side of a partial overlap don't skew the mean. An output is only
/// flagged if nothing contributed to it; its weight is the sum of the
/// effective weights.
pub(crate) fn combine_planes(
    map: &CombinationMap,
    planes: &BTreeMap<u32, Stripes>,
    num_corrs: usize,
    with_weights: bool,
) -> Stripes {
    let mut combined = Stripes::new(num_corrs, map.num_chans(), with_weights);
    let mut contributions: Vec<ChannelContribution> = vec![];
    let mut partial_counts: BTreeMap<u32, usize> = BTreeMap::new();

    for (i_out, channel_contributions) in map.contributions.iter().enumerate() {
        for i_corr in 0..num_corrs {
            contributions.clear();
            contributions.extend_from_slice(channel_contributions);
            partial_counts.clear();
            let mut unity_contributors = false;

            for c in contributions.iter_mut() {
                match planes.get(&c.source_band) {
                    Some(plane) => {
                        c.flag = plane.flags[[i_corr, c.source_channel]];
                        if c.is_unity() {
                            unity_contributors = true;
                        } else if !c.flag {
                            *partial_counts.entry(c.source_band).or_default() += 1;
                        }
                    }
                    None => c.flag = true,
                }
            }

            let mut sum = c32::default();
            let mut norm = 0.0;
            for c in contributions.iter().filter(|c| !c.flag) {
                let count = partial_counts.get(&c.source_band).copied().unwrap_or(0);
                if count % 2 != 0 && !c.is_unity() && unity_contributors {
                    continue;
                }
                let plane = match planes.get(&c.source_band) {
                    Some(p) => p,
                    None => continue,
                };
                let weight = plane
                    .weights
                    .as_ref()
                    .map(|w| f64::from(w[[i_corr, c.source_channel]]))
                    .unwrap_or(1.0);
                let effective = c.overlap * weight;
                sum += plane.data[[i_corr, c.source_channel]] * effective as f32;
                norm += effective;
            }

            if norm > 0.0 {
                combined.data[[i_corr, i_out]] = sum / norm as f32;
                combined.flags[[i_corr, i_out]] = false;
            } else {
                combined.data[[i_corr, i_out]] = c32::default();
                combined.flags[[i_corr, i_out]] = true;
            }
            if let Some(w) = combined.weights.as_mut() {
                w[[i_corr, i_out]] = norm as f32;
            }
        }
    }
    combined
}
