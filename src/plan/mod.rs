//! Validation of a transformation request into an immutable [`Plan`].
//!
//! Everything that can be derived from static metadata (grids, combination
//! maps, weight factors, output band ids) is computed here once. The runner
//! only reads the plan.

mod stripe;
#[cfg(test)]
mod tests;

pub use stripe::{RegridStage, StripeStages, StripeTransform};

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    ops::Range,
    str::FromStr,
};

use hifitime::Duration;
use log::{debug, info, warn};

use crate::{
    averaging::{AverageKernel, AVERAGE_KERNELS},
    freq::{
        auto_pre_average, averaged_grid, combined_grid, convert_band, output_grid,
        BandDescriptor, CombinationMap, FrameContext, FreqFrame, GridSpan, RegridMode,
        FREQ_FRAMES,
    },
    regrid::{InterpolationMethod, INTERPOLATION_METHODS},
    reindex::{IndexDimension, IndexMaps},
    ConfigurationError, RowMeta,
};

/// A request to regrid the channels.
#[derive(Debug, Clone, PartialEq)]
pub struct RegridRequest {
    pub mode: RegridMode,

    /// The name of an [`InterpolationMethod`], e.g. "linear" or "fftshift".
    pub interpolation: String,

    /// The name of the output [`FreqFrame`]. If this isn't given, the output
    /// is in the frame of the input.
    pub output_frame: Option<String>,
}

/// Boundaries that time averaging is allowed to cross.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeSpan {
    pub scan: bool,
    pub state: bool,
    pub field: bool,
}

/// Everything a caller can ask for.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    /// The selected input bands.
    pub bands: Vec<BandDescriptor>,

    /// Channel ranges to keep, per band. Bands without an entry keep all of
    /// their channels.
    pub channel_selection: HashMap<u32, Range<usize>>,

    /// Average this many channels together. A single width applies to every
    /// band; otherwise there must be one width per band, in the order of
    /// `bands`. Empty means no averaging, or automatic pre-averaging when
    /// regridding.
    pub chan_average: Vec<usize>,

    /// The name of the [`AverageKernel`] used for channel averaging. Without
    /// one, the kernel follows the input: "flags+spectrum" with a weight
    /// spectrum, "flags" without.
    pub average_kernel: Option<String>,

    pub hanning: bool,
    pub regrid: Option<RegridRequest>,

    /// Merge all bands into one continuous band.
    pub combine_bands: bool,

    /// Split each output band into this many bands.
    pub output_bands: usize,

    /// Average rows of the same baseline within bins of this length.
    pub time_bin: Option<Duration>,
    pub time_span: TimeSpan,

    /// Required if frequencies change reference frame.
    pub frame_context: Option<FrameContext>,

    pub index_maps: IndexMaps,
}

impl Default for TransformRequest {
    fn default() -> Self {
        TransformRequest {
            bands: vec![],
            channel_selection: HashMap::new(),
            chan_average: vec![],
            average_kernel: None,
            hanning: false,
            regrid: None,
            combine_bands: false,
            output_bands: 1,
            time_bin: None,
            time_span: TimeSpan::default(),
            frame_context: None,
            index_maps: IndexMaps::default(),
        }
    }
}

/// The columns that rows are sorted by and grouped by. `Time` is always
/// last; it is bucketed into time blocks rather than matched exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortColumn {
    Observation,
    Array,
    Scan,
    State,
    Field,
    Band,
    Time,
}

impl SortColumn {
    /// The id of `row` in this column. `None` for `Time`.
    pub fn id(self, row: &RowMeta) -> Option<u32> {
        match self {
            SortColumn::Observation => Some(row.observation),
            SortColumn::Array => Some(row.array),
            SortColumn::Scan => Some(row.scan),
            SortColumn::State => Some(row.state),
            SortColumn::Field => Some(row.field),
            SortColumn::Band => Some(row.band),
            SortColumn::Time => None,
        }
    }
}

/// How each output plane is laid out over output rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    /// One row holds every output channel.
    Block,

    /// The channels are cut into this many pieces, each written to its own
    /// row and band. The last piece absorbs the remainder.
    Slices(usize),
}

impl OutputLayout {
    pub fn num_pieces(self) -> usize {
        match self {
            OutputLayout::Block => 1,
            OutputLayout::Slices(n) => n,
        }
    }

    /// The channel range of each piece of a plane with `num_chans` channels.
    pub fn pieces(self, num_chans: usize) -> Vec<Range<usize>> {
        let n = self.num_pieces();
        let width = num_chans / n;
        (0..n)
            .map(|k| {
                let end = if k + 1 == n { num_chans } else { (k + 1) * width };
                k * width..end
            })
            .collect()
    }
}

/// How one band is regridded.
#[derive(Debug, Clone, PartialEq)]
pub struct RegridPlan {
    pub method: InterpolationMethod,

    /// The intermediate channel frequencies, expressed in the output frame at
    /// the reference time.
    pub source: Vec<f64>,

    pub target: Vec<f64>,

    /// Output channel width / intermediate channel width.
    pub weight_scale: f64,

    /// Whether the band changes frame. The source grid then depends on the
    /// time of each row.
    pub converts: bool,
}

/// Everything about one input band.
#[derive(Debug, Clone, PartialEq)]
pub struct BandPlan {
    /// The band as it is stored.
    pub input: BandDescriptor,

    /// The channels of `input` that buffers carry.
    pub selection: Range<usize>,
    pub selected: BandDescriptor,

    /// Selected channels / all channels.
    pub selection_factor: f64,

    /// The number of channels averaged before any regridding.
    pub pre_average: usize,

    /// Whether a short trailing averaging group makes its own channel.
    pub keep_tail: bool,

    /// The grid after averaging.
    pub intermediate: BandDescriptor,

    pub regrid: Option<RegridPlan>,

    /// The grid that this band's data ends up on, before splitting.
    pub output: BandDescriptor,

    /// The output band id of each piece.
    pub output_band_ids: Vec<u32>,

    /// Scales the per-row weight when there is no weight spectrum.
    pub weight_factor: f64,
}

/// How combined bands follow the frame conversion at the time of each row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombinedDrift {
    /// The source channels are moved and their contributions recomputed.
    Remap,

    /// The combined channels are shifted in the Fourier domain.
    FftShift,
}

/// How bands are merged into one band.
#[derive(Debug, Clone)]
pub struct Combination {
    /// Contributions at the reference time.
    pub map: CombinationMap,

    /// The selected bands, in the output frame at the reference time.
    pub sources: Vec<BandDescriptor>,

    /// Present if any band changes frame.
    pub drift: Option<CombinedDrift>,

    /// Channels averaged after combining.
    pub post_average: usize,

    /// The grid after averaging the combined channels; this is the output
    /// grid before splitting.
    pub output: BandDescriptor,
}

/// What happens to the planes of a baseline group.
#[derive(Debug, Clone)]
pub enum CubeStrategy {
    /// Every band is transformed on its own.
    PerBand,

    /// All bands are merged first.
    Combine(Box<Combination>),
}

#[derive(Debug, Clone, Copy)]
pub struct FrameConversion {
    pub context: FrameContext,
    pub output_frame: FreqFrame,
}

/// The immutable result of [`configure`].
#[derive(Debug, Clone)]
pub struct Plan {
    pub stripe: StripeTransform,

    /// The requested channel averaging kernel. Without one, it depends on
    /// whether a buffer has a weight spectrum.
    pub average_kernel: Option<AverageKernel>,

    pub strategy: CubeStrategy,
    pub layout: OutputLayout,
    pub bands: BTreeMap<u32, BandPlan>,

    /// The row sort order. The non-time columns, plus time blocks and
    /// baselines, identify a baseline group.
    pub sort_columns: Vec<SortColumn>,

    pub time_bin: Option<Duration>,
    pub index_maps: IndexMaps,

    /// Present if any band changes frame.
    pub frame: Option<FrameConversion>,

    /// Every band that will be written.
    pub output_bands: Vec<BandDescriptor>,
}

impl Plan {
    /// The ids of the non-time sort columns of `row`.
    pub fn group_ids(&self, row: &RowMeta) -> Vec<u32> {
        self.sort_columns.iter().filter_map(|c| c.id(row)).collect()
    }

    /// The number of output rows produced by each baseline group.
    pub fn rows_per_group(&self) -> usize {
        self.layout.num_pieces()
    }

    /// The stripe parameters of a band. `source` overrides the band's static
    /// regrid source grid and `shift` is the FFT shift. When combining, the
    /// parameters are those of the combined band.
    pub fn stripe_stages<'a>(
        &'a self,
        band: &'a BandPlan,
        has_weight_spectrum: bool,
        source: Option<&'a [f64]>,
        shift: f64,
    ) -> StripeStages<'a> {
        let kernel = self
            .average_kernel
            .unwrap_or_else(|| AverageKernel::for_input(has_weight_spectrum));
        match &self.strategy {
            CubeStrategy::Combine(c) => StripeStages {
                average_width: c.post_average,
                kernel,
                averaged_len: c.output.num_chans(),
                regrid: (c.drift == Some(CombinedDrift::FftShift)).then(|| RegridStage {
                    method: InterpolationMethod::FftShift,
                    source: c.output.chan_freqs.as_slice(),
                    target: c.output.chan_freqs.as_slice(),
                    shift,
                    weight_scale: 1.0,
                }),
            },

            CubeStrategy::PerBand => StripeStages {
                average_width: band.pre_average,
                kernel,
                averaged_len: band.intermediate.num_chans(),
                regrid: band.regrid.as_ref().map(|r| RegridStage {
                    method: r.method,
                    source: source.unwrap_or(&r.source),
                    target: &r.target,
                    shift,
                    weight_scale: r.weight_scale as f32,
                }),
            },
        }
    }
}

fn parse_frame(name: &str) -> Result<FreqFrame, ConfigurationError> {
    FreqFrame::from_str(name).map_err(|_| {
        debug!("Supported frames: {}", *FREQ_FRAMES);
        ConfigurationError::UnknownFrame(name.to_string())
    })
}

fn parse_method(name: &str) -> Result<InterpolationMethod, ConfigurationError> {
    InterpolationMethod::from_str(name).map_err(|_| {
        debug!("Supported interpolation methods: {}", *INTERPOLATION_METHODS);
        ConfigurationError::UnknownInterpolation(name.to_string())
    })
}

/// A channel averaging width can't exceed the channels available.
fn cap_width(width: usize, num_chans: usize, band: u32) -> usize {
    if width > num_chans {
        warn!("Band {band}: averaging width {width} exceeds its {num_chans} channels; using {num_chans}");
        num_chans
    } else {
        width
    }
}

fn split_ids(first: u32, num_pieces: usize) -> Result<Vec<u32>, ConfigurationError> {
    let too_many = || ConfigurationError::BandIdOverflow {
        band: first,
        num_pieces,
    };
    let num_pieces_u32 = u32::try_from(num_pieces).map_err(|_| too_many())?;
    let base = first.checked_mul(num_pieces_u32).ok_or_else(too_many)?;
    (0..num_pieces_u32)
        .map(|k| base.checked_add(k).ok_or_else(too_many))
        .collect()
}

fn parse_kernel(name: &str) -> Result<AverageKernel, ConfigurationError> {
    AverageKernel::from_str(name).map_err(|_| {
        debug!("Supported averaging kernels: {}", *AVERAGE_KERNELS);
        ConfigurationError::UnknownAverageKernel(name.to_string())
    })
}

/// One averaging width per band, in the order of `bands`. `None` if no width
/// was given.
fn channel_bins(
    chan_average: &[usize],
    bands: &[BandDescriptor],
) -> Result<Vec<Option<usize>>, ConfigurationError> {
    if chan_average.contains(&0) {
        return Err(ConfigurationError::ZeroChannelBin);
    }
    match chan_average {
        [] => Ok(vec![None; bands.len()]),
        [width] => Ok(vec![Some(*width); bands.len()]),
        widths if widths.len() == bands.len() => Ok(widths.iter().copied().map(Some).collect()),
        widths => Err(ConfigurationError::ChannelBinCount {
            got: widths.len(),
            expected: bands.len(),
        }),
    }
}

/// Check a request and build the [`Plan`] that carries it out.
pub fn configure(request: TransformRequest) -> Result<Plan, ConfigurationError> {
    let TransformRequest {
        bands,
        channel_selection,
        chan_average,
        average_kernel,
        hanning,
        regrid,
        combine_bands,
        output_bands: num_pieces,
        time_bin,
        time_span,
        frame_context,
        index_maps,
    } = request;

    if bands.is_empty() {
        return Err(ConfigurationError::NoBands);
    }
    let mut seen = HashSet::new();
    for band in &bands {
        if !seen.insert(band.id) {
            return Err(ConfigurationError::DuplicateBand(band.id));
        }
    }
    if let Some(&id) = channel_selection.keys().find(|id| !seen.contains(id)) {
        return Err(ConfigurationError::SelectionForUnknownBand(id));
    }
    let chan_bins = channel_bins(&chan_average, &bands)?;
    let average_kernel = average_kernel.as_deref().map(parse_kernel).transpose()?;
    if let Some(bin) = time_bin {
        if bin.to_seconds() <= 0.0 {
            return Err(ConfigurationError::NonPositiveTimeBin(bin.to_seconds()));
        }
    }
    if num_pieces == 0 {
        return Err(ConfigurationError::ZeroOutputBands);
    }
    if let Some(map) = index_maps.band.as_ref() {
        if let Some(band) = bands.iter().find(|b| !map.contains_key(&b.id)) {
            return Err(ConfigurationError::InvalidBand {
                id: band.id,
                reason: "it has no band index mapping".to_string(),
            });
        }
    }

    let combine = if combine_bands && bands.len() < 2 {
        warn!("Band combination was requested, but there is only one band; not combining");
        false
    } else {
        combine_bands
    };
    let time_span = if time_bin.is_none() && time_span != TimeSpan::default() {
        warn!("Time-span boundaries have no effect without time averaging");
        TimeSpan::default()
    } else {
        time_span
    };

    // Parse the regrid request and work out whether any band changes frame.
    let regrid = match regrid {
        None => None,
        Some(r) => {
            let method = parse_method(&r.interpolation)?;
            let output_frame = r.output_frame.as_deref().map(parse_frame).transpose()?;
            Some((r.mode, method, output_frame))
        }
    };
    let output_frame = regrid
        .as_ref()
        .and_then(|(_, _, f)| *f)
        .unwrap_or(bands[0].frame);
    let frame = match bands.iter().find(|b| b.frame != output_frame) {
        Some(b) if regrid.is_some() => match frame_context {
            Some(context) => Some(FrameConversion {
                context,
                output_frame,
            }),
            None => {
                return Err(ConfigurationError::NoFrameContext {
                    from: b.frame.to_string(),
                    to: output_frame.to_string(),
                })
            }
        },
        _ => None,
    };
    // Expresses a band in the output frame at the reference time.
    let in_output_frame = |band: &BandDescriptor| -> Result<BandDescriptor, ConfigurationError> {
        match frame.as_ref() {
            Some(f) if band.frame != f.output_frame => convert_band(
                band,
                &f.context,
                f.context.reference_time,
                f.output_frame,
                f.context.reference_time,
            ),
            _ => Ok(band.clone()),
        }
    };

    // Channel selection.
    let mut selected_bands = Vec::with_capacity(bands.len());
    for (band, &chan_bin) in bands.iter().zip(&chan_bins) {
        let selection = channel_selection
            .get(&band.id)
            .cloned()
            .unwrap_or(0..band.num_chans());
        let selected = band.select(selection.clone())?;
        let selection_factor = selected.num_chans() as f64 / band.num_chans() as f64;
        if selection.len() != band.num_chans() {
            debug!(
                "Band {}: selected channels {selection:?} of {}",
                band.id,
                band.num_chans()
            );
        }
        selected_bands.push((band, selection, selected, selection_factor, chan_bin));
    }

    let mut band_plans = BTreeMap::new();
    let (strategy, stripe, output_grids) = if combine {
        let expected = selected_bands[0].2.num_chans();
        for (_, _, selected, _, _) in &selected_bands {
            if selected.num_chans() != expected {
                return Err(ConfigurationError::UnequalCombinedChannels {
                    band: selected.id,
                    got: selected.num_chans(),
                    expected,
                });
            }
        }

        let converted = selected_bands
            .iter()
            .map(|(_, _, selected, _, _)| in_output_frame(selected))
            .collect::<Result<Vec<_>, _>>()?;
        for band in converted.iter().filter(|b| !b.is_uniform()) {
            warn!(
                "Band {}: channels are not evenly spaced; combined channels may be unevenly covered",
                band.id
            );
        }
        let map = match regrid.as_ref() {
            Some((mode, method, _)) => {
                if !matches!(method, InterpolationMethod::Linear | InterpolationMethod::FftShift) {
                    warn!("Combined bands are binned onto the regridded channels by overlap; the '{method}' interpolation is not used");
                }
                let grid = output_grid(&GridSpan::of_bands(&converted), mode, 0, output_frame)?;
                CombinationMap::new(&converted, grid, false)?
            }
            None => {
                let grid = combined_grid(&converted, 0, output_frame)?;
                CombinationMap::new(&converted, grid, true)?
            }
        };

        if chan_bins.iter().any(|&b| b != chan_bins[0]) {
            warn!("Combined bands are averaged together; using the first band's averaging width");
        }
        let post_average = cap_width(chan_bins[0].unwrap_or(1), map.num_chans(), 0);
        let output = if post_average > 1 {
            if map.num_chans() % post_average != 0 {
                warn!(
                    "Dropping the last {} combined channels; they don't fill an averaging group",
                    map.num_chans() % post_average
                );
            }
            averaged_grid(&map.grid, post_average, false)?
        } else {
            map.grid.clone()
        };
        if num_pieces > output.num_chans() {
            return Err(ConfigurationError::TooManyOutputBands {
                num_bands: num_pieces,
                num_chans: output.num_chans(),
            });
        }

        for ((band, selection, selected, selection_factor, _), converted) in
            selected_bands.into_iter().zip(&converted)
        {
            let grid_scale = map.grid.resolution() / converted.resolution();
            band_plans.insert(
                band.id,
                BandPlan {
                    input: band.clone(),
                    selection,
                    intermediate: selected.clone(),
                    selected,
                    selection_factor,
                    pre_average: 1,
                    keep_tail: false,
                    regrid: None,
                    output: output.clone(),
                    output_band_ids: split_ids(0, num_pieces)?,
                    weight_factor: selection_factor * grid_scale * post_average as f64,
                },
            );
        }

        info!(
            "Combining {} bands into {} channels of {} Hz",
            band_plans.len(),
            map.num_chans(),
            map.grid.resolution()
        );
        let drift = frame.as_ref().map(|_| match regrid.as_ref() {
            Some((_, InterpolationMethod::FftShift, _)) => CombinedDrift::FftShift,
            _ => CombinedDrift::Remap,
        });
        let stripe = StripeTransform::select(
            post_average > 1,
            hanning,
            drift == Some(CombinedDrift::FftShift),
        );
        let strategy = CubeStrategy::Combine(Box::new(Combination {
            map,
            sources: converted,
            drift,
            post_average,
            output: output.clone(),
        }));
        (strategy, stripe, vec![(output, 0)])
    } else {
        let mut output_grids = vec![];
        for (band, selection, selected, selection_factor, chan_bin) in selected_bands {
            let mapped_id = index_maps
                .map(IndexDimension::Band, band.id)
                .map_err(|_| ConfigurationError::InvalidBand {
                    id: band.id,
                    reason: "it has no band index mapping".to_string(),
                })?;

            let (pre_average, keep_tail, intermediate, regrid_plan, output) = match regrid
                .as_ref()
            {
                Some((mode, method, _)) => {
                    let reference = in_output_frame(&selected)?;
                    let output =
                        output_grid(&GridSpan::of_band(&reference), mode, mapped_id, output_frame)?;
                    let pre_average = cap_width(
                        chan_bin.unwrap_or_else(|| auto_pre_average(&reference, &output)),
                        selected.num_chans(),
                        band.id,
                    );
                    let intermediate = averaged_grid(&selected, pre_average, true)?;
                    let source = in_output_frame(&intermediate)?;
                    let regrid_plan = RegridPlan {
                        method: *method,
                        weight_scale: output.resolution() / source.resolution(),
                        source: source.chan_freqs.to_vec(),
                        target: output.chan_freqs.to_vec(),
                        converts: intermediate.frame != output_frame,
                    };
                    (pre_average, true, intermediate, Some(regrid_plan), output)
                }

                None => {
                    let pre_average =
                        cap_width(chan_bin.unwrap_or(1), selected.num_chans(), band.id);
                    if pre_average > 1 && selected.num_chans() % pre_average != 0 {
                        warn!(
                            "Band {}: dropping the last {} channels; they don't fill an averaging group",
                            band.id,
                            selected.num_chans() % pre_average
                        );
                    }
                    let intermediate = averaged_grid(&selected, pre_average, false)?;
                    let output = intermediate.clone().with_id(mapped_id);
                    (pre_average, false, intermediate, None, output)
                }
            };

            if num_pieces > output.num_chans() {
                return Err(ConfigurationError::TooManyOutputBands {
                    num_bands: num_pieces,
                    num_chans: output.num_chans(),
                });
            }
            let regrid_scale = regrid_plan.as_ref().map(|r| r.weight_scale).unwrap_or(1.0);
            info!(
                "Band {}: {} -> {} -> {} channels",
                band.id,
                selected.num_chans(),
                intermediate.num_chans(),
                output.num_chans()
            );

            output_grids.push((output.clone(), mapped_id));
            band_plans.insert(
                band.id,
                BandPlan {
                    input: band.clone(),
                    selection,
                    selected,
                    selection_factor,
                    pre_average,
                    keep_tail,
                    intermediate,
                    regrid: regrid_plan,
                    output,
                    output_band_ids: split_ids(mapped_id, num_pieces)?,
                    weight_factor: selection_factor * pre_average as f64 * regrid_scale,
                },
            );
        }

        let average = band_plans.values().any(|b| b.pre_average > 1);
        let stripe = StripeTransform::select(average, hanning, regrid.is_some());
        (CubeStrategy::PerBand, stripe, output_grids)
    };

    let layout = if num_pieces > 1 {
        OutputLayout::Slices(num_pieces)
    } else {
        OutputLayout::Block
    };
    let mut output_bands = vec![];
    for (grid, first_id) in output_grids {
        let ids = split_ids(first_id, num_pieces)?;
        for (piece, id) in layout.pieces(grid.num_chans()).into_iter().zip(ids) {
            output_bands.push(grid.select(piece)?.with_id(id));
        }
    }

    let mut sort_columns = vec![SortColumn::Observation, SortColumn::Array];
    if !time_span.scan {
        sort_columns.push(SortColumn::Scan);
    }
    if !time_span.state {
        sort_columns.push(SortColumn::State);
    }
    if !time_span.field {
        sort_columns.push(SortColumn::Field);
    }
    if !combine {
        sort_columns.push(SortColumn::Band);
    }
    sort_columns.push(SortColumn::Time);

    info!("Stripe transform: {stripe}");
    debug!("Sort columns: {sort_columns:?}");
    if let Some(bin) = time_bin {
        info!("Averaging rows within {} s", bin.to_seconds());
    }
    Ok(Plan {
        stripe,
        average_kernel,
        strategy,
        layout,
        bands: band_plans,
        sort_columns,
        time_bin,
        index_maps,
        frame,
        output_bands,
    })
}
