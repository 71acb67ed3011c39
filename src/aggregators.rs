//! Named, stateless aggregation functions built from threshold lists.
//!
//! Every [`Aggregator`] carries a display label (`count[60,80)`, may hold
//! symbols such as `∞` or `≤`) and a separate identifier-safe key
//! (`bin_60_80`) used for lookups and column identity. The key is built from
//! the same bounds as the label, never parsed back out of it.

use crate::error::{EngineError, EngineResult};
use crate::table::Cell;
use crate::thresholds::{fmt_bound, key_bound, ClosedSide, ThresholdSpec};

/// Dual-condition semantics over `(primary, secondary)` pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DualMode {
    /// Smaller is better: primary in `(lower, upper]`, secondary `≤` limit.
    Rank,
    /// Larger is better: primary in `[lower, upper)`, secondary `≥` limit.
    Score,
}

impl DualMode {
    pub fn parse(raw: Option<&str>) -> EngineResult<Self> {
        match raw.map(|s| s.to_ascii_lowercase()).as_deref() {
            None | Some("rank") => Ok(DualMode::Rank),
            Some("score") => Ok(DualMode::Score),
            Some(other) => Err(EngineError::config(format!(
                "dual mode must be 'rank' or 'score' (got '{}')",
                other
            ))),
        }
    }

    fn primary_side(self) -> ClosedSide {
        match self {
            DualMode::Rank => ClosedSide::Upper,
            DualMode::Score => ClosedSide::Lower,
        }
    }

    fn secondary_passes(self, y: f64, limit: f64) -> bool {
        match self {
            DualMode::Rank => y <= limit,
            DualMode::Score => y >= limit,
        }
    }

    fn pass_symbol(self) -> (&'static str, &'static str) {
        match self {
            DualMode::Rank => ("T≤", "le"),
            DualMode::Score => ("T≥", "ge"),
        }
    }

    fn fail_symbol(self) -> (&'static str, &'static str) {
        match self {
            DualMode::Rank => ("T>", "gt"),
            DualMode::Score => ("T<", "lt"),
        }
    }
}

/// Where the valid-count aggregator goes in a rate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidCountPosition {
    Omit,
    Head,
    Tail,
}

impl ValidCountPosition {
    /// Accepts `"omit"`/`"head"`/`"tail"` or the numeric `0`/`1`/`-1` flags.
    pub fn from_json(raw: Option<&serde_json::Value>) -> EngineResult<Self> {
        let Some(raw) = raw.filter(|v| !v.is_null()) else {
            return Ok(ValidCountPosition::Omit);
        };
        if let Some(s) = raw.as_str() {
            return match s.to_ascii_lowercase().as_str() {
                "omit" => Ok(ValidCountPosition::Omit),
                "head" => Ok(ValidCountPosition::Head),
                "tail" => Ok(ValidCountPosition::Tail),
                other => Err(EngineError::config(format!(
                    "validCount must be one of: omit, head, tail (got '{}')",
                    other
                ))),
            };
        }
        match raw.as_i64() {
            Some(0) => Ok(ValidCountPosition::Omit),
            Some(1) => Ok(ValidCountPosition::Head),
            Some(-1) => Ok(ValidCountPosition::Tail),
            _ => Err(EngineError::config(format!(
                "validCount must be omit, head, tail, 0, 1 or -1 (got {})",
                raw
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateOptions {
    pub include_mean: bool,
    pub include_below_min: bool,
    pub valid_count: ValidCountPosition,
}

impl Default for RateOptions {
    fn default() -> Self {
        Self {
            include_mean: true,
            include_below_min: false,
            valid_count: ValidCountPosition::Omit,
        }
    }
}

/// Scalar score band used by rate counters. Always closed on the lower edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateBand {
    Below(f64),
    Between(f64, f64),
    AtLeast(f64),
}

impl RateBand {
    fn contains(self, v: f64) -> bool {
        match self {
            RateBand::Below(t) => v < t,
            RateBand::Between(lower, upper) => v >= lower && v < upper,
            RateBand::AtLeast(lower) => v >= lower,
        }
    }

    fn label(self) -> String {
        match self {
            RateBand::Below(t) => format!("(-∞,{})", fmt_bound(t)),
            RateBand::Between(lower, upper) => format!("[{},{})", fmt_bound(lower), fmt_bound(upper)),
            RateBand::AtLeast(lower) => format!("[{},+∞)", fmt_bound(lower)),
        }
    }

    fn key(self) -> String {
        match self {
            RateBand::Below(t) => format!("below_{}", key_bound(t)),
            RateBand::Between(lower, upper) => format!("{}_{}", key_bound(lower), key_bound(upper)),
            RateBand::AtLeast(lower) => format!("{}_inf", key_bound(lower)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregatorKind {
    /// Count of values inside one interval; missing values are ignored.
    Bin {
        lower: f64,
        upper: f64,
        side: ClosedSide,
    },
    /// Pairs whose primary is inside the interval and whose secondary passes.
    DualBand {
        lower: f64,
        upper: f64,
        mode: DualMode,
        secondary: f64,
    },
    /// Pairs whose secondary fails, whatever the primary.
    DualFail { mode: DualMode, secondary: f64 },
    /// Pairs with `primary ≤ primary_max` and `secondary ≤ secondary_max`.
    Joint { primary_max: f64, secondary_max: f64 },
    RateCount(RateBand),
    /// Count over total input length, missing values included.
    RateRatio(RateBand),
    Mean,
    ValidCount,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregator {
    label: String,
    key: String,
    kind: AggregatorKind,
}

impl Aggregator {
    pub fn new(label: impl Into<String>, key: impl Into<String>, kind: AggregatorKind) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
            kind,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn apply(&self, cells: &[Cell]) -> EngineResult<Cell> {
        match &self.kind {
            AggregatorKind::Bin { lower, upper, side } => {
                let values = present_values(cells, &self.label)?;
                let n = values
                    .iter()
                    .filter(|&&v| side.contains(v, *lower, *upper))
                    .count();
                Ok(Cell::Int(n as i64))
            }
            AggregatorKind::DualBand {
                lower,
                upper,
                mode,
                secondary,
            } => {
                let pairs = pair_values(cells, &self.label)?;
                let side = mode.primary_side();
                let n = pairs
                    .iter()
                    .filter(|(x, y)| match (x, y) {
                        (Some(x), Some(y)) => {
                            side.contains(*x, *lower, *upper) && mode.secondary_passes(*y, *secondary)
                        }
                        _ => false,
                    })
                    .count();
                Ok(Cell::Int(n as i64))
            }
            AggregatorKind::DualFail { mode, secondary } => {
                let pairs = pair_values(cells, &self.label)?;
                let n = pairs
                    .iter()
                    .filter(|(_, y)| matches!(y, Some(y) if !mode.secondary_passes(*y, *secondary)))
                    .count();
                Ok(Cell::Int(n as i64))
            }
            AggregatorKind::Joint {
                primary_max,
                secondary_max,
            } => {
                let pairs = pair_values(cells, &self.label)?;
                let n = pairs
                    .iter()
                    .filter(|(x, y)| match (x, y) {
                        (Some(x), Some(y)) => *x <= *primary_max && *y <= *secondary_max,
                        _ => false,
                    })
                    .count();
                Ok(Cell::Int(n as i64))
            }
            AggregatorKind::RateCount(band) => {
                let values = float_values(cells, &self.label)?;
                Ok(Cell::Int(band_count(&values, *band) as i64))
            }
            AggregatorKind::RateRatio(band) => {
                let values = float_values(cells, &self.label)?;
                if values.is_empty() {
                    return Ok(Cell::Null);
                }
                Ok(Cell::Float(band_count(&values, *band) as f64 / values.len() as f64))
            }
            AggregatorKind::Mean => {
                let values = float_values(cells, &self.label)?;
                let valid: Vec<f64> = values.into_iter().flatten().collect();
                if valid.is_empty() {
                    return Ok(Cell::Null);
                }
                Ok(Cell::Float(valid.iter().sum::<f64>() / valid.len() as f64))
            }
            AggregatorKind::ValidCount => {
                let values = float_values(cells, &self.label)?;
                Ok(Cell::Int(values.iter().flatten().count() as i64))
            }
        }
    }
}

/// Applies every aggregator of a set to the same observations.
pub fn apply_all(set: &[Aggregator], cells: &[Cell]) -> EngineResult<Vec<Cell>> {
    set.iter().map(|a| a.apply(cells)).collect()
}

fn band_count(values: &[Option<f64>], band: RateBand) -> usize {
    values
        .iter()
        .flatten()
        .filter(|&&v| band.contains(v))
        .count()
}

fn coerce_text(s: &str, label: &str, row: usize) -> EngineResult<f64> {
    s.trim().parse::<f64>().map_err(|_| {
        EngineError::data_format(format!(
            "{}: observation {} is not numeric ('{}')",
            label, row, s
        ))
    })
}

/// Numeric observations with missing values dropped.
fn present_values(cells: &[Cell], label: &str) -> EngineResult<Vec<f64>> {
    Ok(float_values(cells, label)?.into_iter().flatten().collect())
}

/// Every observation coerced to a float; missing values stay `None` so
/// callers can still see the full input length.
fn float_values(cells: &[Cell], label: &str) -> EngineResult<Vec<Option<f64>>> {
    cells
        .iter()
        .enumerate()
        .map(|(i, cell)| match cell {
            Cell::Null => Ok(None),
            Cell::Int(_) | Cell::Float(_) => Ok(cell.as_f64()),
            Cell::Text(s) => coerce_text(s, label, i).map(|v| Some(v).filter(|v| !v.is_nan())),
            Cell::Pair(..) => Err(EngineError::data_format(format!(
                "{}: observation {} is a pair, expected a number",
                label, i
            ))),
        })
        .collect()
}

fn pair_values(cells: &[Cell], label: &str) -> EngineResult<Vec<(Option<f64>, Option<f64>)>> {
    cells
        .iter()
        .enumerate()
        .map(|(i, cell)| match cell {
            Cell::Pair(x, y) => Ok((x.filter(|v| !v.is_nan()), y.filter(|v| !v.is_nan()))),
            _ => Err(EngineError::data_format(format!(
                "{}: observation {} must be a (primary, secondary) pair",
                label, i
            ))),
        })
        .collect()
}

fn bin_aggregator(lower: f64, upper: f64, side: ClosedSide) -> Aggregator {
    let (open, close) = side.brackets();
    let close = if upper.is_infinite() { ')' } else { close };
    Aggregator::new(
        format!("count{}{},{}{}", open, fmt_bound(lower), fmt_bound(upper), close),
        format!("bin_{}_{}", key_bound(lower), key_bound(upper)),
        AggregatorKind::Bin { lower, upper, side },
    )
}

/// Interval counters.
///
/// Disjoint mode yields `[t0,t1), [t1,t2), ..., [t_last,+∞)`. Cumulative
/// mode yields `[t0,t1), [t0,t2), ..., [t0,t_last)` followed by the
/// independent `[t_last,+∞)` bucket. Brackets follow `closed_side`.
pub fn build_bin_counters(spec: &ThresholdSpec) -> Vec<Aggregator> {
    let intervals = if spec.cumulative {
        spec.cumulative_intervals()
    } else {
        spec.disjoint_intervals()
    };
    let mut out: Vec<Aggregator> = intervals
        .into_iter()
        .map(|(lower, upper)| bin_aggregator(lower, upper, spec.closed_side))
        .collect();
    if spec.reversed {
        out.reverse();
    }
    out
}

/// Dual-condition counters over `(primary, secondary)` pairs: one per
/// disjoint primary interval (extended to `+∞`), then one counter for pairs
/// that fail the secondary condition. The mode fixes the interval edges;
/// `closed_side` and `cumulative` on `spec` are ignored.
pub fn build_dual_counters(
    spec: &ThresholdSpec,
    secondary: f64,
    mode: DualMode,
) -> EngineResult<Vec<Aggregator>> {
    if !secondary.is_finite() || secondary < 0.0 {
        return Err(EngineError::config(format!(
            "secondary threshold must be finite and non-negative (got {})",
            secondary
        )));
    }

    let (open, close) = mode.primary_side().brackets();
    let (pass_sym, pass_key) = mode.pass_symbol();
    let mut out: Vec<Aggregator> = spec
        .disjoint_intervals()
        .into_iter()
        .map(|(lower, upper)| {
            let close = if upper.is_infinite() { ')' } else { close };
            Aggregator::new(
                format!(
                    "dual{}{},{}{} {}{}",
                    open,
                    fmt_bound(lower),
                    fmt_bound(upper),
                    close,
                    pass_sym,
                    fmt_bound(secondary)
                ),
                format!(
                    "dual_{}_{}_{}_{}",
                    key_bound(lower),
                    key_bound(upper),
                    pass_key,
                    key_bound(secondary)
                ),
                AggregatorKind::DualBand {
                    lower,
                    upper,
                    mode,
                    secondary,
                },
            )
        })
        .collect();
    if spec.reversed {
        out.reverse();
    }

    let (fail_sym, fail_key) = mode.fail_symbol();
    out.push(Aggregator::new(
        format!("dual(any) {}{}", fail_sym, fmt_bound(secondary)),
        format!("dual_fail_{}_{}", fail_key, key_bound(secondary)),
        AggregatorKind::DualFail { mode, secondary },
    ));
    Ok(out)
}

/// Single joint counter `primary ≤ a and secondary ≤ b`, used for the
/// per-subject qualified headcount.
pub fn build_joint_counter(primary_max: f64, secondary_max: f64) -> EngineResult<Aggregator> {
    for (name, v) in [("primary", primary_max), ("secondary", secondary_max)] {
        if !v.is_finite() || v < 0.0 {
            return Err(EngineError::config(format!(
                "{} limit must be finite and non-negative (got {})",
                name, v
            )));
        }
    }
    Ok(Aggregator::new(
        format!("qualified<={}", fmt_bound(primary_max)),
        format!("qualified_{}_{}", key_bound(primary_max), key_bound(secondary_max)),
        AggregatorKind::Joint {
            primary_max,
            secondary_max,
        },
    ))
}

/// Count + ratio pairs per band, optional below-minimum pair up front,
/// optional mean, optional valid count at the head or tail.
///
/// Disjoint mode bands are `[t0,t1), ..., [t_last,+∞)`. Cumulative mode
/// bands are `[t_i,+∞)` for every boundary but the last, which only caps the
/// scale (a full mark). `reversed` flips the band pairs only.
pub fn build_rate_counters(spec: &ThresholdSpec, opts: &RateOptions) -> Vec<Aggregator> {
    let bounds = spec.bounds();
    let mut bands: Vec<RateBand> = if spec.cumulative {
        bounds[..bounds.len() - 1]
            .iter()
            .map(|&t| RateBand::AtLeast(t))
            .collect()
    } else {
        let mut v: Vec<RateBand> = bounds
            .windows(2)
            .map(|w| RateBand::Between(w[0], w[1]))
            .collect();
        v.push(RateBand::AtLeast(spec.last()));
        v
    };
    if spec.reversed {
        bands.reverse();
    }
    if opts.include_below_min {
        bands.insert(0, RateBand::Below(spec.first()));
    }

    let mut out = Vec::with_capacity(bands.len() * 2 + 2);
    for band in bands {
        out.push(Aggregator::new(
            format!("count{}", band.label()),
            format!("rate_count_{}", band.key()),
            AggregatorKind::RateCount(band),
        ));
        out.push(Aggregator::new(
            format!("ratio{}", band.label()),
            format!("rate_ratio_{}", band.key()),
            AggregatorKind::RateRatio(band),
        ));
    }
    if opts.include_mean {
        out.push(Aggregator::new("mean", "mean", AggregatorKind::Mean));
    }
    let valid = Aggregator::new("count_valid", "count_valid", AggregatorKind::ValidCount);
    match opts.valid_count {
        ValidCountPosition::Omit => {}
        ValidCountPosition::Head => out.insert(0, valid),
        ValidCountPosition::Tail => out.push(valid),
    }
    out
}
