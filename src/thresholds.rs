use crate::error::{EngineError, EngineResult};

const SCALE_PRECISION: f64 = 1e6;

/// Which edge of each interval is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedSide {
    /// `[lower, upper)`; suits scores.
    Lower,
    /// `(lower, upper]`; suits ranks.
    Upper,
}

impl ClosedSide {
    /// Accepts `"lower"`/`"upper"` or the numeric `0`/`1` mode flags.
    pub fn from_json(raw: Option<&serde_json::Value>) -> EngineResult<Self> {
        let Some(raw) = raw.filter(|v| !v.is_null()) else {
            return Ok(ClosedSide::Lower);
        };
        if let Some(s) = raw.as_str() {
            return match s.to_ascii_lowercase().as_str() {
                "lower" => Ok(ClosedSide::Lower),
                "upper" => Ok(ClosedSide::Upper),
                other => Err(EngineError::config(format!(
                    "closedSide must be 'lower' or 'upper' (got '{}')",
                    other
                ))),
            };
        }
        match raw.as_i64() {
            Some(0) => Ok(ClosedSide::Lower),
            Some(1) => Ok(ClosedSide::Upper),
            _ => Err(EngineError::config(format!(
                "closedSide must be 'lower', 'upper', 0 or 1 (got {})",
                raw
            ))),
        }
    }

    /// Interval membership. An infinite upper bound is never an edge, so the
    /// tail bucket takes every value past its lower bound.
    pub fn contains(self, value: f64, lower: f64, upper: f64) -> bool {
        let above_lower = match self {
            ClosedSide::Lower => value >= lower,
            ClosedSide::Upper => value > lower,
        };
        if upper.is_infinite() {
            return above_lower;
        }
        above_lower
            && match self {
                ClosedSide::Lower => value < upper,
                ClosedSide::Upper => value <= upper,
            }
    }

    pub fn brackets(self) -> (char, char) {
        match self {
            ClosedSide::Lower => ('[', ')'),
            ClosedSide::Upper => ('(', ']'),
        }
    }
}

/// Validated, strictly increasing boundary list plus the interval-mode flags
/// that the aggregator builders read.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSpec {
    bounds: Vec<f64>,
    pub cumulative: bool,
    pub closed_side: ClosedSide,
    pub reversed: bool,
    reordered: bool,
}

impl ThresholdSpec {
    /// Requires at least two finite, non-negative, distinct boundaries.
    /// Unsorted input is accepted and sorted; the fact is kept in
    /// the `reordered` flag and logged.
    pub fn new(raw: &[f64]) -> EngineResult<Self> {
        if raw.len() < 2 {
            return Err(EngineError::config(format!(
                "thresholds need at least 2 boundaries (got {})",
                raw.len()
            )));
        }
        for (i, t) in raw.iter().enumerate() {
            if t.is_nan() {
                return Err(EngineError::config(format!(
                    "thresholds[{}] must not be NaN",
                    i
                )));
            }
            if t.is_infinite() {
                return Err(EngineError::config(format!(
                    "thresholds[{}] must be finite (got {})",
                    i, t
                )));
            }
            if *t < 0.0 {
                return Err(EngineError::config(format!(
                    "thresholds[{}] must be non-negative (got {})",
                    i, t
                )));
            }
        }

        let mut bounds = raw.to_vec();
        bounds.sort_by(f64::total_cmp);
        if bounds.windows(2).any(|w| w[0] == w[1]) {
            return Err(EngineError::config("thresholds contain duplicate boundaries"));
        }
        let reordered = bounds.as_slice() != raw;
        if reordered {
            log::warn!("thresholds {:?} were not increasing; using {:?}", raw, bounds);
        }

        Ok(Self {
            bounds,
            cumulative: false,
            closed_side: ClosedSide::Lower,
            reversed: false,
            reordered,
        })
    }

    /// Parses a JSON array of numbers; non-numeric entries are configuration
    /// errors.
    pub fn from_json(raw: &serde_json::Value) -> EngineResult<Self> {
        let Some(items) = raw.as_array() else {
            return Err(EngineError::config("thresholds must be an array of numbers"));
        };
        let mut values = Vec::with_capacity(items.len());
        for (i, v) in items.iter().enumerate() {
            let Some(n) = v.as_f64() else {
                return Err(EngineError::config(format!(
                    "thresholds[{}] must be a number (got {})",
                    i, v
                )));
            };
            values.push(n);
        }
        Self::new(&values)
    }

    pub fn cumulative(mut self, on: bool) -> Self {
        self.cumulative = on;
        self
    }

    pub fn closed_side(mut self, side: ClosedSide) -> Self {
        self.closed_side = side;
        self
    }

    pub fn reversed(mut self, on: bool) -> Self {
        self.reversed = on;
        self
    }

    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    pub fn first(&self) -> f64 {
        self.bounds[0]
    }

    pub fn last(&self) -> f64 {
        self.bounds[self.bounds.len() - 1]
    }

    /// Disjoint consecutive intervals closed off by `+∞`:
    /// `(t0,t1), (t1,t2), ..., (t_last,+∞)`.
    pub fn disjoint_intervals(&self) -> Vec<(f64, f64)> {
        let mut out: Vec<(f64, f64)> = self.bounds.windows(2).map(|w| (w[0], w[1])).collect();
        out.push((self.last(), f64::INFINITY));
        out
    }

    /// Fixed lower bound with a growing upper bound, followed by one
    /// independent `(t_last, +∞)` tail bucket.
    pub fn cumulative_intervals(&self) -> Vec<(f64, f64)> {
        let base = self.first();
        let mut out: Vec<(f64, f64)> = self.bounds[1..].iter().map(|&t| (base, t)).collect();
        out.push((self.last(), f64::INFINITY));
        out
    }

    /// Scales every boundary by `factor`, keeping the flags. Products are
    /// snapped to six decimals so `0.55 * 100` lands on `55`.
    pub fn scaled(&self, factor: f64) -> EngineResult<Self> {
        let values: Vec<f64> = self
            .bounds
            .iter()
            .map(|t| (t * factor * SCALE_PRECISION).round() / SCALE_PRECISION)
            .collect();
        let mut out = Self::new(&values)?;
        out.cumulative = self.cumulative;
        out.closed_side = self.closed_side;
        out.reversed = self.reversed;
        out.reordered = self.reordered;
        Ok(out)
    }
}

/// Renders a boundary for labels: integral values lose the trailing `.0`,
/// infinity becomes `+∞`.
pub fn fmt_bound(v: f64) -> String {
    if v.is_infinite() {
        if v > 0.0 { "+∞".to_string() } else { "-∞".to_string() }
    } else if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// Identifier-safe rendering of a boundary for aggregator keys.
pub fn key_bound(v: f64) -> String {
    if v.is_infinite() {
        if v > 0.0 { "inf".to_string() } else { "neginf".to_string() }
    } else {
        fmt_bound(v).replace('.', "p").replace('-', "m")
    }
}
