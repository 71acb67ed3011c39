use log::warn;

use crate::error::{EngineError, EngineResult};
use crate::ranking::{dense_rank_desc, min_rank_desc};
use crate::table::{Cell, ColumnKey, Table};

/// Which end of the numeric columns the weight vector lines up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightAlignment {
    First,
    Last,
}

impl WeightAlignment {
    pub fn parse(raw: Option<&str>) -> EngineResult<Self> {
        match raw.map(|s| s.to_ascii_lowercase()).as_deref() {
            None | Some("first") => Ok(WeightAlignment::First),
            Some("last") => Ok(WeightAlignment::Last),
            Some(other) => Err(EngineError::config(format!(
                "weight alignment must be 'first' or 'last' (got '{}')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Left,
    Right,
}

impl Position {
    pub fn parse(raw: Option<&str>) -> EngineResult<Self> {
        match raw.map(|s| s.to_ascii_lowercase()).as_deref() {
            None | Some("right") => Ok(Position::Right),
            Some("left") => Ok(Position::Left),
            Some(other) => Err(EngineError::config(format!(
                "position must be 'left' or 'right' (got '{}')",
                other
            ))),
        }
    }
}

/// Labels of the three composite columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeColumns {
    pub sum: String,
    pub dot: String,
    pub rank: String,
}

impl Default for CompositeColumns {
    fn default() -> Self {
        Self {
            sum: "sum".to_string(),
            dot: "score".to_string(),
            rank: "rank".to_string(),
        }
    }
}

/// Adds a weighted row sum, a dot product and a dense descending rank over
/// the dot product.
///
/// Only numeric columns take part. Weights longer than the numeric column
/// count are truncated; empty weights (or no numeric columns) give zero sums
/// and rank 1 everywhere. Missing cells are skipped by the sum and count as
/// zero in the dot product. Existing columns with the same labels are
/// replaced.
pub fn add_weighted_score(
    table: &Table,
    weights: &[f64],
    names: &CompositeColumns,
    alignment: WeightAlignment,
    position: Position,
) -> EngineResult<Table> {
    if let Some((i, w)) = weights.iter().enumerate().find(|(_, w)| !w.is_finite()) {
        return Err(EngineError::config(format!(
            "weights[{}] must be a finite number (got {})",
            i, w
        )));
    }

    let mut out = table.clone();
    for label in [&names.sum, &names.dot, &names.rank] {
        while let Some(idx) = out.column_position(label) {
            out.remove_column(idx);
        }
    }

    let numeric = out.numeric_columns();
    let n = weights.len().min(numeric.len());
    let selected: &[usize] = match alignment {
        WeightAlignment::First => &numeric[..n],
        WeightAlignment::Last => &numeric[numeric.len() - n..],
    };
    let weights = &weights[..n];

    let mut sums = Vec::with_capacity(out.rows.len());
    let mut dots = Vec::with_capacity(out.rows.len());
    for row in &out.rows {
        let mut sum = 0.0;
        let mut dot = 0.0;
        for (&col, w) in selected.iter().zip(weights) {
            if let Some(v) = row.cells[col].as_f64() {
                sum += v;
                dot += v * w;
            }
        }
        sums.push(sum);
        dots.push(dot);
    }
    let ranks = dense_rank_desc(&dots.iter().copied().map(Some).collect::<Vec<_>>());

    let new_columns = [
        (
            ColumnKey::plain(names.sum.clone(), "composite_sum"),
            sums.into_iter().map(Cell::Float).collect::<Vec<_>>(),
        ),
        (
            ColumnKey::plain(names.dot.clone(), "composite_dot"),
            dots.into_iter().map(Cell::Float).collect(),
        ),
        (
            ColumnKey::plain(names.rank.clone(), "composite_rank"),
            ranks.into_iter().map(Cell::from_opt_rank).collect(),
        ),
    ];
    for (offset, (key, cells)) in new_columns.into_iter().enumerate() {
        let at = match position {
            Position::Left => offset,
            Position::Right => out.columns.len(),
        };
        out.insert_column(at, key, cells)?;
    }
    Ok(out)
}

/// For each requested label, inserts a `"{label}_rank"` column (min-tie,
/// descending, missing stays missing) right after the source column.
/// Unknown labels are skipped.
pub fn add_rank_columns(table: &Table, labels: &[String]) -> EngineResult<Table> {
    let mut out = table.clone();
    for label in labels {
        let Some(idx) = out.column_position(label) else {
            warn!("rank column source '{}' not found; skipped", label);
            continue;
        };
        let values: Vec<Option<f64>> = out.column_cells(idx).map(Cell::as_f64).collect();
        let source = &out.columns[idx];
        let key = ColumnKey {
            subject: source.subject.clone(),
            label: format!("{}_rank", source.label),
            key: format!("{}_rank", source.key),
        };
        let cells = min_rank_desc(&values).into_iter().map(Cell::from_opt_rank).collect();
        out.insert_column(idx + 1, key, cells)?;
    }
    Ok(out)
}
