use std::collections::HashMap;

use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::table::{Cell, ColumnKey, Table};
use crate::thresholds::fmt_bound;

/// Canonical subject order plus the derived subject -> position map.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectCatalog {
    subjects: Vec<String>,
    positions: HashMap<String, usize>,
}

impl SubjectCatalog {
    pub fn new(subjects: Vec<String>) -> EngineResult<Self> {
        let mut positions = HashMap::with_capacity(subjects.len());
        for (i, s) in subjects.iter().enumerate() {
            if s.trim().is_empty() {
                return Err(EngineError::config(format!("subjects[{}] is empty", i)));
            }
            if positions.insert(s.clone(), i).is_some() {
                return Err(EngineError::config(format!("subject '{}' is listed twice", s)));
            }
        }
        Ok(Self {
            subjects,
            positions,
        })
    }

    pub fn position(&self, subject: &str) -> Option<usize> {
        self.positions.get(subject).copied()
    }

    /// Known subjects among `names`, in canonical order.
    pub fn order<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut known: Vec<usize> = names.into_iter().filter_map(|n| self.position(n)).collect();
        known.sort_unstable();
        known.dedup();
        known.into_iter().map(|i| self.subjects[i].clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedRecord {
    pub group: String,
    pub identity: serde_json::Map<String, serde_json::Value>,
    /// Aligned with [`RankedTable::subjects`].
    pub scores: Vec<Option<f64>>,
    pub total: Option<f64>,
    pub group_rank: Option<u32>,
    pub overall_rank: Option<u32>,
}

/// Raw records augmented with total score, within-group rank and overall
/// rank.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedTable {
    group_key: String,
    id_keys: Vec<String>,
    subjects: Vec<String>,
    records: Vec<RankedRecord>,
}

impl RankedTable {
    /// Builds the ranked record set from raw JSON rows.
    ///
    /// Subject columns are the union of row keys known to `catalog`, in
    /// canonical order. Unparseable scores become missing. The group column
    /// must be present, and every row must carry a group value.
    pub fn build(
        rows: &[serde_json::Map<String, serde_json::Value>],
        catalog: &SubjectCatalog,
        group_key: &str,
        id_keys: &[String],
    ) -> EngineResult<Self> {
        if !rows.iter().any(|r| r.contains_key(group_key)) {
            return Err(EngineError::config(format!(
                "group key column '{}' is absent",
                group_key
            )));
        }

        let subjects = catalog.order(rows.iter().flat_map(|r| r.keys().map(String::as_str)));

        let mut records = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let group = match row.get(group_key) {
                Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
                Some(serde_json::Value::Number(n)) => {
                    n.as_f64().map(fmt_bound).unwrap_or_else(|| n.to_string())
                }
                _ => {
                    return Err(EngineError::config(format!(
                        "row {} has no value for group key '{}'",
                        i, group_key
                    )))
                }
            };
            let identity = id_keys
                .iter()
                .filter_map(|k| row.get(k).map(|v| (k.clone(), v.clone())))
                .collect();
            let scores: Vec<Option<f64>> = subjects
                .iter()
                .map(|s| row.get(s).and_then(|v| Cell::from_json(v).coerce_score()))
                .collect();
            let total = sum_present(&scores);
            records.push(RankedRecord {
                group,
                identity,
                scores,
                total,
                group_rank: None,
                overall_rank: None,
            });
        }

        let totals: Vec<Option<f64>> = records.iter().map(|r| r.total).collect();
        for (rec, rank) in records.iter_mut().zip(min_rank_desc(&totals)) {
            rec.overall_rank = rank;
        }

        let mut by_group: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, rec) in records.iter().enumerate() {
            by_group.entry(rec.group.clone()).or_default().push(i);
        }
        for members in by_group.values() {
            let totals: Vec<Option<f64>> = members.iter().map(|&i| records[i].total).collect();
            for (&i, rank) in members.iter().zip(min_rank_desc(&totals)) {
                records[i].group_rank = rank;
            }
        }

        Ok(Self {
            group_key: group_key.to_string(),
            id_keys: id_keys.to_vec(),
            subjects,
            records,
        })
    }

    pub fn group_key(&self) -> &str {
        &self.group_key
    }

    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Distinct groups in natural order.
    pub fn groups(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for rec in &self.records {
            if !out.contains(&rec.group) {
                out.push(rec.group.clone());
            }
        }
        natural_sort(&mut out);
        out
    }

    /// Records whose group rank is at most `cap`. Records without a group
    /// rank are dropped when a cap is set.
    pub fn capped(&self, cap: Option<u32>) -> Vec<&RankedRecord> {
        self.records
            .iter()
            .filter(|r| match cap {
                None => true,
                Some(c) => r.group_rank.is_some_and(|g| g <= c),
            })
            .collect()
    }

    /// Per-subject min-tie ranks recomputed over the capped record set,
    /// plus the recomputed total rank.
    pub fn rank_frame(&self, cap: Option<u32>) -> RankFrame<'_> {
        let records = self.capped(cap);
        let subject_ranks = (0..self.subjects.len())
            .map(|s| {
                let column: Vec<Option<f64>> = records.iter().map(|r| r.scores[s]).collect();
                min_rank_desc(&column)
            })
            .collect();
        let totals: Vec<Option<f64>> = records.iter().map(|r| r.total).collect();
        RankFrame {
            subjects: &self.subjects,
            total_ranks: min_rank_desc(&totals),
            subject_ranks,
            records,
        }
    }

    /// Listing with identity fields, scores, total and both ranks.
    pub fn to_table(&self, cap: Option<u32>) -> EngineResult<Table> {
        let mut columns = self.leading_columns();
        columns.extend(self.subjects.iter().map(|s| ColumnKey::plain(s.clone(), s.clone())));
        columns.push(ColumnKey::plain("total", "total"));
        columns.push(ColumnKey::plain("group_rank", "group_rank"));
        columns.push(ColumnKey::plain("overall_rank", "overall_rank"));

        let mut table = Table::new("row", columns);
        for (i, rec) in self.capped(cap).into_iter().enumerate() {
            let mut cells = self.leading_cells(rec);
            cells.extend(rec.scores.iter().map(|v| Cell::from_opt_f64(*v)));
            cells.push(Cell::from_opt_f64(rec.total));
            cells.push(Cell::from_opt_rank(rec.group_rank));
            cells.push(Cell::from_opt_rank(rec.overall_rank));
            table.push_row((i + 1).to_string(), cells)?;
        }
        Ok(table)
    }

    fn leading_columns(&self) -> Vec<ColumnKey> {
        let mut columns = vec![ColumnKey::plain(self.group_key.clone(), "group")];
        columns.extend(self.id_keys.iter().map(|k| ColumnKey::plain(k.clone(), k.clone())));
        columns
    }

    fn leading_cells(&self, rec: &RankedRecord) -> Vec<Cell> {
        let mut cells = vec![Cell::Text(rec.group.clone())];
        cells.extend(self.id_keys.iter().map(|k| match rec.identity.get(k) {
            None | Some(serde_json::Value::Null) => Cell::Null,
            Some(serde_json::Value::String(s)) => Cell::Text(s.clone()),
            Some(other) => Cell::Text(other.to_string()),
        }));
        cells
    }
}

/// Subject and total ranks over a (possibly capped) record set. Rank
/// vectors are aligned with `records`.
#[derive(Debug, Clone)]
pub struct RankFrame<'a> {
    pub subjects: &'a [String],
    pub records: Vec<&'a RankedRecord>,
    /// One rank vector per subject.
    pub subject_ranks: Vec<Vec<Option<u32>>>,
    pub total_ranks: Vec<Option<u32>>,
}

impl RankFrame<'_> {
    /// `(subject rank, total rank)` pair cells for one subject.
    pub fn paired(&self, subject_idx: usize) -> Vec<Cell> {
        self.subject_ranks[subject_idx]
            .iter()
            .zip(&self.total_ranks)
            .map(|(s, t)| Cell::Pair(s.map(f64::from), t.map(f64::from)))
            .collect()
    }

    pub fn to_table(&self, owner: &RankedTable, pair_with_total: bool) -> EngineResult<Table> {
        let mut columns = owner.leading_columns();
        columns.extend(self.subjects.iter().map(|s| ColumnKey::plain(s.clone(), s.clone())));
        columns.push(ColumnKey::plain("total", "total"));

        let paired: Vec<Vec<Cell>> = if pair_with_total {
            (0..self.subjects.len()).map(|s| self.paired(s)).collect()
        } else {
            self.subject_ranks
                .iter()
                .map(|ranks| ranks.iter().map(|r| Cell::from_opt_rank(*r)).collect())
                .collect()
        };

        let mut table = Table::new("row", columns);
        for (i, rec) in self.records.iter().enumerate() {
            let mut cells = owner.leading_cells(rec);
            cells.extend(paired.iter().map(|col| col[i].clone()));
            cells.push(Cell::from_opt_rank(self.total_ranks[i]));
            table.push_row((i + 1).to_string(), cells)?;
        }
        Ok(table)
    }
}

fn sum_present(values: &[Option<f64>]) -> Option<f64> {
    values
        .iter()
        .flatten()
        .fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

/// Descending rank with the "min" tie-break: `1 + count of strictly greater
/// values`. Missing values keep a missing rank.
pub fn min_rank_desc(values: &[Option<f64>]) -> Vec<Option<u32>> {
    let mut sorted: Vec<f64> = values.iter().flatten().copied().collect();
    sorted.sort_by(|a, b| b.total_cmp(a));
    values
        .iter()
        .map(|v| v.map(|v| (sorted.partition_point(|&w| w > v) + 1) as u32))
        .collect()
}

/// Descending dense rank: ties share a rank, the next distinct value gets
/// the next consecutive rank.
pub fn dense_rank_desc(values: &[Option<f64>]) -> Vec<Option<u32>> {
    let mut distinct: Vec<f64> = values.iter().flatten().copied().collect();
    distinct.sort_by(|a, b| b.total_cmp(a));
    distinct.dedup();
    values
        .iter()
        .map(|v| v.map(|v| (distinct.partition_point(|&w| w > v) + 1) as u32))
        .collect()
}

/// Numeric order when every label parses as a number, lexicographic
/// otherwise.
pub fn natural_sort(labels: &mut [String]) {
    let numeric: Option<Vec<f64>> = labels.iter().map(|l| l.trim().parse::<f64>().ok()).collect();
    match numeric {
        Some(_) => labels.sort_by(|a, b| {
            let a = a.trim().parse::<f64>().unwrap_or(f64::NAN);
            let b = b.trim().parse::<f64>().unwrap_or(f64::NAN);
            a.total_cmp(&b)
        }),
        None => labels.sort(),
    }
}
