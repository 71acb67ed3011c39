//! Grouped multi-subject aggregation and the report builders on top of it.
//!
//! Every report follows the same pipeline: pick a record set from the
//! [`RankedTable`], build one aggregator set per subject, aggregate per
//! group into a multi-key table, split it per subject and score it.

use log::debug;

use crate::aggregators::{
    apply_all, build_bin_counters, build_dual_counters, build_joint_counter, build_rate_counters,
    Aggregator, DualMode, RateOptions,
};
use crate::composite::{add_rank_columns, add_weighted_score, CompositeColumns, Position, WeightAlignment};
use crate::error::{EngineError, EngineResult};
use crate::ranking::{natural_sort, RankedTable, SubjectCatalog};
use crate::table::{split_by_top_key, Cell, ColumnKey, SplitPolicy, Table};
use crate::thresholds::{fmt_bound, ThresholdSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    ScoreBands,
    DoubleQualified,
    Rates,
    ClassBands,
    SubjectQualified,
    Combined,
}

impl ReportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportKind::ScoreBands => "scoreBands",
            ReportKind::DoubleQualified => "doubleQualified",
            ReportKind::Rates => "rates",
            ReportKind::ClassBands => "classBands",
            ReportKind::SubjectQualified => "subjectQualified",
            ReportKind::Combined => "combined",
        }
    }
}

/// Named output tables of one report, in emission order.
pub type ReportTables = Vec<(String, Table)>;

/// Composite score settings applied to every table of a report.
#[derive(Debug, Clone, PartialEq)]
pub struct Scoring {
    pub weights: Vec<f64>,
    pub names: CompositeColumns,
    pub alignment: WeightAlignment,
    pub position: Position,
}

impl Scoring {
    pub fn new(weights: Vec<f64>) -> Self {
        Self {
            weights,
            names: CompositeColumns::default(),
            alignment: WeightAlignment::First,
            position: Position::Right,
        }
    }

    fn apply(&self, table: &Table) -> EngineResult<Table> {
        add_weighted_score(table, &self.weights, &self.names, self.alignment, self.position)
    }
}

/// Per-subject observation columns aligned with a group label per record.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index_name: String,
    pub groups: Vec<String>,
    pub columns: Vec<(String, Vec<Cell>)>,
}

impl Frame {
    /// Raw subject scores of the capped record set.
    pub fn scores(table: &RankedTable, cap: Option<u32>) -> Self {
        let records = table.capped(cap);
        Self {
            index_name: table.group_key().to_string(),
            groups: records.iter().map(|r| r.group.clone()).collect(),
            columns: table
                .subjects()
                .iter()
                .enumerate()
                .map(|(s, name)| {
                    let cells = records.iter().map(|r| Cell::from_opt_f64(r.scores[s])).collect();
                    (name.clone(), cells)
                })
                .collect(),
        }
    }

    /// `(subject rank, total rank)` pairs recomputed over the capped set.
    pub fn rank_pairs(table: &RankedTable, cap: Option<u32>) -> Self {
        let frame = table.rank_frame(cap);
        Self {
            index_name: table.group_key().to_string(),
            groups: frame.records.iter().map(|r| r.group.clone()).collect(),
            columns: table
                .subjects()
                .iter()
                .enumerate()
                .map(|(s, name)| (name.clone(), frame.paired(s)))
                .collect(),
        }
    }

    /// Single `overall_rank` column of the capped set.
    pub fn overall_rank(table: &RankedTable, cap: Option<u32>) -> Self {
        let records = table.capped(cap);
        Self {
            index_name: table.group_key().to_string(),
            groups: records.iter().map(|r| r.group.clone()).collect(),
            columns: vec![(
                "overall_rank".to_string(),
                records.iter().map(|r| Cell::from_opt_rank(r.overall_rank)).collect(),
            )],
        }
    }

    fn column(&self, subject: &str) -> Option<&[Cell]> {
        self.columns
            .iter()
            .find(|(name, _)| name == subject)
            .map(|(_, cells)| cells.as_slice())
    }
}

/// Reverse lookup from `basis -> subjects` assignments to one basis per
/// subject, in canonical subject order. Names outside the catalog are
/// skipped; it is an error only when nothing resolves.
pub fn assign_subjects<T: Clone>(
    catalog: &SubjectCatalog,
    assignments: &[(T, Vec<String>)],
) -> EngineResult<Vec<(String, T)>> {
    let mut out: Vec<(usize, String, T)> = Vec::new();
    for (basis, subjects) in assignments {
        for subject in subjects {
            let Some(pos) = catalog.position(subject) else {
                debug!("subject '{}' not in catalog; skipped", subject);
                continue;
            };
            if out.iter().any(|(p, _, _)| *p == pos) {
                return Err(EngineError::config(format!(
                    "subject '{}' is assigned more than once",
                    subject
                )));
            }
            out.push((pos, subject.clone(), basis.clone()));
        }
    }
    if out.is_empty() {
        return Err(EngineError::config("no subjects were assigned"));
    }
    out.sort_by_key(|(pos, _, _)| *pos);
    Ok(out.into_iter().map(|(_, s, b)| (s, b)).collect())
}

/// Applies each subject's aggregator set per group. Subjects missing from
/// the frame are skipped. Rows follow natural group order; columns are
/// `(subject, aggregator label)`.
pub fn aggregate(frame: &Frame, sets: &[(String, Vec<Aggregator>)]) -> EngineResult<Table> {
    let mut groups: Vec<String> = Vec::new();
    for g in &frame.groups {
        if !groups.contains(g) {
            groups.push(g.clone());
        }
    }
    natural_sort(&mut groups);

    let present: Vec<(&String, &[Aggregator], &[Cell])> = sets
        .iter()
        .filter_map(|(subject, set)| match frame.column(subject) {
            Some(cells) => Some((subject, set.as_slice(), cells)),
            None => {
                debug!("subject '{}' not in dataset; skipped", subject);
                None
            }
        })
        .collect();

    let columns = present
        .iter()
        .flat_map(|(subject, set, _)| {
            set.iter()
                .map(move |a| ColumnKey::compound(subject.as_str(), a.label(), a.key()))
        })
        .collect();
    let mut table = Table::new(frame.index_name.clone(), columns);

    for group in &groups {
        let members: Vec<usize> = frame
            .groups
            .iter()
            .enumerate()
            .filter(|(_, g)| *g == group)
            .map(|(i, _)| i)
            .collect();
        let mut cells = Vec::with_capacity(table.columns.len());
        for (_, set, column) in &present {
            let observations: Vec<Cell> = members.iter().map(|&i| column[i].clone()).collect();
            cells.extend(apply_all(set, &observations)?);
        }
        table.push_row(group.clone(), cells)?;
    }

    debug!(
        "aggregated {} subjects over {} groups into {} columns",
        present.len(),
        groups.len(),
        table.columns.len()
    );
    Ok(table)
}

fn split_and_score(
    table: &Table,
    split: SplitPolicy,
    scoring: Option<&Scoring>,
) -> EngineResult<ReportTables> {
    if table.columns.is_empty() {
        return Ok(Vec::new());
    }
    split_by_top_key(table, split)?
        .into_iter()
        .map(|(subject, part)| {
            let part = match scoring {
                Some(s) => s.apply(&part)?,
                None => part,
            };
            Ok((subject, part))
        })
        .collect()
}

/// Interval counts of raw scores per class and subject.
pub fn score_bands(
    table: &RankedTable,
    catalog: &SubjectCatalog,
    bands: &[(ThresholdSpec, Vec<String>)],
    cap: Option<u32>,
    split: SplitPolicy,
    scoring: Option<&Scoring>,
) -> EngineResult<ReportTables> {
    let sets: Vec<(String, Vec<Aggregator>)> = assign_subjects(catalog, bands)?
        .into_iter()
        .map(|(subject, spec)| (subject, build_bin_counters(&spec)))
        .collect();
    let multi = aggregate(&Frame::scores(table, cap), &sets)?;
    split_and_score(&multi, split, scoring)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DualParams {
    pub thresholds: ThresholdSpec,
    pub secondary: f64,
    pub mode: DualMode,
    /// Defaults to every subject of the dataset.
    pub subjects: Option<Vec<String>>,
}

/// Dual-condition counts over `(subject rank, total rank)` pairs.
pub fn double_qualified(
    table: &RankedTable,
    catalog: &SubjectCatalog,
    params: &DualParams,
    cap: Option<u32>,
    split: SplitPolicy,
    scoring: Option<&Scoring>,
) -> EngineResult<ReportTables> {
    let subjects = match &params.subjects {
        Some(list) => assign_subjects(catalog, &[((), list.clone())])?
            .into_iter()
            .map(|(s, _)| s)
            .collect(),
        None => table.subjects().to_vec(),
    };
    let mut sets = Vec::with_capacity(subjects.len());
    for subject in subjects {
        let set = build_dual_counters(&params.thresholds, params.secondary, params.mode)?;
        sets.push((subject, set));
    }
    let multi = aggregate(&Frame::rank_pairs(table, cap), &sets)?;
    split_and_score(&multi, split, scoring)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateParams {
    /// `(full mark, subjects)` assignments.
    pub full_marks: Vec<(f64, Vec<String>)>,
    /// Fractions of the full mark; `1.0` is appended as the top boundary.
    pub ratios: Vec<f64>,
    pub cumulative: bool,
    pub options: RateOptions,
    /// Metric labels that get a `"{label}_rank"` column.
    pub rank_labels: Vec<String>,
}

/// Count/ratio pairs, mean and valid count per class and subject, with
/// thresholds scaled from each subject's full mark.
pub fn rates(
    table: &RankedTable,
    catalog: &SubjectCatalog,
    params: &RateParams,
    cap: Option<u32>,
    split: SplitPolicy,
) -> EngineResult<ReportTables> {
    for (full_mark, _) in &params.full_marks {
        if !full_mark.is_finite() || *full_mark <= 0.0 {
            return Err(EngineError::config(format!(
                "full mark must be a positive number (got {})",
                full_mark
            )));
        }
    }
    let mut ratios = params.ratios.clone();
    ratios.push(1.0);
    let base = ThresholdSpec::new(&ratios)?.cumulative(params.cumulative);

    let mut sets = Vec::new();
    for (subject, full_mark) in assign_subjects(catalog, &params.full_marks)? {
        let spec = base.scaled(full_mark)?;
        sets.push((subject, build_rate_counters(&spec, &params.options)));
    }
    let multi = aggregate(&Frame::scores(table, cap), &sets)?;
    split_and_score(&multi, split, None)?
        .into_iter()
        .map(|(subject, part)| Ok((subject, add_rank_columns(&part, &params.rank_labels)?)))
        .collect()
}

/// Interval counts of overall ranks per class.
pub fn class_bands(
    table: &RankedTable,
    thresholds: &ThresholdSpec,
    cap: Option<u32>,
    scoring: Option<&Scoring>,
) -> EngineResult<ReportTables> {
    let sets = vec![("overall_rank".to_string(), build_bin_counters(thresholds))];
    let multi = aggregate(&Frame::overall_rank(table, cap), &sets)?;
    split_and_score(&multi, SplitPolicy::Drop, scoring)
}

/// Per class, one column per subject counting records with subject rank
/// `≤ subject_max` and total rank `≤ total_max`, over the whole record set.
pub fn subject_qualified(table: &RankedTable, subject_max: f64, total_max: f64) -> EngineResult<Table> {
    let counter = build_joint_counter(subject_max, total_max)?;
    let sets: Vec<(String, Vec<Aggregator>)> = table
        .subjects()
        .iter()
        .map(|s| (s.clone(), vec![counter.clone()]))
        .collect();
    let mut out = aggregate(&Frame::rank_pairs(table, None), &sets)?;
    for col in out.columns.iter_mut() {
        if let Some(subject) = col.subject.take() {
            col.key = format!("{}_{}", subject, col.key);
            col.label = subject;
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualifiedLimits {
    pub subject_max: f64,
    pub total_max: f64,
}

/// Score-band tables with the subject-qualified count prepended.
pub fn combined(
    table: &RankedTable,
    catalog: &SubjectCatalog,
    bands: &[(ThresholdSpec, Vec<String>)],
    limits: &QualifiedLimits,
    cap: Option<u32>,
    split: SplitPolicy,
    scoring: Option<&Scoring>,
) -> EngineResult<ReportTables> {
    let qualified = subject_qualified(table, limits.subject_max, limits.total_max)?;
    let label = format!("qualified<={}", fmt_bound(limits.subject_max));

    let mut out = Vec::new();
    for (subject, part) in score_bands(table, catalog, bands, cap, split, None)? {
        let cells: Vec<Cell> = part
            .rows
            .iter()
            .map(|row| qualified.cell(&row.key, &subject).cloned().unwrap_or(Cell::Null))
            .collect();
        let key = match split {
            SplitPolicy::Keep => ColumnKey::compound(subject.clone(), label.clone(), "qualified"),
            _ => ColumnKey::plain(label.clone(), "qualified"),
        };
        let mut part = part;
        part.insert_column(0, key, cells)?;
        let part = match scoring {
            Some(s) => s.apply(&part)?,
            None => part,
        };
        out.push((subject, part));
    }
    Ok(out)
}
