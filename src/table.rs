use crate::error::{EngineError, EngineResult};
use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;

/// One value in a tabular result or an aggregator input.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    /// `(primary, secondary)` observation fed to dual-condition counters.
    Pair(Option<f64>, Option<f64>),
}

impl Cell {
    pub fn from_json(v: &serde_json::Value) -> Cell {
        match v {
            serde_json::Value::Null => Cell::Null,
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Int(i),
                None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Null),
            },
            serde_json::Value::String(s) => Cell::Text(s.clone()),
            serde_json::Value::Array(items) if items.len() == 2 => {
                let side = |x: &serde_json::Value| -> Result<Option<f64>, ()> {
                    if x.is_null() {
                        Ok(None)
                    } else {
                        x.as_f64().map(Some).ok_or(())
                    }
                };
                match (side(&items[0]), side(&items[1])) {
                    (Ok(a), Ok(b)) => Cell::Pair(a, b),
                    _ => Cell::Text(v.to_string()),
                }
            }
            other => Cell::Text(other.to_string()),
        }
    }

    /// Numeric value of an `Int`/`Float` cell. NaN counts as missing.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) if !f.is_nan() => Some(*f),
            _ => None,
        }
    }

    /// Lenient score coercion used when ingesting raw tables: numbers and
    /// numeric strings survive, everything else becomes missing.
    pub fn coerce_score(&self) -> Option<f64> {
        match self {
            Cell::Int(_) | Cell::Float(_) => self.as_f64().filter(|f| f.is_finite()),
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    /// Null cells count as numeric so an all-missing column still takes part
    /// in numeric column selection.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Cell::Null | Cell::Int(_) | Cell::Float(_))
    }

    pub fn from_opt_f64(v: Option<f64>) -> Cell {
        v.map(Cell::Float).unwrap_or(Cell::Null)
    }

    pub fn from_opt_rank(v: Option<u32>) -> Cell {
        v.map(|r| Cell::Int(i64::from(r))).unwrap_or(Cell::Null)
    }

    pub fn to_csv_field(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) if f.is_nan() => String::new(),
            Cell::Float(f) => f.to_string(),
            Cell::Text(s) => csv_quote(s),
            Cell::Pair(a, b) => csv_quote(&format!(
                "({}, {})",
                a.map(|v| v.to_string()).unwrap_or_default(),
                b.map(|v| v.to_string()).unwrap_or_default()
            )),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Null => serializer.serialize_none(),
            Cell::Int(i) => serializer.serialize_i64(*i),
            Cell::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Cell::Float(_) => serializer.serialize_none(),
            Cell::Text(s) => serializer.serialize_str(s),
            Cell::Pair(a, b) => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element(a)?;
                seq.serialize_element(b)?;
                seq.end()
            }
        }
    }
}

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Column identity. `subject` is the top level of a compound
/// `(subject, metric)` key; plain columns leave it unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnKey {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub label: String,
    pub key: String,
}

impl ColumnKey {
    pub fn plain(label: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            subject: None,
            label: label.into(),
            key: key.into(),
        }
    }

    pub fn compound(
        subject: impl Into<String>,
        label: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            subject: Some(subject.into()),
            label: label.into(),
            key: key.into(),
        }
    }

    pub fn header(&self) -> String {
        match &self.subject {
            Some(s) => format!("{}/{}", s, self.label),
            None => self.label.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRow {
    pub key: String,
    pub cells: Vec<Cell>,
}

/// Row-keyed result table. A table whose every column carries a subject is
/// a multi-key table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub index_name: String,
    pub columns: Vec<ColumnKey>,
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitPolicy {
    /// Remove the subject level entirely.
    Drop,
    /// Fold the subject into the metric label (`math_count[60,80)`).
    Merge,
    /// Leave the compound key untouched.
    Keep,
}

impl SplitPolicy {
    pub fn parse(raw: Option<&str>) -> EngineResult<Self> {
        match raw.map(|s| s.to_ascii_lowercase()).as_deref() {
            None | Some("drop") => Ok(SplitPolicy::Drop),
            Some("merge") => Ok(SplitPolicy::Merge),
            Some("keep") => Ok(SplitPolicy::Keep),
            Some(other) => Err(EngineError::config(format!(
                "split policy must be one of: drop, merge, keep (got '{}')",
                other
            ))),
        }
    }
}

impl Table {
    pub fn new(index_name: impl Into<String>, columns: Vec<ColumnKey>) -> Self {
        Self {
            index_name: index_name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, key: impl Into<String>, cells: Vec<Cell>) -> EngineResult<()> {
        let key = key.into();
        if cells.len() != self.columns.len() {
            return Err(EngineError::config(format!(
                "row '{}' has {} cells but the table has {} columns",
                key,
                cells.len(),
                self.columns.len()
            )));
        }
        self.rows.push(TableRow { key, cells });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[cfg(test)]
    pub fn row_keys(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.key.as_str()).collect()
    }

    pub fn column_position(&self, label: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.label == label)
    }

    pub fn column_cells(&self, idx: usize) -> impl Iterator<Item = &Cell> + '_ {
        self.rows.iter().map(move |r| &r.cells[idx])
    }

    pub fn cell(&self, row_key: &str, label: &str) -> Option<&Cell> {
        let col = self.column_position(label)?;
        self.rows
            .iter()
            .find(|r| r.key == row_key)
            .map(|r| &r.cells[col])
    }

    pub fn is_multi_key(&self) -> bool {
        !self.columns.is_empty() && self.columns.iter().all(|c| c.subject.is_some())
    }

    /// Distinct top-level keys in first-appearance column order.
    pub fn top_keys(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for c in &self.columns {
            if let Some(s) = &c.subject {
                if !out.iter().any(|k| k == s) {
                    out.push(s.clone());
                }
            }
        }
        out
    }

    /// Positions of columns whose cells are all numeric or null.
    pub fn numeric_columns(&self) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|&i| self.column_cells(i).all(Cell::is_numeric))
            .collect()
    }

    pub fn insert_column(&mut self, at: usize, key: ColumnKey, cells: Vec<Cell>) -> EngineResult<()> {
        if cells.len() != self.rows.len() {
            return Err(EngineError::config(format!(
                "column '{}' has {} cells but the table has {} rows",
                key.label,
                cells.len(),
                self.rows.len()
            )));
        }
        let at = at.min(self.columns.len());
        self.columns.insert(at, key);
        for (row, cell) in self.rows.iter_mut().zip(cells) {
            row.cells.insert(at, cell);
        }
        Ok(())
    }

    pub fn remove_column(&mut self, idx: usize) -> (ColumnKey, Vec<Cell>) {
        let key = self.columns.remove(idx);
        let cells = self.rows.iter_mut().map(|r| r.cells.remove(idx)).collect();
        (key, cells)
    }

    /// Copy of the table restricted to `positions`, in that order.
    pub fn select_columns(&self, positions: &[usize]) -> Table {
        Table {
            index_name: self.index_name.clone(),
            columns: positions.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| TableRow {
                    key: r.key.clone(),
                    cells: positions.iter().map(|&i| r.cells[i].clone()).collect(),
                })
                .collect(),
        }
    }

    /// Appends the columns of `other`; both tables must share row keys in
    /// the same order.
    #[cfg(test)]
    pub fn hconcat(&self, other: &Table) -> EngineResult<Table> {
        if self.row_keys() != other.row_keys() {
            return Err(EngineError::config(
                "cannot join tables with different row keys",
            ));
        }
        let mut out = self.clone();
        out.columns.extend(other.columns.iter().cloned());
        for (row, extra) in out.rows.iter_mut().zip(&other.rows) {
            row.cells.extend(extra.cells.iter().cloned());
        }
        Ok(out)
    }

    pub fn to_csv(&self) -> String {
        let mut csv = String::new();
        let mut header = vec![csv_quote(&self.index_name)];
        header.extend(self.columns.iter().map(|c| csv_quote(&c.header())));
        csv.push_str(&header.join(","));
        csv.push('\n');
        for row in &self.rows {
            let mut fields = vec![csv_quote(&row.key)];
            fields.extend(row.cells.iter().map(Cell::to_csv_field));
            csv.push_str(&fields.join(","));
            csv.push('\n');
        }
        csv
    }
}

/// Partitions a multi-key table into one table per subject. Column and row
/// order inside each part follow the source table.
pub fn split_by_top_key(table: &Table, policy: SplitPolicy) -> EngineResult<Vec<(String, Table)>> {
    if !table.is_multi_key() {
        return Err(EngineError::config(
            "table must have compound (subject, metric) columns to be split",
        ));
    }

    let mut out = Vec::new();
    for subject in table.top_keys() {
        let positions: Vec<usize> = table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.subject.as_deref() == Some(subject.as_str()))
            .map(|(i, _)| i)
            .collect();
        let mut part = table.select_columns(&positions);
        for col in part.columns.iter_mut() {
            match policy {
                SplitPolicy::Drop => col.subject = None,
                SplitPolicy::Merge => {
                    col.label = format!("{}_{}", subject, col.label);
                    col.key = format!("{}_{}", subject, col.key);
                    col.subject = None;
                }
                SplitPolicy::Keep => {}
            }
        }
        out.push((subject, part));
    }
    Ok(out)
}

/// Inverse of a [`SplitPolicy::Drop`] split: puts `subject` back on every
/// plain column.
#[cfg(test)]
pub fn attach_top_key(table: &Table, subject: &str) -> Table {
    let mut out = table.clone();
    for col in out.columns.iter_mut() {
        if col.subject.is_none() {
            col.subject = Some(subject.to_string());
        }
    }
    out
}
