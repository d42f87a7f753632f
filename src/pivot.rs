//! Pivot summaries: group rows by a breakdown dimension and aggregate.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use crate::error::{DashboardError, Result};
use crate::table::{Table, Value, cmp_values};

/// Label used for rows or columns whose dimension value is null.
pub const BLANK_LABEL: &str = "(blank)";
pub const TOTAL_LABEL: &str = "Total";

/// Whether pivot cells hold raw aggregates or percentages of their column total.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum ValueMode {
    #[default]
    Number,
    Percent,
}

impl ValueMode {
    /// Anything other than `"percent"` means numbers.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("percent") {
            ValueMode::Percent
        } else {
            ValueMode::Number
        }
    }
}

impl From<String> for ValueMode {
    fn from(s: String) -> Self {
        ValueMode::parse(&s)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Count,
    CountDistinct(String),
    Sum(String),
    Mean(String),
}

impl Aggregation {
    pub fn column(&self) -> Option<&str> {
        match self {
            Aggregation::Count => None,
            Aggregation::CountDistinct(c) | Aggregation::Sum(c) | Aggregation::Mean(c) => {
                Some(c.as_str())
            }
        }
    }

    pub fn label(&self) -> String {
        match self {
            Aggregation::Count | Aggregation::CountDistinct(_) => "Count".to_string(),
            Aggregation::Sum(c) => format!("Sum of {}", c),
            Aggregation::Mean(c) => format!("Mean of {}", c),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownEntry {
    pub key: String,
    pub column: String,
}

/// Ordered breakdown tabs, each naming the column to group by.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BreakdownMap {
    entries: Vec<BreakdownEntry>,
}

impl BreakdownMap {
    pub fn from_pairs<K: Into<String>, C: Into<String>>(pairs: impl IntoIterator<Item = (K, C)>) -> Self {
        Self {
            entries: pairs
                .into_iter()
                .map(|(key, column)| BreakdownEntry {
                    key: key.into(),
                    column: column.into(),
                })
                .collect(),
        }
    }

    pub fn entries(&self) -> &[BreakdownEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Column for `tab`, or the first entry's column when the tab is unknown.
    pub fn resolve(&self, tab: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.key == tab)
            .or_else(|| self.entries.first())
            .map(|e| e.column.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PivotSpec {
    pub row_dimension: String,
    #[serde(default)]
    pub column_dimension: Option<String>,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default)]
    pub mode: ValueMode,
    #[serde(default = "default_include_totals")]
    pub include_totals: bool,
}

fn default_include_totals() -> bool {
    true
}

impl PivotSpec {
    pub fn new(row_dimension: impl Into<String>) -> Self {
        Self {
            row_dimension: row_dimension.into(),
            column_dimension: None,
            aggregation: Aggregation::Count,
            mode: ValueMode::Number,
            include_totals: true,
        }
    }

    pub fn by_column(mut self, column_dimension: impl Into<String>) -> Self {
        self.column_dimension = Some(column_dimension.into());
        self
    }

    pub fn aggregate(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn mode(mut self, mode: ValueMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn totals(mut self, include: bool) -> Self {
        self.include_totals = include;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PivotRow {
    pub label: String,
    pub values: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PivotTable {
    pub row_header: String,
    /// Column labels; ends with `"Total"` when row totals were requested.
    pub columns: Vec<String>,
    pub rows: Vec<PivotRow>,
    pub totals: Option<Vec<f64>>,
    pub mode: ValueMode,
}

impl PivotTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, label: &str, column: &str) -> Option<f64> {
        let idx = self.columns.iter().position(|c| c == column)?;
        match self.rows.iter().find(|r| r.label == label) {
            Some(row) => row.values.get(idx).copied(),
            None if label == TOTAL_LABEL => self.totals.as_ref()?.get(idx).copied(),
            None => None,
        }
    }

    /// Render a value the way it is shown to users.
    pub fn format_value(&self, value: f64) -> String {
        match self.mode {
            ValueMode::Percent => format!("{:.1}%", value),
            ValueMode::Number if value.fract() == 0.0 => format!("{}", value as i64),
            ValueMode::Number => format!("{:.2}", value),
        }
    }

    /// Header, body rows and the totals row as display strings.
    pub fn display_rows(&self) -> Vec<Vec<String>> {
        let mut out = Vec::with_capacity(self.rows.len() + 2);
        out.push(
            std::iter::once(self.row_header.clone())
                .chain(self.columns.iter().cloned())
                .collect(),
        );
        for row in &self.rows {
            out.push(
                std::iter::once(row.label.clone())
                    .chain(row.values.iter().map(|v| self.format_value(*v)))
                    .collect(),
            );
        }
        if let Some(totals) = &self.totals {
            out.push(
                std::iter::once(TOTAL_LABEL.to_string())
                    .chain(totals.iter().map(|v| self.format_value(*v)))
                    .collect(),
            );
        }
        out
    }

    pub fn to_html(&self) -> String {
        let rows = self.display_rows();
        let mut html = String::from("<table class=\"pivot-table\">");

        if let Some((header, body)) = rows.split_first() {
            html.push_str("<thead><tr>");
            for cell in header {
                let _ = write!(html, "<th>{}</th>", escape_html(cell));
            }
            html.push_str("</tr></thead><tbody>");
            let body_len = body.len();
            for (i, row) in body.iter().enumerate() {
                let is_total = self.totals.is_some() && i + 1 == body_len;
                html.push_str(if is_total { "<tr class=\"total\">" } else { "<tr>" });
                for (j, cell) in row.iter().enumerate() {
                    let tag = if j == 0 { "th" } else { "td" };
                    let _ = write!(html, "<{tag}>{}</{tag}>", escape_html(cell));
                }
                html.push_str("</tr>");
            }
            html.push_str("</tbody>");
        }

        html.push_str("</table>");
        html
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Default)]
struct Accumulator {
    rows: usize,
    sum: f64,
    numeric: usize,
    distinct: HashSet<String>,
}

impl Accumulator {
    fn push(&mut self, value: Option<&Value>) {
        self.rows += 1;
        if let Some(value) = value {
            if let Some(x) = value.as_f64() {
                self.sum += x;
                self.numeric += 1;
            }
            if !value.is_null() {
                self.distinct.insert(value.to_string());
            }
        }
    }

    fn finish(&self, aggregation: &Aggregation) -> f64 {
        match aggregation {
            Aggregation::Count => self.rows as f64,
            Aggregation::CountDistinct(_) => self.distinct.len() as f64,
            Aggregation::Sum(_) => self.sum,
            Aggregation::Mean(_) if self.numeric == 0 => 0.0,
            Aggregation::Mean(_) => self.sum / self.numeric as f64,
        }
    }
}

/// Distinct display labels of a dimension in sorted order, blanks last.
fn dimension_labels(values: &[Value]) -> (Vec<String>, Vec<usize>) {
    let mut known: HashSet<String> = HashSet::new();
    let mut seen: Vec<&Value> = Vec::new();
    let mut has_blank = false;

    for value in values {
        if value.is_null() {
            has_blank = true;
        } else if known.insert(value.to_string()) {
            seen.push(value);
        }
    }
    seen.sort_by(|a, b| cmp_values(a, b));

    let mut labels: Vec<String> = seen.iter().map(|v| v.to_string()).collect();
    let position: HashMap<String, usize> = labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.clone(), i))
        .collect();
    // Nulls get their own slot even when a value displays as "(blank)".
    let blank = labels.len();
    if has_blank {
        labels.push(BLANK_LABEL.to_string());
    }
    let per_row = values
        .iter()
        .map(|v| {
            if v.is_null() {
                blank
            } else {
                position[&v.to_string()]
            }
        })
        .collect();
    (labels, per_row)
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn percent_of(value: f64, total: f64) -> f64 {
    if total == 0.0 { 0.0 } else { round1(value / total * 100.0) }
}

pub fn build_pivot(table: &Table, spec: &PivotSpec) -> Result<PivotTable> {
    let row_column = table.require_column(&spec.row_dimension)?;
    let column_column = match &spec.column_dimension {
        Some(name) => Some(table.require_column(name)?),
        None => None,
    };
    let measure = match spec.aggregation.column() {
        Some(name) => Some(table.require_column(name)?),
        None => None,
    };

    let (row_labels, row_of) = dimension_labels(&row_column.values);
    let (mut columns, column_of) = match column_column {
        Some(c) => dimension_labels(&c.values),
        None => (vec![spec.aggregation.label()], vec![0; table.row_count()]),
    };

    let width = columns.len();
    let mut cells: Vec<Vec<Accumulator>> = (0..row_labels.len())
        .map(|_| (0..width).map(|_| Accumulator::default()).collect())
        .collect();
    let mut row_totals: Vec<Accumulator> = (0..row_labels.len()).map(|_| Accumulator::default()).collect();
    let mut column_totals: Vec<Accumulator> = (0..width).map(|_| Accumulator::default()).collect();
    let mut grand = Accumulator::default();

    for i in 0..table.row_count() {
        let value = measure.and_then(|m| m.values.get(i));
        let (r, c) = (row_of[i], column_of[i]);
        cells[r][c].push(value);
        row_totals[r].push(value);
        column_totals[c].push(value);
        grand.push(value);
    }

    let agg = &spec.aggregation;
    let with_total_column = spec.include_totals && column_column.is_some();
    let mut rows: Vec<PivotRow> = row_labels
        .into_iter()
        .zip(&cells)
        .zip(&row_totals)
        .map(|((label, accs), total)| {
            let mut values: Vec<f64> = accs.iter().map(|a| a.finish(agg)).collect();
            if with_total_column {
                values.push(total.finish(agg));
            }
            PivotRow { label, values }
        })
        .collect();

    let mut totals: Vec<f64> = column_totals.iter().map(|a| a.finish(agg)).collect();
    if with_total_column {
        totals.push(grand.finish(agg));
        columns.push(TOTAL_LABEL.to_string());
    }

    if spec.mode == ValueMode::Percent {
        for row in &mut rows {
            for (v, total) in row.values.iter_mut().zip(&totals) {
                *v = percent_of(*v, *total);
            }
        }
        for total in &mut totals {
            *total = if *total == 0.0 { 0.0 } else { 100.0 };
        }
    }

    log::debug!(
        "pivot on {}: {} rows x {} columns",
        spec.row_dimension,
        rows.len(),
        columns.len()
    );

    Ok(PivotTable {
        row_header: spec.row_dimension.clone(),
        columns,
        rows,
        totals: spec.include_totals.then_some(totals),
        mode: spec.mode,
    })
}

/// Pivot by the breakdown selected with `tab`, returning a title alongside.
pub fn build_pivot_table(
    table: &Table,
    breakdown_map: &BreakdownMap,
    tab: &str,
    mode: ValueMode,
    column_dimension: Option<&str>,
    aggregation: Aggregation,
) -> Result<(String, PivotTable)> {
    let row_dimension = breakdown_map
        .resolve(tab)
        .ok_or_else(|| DashboardError::InvalidConfig("breakdown map is empty".to_string()))?;

    let mut title = format!("{} by {}", aggregation.label(), row_dimension);
    if mode == ValueMode::Percent {
        title.push_str(" (%)");
    }

    let mut spec = PivotSpec::new(row_dimension).aggregate(aggregation).mode(mode);
    if let Some(column) = column_dimension {
        spec = spec.by_column(column);
    }
    Ok((title, build_pivot(table, &spec)?))
}
