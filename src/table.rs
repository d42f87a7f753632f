use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use crate::error::{DashboardError, Result};

/// A single cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    DateTimeTz(DateTime<Utc>),
}

/// Column type, as reported in schemas and summaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Null,
    Bool,
    Int,
    Float,
    Text,
    Date,
    DateTime,
    DateTimeTz,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int | DataType::Float)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            DataType::Date | DataType::DateTime | DataType::DateTimeTz
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Null => "null",
            DataType::Bool => "bool",
            DataType::Int => "int64",
            DataType::Float => "float64",
            DataType::Text => "object",
            DataType::Date => "date",
            DataType::DateTime => "datetime64[ns]",
            DataType::DateTimeTz => "datetime64[ns, UTC]",
        };
        f.write_str(name)
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Bool(_) => DataType::Bool,
            Value::Int(_) => DataType::Int,
            Value::Float(_) => DataType::Float,
            Value::Text(_) => DataType::Text,
            Value::Date(_) => DataType::Date,
            Value::DateTime(_) => DataType::DateTime,
            Value::DateTimeTz(_) => DataType::DateTimeTz,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) if !f.is_nan() => Some(*f),
            _ => None,
        }
    }

    /// Calendar date of a date-like cell. Text cells are parsed leniently.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::DateTime(dt) => Some(dt.date()),
            Value::DateTimeTz(dt) => Some(dt.date_naive()),
            Value::Text(s) => parse_date_str(s),
            _ => None,
        }
    }

    /// Point in time of a date-like cell, in naive UTC.
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(d) => d.and_hms_opt(0, 0, 0),
            Value::DateTime(dt) => Some(*dt),
            Value::DateTimeTz(dt) => Some(dt.naive_utc()),
            Value::Text(s) => parse_datetime_str(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            _ => serde_json::Value::String(self.to_string()),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Date(_) | Value::DateTime(_) | Value::DateTimeTz(_) => 3,
            Value::Text(_) => 4,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
            Value::DateTimeTz(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Total order used for sorting option lists and pivot labels.
///
/// Nulls sort first, numbers compare numerically across Int/Float, temporal values
/// chronologically, text lexicographically; different kinds order by kind.
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        _ => {
            if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
                return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
            }
            if a.type_rank() == 3 && b.type_rank() == 3 {
                return a.as_datetime().cmp(&b.as_datetime());
            }
            a.type_rank().cmp(&b.type_rank())
        }
    }
}

/// Parse `YYYY-MM-DD`, optionally followed by a time part or an RFC 3339 offset.
pub fn parse_date_str(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    parse_datetime_str(s).map(|dt| dt.date())
}

/// Parse a timestamp. Offsets are normalised to UTC.
pub fn parse_datetime_str(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Column {
            name: name.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Inferred from the non-null cells. Int and Float mixed gives Float; any other
    /// mix is reported as text.
    pub fn data_type(&self) -> DataType {
        let mut found = DataType::Null;
        for value in self.values.iter().filter(|v| !v.is_null()) {
            let t = value.data_type();
            found = match (found, t) {
                (DataType::Null, t) => t,
                (a, b) if a == b => a,
                (DataType::Int, DataType::Float) | (DataType::Float, DataType::Int) => {
                    DataType::Float
                }
                _ => return DataType::Text,
            };
        }
        found
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_null()).count()
    }

    pub fn has_nulls(&self) -> bool {
        self.values.iter().any(Value::is_null)
    }
}

/// Schema definition for a dataset column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// In-memory columnar table. All columns have the same length and distinct names.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTable")]
pub struct Table {
    columns: Vec<Column>,
}

/// Serialized form of a [`Table`], validated by [`Table::new`] on the way in.
#[derive(Deserialize)]
pub(crate) struct RawTable {
    columns: Vec<Column>,
}

impl TryFrom<RawTable> for Table {
    type Error = DashboardError;

    fn try_from(raw: RawTable) -> Result<Self> {
        Table::new(raw.columns)
    }
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let len = first.len();
            if let Some(bad) = columns.iter().find(|c| c.len() != len) {
                return Err(DashboardError::InvalidTable(format!(
                    "column '{}' has {} rows, expected {}",
                    bad.name,
                    bad.len(),
                    len
                )));
            }
        }
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(DashboardError::InvalidTable(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }
        Ok(Table { columns })
    }

    pub fn empty() -> Self {
        Table::default()
    }

    /// Build a table from row-major data.
    pub fn from_rows<S: AsRef<str>>(names: &[S], rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut columns: Vec<Column> = names
            .iter()
            .map(|n| Column::new(n.as_ref(), Vec::with_capacity(rows.len())))
            .collect();
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() {
                return Err(DashboardError::InvalidTable(format!(
                    "row {} has {} cells, expected {}",
                    i,
                    row.len(),
                    columns.len()
                )));
            }
            for (column, value) in columns.iter_mut().zip(row) {
                column.values.push(value);
            }
        }
        Table::new(columns)
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn require_column(&self, name: &str) -> Result<&Column> {
        self.column(name)
            .ok_or_else(|| DashboardError::UnknownColumn(name.to_string()))
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        self.column(column).and_then(|c| c.values.get(row))
    }

    pub fn row(&self, row: usize) -> Vec<&Value> {
        self.columns.iter().filter_map(|c| c.values.get(row)).collect()
    }

    /// Row as a JSON object keyed by column name.
    pub fn row_json(&self, row: usize) -> serde_json::Map<String, serde_json::Value> {
        self.columns
            .iter()
            .filter_map(|c| c.values.get(row).map(|v| (c.name.clone(), v.to_json())))
            .collect()
    }

    /// Keep the rows whose mask entry is `true`.
    pub fn filter_rows(&self, mask: &[bool]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let values = c
                    .values
                    .iter()
                    .zip(mask)
                    .filter(|(_, keep)| **keep)
                    .map(|(v, _)| v.clone())
                    .collect();
                Column::new(c.name.clone(), values)
            })
            .collect();
        Table { columns }
    }

    pub fn take(&self, indices: &[usize]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let values = indices
                    .iter()
                    .filter_map(|&i| c.values.get(i).cloned())
                    .collect();
                Column::new(c.name.clone(), values)
            })
            .collect();
        Table { columns }
    }

    pub fn head(&self, n: usize) -> Table {
        let n = n.min(self.row_count());
        let indices: Vec<usize> = (0..n).collect();
        self.take(&indices)
    }

    /// Replace the column with the same name, or append it.
    pub fn with_column(mut self, column: Column) -> Result<Table> {
        if !self.columns.is_empty() && column.len() != self.row_count() {
            return Err(DashboardError::InvalidTable(format!(
                "column '{}' has {} rows, expected {}",
                column.name,
                column.len(),
                self.row_count()
            )));
        }
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        Ok(self)
    }

    pub fn schema(&self) -> Vec<ColumnSchema> {
        self.columns
            .iter()
            .map(|c| ColumnSchema {
                name: c.name.clone(),
                data_type: c.data_type().to_string(),
                nullable: c.has_nulls(),
                description: None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::from_rows(
            &["month", "area", "amount"],
            vec![
                vec!["2024-01".into(), "APAC".into(), Value::Int(3)],
                vec!["2024-01".into(), "EMEA".into(), Value::Float(1.5)],
                vec!["2024-02".into(), Value::Null, Value::Int(7)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn rejects_ragged_columns() {
        let result = Table::new(vec![
            Column::new("a", vec![Value::Int(1)]),
            Column::new("b", vec![]),
        ]);
        assert!(matches!(result, Err(DashboardError::InvalidTable(_))));
    }

    #[test]
    fn rejects_duplicate_names() {
        let result = Table::new(vec![Column::new("a", vec![]), Column::new("a", vec![])]);
        assert!(result.is_err());
    }

    #[test]
    fn infers_column_types() {
        let table = sample();
        assert_eq!(table.column("amount").unwrap().data_type(), DataType::Float);
        assert_eq!(table.column("area").unwrap().data_type(), DataType::Text);
        assert_eq!(table.column("area").unwrap().null_count(), 1);
        assert_eq!(Column::new("x", vec![Value::Null]).data_type(), DataType::Null);
    }

    #[test]
    fn filter_take_and_head() {
        let table = sample();
        let filtered = table.filter_rows(&[true, false, true]);
        assert_eq!(filtered.row_count(), 2);
        assert_eq!(filtered.value(1, "month"), Some(&Value::from("2024-02")));

        assert_eq!(table.take(&[2]).value(0, "amount"), Some(&Value::Int(7)));
        assert_eq!(table.head(10).row_count(), 3);
        assert_eq!(table.head(1).row_count(), 1);
    }

    #[test]
    fn with_column_replaces_or_appends() {
        let table = sample()
            .with_column(Column::new("flag", vec![Value::Bool(true); 3]))
            .unwrap();
        assert_eq!(table.column_count(), 4);

        let table = table
            .with_column(Column::new("flag", vec![Value::Bool(false); 3]))
            .unwrap();
        assert_eq!(table.column_count(), 4);
        assert_eq!(table.value(0, "flag"), Some(&Value::Bool(false)));

        assert!(table.with_column(Column::new("short", vec![])).is_err());
    }

    #[test]
    fn ordering_mixes_ints_and_floats() {
        let mut values = vec![Value::Float(2.5), Value::Int(1), Value::Null, Value::Int(3)];
        values.sort_by(cmp_values);
        assert_eq!(
            values,
            vec![Value::Null, Value::Int(1), Value::Float(2.5), Value::Int(3)]
        );
    }

    #[test]
    fn datetimes_display_without_offset() {
        use chrono::TimeZone;
        let naive = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(10, 11, 12)
            .unwrap();
        let aware = Utc.with_ymd_and_hms(2024, 3, 9, 10, 11, 12).unwrap();
        assert_eq!(Value::DateTime(naive).to_string(), "2024-03-09T10:11:12");
        assert_eq!(Value::DateTimeTz(aware).to_string(), "2024-03-09T10:11:12");
    }

    #[test]
    fn parses_dates_leniently() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(parse_date_str("2024-03-09"), Some(d));
        assert_eq!(parse_date_str("2024-03-09 10:11:12"), Some(d));
        assert_eq!(parse_date_str("2024-03-09T23:00:00Z"), Some(d));
        assert_eq!(parse_date_str("09/03/2024"), None);
    }

    #[test]
    fn schema_reports_dtype_names() {
        let schema = sample().schema();
        assert_eq!(schema[0].data_type, "object");
        assert_eq!(schema[2].data_type, "float64");
        assert!(schema[1].nullable);
        assert!(!schema[0].nullable);
    }
}
