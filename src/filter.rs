//! Declarative row filters over a [`Table`].
//!
//! A [`FilterSet`] combines category, date-range and text filters; every filter
//! must hold for a row to be kept.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::{DashboardError, Result};
use crate::table::{Table, Value, cmp_values};

/// Keep rows whose cell, rendered as a string, is one of `values`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategoryFilter {
    pub column: String,
    pub values: Vec<String>,
}

impl CategoryFilter {
    pub fn new(column: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            column: column.into(),
            values,
        }
    }

    fn mask(&self, table: &Table) -> Result<Vec<bool>> {
        let column = table.require_column(&self.column)?;
        if self.values.is_empty() {
            return Ok(vec![true; column.len()]);
        }
        let allowed: HashSet<&str> = self.values.iter().map(String::as_str).collect();
        Ok(column
            .values
            .iter()
            .map(|v| !v.is_null() && allowed.contains(v.to_string().as_str()))
            .collect())
    }
}

/// Inclusive calendar-date range, bounds given as `YYYY-MM-DD`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DateRangeFilter {
    pub column: String,
    pub start_date: String,
    pub end_date: String,
}

impl DateRangeFilter {
    pub fn new(
        column: impl Into<String>,
        start_date: impl Into<String>,
        end_date: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            start_date: start_date.into(),
            end_date: end_date.into(),
        }
    }

    pub fn bounds(&self) -> Result<(NaiveDate, NaiveDate)> {
        Ok((parse_bound(&self.start_date)?, parse_bound(&self.end_date)?))
    }

    fn mask(&self, table: &Table) -> Result<Vec<bool>> {
        let column = table.require_column(&self.column)?;
        let (start, end) = self.bounds()?;
        Ok(column
            .values
            .iter()
            .map(|v| v.as_date().is_some_and(|d| start <= d && d <= end))
            .collect())
    }
}

fn parse_bound(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| DashboardError::InvalidDate(s.to_string()))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMatch {
    #[default]
    Contains,
    NotContains,
}

/// Substring match on a column's display string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextFilter {
    pub column: String,
    pub pattern: String,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub mode: TextMatch,
}

impl TextFilter {
    pub fn contains(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            pattern: pattern.into(),
            case_sensitive: false,
            mode: TextMatch::Contains,
        }
    }

    pub fn not_contains(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            mode: TextMatch::NotContains,
            ..Self::contains(column, pattern)
        }
    }

    pub fn case_sensitive(mut self, yes: bool) -> Self {
        self.case_sensitive = yes;
        self
    }

    /// Whether the cell contains the pattern. Nulls never do.
    fn hits(&self, value: &Value, needle: &str) -> bool {
        if value.is_null() {
            return false;
        }
        let text = value.to_string();
        if self.case_sensitive {
            text.contains(needle)
        } else {
            text.to_lowercase().contains(needle)
        }
    }

    fn mask(&self, table: &Table) -> Result<Vec<bool>> {
        let column = table.require_column(&self.column)?;
        let needle = if self.case_sensitive {
            self.pattern.clone()
        } else {
            self.pattern.to_lowercase()
        };
        Ok(column
            .values
            .iter()
            .map(|v| {
                let hit = self.hits(v, &needle);
                match self.mode {
                    TextMatch::Contains => hit,
                    TextMatch::NotContains => !hit,
                }
            })
            .collect())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSet {
    #[serde(default)]
    pub category_filters: Vec<CategoryFilter>,
    #[serde(default)]
    pub date_filters: Vec<DateRangeFilter>,
    #[serde(default)]
    pub text_filters: Vec<TextFilter>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, filter: CategoryFilter) -> Self {
        self.category_filters.push(filter);
        self
    }

    pub fn with_date_range(mut self, filter: DateRangeFilter) -> Self {
        self.date_filters.push(filter);
        self
    }

    pub fn with_text(mut self, filter: TextFilter) -> Self {
        self.text_filters.push(filter);
        self
    }

    pub fn len(&self) -> usize {
        self.category_filters.len() + self.date_filters.len() + self.text_filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keep the rows matching every filter in `filters`.
pub fn apply_filters(table: &Table, filters: &FilterSet) -> Result<Table> {
    if filters.is_empty() {
        return Ok(table.clone());
    }

    let mut keep = vec![true; table.row_count()];
    let mut and = |mask: Vec<bool>| {
        for (k, m) in keep.iter_mut().zip(mask) {
            *k &= m;
        }
    };
    for f in &filters.category_filters {
        and(f.mask(table)?);
    }
    for f in &filters.date_filters {
        and(f.mask(table)?);
    }
    for f in &filters.text_filters {
        and(f.mask(table)?);
    }

    let filtered = table.filter_rows(&keep);
    log::debug!(
        "{} filters kept {} of {} rows",
        filters.len(),
        filtered.row_count(),
        table.row_count()
    );
    Ok(filtered)
}

/// Distinct non-null values of a column, sorted. Unknown columns give an empty list.
pub fn extract_unique_values(table: &Table, column: &str) -> Vec<String> {
    unique_values(table, column)
        .iter()
        .map(ToString::to_string)
        .collect()
}

/// Distinct non-null values of `column`, deduplicated by display string and
/// sorted with [`cmp_values`]. A missing column gives an empty list.
pub fn unique_values(table: &Table, column: &str) -> Vec<Value> {
    let Some(column) = table.column(column) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let values = column
        .values
        .iter()
        .filter(|v| !v.is_null())
        .filter(|v| seen.insert(v.to_string()))
        .cloned()
        .collect();
    sort_distinct(values)
}

/// Sort values by [`cmp_values`], dropping later duplicates of a display string.
pub fn sort_distinct(values: Vec<Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut distinct: Vec<Value> = values
        .into_iter()
        .filter(|v| seen.insert(v.to_string()))
        .collect();
    distinct.sort_by(cmp_values);
    distinct
}

/// Filtered table plus the option values still available per column.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterOutcome {
    pub table: Table,
    pub options: BTreeMap<String, Vec<String>>,
}

pub fn evaluate(table: &Table, filters: &FilterSet, option_columns: &[&str]) -> Result<FilterOutcome> {
    let filtered = apply_filters(table, filters)?;
    let options = option_columns
        .iter()
        .map(|c| (c.to_string(), extract_unique_values(&filtered, c)))
        .collect();
    Ok(FilterOutcome {
        table: filtered,
        options,
    })
}

/// Number of rows the text filter keeps.
pub fn count_matching(table: &Table, filter: &TextFilter) -> Result<usize> {
    Ok(filter.mask(table)?.into_iter().filter(|k| *k).count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDateTime, TimeZone, Utc};

    fn orders() -> Table {
        let date = |s: &str| Value::Date(NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap());
        Table::from_rows(
            &["area", "job_name", "completed", "qty"],
            vec![
                vec!["APAC".into(), "PRC rollout".into(), date("2024-01-01"), Value::Int(1)],
                vec!["EMEA".into(), "Site survey".into(), date("2024-01-15"), Value::Int(2)],
                vec!["APAC".into(), "prc fix".into(), date("2024-02-01"), Value::Int(3)],
                vec![Value::Null, Value::Null, Value::Null, Value::Int(4)],
                vec!["AMER".into(), "Upgrade".into(), date("2024-03-31"), Value::Int(5)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn category_filter_keeps_listed_values() {
        let filters = FilterSet::new().with_category(CategoryFilter::new(
            "area",
            vec!["APAC".to_string(), "AMER".to_string()],
        ));
        let out = apply_filters(&orders(), &filters).unwrap();
        assert_eq!(out.row_count(), 3);
        assert_eq!(extract_unique_values(&out, "area"), vec!["AMER", "APAC"]);
    }

    #[test]
    fn empty_category_list_keeps_everything() {
        let filters = FilterSet::new().with_category(CategoryFilter::new("area", vec![]));
        assert_eq!(apply_filters(&orders(), &filters).unwrap().row_count(), 5);
    }

    #[test]
    fn category_filter_matches_numbers_by_display() {
        let filters =
            FilterSet::new().with_category(CategoryFilter::new("qty", vec!["2".to_string()]));
        let out = apply_filters(&orders(), &filters).unwrap();
        assert_eq!(out.value(0, "area"), Some(&Value::from("EMEA")));
    }

    #[test]
    fn date_range_is_inclusive() {
        let filters = FilterSet::new().with_date_range(DateRangeFilter::new(
            "completed",
            "2024-01-15",
            "2024-03-31",
        ));
        let out = apply_filters(&orders(), &filters).unwrap();
        assert_eq!(out.row_count(), 3);
    }

    #[test]
    fn date_range_compares_datetimes_by_day() {
        let dt = |s: &str| {
            Value::DateTime(NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap())
        };
        let table = Table::from_rows(
            &["at"],
            vec![
                vec![dt("2024-05-01 23:59:59")],
                vec![dt("2024-05-02 00:00:00")],
                vec![Value::DateTimeTz(
                    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
                )],
                vec!["2024-05-01".into()],
                vec!["not a date".into()],
            ],
        )
        .unwrap();
        let filters =
            FilterSet::new().with_date_range(DateRangeFilter::new("at", "2024-05-01", "2024-05-01"));
        assert_eq!(apply_filters(&table, &filters).unwrap().row_count(), 3);
    }

    #[test]
    fn inverted_range_is_empty() {
        let filters = FilterSet::new().with_date_range(DateRangeFilter::new(
            "completed",
            "2024-12-31",
            "2024-01-01",
        ));
        assert!(apply_filters(&orders(), &filters).unwrap().is_empty());
    }

    #[test]
    fn bad_bound_is_an_error() {
        let filters = FilterSet::new().with_date_range(DateRangeFilter::new(
            "completed",
            "01/01/2024",
            "2024-12-31",
        ));
        assert!(matches!(
            apply_filters(&orders(), &filters),
            Err(DashboardError::InvalidDate(_))
        ));
    }

    #[test]
    fn text_filter_modes_and_nulls() {
        let table = orders();
        let only = TextFilter::contains("job_name", "PRC");
        let exclude = TextFilter::not_contains("job_name", "PRC");

        assert_eq!(count_matching(&table, &only).unwrap(), 2);
        // The null job name is kept when excluding.
        assert_eq!(count_matching(&table, &exclude).unwrap(), 3);
        assert_eq!(
            count_matching(&table, &only.clone().case_sensitive(true)).unwrap(),
            1
        );
    }

    #[test]
    fn filters_are_anded() {
        let filters = FilterSet::new()
            .with_category(CategoryFilter::new("area", vec!["APAC".to_string()]))
            .with_text(TextFilter::contains("job_name", "fix"));
        assert_eq!(filters.len(), 2);
        let out = apply_filters(&orders(), &filters).unwrap();
        assert_eq!(out.row_count(), 1);
        assert_eq!(out.value(0, "qty"), Some(&Value::Int(3)));
    }

    #[test]
    fn missing_column_is_an_error() {
        let filters =
            FilterSet::new().with_category(CategoryFilter::new("nope", vec!["x".to_string()]));
        assert!(matches!(
            apply_filters(&orders(), &filters),
            Err(DashboardError::UnknownColumn(c)) if c == "nope"
        ));
        assert!(extract_unique_values(&orders(), "nope").is_empty());
    }

    #[test]
    fn unique_values_sort_numerically() {
        let table = Table::from_rows(
            &["n"],
            vec![
                vec![Value::Int(10)],
                vec![Value::Int(9)],
                vec![Value::Null],
                vec![Value::Int(10)],
            ],
        )
        .unwrap();
        assert_eq!(extract_unique_values(&table, "n"), vec!["9", "10"]);
    }

    #[test]
    fn evaluate_reports_remaining_options() {
        let filters = FilterSet::new().with_date_range(DateRangeFilter::new(
            "completed",
            "2024-01-01",
            "2024-01-31",
        ));
        let outcome = evaluate(&orders(), &filters, &["area", "missing"]).unwrap();
        assert_eq!(outcome.table.row_count(), 2);
        assert_eq!(outcome.options["area"], vec!["APAC", "EMEA"]);
        assert!(outcome.options["missing"].is_empty());
    }
}
