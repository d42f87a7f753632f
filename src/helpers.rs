use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::get_cached_dataset;
use crate::error::{DashboardError, Result};
use crate::filter::{CategoryFilter, DateRangeFilter, FilterSet, extract_unique_values};
use crate::registry::DataSourceRegistry;
use crate::storage::DatasetReader;
use crate::table::{Column, Table, Value, parse_datetime_str};

/// `(key, start, end)` with ISO dates; both bounds are needed for a filter.
pub type DateRangeSelection<'a> = (&'a str, Option<&'a str>, Option<&'a str>);

/// Build a [`FilterSet`] from logical filter keys.
///
/// `column_map` maps a key such as `"area"` to the dataset column. Pairs whose key
/// is not mapped, or whose values are missing or empty, add no filter.
pub fn build_filter_set_from_map(
    column_map: &BTreeMap<String, String>,
    filter_pairs: &[(&str, Option<Vec<String>>)],
    date_range: Option<DateRangeSelection<'_>>,
) -> FilterSet {
    let mut filters = FilterSet::new();

    for (key, values) in filter_pairs {
        let (Some(values), Some(column)) = (values, column_map.get(*key)) else {
            continue;
        };
        if !values.is_empty() {
            filters = filters.with_category(CategoryFilter::new(column.clone(), values.clone()));
        }
    }

    if let Some((key, Some(start), Some(end))) = date_range {
        if let Some(column) = column_map.get(key) {
            if !start.is_empty() && !end.is_empty() {
                filters = filters.with_date_range(DateRangeFilter::new(column.clone(), start, end));
            }
        }
    }

    filters
}

/// Unique values per output key, or empty lists for every key if anything fails.
pub fn safe_load_filter_options(
    reader: &dyn DatasetReader,
    dataset_id: &str,
    extract_columns: &BTreeMap<String, String>,
    prepare: Option<&dyn Fn(Table) -> Result<Table>>,
) -> BTreeMap<String, Vec<String>> {
    let load = || -> Result<BTreeMap<String, Vec<String>>> {
        let mut table = get_cached_dataset(reader, dataset_id)?.as_ref().clone();
        if let Some(prepare) = prepare {
            table = prepare(table)?;
        }
        Ok(extract_columns
            .iter()
            .map(|(key, column)| (key.clone(), extract_unique_values(&table, column)))
            .collect())
    };

    load().unwrap_or_else(|e| {
        log::warn!("filter options for {} fell back to defaults: {}", dataset_id, e);
        extract_columns
            .keys()
            .map(|key| (key.clone(), Vec::new()))
            .collect()
    })
}

/// Convert a timestamp column to naive UTC datetimes.
///
/// Text cells are parsed; a cell that is not a timestamp is an error. A missing
/// column leaves the table unchanged.
pub fn strip_timezone(table: Table, column: &str) -> Result<Table> {
    let Some(source) = table.column(column) else {
        return Ok(table);
    };

    let values = source
        .values
        .iter()
        .map(|v| match v {
            Value::Null => Ok(Value::Null),
            Value::Text(s) => parse_datetime_str(s)
                .map(Value::DateTime)
                .ok_or_else(|| DashboardError::InvalidDate(s.clone())),
            other => other
                .as_datetime()
                .map(Value::DateTime)
                .ok_or_else(|| DashboardError::InvalidDate(other.to_string())),
        })
        .collect::<Result<Vec<_>>>()?;

    table.with_column(Column::new(column, values))
}

/// The one dataset id all `chart_ids` of a dashboard map to.
pub fn resolve_single_dataset_id(
    registry: &DataSourceRegistry,
    dashboard_id: &str,
    chart_ids: &[&str],
) -> Result<String> {
    registry.resolve_single_dataset_id(dashboard_id, chart_ids)
}

/// Resolve a chart's dataset and read it through the dataset cache.
pub fn load_dataset_for_chart(
    registry: &DataSourceRegistry,
    reader: &dyn DatasetReader,
    dashboard_id: &str,
    chart_id: &str,
) -> Result<Arc<Table>> {
    let dataset_id = registry.resolve_dataset_id(dashboard_id, chart_id)?;
    get_cached_dataset(reader, &dataset_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn column_map() -> BTreeMap<String, String> {
        [
            ("month", "Delivery Completed Month"),
            ("area", "business area"),
            ("completed", "Completed Date"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn strings(values: &[&str]) -> Option<Vec<String>> {
        Some(values.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn builds_category_filters_for_mapped_keys() {
        let filters = build_filter_set_from_map(
            &column_map(),
            &[
                ("month", strings(&["2024-01", "2024-02"])),
                ("area", strings(&["APAC"])),
                ("unknown", strings(&["x"])),
                ("area", None),
                ("month", Some(vec![])),
            ],
            None,
        );
        assert_eq!(filters.category_filters.len(), 2);
        assert_eq!(filters.category_filters[0].column, "Delivery Completed Month");
        assert_eq!(filters.category_filters[1].values, vec!["APAC"]);
        assert!(filters.date_filters.is_empty());
    }

    #[test]
    fn date_range_needs_both_bounds() {
        let map = column_map();
        let with_range = |range| build_filter_set_from_map(&map, &[], Some(range));

        let full = with_range(("completed", Some("2024-01-01"), Some("2024-01-31")));
        assert_eq!(full.date_filters.len(), 1);
        assert_eq!(full.date_filters[0].column, "Completed Date");

        assert!(with_range(("completed", Some("2024-01-01"), None)).is_empty());
        assert!(with_range(("completed", None, Some("2024-01-31"))).is_empty());
        assert!(with_range(("nope", Some("2024-01-01"), Some("2024-01-31"))).is_empty());
    }

    struct FixedReader(Table);

    impl DatasetReader for FixedReader {
        fn read_dataset(&self, dataset_id: &str) -> Result<Table> {
            if dataset_id.starts_with("missing") {
                return Err(DashboardError::DatasetFileNotFound {
                    path: format!("s3://test/{}", dataset_id),
                    dataset_id: Some(dataset_id.to_string()),
                });
            }
            Ok(self.0.clone())
        }
    }

    fn areas_table() -> Table {
        Table::from_rows(
            &["business area"],
            vec![vec!["EMEA".into()], vec!["APAC".into()], vec!["EMEA".into()]],
        )
        .unwrap()
    }

    #[test]
    fn safe_options_extracts_unique_values() {
        let reader = FixedReader(areas_table());
        let extract: BTreeMap<String, String> =
            [("areas".to_string(), "business area".to_string())].into();
        let options = safe_load_filter_options(&reader, "helpers-options-ok", &extract, None);
        assert_eq!(options["areas"], vec!["APAC", "EMEA"]);
    }

    #[test]
    fn safe_options_fall_back_to_empty_lists() {
        let reader = FixedReader(areas_table());
        let extract: BTreeMap<String, String> = [
            ("areas".to_string(), "business area".to_string()),
            ("months".to_string(), "month".to_string()),
        ]
        .into();

        let options = safe_load_filter_options(&reader, "missing-helpers", &extract, None);
        assert_eq!(options.len(), 2);
        assert!(options.values().all(Vec::is_empty));

        let failing: &dyn Fn(Table) -> Result<Table> =
            &|_| Err(DashboardError::InvalidTable("prepare failed".to_string()));
        let options =
            safe_load_filter_options(&reader, "helpers-options-prep", &extract, Some(failing));
        assert!(options["areas"].is_empty());
    }

    #[test]
    fn strip_timezone_converts_to_naive_utc() {
        let table = Table::from_rows(
            &["at"],
            vec![
                vec![Value::DateTimeTz(
                    Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap(),
                )],
                vec!["2024-01-02T00:00:00+09:00".into()],
                vec![Value::Null],
            ],
        )
        .unwrap();
        let naive = strip_timezone(table, "at").unwrap();
        let expected = |d: u32, h: u32, m: u32| {
            Value::DateTime(
                NaiveDate::from_ymd_opt(2024, 1, d)
                    .unwrap()
                    .and_hms_opt(h, m, 0)
                    .unwrap(),
            )
        };
        assert_eq!(naive.value(0, "at"), Some(&expected(1, 9, 30)));
        assert_eq!(naive.value(1, "at"), Some(&expected(1, 15, 0)));
        assert_eq!(naive.value(2, "at"), Some(&Value::Null));
    }

    #[test]
    fn strip_timezone_ignores_missing_column() {
        let table = areas_table();
        assert_eq!(strip_timezone(table.clone(), "at").unwrap(), table);
        assert!(strip_timezone(table, "business area").is_err());
    }
}
