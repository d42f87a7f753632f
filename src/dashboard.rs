//! Dashboard page flow: load a panel's dataset, apply the page's filter
//! selection and summarise it as a pivot table.
//!
//! Panels are declared in the dashboard's `data_sources.yml` under `panels:`.
//! A page request carries a [`Selection`]; [`update_panels`] answers it with one
//! rendered pivot per panel plus a KPI. It never fails: any error is reported as
//! a banner on every panel.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::cache::get_cached_dataset;
use crate::error::{DashboardError, Result};
use crate::filter::{FilterSet, TextFilter, apply_filters, count_matching, sort_distinct, unique_values};
use crate::helpers::build_filter_set_from_map;
use crate::pivot::{Aggregation, BreakdownMap, PivotTable, ValueMode, build_pivot_table, escape_html};
use crate::registry::DataSourceRegistry;
use crate::storage::DatasetReader;
use crate::table::{Table, Value};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PanelConfig {
    pub name: String,
    pub chart_id: String,
    /// Used when the chart has no entry under `charts:`.
    #[serde(default)]
    pub dataset_id: Option<String>,
    pub title: String,
    /// Logical filter key → dataset column.
    #[serde(default)]
    pub column_map: BTreeMap<String, String>,
    #[serde(default)]
    pub breakdown_map: BreakdownMap,
    /// Filter keys this panel ignores.
    #[serde(default)]
    pub skip_filters: BTreeSet<String>,
    #[serde(default)]
    pub text_filter_key: Option<String>,
    #[serde(default)]
    pub text_pattern: Option<String>,
    #[serde(default)]
    pub column_dimension_key: Option<String>,
    /// Count distinct values of this key instead of rows.
    #[serde(default)]
    pub distinct_key: Option<String>,
}

impl PanelConfig {
    pub fn resolve_dataset_id(&self, registry: &DataSourceRegistry, dashboard_id: &str) -> Result<String> {
        match registry.get_dataset_id(dashboard_id, &self.chart_id)? {
            Some(id) => Ok(id),
            None => self
                .dataset_id
                .clone()
                .ok_or_else(|| DashboardError::DatasetNotMapped {
                    dashboard_id: dashboard_id.to_string(),
                    chart_id: self.chart_id.clone(),
                }),
        }
    }

    fn mapped(&self, key: &str) -> Result<&str> {
        self.column_map
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| DashboardError::InvalidConfig(format!("panel '{}' has no column for '{}'", self.name, key)))
    }

    /// Keys offered as filter controls: everything mapped except special-purpose keys.
    pub fn filter_keys(&self) -> impl Iterator<Item = &str> {
        self.column_map.keys().map(String::as_str).filter(move |k| {
            Some(*k) != self.text_filter_key.as_deref() && Some(*k) != self.distinct_key.as_deref()
        })
    }

    fn text_filter(&self, table: &Table) -> Option<TextFilter> {
        let column = self.column_map.get(self.text_filter_key.as_ref()?)?;
        let pattern = self.text_pattern.as_ref()?;
        table
            .has_column(column)
            .then(|| TextFilter::contains(column.clone(), pattern.clone()))
    }

    pub fn aggregation(&self) -> Result<Aggregation> {
        match &self.distinct_key {
            Some(key) => Ok(Aggregation::CountDistinct(self.mapped(key)?.to_string())),
            None => Ok(Aggregation::Count),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMode {
    #[default]
    All,
    #[serde(alias = "prc_only")]
    Only,
    #[serde(alias = "prc_not_included")]
    Exclude,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRangeSelection {
    pub key: String,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Current state of a page's controls.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(default)]
    pub filters: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub date_range: Option<DateRangeSelection>,
    #[serde(default)]
    pub text_mode: TextMode,
    #[serde(default)]
    pub mode: ValueMode,
    #[serde(default)]
    pub breakdown: String,
}

pub fn load_and_filter_data(
    reader: &dyn DatasetReader,
    dataset_id: &str,
    panel: &PanelConfig,
    selection: &Selection,
) -> Result<Table> {
    let mut table = get_cached_dataset(reader, dataset_id)?.as_ref().clone();

    if let Some(text) = panel.text_filter(&table) {
        let text = match selection.text_mode {
            TextMode::All => None,
            TextMode::Only => Some(text),
            TextMode::Exclude => Some(TextFilter::not_contains(text.column, text.pattern)),
        };
        if let Some(text) = text {
            table = apply_filters(&table, &FilterSet::new().with_text(text))?;
        }
    }

    let pairs: Vec<(&str, Option<Vec<String>>)> = selection
        .filters
        .iter()
        .filter(|(key, _)| !panel.skip_filters.contains(*key))
        .map(|(key, values)| (key.as_str(), Some(values.clone())))
        .collect();
    let date_range = selection
        .date_range
        .as_ref()
        .filter(|r| !panel.skip_filters.contains(&r.key))
        .map(|r| (r.key.as_str(), r.start.as_deref(), r.end.as_deref()));

    let filters = build_filter_set_from_map(&panel.column_map, &pairs, date_range);
    apply_filters(&table, &filters)
}

/// Values for every filter control plus text-match counts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub options: BTreeMap<String, Vec<String>>,
    pub total_count: usize,
    pub text_match_count: usize,
    pub text_non_match_count: usize,
}

fn empty_options(panels: &[PanelConfig]) -> FilterOptions {
    FilterOptions {
        options: panels
            .iter()
            .flat_map(|p| p.filter_keys().map(str::to_string))
            .map(|k| (k, Vec::new()))
            .collect(),
        ..FilterOptions::default()
    }
}

/// Options for a dashboard's controls, unioned across its panels.
///
/// If the first panel cannot be loaded, every list is empty and counts are zero.
pub fn load_filter_options(
    reader: &dyn DatasetReader,
    registry: &DataSourceRegistry,
    dashboard_id: &str,
) -> FilterOptions {
    let panels = match registry.load_dashboard_config(dashboard_id) {
        Ok(config) => config.panels.clone(),
        Err(e) => {
            log::warn!("no filter options for {}: {}", dashboard_id, e);
            return FilterOptions::default();
        }
    };
    let Some((first, rest)) = panels.split_first() else {
        return FilterOptions::default();
    };

    let panel_options = |panel: &PanelConfig| -> Result<(Table, BTreeMap<String, Vec<Value>>)> {
        let dataset_id = panel.resolve_dataset_id(registry, dashboard_id)?;
        let table = get_cached_dataset(reader, &dataset_id)?.as_ref().clone();
        let options = panel
            .filter_keys()
            .filter(|k| !panel.skip_filters.contains(*k))
            .map(|k| (k.to_string(), unique_values(&table, &panel.column_map[k])))
            .collect();
        Ok((table, options))
    };

    let (table, first_options) = match panel_options(first) {
        Ok(loaded) => loaded,
        Err(e) => {
            log::warn!("filter options for {} fell back to defaults: {}", dashboard_id, e);
            return empty_options(&panels);
        }
    };

    let mut merged: BTreeMap<String, Vec<Value>> = empty_options(&panels)
        .options
        .into_keys()
        .map(|k| (k, Vec::new()))
        .collect();
    let mut merge = |options: BTreeMap<String, Vec<Value>>| {
        for (key, values) in options {
            merged.entry(key).or_default().extend(values);
        }
    };
    merge(first_options);
    for panel in rest {
        match panel_options(panel) {
            Ok((_, options)) => merge(options),
            Err(e) => log::warn!("skipping options of panel {}: {}", panel.name, e),
        }
    }

    let total_count = table.row_count();
    let text_match_count = first
        .text_filter(&table)
        .and_then(|f| count_matching(&table, &f).ok())
        .unwrap_or(0);

    FilterOptions {
        options: merged
            .into_iter()
            .map(|(k, v)| (k, sort_distinct(v).iter().map(ToString::to_string).collect()))
            .collect(),
        total_count,
        text_match_count,
        text_non_match_count: total_count - text_match_count,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelStatus {
    Ok,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PanelOutput {
    pub name: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub status: PanelStatus,
    pub table: Option<PivotTable>,
    pub html: String,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PanelsResponse {
    pub kpi: String,
    pub panels: Vec<PanelOutput>,
    pub error: Option<String>,
}

/// Filtered rows and pivot of a single panel.
pub fn panel_pivot(
    reader: &dyn DatasetReader,
    registry: &DataSourceRegistry,
    dashboard_id: &str,
    panel: &PanelConfig,
    selection: &Selection,
) -> Result<(Table, String, PivotTable)> {
    let dataset_id = panel.resolve_dataset_id(registry, dashboard_id)?;
    let filtered = load_and_filter_data(reader, &dataset_id, panel, selection)?;

    let column_dimension = match &panel.column_dimension_key {
        Some(key) => Some(panel.mapped(key)?),
        None => None,
    };
    let (subtitle, pivot) = build_pivot_table(
        &filtered,
        &panel.breakdown_map,
        &selection.breakdown,
        selection.mode,
        column_dimension,
        panel.aggregation()?,
    )?;
    Ok((filtered, subtitle, pivot))
}

/// Look up one panel of a dashboard by name.
pub fn find_panel(registry: &DataSourceRegistry, dashboard_id: &str, panel: &str) -> Result<PanelConfig> {
    registry
        .load_dashboard_config(dashboard_id)?
        .panel(panel)
        .cloned()
        .ok_or_else(|| DashboardError::UnknownPanel {
            dashboard_id: dashboard_id.to_string(),
            panel: panel.to_string(),
        })
}

pub fn update_panels(
    reader: &dyn DatasetReader,
    registry: &DataSourceRegistry,
    dashboard_id: &str,
    selection: &Selection,
) -> PanelsResponse {
    let panels = match registry.load_dashboard_config(dashboard_id) {
        Ok(config) => config.panels.clone(),
        Err(e) => {
            log::error!("dashboard {} failed to load: {}", dashboard_id, e);
            return PanelsResponse {
                kpi: "0".to_string(),
                panels: Vec::new(),
                error: Some(error_message(&e)),
            };
        }
    };

    let rendered: Result<Vec<(Table, String, PivotTable)>> = panels
        .iter()
        .map(|p| panel_pivot(reader, registry, dashboard_id, p, selection))
        .collect();

    match rendered {
        Ok(rendered) => {
            let kpi = rendered
                .first()
                .map_or(0, |(table, _, _)| table.row_count());
            let outputs = panels
                .iter()
                .zip(rendered)
                .map(|(panel, (_, subtitle, pivot))| PanelOutput {
                    name: panel.name.clone(),
                    title: panel.title.clone(),
                    subtitle: Some(subtitle),
                    status: PanelStatus::Ok,
                    html: pivot.to_html(),
                    table: Some(pivot),
                    error: None,
                })
                .collect();
            PanelsResponse {
                kpi: format_thousands(kpi),
                panels: outputs,
                error: None,
            }
        }
        Err(e) => {
            log::error!("dashboard {} failed to render: {}", dashboard_id, e);
            let message = error_message(&e);
            PanelsResponse {
                kpi: "0".to_string(),
                panels: panels
                    .iter()
                    .map(|panel| PanelOutput {
                        name: panel.name.clone(),
                        title: panel.title.clone(),
                        subtitle: None,
                        status: PanelStatus::Error,
                        table: None,
                        html: format!(
                            "<div class=\"error-banner\"><p class=\"text-danger\">{}</p></div>",
                            escape_html(&message)
                        ),
                        error: Some(message.clone()),
                    })
                    .collect(),
                error: Some(message),
            }
        }
    }
}

fn error_message(e: &DashboardError) -> String {
    format!("Error loading data: {}", e)
}

/// `1234567` → `"1,234,567"`.
pub fn format_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
