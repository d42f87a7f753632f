//! Maps dashboard/chart ids to dataset ids via per-dashboard YAML configs.

use serde_yaml::Value as Yaml;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::dashboard::PanelConfig;
use crate::error::{DashboardError, Result};

pub const DASHBOARD_CONFIG_FILENAME: &str = "data_sources.yml";

/// Parsed `data_sources.yml` of one dashboard.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DashboardConfig {
    /// chart id → dataset id. Charts mapped to anything but a string are dropped.
    pub charts: BTreeMap<String, String>,
    pub panels: Vec<PanelConfig>,
}

impl DashboardConfig {
    pub fn parse(text: &str) -> Result<Self> {
        let doc: Yaml = serde_yaml::from_str(text)?;
        let root = match doc {
            Yaml::Null => return Ok(DashboardConfig::default()),
            Yaml::Mapping(m) => m,
            _ => {
                return Err(DashboardError::InvalidConfig(
                    "Dashboard config must be a mapping".to_string(),
                ));
            }
        };

        let charts = match root.get("charts") {
            None | Some(Yaml::Null) => BTreeMap::new(),
            Some(Yaml::Mapping(m)) => m
                .iter()
                .filter_map(|(k, v)| match (k, v) {
                    (Yaml::String(chart), Yaml::String(dataset)) => {
                        Some((chart.clone(), dataset.clone()))
                    }
                    _ => None,
                })
                .collect(),
            Some(_) => {
                return Err(DashboardError::InvalidConfig(
                    "Dashboard config 'charts' must be a mapping".to_string(),
                ));
            }
        };

        let panels = match root.get("panels") {
            None | Some(Yaml::Null) => Vec::new(),
            Some(value) => serde_yaml::from_value(value.clone())?,
        };

        Ok(DashboardConfig { charts, panels })
    }

    pub fn dataset_id(&self, chart_id: &str) -> Option<&str> {
        self.charts.get(chart_id).map(String::as_str)
    }

    pub fn panel(&self, name: &str) -> Option<&PanelConfig> {
        self.panels.iter().find(|p| p.name == name)
    }
}

/// Loads and memoises dashboard configs from `<pages_dir>/<dashboard_id>/data_sources.yml`.
pub struct DataSourceRegistry {
    pages_dir: PathBuf,
    configs: RwLock<HashMap<String, Arc<DashboardConfig>>>,
}

impl DataSourceRegistry {
    pub fn new(pages_dir: impl Into<PathBuf>) -> Self {
        Self {
            pages_dir: pages_dir.into(),
            configs: RwLock::new(HashMap::new()),
        }
    }

    pub fn pages_dir(&self) -> &Path {
        &self.pages_dir
    }

    fn config_path(&self, dashboard_id: &str) -> PathBuf {
        self.pages_dir
            .join(dashboard_id)
            .join(DASHBOARD_CONFIG_FILENAME)
    }

    pub fn load_dashboard_config(&self, dashboard_id: &str) -> Result<Arc<DashboardConfig>> {
        {
            let configs = self.configs.read().unwrap_or_else(|e| e.into_inner());
            if let Some(config) = configs.get(dashboard_id) {
                return Ok(config.clone());
            }
        }

        let path = self.config_path(dashboard_id);
        let unsafe_id = dashboard_id.is_empty()
            || dashboard_id.contains("..")
            || dashboard_id.contains(['/', '\\']);
        if unsafe_id || !path.is_file() {
            return Err(DashboardError::DashboardConfigNotFound(path));
        }

        let config = Arc::new(DashboardConfig::parse(&fs::read_to_string(&path)?)?);
        log::debug!(
            "loaded dashboard config {} ({} charts, {} panels)",
            dashboard_id,
            config.charts.len(),
            config.panels.len()
        );

        let mut configs = self.configs.write().unwrap_or_else(|e| e.into_inner());
        configs.insert(dashboard_id.to_string(), config.clone());
        Ok(config)
    }

    pub fn clear_cache(&self) {
        let mut configs = self.configs.write().unwrap_or_else(|e| e.into_inner());
        configs.clear();
    }

    /// Dataset id of a chart, or `None` when the chart is not mapped.
    pub fn get_dataset_id(&self, dashboard_id: &str, chart_id: &str) -> Result<Option<String>> {
        let config = self.load_dashboard_config(dashboard_id)?;
        Ok(config.dataset_id(chart_id).map(str::to_string))
    }

    pub fn resolve_dataset_id(&self, dashboard_id: &str, chart_id: &str) -> Result<String> {
        self.get_dataset_id(dashboard_id, chart_id)?
            .ok_or_else(|| DashboardError::DatasetNotMapped {
                dashboard_id: dashboard_id.to_string(),
                chart_id: chart_id.to_string(),
            })
    }

    /// Resolve the one dataset shared by all the given charts.
    pub fn resolve_single_dataset_id(&self, dashboard_id: &str, chart_ids: &[&str]) -> Result<String> {
        let mut dataset_ids = BTreeSet::new();
        for chart_id in chart_ids {
            dataset_ids.insert(self.resolve_dataset_id(dashboard_id, chart_id)?);
        }
        if dataset_ids.len() != 1 {
            return Err(DashboardError::MultipleDatasets {
                dashboard_id: dashboard_id.to_string(),
                dataset_ids: dataset_ids.into_iter().collect(),
            });
        }
        Ok(dataset_ids.into_iter().next().unwrap_or_default())
    }

    /// Ids of all dashboards that have a config file, sorted.
    pub fn dashboards(&self) -> Result<Vec<String>> {
        if !self.pages_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.pages_dir)? {
            let entry = entry?;
            if entry.path().join(DASHBOARD_CONFIG_FILENAME).is_file() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
