use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading, filtering or summarising dashboard data.
#[derive(Debug, Error)]
pub enum DashboardError {
    /// The dataset's file does not exist in the bucket.
    #[error("Dataset file not found: {path}{}", dataset_suffix(.dataset_id))]
    DatasetFileNotFound {
        path: String,
        dataset_id: Option<String>,
    },

    #[error("Dashboard config not found: {}", .0.display())]
    DashboardConfigNotFound(PathBuf),

    #[error("Invalid dashboard config: {0}")]
    InvalidConfig(String),

    #[error("Dataset ID not found for dashboard '{dashboard_id}' and chart '{chart_id}'")]
    DatasetNotMapped {
        dashboard_id: String,
        chart_id: String,
    },

    #[error(
        "Multiple dataset IDs found for dashboard '{dashboard_id}': {dataset_ids:?}. All charts must use the same dataset."
    )]
    MultipleDatasets {
        dashboard_id: String,
        dataset_ids: Vec<String>,
    },

    #[error("Unknown panel '{panel}' in dashboard '{dashboard_id}'")]
    UnknownPanel { dashboard_id: String, panel: String },

    #[error("Column not found: {0}")]
    UnknownColumn(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid table: {0}")]
    InvalidTable(String),

    #[error("CSV parse error: {0}")]
    Csv(String),

    #[error("Unsupported encoding: {0}")]
    Encoding(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] bincode::Error),
}

fn dataset_suffix(dataset_id: &Option<String>) -> String {
    match dataset_id {
        Some(id) => format!(" (dataset_id: {})", id),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;
