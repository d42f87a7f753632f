#![cfg(not(tarpaulin_include))]
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Basic},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::cache::clear_dataset_cache;
use crate::chart::{ChartKind, ChartOptions, render_pivot_chart};
use crate::config::Settings;
use crate::csv_parser::{self, CsvImportOptions};
use crate::dashboard::{self, FilterOptions, PanelsResponse, Selection};
use crate::error::DashboardError;
use crate::export::{pivot_to_csv, pivot_to_xlsx};
use crate::pivot::escape_html;
use crate::registry::DataSourceRegistry;
use crate::storage::{BucketReader, DatasetReader};
use crate::summary::{DatasetSummarizer, GeneratedSummary};
use crate::theme;

const AUTH_REALM: &str = "dashboards";
const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

pub struct AppState {
    pub settings: Settings,
    pub registry: DataSourceRegistry,
    pub reader: Arc<dyn DatasetReader>,
}

impl AppState {
    pub fn new(settings: Settings, reader: Arc<dyn DatasetReader>) -> Self {
        Self {
            registry: DataSourceRegistry::new(settings.pages_dir.clone()),
            settings,
            reader,
        }
    }
}

/// JSON error body returned by every API route.
#[derive(Serialize)]
struct ErrorResponse {
    status: String,
    message: String,
}

struct ApiError(StatusCode, String);

impl From<DashboardError> for ApiError {
    fn from(err: DashboardError) -> Self {
        let status = match &err {
            DashboardError::DatasetFileNotFound { .. }
            | DashboardError::DashboardConfigNotFound(_)
            | DashboardError::DatasetNotMapped { .. }
            | DashboardError::UnknownPanel { .. } => StatusCode::NOT_FOUND,
            DashboardError::UnknownColumn(_)
            | DashboardError::InvalidDate(_)
            | DashboardError::Csv(_)
            | DashboardError::Encoding(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            log::error!("request failed: {}", err);
        }
        ApiError(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            status: "error".to_string(),
            message: self.1,
        };
        (self.0, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Deserialize)]
struct ExportQuery {
    #[serde(default)]
    format: ExportFormat,
}

#[derive(Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ExportFormat {
    #[default]
    Csv,
    Xlsx,
}

#[derive(Deserialize)]
struct ChartQuery {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Deserialize)]
struct PreviewQuery {
    rows: Option<usize>,
    encoding: Option<String>,
}

#[derive(Serialize)]
struct PreviewResponse {
    encoding: String,
    columns: Vec<String>,
    rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// Build the application router
///
/// Every route sits behind HTTP basic auth and request tracing.
///
/// # Arguments
/// * `state` - Shared settings, dashboard registry and dataset reader
///
/// # Returns
/// * `Router` - Router ready to be served
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/api/dashboards", get(list_dashboards))
        .route("/api/dashboards/:dashboard/options", get(filter_options))
        .route("/api/dashboards/:dashboard/panels", post(update_panels))
        .route(
            "/api/dashboards/:dashboard/panels/:panel/export",
            post(export_panel),
        )
        .route(
            "/api/dashboards/:dashboard/panels/:panel/chart.png",
            post(panel_chart),
        )
        .route("/api/datasets/:dataset/summary", get(dataset_summary))
        .route("/api/csv/preview", post(preview_csv))
        .route("/api/cache/clear", post(clear_cache))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the dashboard server on the configured address.
pub async fn run(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let reader: Arc<dyn DatasetReader> = Arc::new(BucketReader::from_settings(&settings));
    let bind_addr = settings.bind_addr.clone();
    let state = Arc::new(AppState::new(settings, reader));

    let listener = TcpListener::bind(&bind_addr).await?;
    log::info!("listening on http://{}", bind_addr);
    axum::serve(listener, router(state)).await?;

    Ok(())
}

/// Basic authentication middleware
///
/// Lets the request through when its credentials match the configured user,
/// otherwise answers 401 with a `WWW-Authenticate` challenge.
///
/// # Arguments
/// * `state` - Application state holding the expected credentials
/// * `auth` - Parsed `Authorization: Basic` header, if any
/// * `request` - The incoming request
/// * `next` - Next middleware in the chain
///
/// # Returns
/// * `Response` - Either the inner response or a 401 challenge
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    auth: Option<TypedHeader<Authorization<Basic>>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(TypedHeader(Authorization(credentials))) = auth {
        if credentials.username() == state.settings.basic_auth_username
            && credentials.password() == state.settings.basic_auth_password
        {
            return next.run(request).await;
        }
        log::warn!("rejected credentials for user {}", credentials.username());
    }

    (
        StatusCode::UNAUTHORIZED,
        [(
            header::WWW_AUTHENTICATE,
            format!("Basic realm=\"{}\"", AUTH_REALM),
        )],
        "Unauthorized",
    )
        .into_response()
}

async fn serve_index(State(state): State<Arc<AppState>>) -> ApiResult<Html<String>> {
    let dashboards = state.registry.dashboards()?;
    let items: String = dashboards
        .iter()
        .map(|d| {
            let name = escape_html(d);
            format!("<li><a href=\"/api/dashboards/{0}/options\">{0}</a></li>", name)
        })
        .collect();

    Ok(Html(format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Dashboards</title>\
         <style>body{{font-family:{};color:{};}}h1{{color:{};}}</style></head>\
         <body><h1>Dashboards</h1><ul>{}</ul></body></html>",
        theme::CSS_FONT_STACK,
        theme::TEXT_COLOR,
        theme::TITLE_COLOR,
        items
    )))
}

async fn list_dashboards(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.registry.dashboards()?))
}

async fn filter_options(
    Path(dashboard_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<FilterOptions>> {
    // Surface a missing dashboard as 404 rather than empty options.
    state.registry.load_dashboard_config(&dashboard_id)?;
    Ok(Json(dashboard::load_filter_options(
        state.reader.as_ref(),
        &state.registry,
        &dashboard_id,
    )))
}

async fn update_panels(
    Path(dashboard_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(selection): Json<Selection>,
) -> Json<PanelsResponse> {
    Json(dashboard::update_panels(
        state.reader.as_ref(),
        &state.registry,
        &dashboard_id,
        &selection,
    ))
}

fn download_name(dashboard_id: &str, panel: &str, extension: &str) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect()
    };
    format!("{}_{}.{}", clean(dashboard_id), clean(panel), extension)
}

async fn export_panel(
    Path((dashboard_id, panel_name)): Path<(String, String)>,
    Query(params): Query<ExportQuery>,
    State(state): State<Arc<AppState>>,
    Json(selection): Json<Selection>,
) -> ApiResult<Response> {
    let panel = dashboard::find_panel(&state.registry, &dashboard_id, &panel_name)?;
    let (_, _, pivot) = dashboard::panel_pivot(
        state.reader.as_ref(),
        &state.registry,
        &dashboard_id,
        &panel,
        &selection,
    )?;

    let (content_type, extension, body) = match params.format {
        ExportFormat::Csv => (
            "text/csv; charset=utf-8",
            "csv",
            pivot_to_csv(&pivot).into_bytes(),
        ),
        ExportFormat::Xlsx => (XLSX_CONTENT_TYPE, "xlsx", pivot_to_xlsx(&pivot, &panel.name)?),
    };
    let disposition = format!(
        "attachment; filename=\"{}\"",
        download_name(&dashboard_id, &panel.name, extension)
    );

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

async fn panel_chart(
    Path((dashboard_id, panel_name)): Path<(String, String)>,
    Query(params): Query<ChartQuery>,
    State(state): State<Arc<AppState>>,
    Json(selection): Json<Selection>,
) -> ApiResult<Response> {
    let panel = dashboard::find_panel(&state.registry, &dashboard_id, &panel_name)?;
    let (_, subtitle, pivot) = dashboard::panel_pivot(
        state.reader.as_ref(),
        &state.registry,
        &dashboard_id,
        &panel,
        &selection,
    )?;

    let defaults = ChartOptions::default();
    let options = ChartOptions {
        title: subtitle,
        width: params.width.unwrap_or(defaults.width).clamp(100, 4000),
        height: params.height.unwrap_or(defaults.height).clamp(100, 4000),
        kind: ChartKind::for_pivot(&pivot),
        ..defaults
    };
    let png = render_pivot_chart(&pivot, &options)?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

async fn dataset_summary(
    Path(dataset_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<GeneratedSummary>> {
    let summarizer = DatasetSummarizer::new(state.reader.as_ref());
    Ok(Json(summarizer.generate_summary(&dataset_id)?))
}

async fn preview_csv(Query(params): Query<PreviewQuery>, body: Bytes) -> ApiResult<Json<PreviewResponse>> {
    let options = CsvImportOptions {
        encoding: params.encoding,
        ..CsvImportOptions::default()
    };
    let (_, encoding) = csv_parser::decode(&body, &options)?;
    let table = csv_parser::parse_preview(&body, params.rows.unwrap_or(10), Some(&options))?;

    Ok(Json(PreviewResponse {
        encoding,
        columns: table.column_names().iter().map(|c| c.to_string()).collect(),
        rows: (0..table.row_count()).map(|i| table.row_json(i)).collect(),
    }))
}

async fn clear_cache(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    clear_dataset_cache();
    state.registry.clear_cache();
    log::info!("dataset and dashboard caches cleared");
    Json(serde_json::json!({ "status": "ok" }))
}
