/*!
# Pivotboard

Backend for filterable BI dashboards: datasets stored in an object-storage
bucket are loaded, cached, filtered by page controls and summarised as pivot
tables, charts and downloads.

## Overview

Each dashboard is a directory under the pages directory with a
`data_sources.yml`. The file maps chart ids to dataset ids and declares the
dashboard's panels. A page request carries the current filter selection; the
backend answers with one pivot per panel, a KPI and the options for every
filter control.

## Architecture

### Data Layer
- **table**: Typed columnar table (`Value`, `Column`, `Table`)
- **csv_parser**: Encoding detection (UTF-8, Shift_JIS/CP932) and CSV import with type inference
- **storage**: Dataset reader over a bucket mounted on disk, gzip + bincode snapshots with CSV fallback
- **cache**: Process-wide dataset cache keyed by dataset id

### Dashboard Layer
- **registry**: `data_sources.yml` loading and chart → dataset resolution
- **filter**: Category, date range and text filters combined with AND
- **helpers**: Filter construction from page selections and tolerant option loading
- **derive**: Cadence (week/month/year) and duration columns
- **pivot**: Row × column pivots with totals, count and percent modes
- **dashboard**: Panel configuration and the page update flow
- **summary**: Schema and column statistics of a dataset

### Output Layer
- **export**: CSV and XLSX downloads of pivot tables
- **theme**: Shared colour palette and fonts
- **chart**: PNG bar and line charts (`web` feature)
- **app**: Routing and basic-auth middleware (`web` feature)

### Ambient
- **config**: Settings from the environment and `.env`
- **logging**: One JSON object per log line
- **error**: `DashboardError` and the crate `Result`

## REST API Endpoints

- `GET /` - Index of dashboards
- `GET /api/dashboards` - Dashboard ids
- `GET /api/dashboards/{dashboard}/options` - Filter control options
- `POST /api/dashboards/{dashboard}/panels` - Pivots for a selection
- `POST /api/dashboards/{dashboard}/panels/{panel}/export` - CSV or XLSX download
- `POST /api/dashboards/{dashboard}/panels/{panel}/chart.png` - Rendered chart
- `GET /api/datasets/{dataset}/summary` - Dataset summary
- `POST /api/csv/preview` - Preview an uploaded CSV
- `POST /api/cache/clear` - Drop cached datasets and configs
*/

pub mod cache;
pub mod config;
pub mod csv_parser;
pub mod dashboard;
pub mod derive;
pub mod error;
pub mod export;
pub mod filter;
pub mod helpers;
pub mod logging;
pub mod pivot;
pub mod registry;
pub mod storage;
pub mod summary;
pub mod table;
pub mod theme;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod chart;

pub use error::{DashboardError, Result};
pub use table::{Column, Table, Value};
