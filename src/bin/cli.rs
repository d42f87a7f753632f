#![cfg(not(tarpaulin_include))]

use pivotboard::cache::get_cached_dataset;
use pivotboard::config::Settings;
use pivotboard::csv_parser;
use pivotboard::dashboard::{self, Selection};
use pivotboard::export::pivot_to_csv;
use pivotboard::logging;
use pivotboard::registry::DataSourceRegistry;
use pivotboard::storage::BucketReader;
use pivotboard::summary::DatasetSummarizer;
use std::env;
use std::fs;
use std::time::Instant;

fn usage(program: &str) {
    eprintln!("Usage:");
    eprintln!("  {} summarize <dataset_id>", program);
    eprintln!("  {} pivot <dashboard> <panel> [selection.json]", program);
    eprintln!("  {} preview <file.csv> [rows]", program);
    eprintln!("  {} import <dataset_id> <file.csv>", program);
    eprintln!("  {} dashboards", program);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let settings = Settings::from_env();
    logging::setup_logging();

    let start = Instant::now();
    let reader = BucketReader::from_settings(&settings);
    let registry = DataSourceRegistry::new(settings.pages_dir.clone());

    match args.get(1).map(String::as_str) {
        Some("summarize") if args.len() == 3 => {
            let summary = DatasetSummarizer::new(&reader).summarize(&args[2], &args[2], 5)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Some("pivot") if args.len() == 4 || args.len() == 5 => {
            let selection: Selection = match args.get(4) {
                Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
                None => Selection::default(),
            };
            let panel = dashboard::find_panel(&registry, &args[2], &args[3])?;
            let (filtered, subtitle, pivot) =
                dashboard::panel_pivot(&reader, &registry, &args[2], &panel, &selection)?;
            eprintln!("{} ({} rows)", subtitle, filtered.row_count());
            print!("{}", pivot_to_csv(&pivot));
        }
        Some("preview") if args.len() == 3 || args.len() == 4 => {
            let rows = args.get(3).and_then(|r| r.parse().ok()).unwrap_or(10);
            let bytes = fs::read(&args[2])?;
            eprintln!("encoding: {}", csv_parser::detect_encoding(&bytes));
            let table = csv_parser::parse_preview(&bytes, rows, None)?;
            for column in table.columns() {
                println!("{}: {}", column.name, column.data_type());
            }
            for i in 0..table.row_count() {
                println!("{}", serde_json::Value::Object(table.row_json(i)));
            }
        }
        Some("import") if args.len() == 4 => {
            let table = csv_parser::parse_full(&fs::read(&args[3])?, None)?;
            reader.write_dataset(&args[2], &table)?;
            let loaded = get_cached_dataset(&reader, &args[2])?;
            println!(
                "imported {} rows x {} columns into {}/{}",
                loaded.row_count(),
                loaded.column_count(),
                reader.bucket(),
                args[2]
            );
        }
        Some("dashboards") => {
            for dashboard in registry.dashboards()? {
                println!("{}", dashboard);
            }
        }
        _ => {
            usage(args.first().map(String::as_str).unwrap_or("pivotboard-cli"));
            return Ok(());
        }
    }

    eprintln!("[{:.2}s]", start.elapsed().as_secs_f64());
    Ok(())
}
