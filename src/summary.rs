use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::error::Result;
use crate::storage::DatasetReader;
use crate::table::{Column, ColumnSchema, Table, Value, cmp_values};

pub const DEFAULT_SAMPLE_ROWS: usize = 5;
pub const GENERATE_SUMMARY_PREVIEW_ROWS: usize = 1000;
pub const TOP_VALUES_LIMIT: usize = 10;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ColumnStatistics {
    Numeric {
        null_count: usize,
        min: Option<f64>,
        max: Option<f64>,
        mean: Option<f64>,
        median: Option<f64>,
        std: Option<f64>,
    },
    Categorical {
        null_count: usize,
        unique_count: usize,
        top_values: Vec<String>,
    },
}

/// Schema, counts, leading rows and per-column statistics of a dataset.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub name: String,
    pub schema: Vec<ColumnSchema>,
    pub row_count: usize,
    pub column_count: usize,
    pub sample_rows: Vec<serde_json::Map<String, serde_json::Value>>,
    pub statistics: BTreeMap<String, ColumnStatistics>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SchemaEntry {
    pub name: String,
    pub dtype: String,
    pub nullable: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GeneratedStatistics {
    Numeric {
        null_count: usize,
        min: Option<f64>,
        max: Option<f64>,
        mean: Option<f64>,
        std: Option<f64>,
    },
    Temporal {
        null_count: usize,
        min: Option<String>,
        max: Option<String>,
    },
    Text {
        null_count: usize,
        unique_count: usize,
        top_values: Vec<ValueCount>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GeneratedSummary {
    pub schema: Vec<SchemaEntry>,
    pub statistics: BTreeMap<String, GeneratedStatistics>,
    pub row_count: usize,
    pub column_count: usize,
}

pub struct DatasetSummarizer<'a> {
    reader: &'a dyn DatasetReader,
}

impl<'a> DatasetSummarizer<'a> {
    pub fn new(reader: &'a dyn DatasetReader) -> Self {
        Self { reader }
    }

    pub fn summarize(&self, dataset_id: &str, name: &str, max_sample_rows: usize) -> Result<DatasetSummary> {
        let table = self.reader.read_dataset(dataset_id)?;
        Ok(summarize_table(&table, name, max_sample_rows))
    }

    /// Summary of the first rows of a dataset, with statistics per column type.
    pub fn generate_summary(&self, dataset_id: &str) -> Result<GeneratedSummary> {
        let table = self.reader.read_dataset(dataset_id)?;
        log::info!(
            "summarising dataset {} ({} rows)",
            dataset_id,
            table.row_count()
        );
        Ok(generate_table_summary(&table))
    }
}

pub fn summarize_table(table: &Table, name: &str, max_sample_rows: usize) -> DatasetSummary {
    let sample = table.head(max_sample_rows);
    let sample_rows = (0..sample.row_count()).map(|i| sample.row_json(i)).collect();

    let statistics = table
        .columns()
        .iter()
        .map(|c| {
            let stats = if c.data_type().is_numeric() {
                let moments = Moments::of(c);
                ColumnStatistics::Numeric {
                    null_count: c.null_count(),
                    min: moments.min,
                    max: moments.max,
                    mean: moments.mean,
                    median: moments.median,
                    std: moments.std,
                }
            } else {
                let counts = value_counts(c);
                ColumnStatistics::Categorical {
                    null_count: c.null_count(),
                    unique_count: counts.len(),
                    top_values: counts
                        .into_iter()
                        .take(TOP_VALUES_LIMIT)
                        .map(|vc| vc.value)
                        .collect(),
                }
            };
            (c.name.clone(), stats)
        })
        .collect();

    DatasetSummary {
        name: name.to_string(),
        schema: table.schema(),
        row_count: table.row_count(),
        column_count: table.column_count(),
        sample_rows,
        statistics,
    }
}

pub fn generate_table_summary(table: &Table) -> GeneratedSummary {
    let table = table.head(GENERATE_SUMMARY_PREVIEW_ROWS);

    let schema = table
        .schema()
        .into_iter()
        .map(|s| SchemaEntry {
            name: s.name,
            dtype: s.data_type,
            nullable: s.nullable,
        })
        .collect();

    let statistics = table
        .columns()
        .iter()
        .map(|c| {
            let null_count = c.null_count();
            let data_type = c.data_type();
            let stats = if data_type.is_numeric() {
                let moments = Moments::of(c);
                GeneratedStatistics::Numeric {
                    null_count,
                    min: moments.min,
                    max: moments.max,
                    mean: moments.mean,
                    std: moments.std,
                }
            } else if data_type.is_temporal() {
                let (min, max) = temporal_range(c);
                GeneratedStatistics::Temporal { null_count, min, max }
            } else {
                let counts = value_counts(c);
                GeneratedStatistics::Text {
                    null_count,
                    unique_count: counts.len(),
                    top_values: counts.into_iter().take(TOP_VALUES_LIMIT).collect(),
                }
            };
            (c.name.clone(), stats)
        })
        .collect();

    GeneratedSummary {
        schema,
        statistics,
        row_count: table.row_count(),
        column_count: table.column_count(),
    }
}

#[derive(Default)]
struct Moments {
    min: Option<f64>,
    max: Option<f64>,
    mean: Option<f64>,
    median: Option<f64>,
    std: Option<f64>,
}

impl Moments {
    fn of(column: &Column) -> Self {
        let mut xs: Vec<f64> = column.values.iter().filter_map(Value::as_f64).collect();
        if xs.is_empty() {
            return Moments::default();
        }
        xs.sort_by(|a, b| a.total_cmp(b));

        let n = xs.len();
        let mean = xs.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 1 {
            xs[n / 2]
        } else {
            (xs[n / 2 - 1] + xs[n / 2]) / 2.0
        };
        // Sample standard deviation, undefined below two values.
        let std = (n > 1).then(|| {
            let ss: f64 = xs.iter().map(|x| (x - mean).powi(2)).sum();
            (ss / (n - 1) as f64).sqrt()
        });

        Moments {
            min: xs.first().copied(),
            max: xs.last().copied(),
            mean: Some(mean),
            median: Some(median),
            std,
        }
    }
}

fn temporal_range(column: &Column) -> (Option<String>, Option<String>) {
    let mut present = column.values.iter().filter(|v| !v.is_null());
    let Some(first) = present.next() else {
        return (None, None);
    };
    let (min, max) = present.fold((first, first), |(lo, hi), v| {
        (
            if cmp_values(v, lo).is_lt() { v } else { lo },
            if cmp_values(v, hi).is_gt() { v } else { hi },
        )
    });
    (Some(min.to_string()), Some(max.to_string()))
}

/// Non-null values by descending frequency; ties keep first-seen order.
fn value_counts(column: &Column) -> Vec<ValueCount> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut counts: Vec<ValueCount> = Vec::new();
    for value in column.values.iter().filter(|v| !v.is_null()) {
        let key = value.to_string();
        match index.get(&key) {
            Some(&i) => counts[i].count += 1,
            None => {
                index.insert(key.clone(), counts.len());
                counts.push(ValueCount { value: key, count: 1 });
            }
        }
    }
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts
}
