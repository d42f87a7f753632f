//! CSV import with encoding detection and flexible options.

use encoding_rs::{Encoding, SHIFT_JIS, UTF_16BE, UTF_16LE, UTF_8};
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{DashboardError, Result};
use crate::table::{Column, Table, Value, parse_datetime_str};
use chrono::{DateTime, NaiveDate, Utc};

/// Bytes inspected when sniffing the encoding.
const DETECTION_SAMPLE_BYTES: usize = 10 * 1024;

/// Rows read by [`parse_preview`] unless told otherwise.
pub const DEFAULT_PREVIEW_ROWS: usize = 1000;

lazy_static! {
    static ref INT_REGEX: Regex = Regex::new(r"^[+-]?[0-9]+$").unwrap();
    static ref DATE_REGEX: Regex = Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").unwrap();
    static ref DATETIME_REGEX: Regex =
        Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}[T ][0-9]{2}:[0-9]{2}:[0-9]{2}(\.[0-9]+)?$")
            .unwrap();
    static ref DATETIME_TZ_REGEX: Regex = Regex::new(
        r"^[0-9]{4}-[0-9]{2}-[0-9]{2}[T ][0-9]{2}:[0-9]{2}:[0-9]{2}(\.[0-9]+)?(Z|[+-][0-9]{2}:[0-9]{2})$"
    )
    .unwrap();
}

/// Options for CSV import.
#[derive(Clone, Debug, PartialEq)]
pub struct CsvImportOptions {
    /// Forced encoding label; detected when `None`.
    pub encoding: Option<String>,
    pub delimiter: char,
    pub has_header: bool,
    /// Extra cell contents treated as missing, on top of the empty string.
    pub null_values: Vec<String>,
}

impl Default for CsvImportOptions {
    fn default() -> Self {
        Self {
            encoding: None,
            delimiter: ',',
            has_header: true,
            null_values: Vec::new(),
        }
    }
}

/// Guess the text encoding of a CSV file from its first 10KB.
///
/// Returns a lowercase label. ASCII is reported as `utf-8`, and bytes that are
/// neither UTF-8 nor clean Shift_JIS are assumed to be `cp932`, which is what
/// Latin-1/Windows-1252 guesses usually turn out to be for Japanese exports.
pub fn detect_encoding(file_bytes: &[u8]) -> String {
    if file_bytes.is_empty() {
        return "utf-8".to_string();
    }

    let sample = &file_bytes[..file_bytes.len().min(DETECTION_SAMPLE_BYTES)];

    if let Some((encoding, _)) = Encoding::for_bom(sample) {
        return encoding.name().to_lowercase();
    }

    if sample.is_ascii() {
        return "utf-8".to_string();
    }

    // The sample may end in the middle of a multi-byte sequence.
    match std::str::from_utf8(sample) {
        Ok(_) => return "utf-8".to_string(),
        Err(e) if e.error_len().is_none() && e.valid_up_to() + 4 > sample.len() => {
            return "utf-8".to_string();
        }
        Err(_) => {}
    }

    let (_, had_errors) = SHIFT_JIS.decode_without_bom_handling(sample);
    if !had_errors {
        return "shift_jis".to_string();
    }

    "cp932".to_string()
}

fn encoding_for_label(label: &str) -> Result<&'static Encoding> {
    match label.to_lowercase().as_str() {
        "utf-8" | "utf8" | "ascii" => Ok(UTF_8),
        "cp932" | "shift_jis" | "shift-jis" | "sjis" | "windows-31j" => Ok(SHIFT_JIS),
        "utf-16le" => Ok(UTF_16LE),
        "utf-16be" => Ok(UTF_16BE),
        other => Encoding::for_label(other.as_bytes())
            .ok_or_else(|| DashboardError::Encoding(other.to_string())),
    }
}

/// Decode raw bytes using the forced or detected encoding.
pub fn decode(file_bytes: &[u8], options: &CsvImportOptions) -> Result<(String, String)> {
    let label = options
        .encoding
        .clone()
        .unwrap_or_else(|| detect_encoding(file_bytes));
    let encoding = encoding_for_label(&label)?;
    let (text, _, _) = encoding.decode(file_bytes);
    Ok((text.into_owned(), label))
}

/// Parse at most `max_rows` data rows.
pub fn parse_preview(
    file_bytes: &[u8],
    max_rows: usize,
    options: Option<&CsvImportOptions>,
) -> Result<Table> {
    let defaults = CsvImportOptions::default();
    let options = options.unwrap_or(&defaults);
    let (text, _) = decode(file_bytes, options)?;
    build_table(&text, options, Some(max_rows))
}

/// Parse the whole file.
pub fn parse_full(file_bytes: &[u8], options: Option<&CsvImportOptions>) -> Result<Table> {
    let defaults = CsvImportOptions::default();
    let options = options.unwrap_or(&defaults);
    let (text, _) = decode(file_bytes, options)?;
    build_table(&text, options, None)
}

fn build_table(text: &str, options: &CsvImportOptions, max_rows: Option<usize>) -> Result<Table> {
    let mut records = parse_records(text, options.delimiter)?;
    if records.is_empty() {
        return Ok(Table::empty());
    }

    let header: Vec<String> = if options.has_header {
        let header = records.remove(0);
        dedupe_names(header)
    } else {
        let width = records.iter().map(Vec::len).max().unwrap_or(0);
        (0..width).map(|i| format!("column_{}", i)).collect()
    };

    if let Some(limit) = max_rows {
        records.truncate(limit);
    }

    let columns = header
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let raw: Vec<Option<&str>> = records
                .iter()
                .map(|record| {
                    record
                        .get(i)
                        .map(String::as_str)
                        .filter(|cell| !is_null_cell(cell, &options.null_values))
                })
                .collect();
            Column::new(name.clone(), infer_column(&raw))
        })
        .collect();

    Table::new(columns)
}

fn is_null_cell(cell: &str, null_values: &[String]) -> bool {
    cell.is_empty() || null_values.iter().any(|n| n == cell)
}

fn dedupe_names(header: Vec<String>) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(header.len());
    for (i, name) in header.into_iter().enumerate() {
        let mut name = if name.trim().is_empty() {
            format!("column_{}", i)
        } else {
            name.trim().to_string()
        };
        let base = name.clone();
        let mut n = 1;
        while names.contains(&name) {
            name = format!("{}.{}", base, n);
            n += 1;
        }
        names.push(name);
    }
    names
}

// Split text into records. Quoted fields may contain delimiters, newlines and
// doubled quotes.
fn parse_records(text: &str, delimiter: char) -> Result<Vec<Vec<String>>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut field_started = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }

        match c {
            '"' => {
                in_quotes = true;
                field_started = true;
            }
            c if c == delimiter => {
                record.push(std::mem::take(&mut field));
                field_started = true;
            }
            '\r' => {}
            '\n' => {
                if field_started || !field.is_empty() || !record.is_empty() {
                    record.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut record));
                }
                field_started = false;
            }
            _ => {
                field.push(c);
                field_started = true;
            }
        }
    }

    if in_quotes {
        return Err(DashboardError::Csv(format!(
            "unterminated quoted field in record {}",
            records.len() + 1
        )));
    }
    if field_started || !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    Ok(records)
}

// Pick the narrowest type that every non-null cell parses as.
fn infer_column(raw: &[Option<&str>]) -> Vec<Value> {
    let cells: Vec<&str> = raw.iter().flatten().copied().collect();
    let all = |re: &Regex| cells.iter().all(|c| re.is_match(c.trim()));

    let convert: fn(&str) -> Option<Value> = if cells.is_empty() {
        |_| None
    } else if all(&*INT_REGEX) && cells.iter().all(|c| c.trim().parse::<i64>().is_ok()) {
        |s| s.trim().parse::<i64>().ok().map(Value::Int)
    } else if cells.iter().all(|c| c.trim().parse::<f64>().is_ok()) {
        |s| s.trim().parse::<f64>().ok().map(Value::Float)
    } else if all(&*DATE_REGEX)
        && cells
            .iter()
            .all(|c| NaiveDate::parse_from_str(c.trim(), "%Y-%m-%d").is_ok())
    {
        |s| {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .ok()
                .map(Value::Date)
        }
    } else if all(&*DATETIME_REGEX) && cells.iter().all(|c| parse_datetime_str(c).is_some()) {
        |s| parse_datetime_str(s).map(Value::DateTime)
    } else if all(&*DATETIME_TZ_REGEX)
        && cells
            .iter()
            .all(|c| DateTime::parse_from_rfc3339(&c.trim().replacen(' ', "T", 1)).is_ok())
    {
        |s| {
            DateTime::parse_from_rfc3339(&s.trim().replacen(' ', "T", 1))
                .ok()
                .map(|dt| Value::DateTimeTz(dt.with_timezone(&Utc)))
        }
    } else if cells
        .iter()
        .all(|c| matches!(c.trim().to_lowercase().as_str(), "true" | "false"))
    {
        |s| Some(Value::Bool(s.trim().eq_ignore_ascii_case("true")))
    } else {
        |s| Some(Value::Text(s.to_string()))
    };

    raw.iter()
        .map(|cell| cell.and_then(convert).unwrap_or(Value::Null))
        .collect()
}
