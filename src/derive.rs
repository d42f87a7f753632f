//! Derived columns: reporting cadence buckets and durations.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{DashboardError, Result};
use crate::table::{Column, Table, Value};

pub const YEAR_COLUMN: &str = "_year";
pub const MONTH_COLUMN: &str = "_month";
pub const ISO_WEEK_COLUMN: &str = "_iso_week";
pub const START_DATE_COLUMN: &str = "_start_date";
pub const END_DATE_COLUMN: &str = "_end_date";

const WEEK_LABEL_FORMAT: &str = "%d-%b-%y";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Weekly,
    #[default]
    Monthly,
    Yearly,
}

impl FromStr for Cadence {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weekly" => Ok(Cadence::Weekly),
            "monthly" => Ok(Cadence::Monthly),
            "yearly" => Ok(Cadence::Yearly),
            other => Err(DashboardError::InvalidConfig(format!(
                "unknown cadence '{}'",
                other
            ))),
        }
    }
}

fn text_or_null(date: Option<NaiveDate>, f: impl Fn(NaiveDate) -> String) -> Value {
    date.map(|d| Value::Text(f(d))).unwrap_or(Value::Null)
}

/// Add bucket columns for `cadence` computed from `timestamp_column`.
///
/// Every cadence adds `_year`. Weekly adds `_iso_week` plus the Monday and Sunday
/// of the ISO week as `_start_date`/`_end_date`, and uses the ISO week-year for
/// `_year`. Monthly adds `_month` as `YYYY-MM`. Cells that are not dates give nulls.
pub fn add_cadence_columns(table: Table, timestamp_column: &str, cadence: Cadence) -> Result<Table> {
    let dates: Vec<Option<NaiveDate>> = table
        .require_column(timestamp_column)?
        .values
        .iter()
        .map(Value::as_date)
        .collect();

    let derived = |name: &str, f: &dyn Fn(NaiveDate) -> String| {
        Column::new(name, dates.iter().map(|d| text_or_null(*d, f)).collect())
    };

    let mut table = match cadence {
        Cadence::Weekly => table.with_column(derived(YEAR_COLUMN, &|d| {
            d.iso_week().year().to_string()
        }))?,
        _ => table.with_column(derived(YEAR_COLUMN, &|d| d.year().to_string()))?,
    };

    match cadence {
        Cadence::Weekly => {
            table = table
                .with_column(derived(ISO_WEEK_COLUMN, &|d| {
                    format!("{:02}", d.iso_week().week())
                }))?
                .with_column(derived(START_DATE_COLUMN, &|d| {
                    week_start(d).format(WEEK_LABEL_FORMAT).to_string()
                }))?
                .with_column(derived(END_DATE_COLUMN, &|d| {
                    (week_start(d) + Duration::days(6))
                        .format(WEEK_LABEL_FORMAT)
                        .to_string()
                }))?;
        }
        Cadence::Monthly => {
            table = table.with_column(derived(MONTH_COLUMN, &|d| d.format("%Y-%m").to_string()))?;
        }
        Cadence::Yearly => {}
    }

    Ok(table)
}

fn week_start(d: NaiveDate) -> NaiveDate {
    d - Duration::days(d.weekday().num_days_from_monday() as i64)
}

/// Seconds in an `HH:MM:SS` duration. Minutes and seconds must be below 60.
pub fn parse_duration_seconds(s: &str) -> Option<f64> {
    let mut parts = s.trim().split(':');
    let (h, m, sec) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let h: u64 = h.parse().ok()?;
    let m: u64 = m.parse().ok()?;
    let sec: f64 = sec.parse().ok()?;
    if m >= 60 || !(0.0..60.0).contains(&sec) {
        return None;
    }
    let whole = h.checked_mul(3600)?.checked_add(m * 60)?;
    Some(whole as f64 + sec)
}

/// Add `out_column` holding `column` converted to seconds; the source column is kept.
pub fn add_duration_seconds(table: Table, column: &str, out_column: &str) -> Result<Table> {
    let seconds = table
        .require_column(column)?
        .values
        .iter()
        .map(|v| match v {
            Value::Text(s) => parse_duration_seconds(s).map(Value::Float).unwrap_or(Value::Null),
            _ => Value::Null,
        })
        .collect();
    table.with_column(Column::new(out_column, seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn created_at(stamps: &[(i32, u32, u32)]) -> Table {
        let rows = stamps
            .iter()
            .map(|&(y, m, d)| {
                vec![Value::DateTimeTz(
                    Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap(),
                )]
            })
            .collect();
        Table::from_rows(&["created_at"], rows).unwrap()
    }

    fn weekly(stamps: &[(i32, u32, u32)]) -> Table {
        add_cadence_columns(created_at(stamps), "created_at", Cadence::Weekly).unwrap()
    }

    fn text(table: &Table, row: usize, column: &str) -> String {
        table.value(row, column).unwrap().to_string()
    }

    #[test]
    fn monday_starts_the_week() {
        let t = weekly(&[(2026, 1, 26)]);
        assert_eq!(text(&t, 0, START_DATE_COLUMN), "26-Jan-26");
        assert_eq!(text(&t, 0, END_DATE_COLUMN), "01-Feb-26");
        assert_eq!(text(&t, 0, ISO_WEEK_COLUMN), "05");
        assert_eq!(text(&t, 0, YEAR_COLUMN), "2026");
    }

    #[test]
    fn sunday_ends_the_week() {
        let t = weekly(&[(2026, 2, 1)]);
        assert_eq!(text(&t, 0, START_DATE_COLUMN), "26-Jan-26");
        assert_eq!(text(&t, 0, END_DATE_COLUMN), "01-Feb-26");
        assert_eq!(text(&t, 0, ISO_WEEK_COLUMN), "05");
    }

    #[test]
    fn midweek_and_weekend_days() {
        let t = weekly(&[(2026, 2, 4), (2026, 1, 25)]);
        assert_eq!(text(&t, 0, START_DATE_COLUMN), "02-Feb-26");
        assert_eq!(text(&t, 0, END_DATE_COLUMN), "08-Feb-26");
        assert_eq!(text(&t, 0, ISO_WEEK_COLUMN), "06");

        assert_eq!(text(&t, 1, START_DATE_COLUMN), "19-Jan-26");
        assert_eq!(text(&t, 1, END_DATE_COLUMN), "25-Jan-26");
        assert_eq!(text(&t, 1, ISO_WEEK_COLUMN), "04");
    }

    #[test]
    fn week_spanning_new_year_uses_iso_year() {
        // 2025-12-29 is the Monday of ISO week 1 of 2026.
        let t = weekly(&[(2025, 12, 31)]);
        assert_eq!(text(&t, 0, ISO_WEEK_COLUMN), "01");
        assert_eq!(text(&t, 0, YEAR_COLUMN), "2026");
        assert_eq!(text(&t, 0, START_DATE_COLUMN), "29-Dec-25");
    }

    #[test]
    fn monthly_and_yearly() {
        let monthly =
            add_cadence_columns(created_at(&[(2026, 2, 10)]), "created_at", Cadence::Monthly)
                .unwrap();
        assert_eq!(text(&monthly, 0, MONTH_COLUMN), "2026-02");
        assert_eq!(text(&monthly, 0, YEAR_COLUMN), "2026");
        assert!(!monthly.has_column(ISO_WEEK_COLUMN));

        let yearly =
            add_cadence_columns(created_at(&[(2026, 2, 10)]), "created_at", Cadence::Yearly)
                .unwrap();
        assert_eq!(yearly.column_count(), 2);
    }

    #[test]
    fn non_dates_become_null() {
        let table = Table::from_rows(
            &["created_at"],
            vec![vec!["2026-01-05".into()], vec!["soon".into()], vec![Value::Null]],
        )
        .unwrap();
        let t = add_cadence_columns(table, "created_at", Cadence::Monthly).unwrap();
        assert_eq!(text(&t, 0, MONTH_COLUMN), "2026-01");
        assert!(t.value(1, MONTH_COLUMN).unwrap().is_null());
        assert!(t.value(2, YEAR_COLUMN).unwrap().is_null());
    }

    #[test]
    fn cadence_parses_from_strings() {
        assert_eq!("Weekly".parse::<Cadence>().unwrap(), Cadence::Weekly);
        assert_eq!("yearly".parse::<Cadence>().unwrap(), Cadence::Yearly);
        assert!("daily".parse::<Cadence>().is_err());
    }

    #[test]
    fn durations_in_seconds() {
        assert_eq!(parse_duration_seconds("00:10:30"), Some(630.0));
        assert_eq!(parse_duration_seconds("01:05:15"), Some(3915.0));
        assert_eq!(parse_duration_seconds("00:00:45"), Some(45.0));
        assert_eq!(parse_duration_seconds("invalid"), None);
        assert_eq!(parse_duration_seconds("00:75:00"), None);
        assert_eq!(parse_duration_seconds(""), None);
    }

    #[test]
    fn oversized_hours_are_rejected() {
        assert_eq!(parse_duration_seconds("99999999999999999:00:00"), None);
        assert_eq!(parse_duration_seconds("1000:00:00"), Some(3_600_000.0));
    }

    #[test]
    fn duration_column_keeps_the_source() {
        let table = Table::from_rows(
            &["video_duration"],
            vec![vec!["00:10:00".into()], vec!["bad".into()], vec![Value::Null]],
        )
        .unwrap();
        let t = add_duration_seconds(table, "video_duration", "_video_duration_seconds").unwrap();
        assert!(t.has_column("video_duration"));
        assert_eq!(t.value(0, "_video_duration_seconds"), Some(&Value::Float(600.0)));
        assert!(t.value(1, "_video_duration_seconds").unwrap().is_null());
        assert!(t.value(2, "_video_duration_seconds").unwrap().is_null());
    }
}
