use std::io::Write;

/// Configure structured logging: one JSON object per line with an ISO timestamp.
///
/// The level comes from `RUST_LOG` and defaults to `info`. Calling this more than
/// once is harmless; later calls are ignored.
pub fn setup_logging() {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format(|buf, record| {
        let line = format_record(
            record.level(),
            record.target(),
            &record.args().to_string(),
            chrono::Utc::now(),
        );
        writeln!(buf, "{}", line)
    });
    let _ = builder.try_init();
}

fn format_record(
    level: log::Level,
    target: &str,
    event: &str,
    at: chrono::DateTime<chrono::Utc>,
) -> String {
    serde_json::json!({
        "timestamp": at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
        "level": level.as_str().to_lowercase(),
        "target": target,
        "event": event,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn record_is_a_json_object() {
        let at = chrono::Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let line = format_record(log::Level::Warn, "pivotboard::cache", "cache miss", at);
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["level"], "warn");
        assert_eq!(parsed["event"], "cache miss");
        assert_eq!(parsed["target"], "pivotboard::cache");
        assert_eq!(parsed["timestamp"], "2024-01-02T03:04:05.000000Z");
    }
}
