//! Human-readable rendering shared by the `op` and `catalog` commands:
//! comfy-table tables, sizes, durations, ages and the `--json` printer.

use chrono::{DateTime, Local, Utc};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use mirrorflow_protocol::api::LookupOrigin;
use mirrorflow_protocol::OperationStatus;
use serde::Serialize;

/// Byte count with a binary unit: `512 B`, `1.5 KB`, `3.2 GB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Format seconds as `1h 02m`, `3m 05s` or `4.2s`.
pub fn format_duration(seconds: f64) -> String {
    let whole = seconds.max(0.0) as u64;
    if whole >= 3600 {
        format!("{}h {:02}m", whole / 3600, (whole % 3600) / 60)
    } else if whole >= 60 {
        format!("{}m {:02}s", whole / 60, whole % 60)
    } else {
        format!("{:.1}s", seconds.max(0.0))
    }
}

/// "5 minutes ago" style age, or the absolute local time past a week.
pub fn format_time_ago(time: DateTime<Utc>, now: DateTime<Utc>) -> String {
    const UNITS: [(i64, &str); 4] = [(86_400, "day"), (3_600, "hour"), (60, "minute"), (1, "second")];

    let secs = (now - time).num_seconds();
    if secs <= 0 {
        return "just now".to_string();
    }
    if secs >= 7 * 86_400 {
        return format_time_absolute(time);
    }
    let (size, unit) = UNITS
        .into_iter()
        .find(|(size, _)| secs >= *size)
        .unwrap_or((1, "second"));
    let count = secs / size;
    format!("{} {}{} ago", count, unit, if count == 1 { "" } else { "s" })
}

pub fn format_time_absolute(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

pub fn status_color(status: OperationStatus) -> Color {
    match status {
        OperationStatus::Running => Color::Cyan,
        OperationStatus::Success => Color::Green,
        OperationStatus::Failed => Color::Red,
        OperationStatus::Stopped => Color::Yellow,
    }
}

pub fn origin_label(origin: LookupOrigin) -> &'static str {
    match origin {
        LookupOrigin::Prefetched => "prefetched",
        LookupOrigin::StaticFallback => "built-in",
        LookupOrigin::Default => "default",
    }
}

/// Print a table with custom column colors
pub fn print_table_colored(headers: &[&str], rows: Vec<Vec<(String, Option<Color>)>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        let cells: Vec<Cell> = row
            .into_iter()
            .map(|(text, color)| {
                let cell = Cell::new(text);
                if let Some(c) = color {
                    cell.fg(c)
                } else {
                    cell
                }
            })
            .collect();
        table.add_row(cells);
    }

    println!("{}", table);
}

/// Print a table without per-cell colors
pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    print_table_colored(
        headers,
        rows.into_iter()
            .map(|row| row.into_iter().map(|text| (text, None)).collect())
            .collect(),
    );
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(13), "13 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024), "5.0 GB");
        assert_eq!(format_size(3 * 1024u64.pow(5)), "3072.0 TB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(4.21), "4.2s");
        assert_eq!(format_duration(185.0), "3m 05s");
        assert_eq!(format_duration(3720.0), "1h 02m");
        assert_eq!(format_duration(-1.0), "0.0s");
    }

    #[test]
    fn test_format_time_ago() {
        let now = Utc::now();
        assert_eq!(format_time_ago(now - Duration::seconds(1), now), "1 second ago");
        assert_eq!(format_time_ago(now - Duration::seconds(120), now), "2 minutes ago");
        assert_eq!(format_time_ago(now - Duration::hours(1), now), "1 hour ago");
        assert_eq!(format_time_ago(now - Duration::days(2), now), "2 days ago");
        assert_eq!(format_time_ago(now + Duration::seconds(5), now), "just now");
        let old = now - Duration::days(30);
        assert_eq!(format_time_ago(old, now), format_time_absolute(old));
    }
}
