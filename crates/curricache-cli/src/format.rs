//! Text formatting for terminal output.

use chrono::NaiveDate;

/// Truncate a string to a maximum number of characters, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// Truncate then left-align in a fixed-width column.
pub fn column(s: &str, width: usize) -> String {
    format!("{:<width$}", truncate_string(s, width), width = width)
}

/// Format a module date (`YYYY-MM-DD` or RFC 3339) as e.g. "Mar 04, 2024".
pub fn format_date(date: &str) -> String {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(date) {
        dt.format("%b %d, %Y").to_string()
    } else if let Ok(d) = NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        d.format("%b %d, %Y").to_string()
    } else {
        date.to_string()
    }
}

pub fn format_optional(value: Option<&str>, default: &str) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
        .to_string()
}

pub fn format_percent(rate: f64) -> String {
    format!("{:.0}%", rate * 100.0)
}
