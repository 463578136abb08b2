//! Number and text formatting helpers shared by the plan model, the detectors and the CLI.

/// Compact row/read counts: `18.2M`, `45.0K`, `812`
pub fn format_count(value: u64) -> String {
    if value >= 1_000_000 {
        format!("{:.1}M", value as f64 / 1_000_000.0)
    } else if value >= 1_000 {
        format!("{:.1}K", value as f64 / 1_000.0)
    } else {
        value.to_string()
    }
}

/// Same as [`format_count`] for estimates that are computed as floats
pub fn format_count_f64(value: f64) -> String {
    if value <= 0.0 || !value.is_finite() {
        return "0".to_string();
    }
    format_count(value.round() as u64)
}

/// Format duration in ms to human-readable string
pub fn format_duration_ms(ms: f64) -> String {
    if ms < 1.0 {
        format!("{:.2}μs", ms * 1000.0)
    } else if ms < 1000.0 {
        format!("{:.2}ms", ms)
    } else if ms < 60000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else if ms < 3600000.0 {
        format!("{:.1}m", ms / 60000.0)
    } else {
        format!("{:.1}h", ms / 3600000.0)
    }
}

pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Cut `text` to at most `max_chars` characters, appending `...` when something was dropped.
pub fn truncate_fragment(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// Take at most `max_chars` characters starting at byte offset `start`.
pub fn take_chars(text: &str, start: usize, max_chars: usize) -> &str {
    let tail = &text[start..];
    match tail.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &tail[..byte_idx],
        None => tail,
    }
}

/// Collapse runs of whitespace (including newlines) into single spaces.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep only identifier characters, e.g. `[USER]` -> `USER`
pub fn sanitize_identifier(text: &str) -> String {
    text.chars().filter(|c| c.is_alphanumeric() || *c == '_').collect()
}

/// Strip any `db.schema.` prefix from a qualified object name.
pub fn short_object_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}
