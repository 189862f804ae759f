//! Compact text rendering helpers for `--format text`.
//!
//! Keeps command output bounded and readable; JSON output never goes
//! through here.

use colored::{ColoredString, Colorize};
use serde_json::Value;

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// One-line preview of a JSON value. Strings print bare.
pub fn compact_value(value: &Value, max_chars: usize) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => compact_line(s, max_chars),
        other => compact_line(&other.to_string(), max_chars),
    }
}

/// Bulleted list of at most `max_items` lines, with a `+N more` tail.
pub fn bullet_list(items: &[String], max_items: usize, max_chars: usize) -> String {
    let mut lines: Vec<String> = items
        .iter()
        .take(max_items)
        .map(|m| format!("  - {}", compact_line(m, max_chars)))
        .collect();
    if items.len() > max_items {
        lines.push(format!("  (+{} more)", items.len() - max_items));
    }
    lines.join("\n")
}

/// Status rendered with a colour by outcome class.
pub fn status_badge(status: &str) -> ColoredString {
    match status {
        "COMPLETED" | "READY" => status.green().bold(),
        "FAILED" | "ERROR" | "CANCELLED" | "EXPIRED" => status.red().bold(),
        "AWAITING_APPROVAL" | "HOP_PLAN_PROPOSED" | "HOP_IMPL_PROPOSED" | "PROPOSED" => {
            status.yellow().bold()
        }
        _ => status.cyan(),
    }
}
