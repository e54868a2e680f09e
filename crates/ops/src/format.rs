//! Plain-text rendering for the read-only layer.

use cnpg_core::{str_at, value_at, Document};

/// Left-aligned columns padded to the widest cell.
pub(crate) fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }
    let mut out = vec![line(headers, &widths)];
    for row in rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        out.push(line(&cells, &widths));
    }
    out.join("\n")
}

fn line(cells: &[&str], widths: &[usize]) -> String {
    let padded: Vec<String> = cells.iter().zip(widths).map(|(c, w)| format!("{:<w$}", c, w = *w)).collect();
    padded.join("  ").trim_end().to_string()
}

/// Text at `path`, or "-".
pub(crate) fn text(doc: &Document, path: &str) -> String {
    match value_at(doc, path) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => "-".to_string(),
        Some(other) => other.to_string(),
    }
}

pub(crate) fn name(doc: &Document) -> String {
    str_at(doc, "metadata.name").unwrap_or("-").to_string()
}

/// Compact age ("3d4h", "12m") from an RFC3339 timestamp.
pub(crate) fn age(doc: &Document, path: &str) -> String {
    let Some(ts) = str_at(doc, path).and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok()) else {
        return "-".to_string();
    };
    let mut secs = (chrono::Utc::now().timestamp() - ts.timestamp()).max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}
