//! `key=value` tag lists

use tracing::debug;

/// Splits `key=value` entries on the first `=`.
///
/// Empty entries, entries without `=` and entries with an empty key are
/// skipped.
pub fn explode_tag_list(entries: &[String]) -> Vec<(String, String)> {
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.is_empty() {
            continue;
        }
        match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                out.push((key.to_string(), value.to_string()));
            }
            _ => debug!(entry = %entry, "Skipping malformed tag entry"),
        }
    }
    out
}
