//! Escaping for ffmpeg's filter-graph grammar
//!
//! A value embedded in a filter graph is parsed twice by ffmpeg: once as a
//! filter option value, then as part of the filter graph description. Each
//! level has its own special characters, so caller text is escaped for the
//! option level first and the graph level second, exactly once each.
//!
//! Arguments are handed to the process directly (no shell), so shell
//! metacharacters carry no meaning and need no treatment.

const OPTION_SPECIAL: &[char] = &['\\', '\'', ':'];
const GRAPH_SPECIAL: &[char] = &['\\', '\'', '[', ']', ',', ';'];

fn escape_with(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape a filter option value (`key=value` inside one filter)
pub fn escape_option_value(value: &str) -> String {
    escape_with(value, OPTION_SPECIAL)
}

/// Escape a filter description for embedding in a filter graph
pub fn escape_filtergraph(value: &str) -> String {
    escape_with(value, GRAPH_SPECIAL)
}

/// Escape an untrusted value for use as a filter option inside a graph
///
/// NUL bytes are dropped since they cannot be passed as process arguments.
pub fn filter_value(value: &str) -> String {
    let cleaned: String = value.chars().filter(|&c| c != '\0').collect();
    escape_filtergraph(&escape_option_value(&cleaned))
}
