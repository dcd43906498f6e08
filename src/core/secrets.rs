//! Reading and merging the project's dotenv-style secret file.
//!
//! The merge keeps every unrelated line byte-for-byte, replaces the first
//! occurrence of each managed key in place, drops later duplicates, and
//! appends keys that are missing. Merging the same entries twice yields the
//! same text, so reruns never accumulate conflicting values.

use std::collections::HashSet;

/// Extract the key of a `KEY=value` (or `export KEY=value`) line
pub fn line_key(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, _) = trimmed.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some(key)
}

fn line_value(line: &str) -> Option<String> {
    let (_, value) = line.split_once('=')?;
    Some(unquote(value.trim()).to_string())
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'\'' || first == b'"') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Render a value so that a dotenv reader returns it unchanged
pub fn format_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value.contains(char::is_whitespace)
        || value.contains(['#', '\'', '"']);
    if !needs_quotes {
        value.to_string()
    } else if !value.contains('\'') {
        format!("'{}'", value)
    } else {
        format!("\"{}\"", value)
    }
}

/// Render one entry as a secret-file line
pub fn format_entry(key: &str, value: &str) -> String {
    format!("{}={}", key, format_value(value))
}

/// Value of the first occurrence of `key`
pub fn lookup(content: &str, key: &str) -> Option<String> {
    content
        .lines()
        .find(|line| line_key(line) == Some(key))
        .and_then(line_value)
}

/// Whether `key` appears exactly once with exactly `value`
pub fn holds(content: &str, key: &str, value: &str) -> bool {
    let mut occurrences = content.lines().filter(|line| line_key(line) == Some(key));
    match (occurrences.next(), occurrences.next()) {
        (Some(line), None) => line_value(line).as_deref() == Some(value),
        _ => false,
    }
}

/// Merge `entries` into `existing`
pub fn merge(existing: &str, entries: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(existing.len() + 128);
    let mut written: HashSet<&str> = HashSet::new();

    for line in existing.lines() {
        match line_key(line).and_then(|k| entries.iter().find(|(key, _)| *key == k)) {
            Some((key, value)) => {
                if written.insert(*key) {
                    out.push_str(&format_entry(key, value));
                    out.push('\n');
                }
            }
            None => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }

    for (key, value) in entries {
        if written.insert(*key) {
            out.push_str(&format_entry(key, value));
            out.push('\n');
        }
    }

    out
}
