//! Content fingerprinting for staleness detection.
//!
//! A fingerprint is a SHA-256 digest over a summary request's inputs: the
//! current content of its source records (or the signatures of its child
//! summaries), its query parameters, and its date range. Inputs are
//! canonicalized first so traversal order never changes the digest.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::SourceRecord;

/// Serialize a JSON value with recursively sorted object keys.
///
/// `serde_json::Value` objects preserve insertion order by default, so two
/// logically equal parameter sets can serialize differently. This walks the
/// value and emits objects in key order.
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(*key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Fingerprint a set of raw source records together with the query parameters
/// and date range that select them.
///
/// When `expected_ids` is given, every listed id must be present in
/// `records`; a missing record fails with [`Error::InputUnavailable`] so the
/// caller never computes a partial fingerprint.
pub fn fingerprint_sources(
    expected_ids: Option<&[String]>,
    records: &[SourceRecord],
    query_params: &serde_json::Value,
    date_range_start: Option<DateTime<Utc>>,
    date_range_end: Option<DateTime<Utc>>,
) -> Result<String> {
    if let Some(expected) = expected_ids {
        let missing: Vec<&str> = expected
            .iter()
            .filter(|id| !records.iter().any(|r| r.id == **id))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(Error::InputUnavailable(format!(
                "source records missing: {}",
                missing.join(", ")
            )));
        }
    }

    let mut sorted: Vec<&SourceRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut hasher = Sha256::new();
    for record in sorted {
        hasher.update(record.id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(canonical_json(&record.content).as_bytes());
        hasher.update(b"\x1e");
    }
    Ok(finish(hasher, query_params, date_range_start, date_range_end))
}

/// Fingerprint a composed summary's inputs: its children's identities and
/// signatures. A child regeneration changes its `hash_signature`, which in
/// turn changes every ancestor's fingerprint on the next read.
pub fn fingerprint_children(
    children: &[(Uuid, String)],
    query_params: &serde_json::Value,
    date_range_start: Option<DateTime<Utc>>,
    date_range_end: Option<DateTime<Utc>>,
) -> String {
    let mut sorted: Vec<&(Uuid, String)> = children.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (id, signature) in sorted {
        hasher.update(id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(signature.as_bytes());
        hasher.update(b"\x1e");
    }
    finish(hasher, query_params, date_range_start, date_range_end)
}

fn finish(
    mut hasher: Sha256,
    query_params: &serde_json::Value,
    date_range_start: Option<DateTime<Utc>>,
    date_range_end: Option<DateTime<Utc>>,
) -> String {
    hasher.update(canonical_json(query_params).as_bytes());
    hasher.update(b"\x1e");
    hasher.update(date_range_start.map_or(-1, |dt| dt.timestamp()).to_le_bytes());
    hasher.update(date_range_end.map_or(-1, |dt| dt.timestamp()).to_le_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
#[path = "fingerprint_tests.rs"]
mod tests;
