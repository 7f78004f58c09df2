//! Metrics normalization and range-compliance inference
//!
//! The engine's result artifact is a loosely structured JSON document whose
//! shape has drifted across producer versions: the metrics array may be
//! nested under arbitrary wrapper objects, field names vary, and status
//! strings are free-form. This module flattens all of that into canonical
//! [`MetricRecord`]s with a closed [`MetricStatus`] set, inferring compliance
//! from the free-text normal-range specification when no usable status is
//! supplied.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;

/// Maximum nesting depth explored when searching for the metrics array
const SEARCH_DEPTH_LIMIT: usize = 16;

// Field alias tables: first present alias wins.
const LOCATION_ALIASES: [&str; 3] = ["location", "site", "channel"];
const NAME_ALIASES: [&str; 3] = ["metric", "metric_name", "name"];
const VALUE_ALIASES: [&str; 3] = ["value", "val", "measured"];
const LEFT_ALIASES: [&str; 2] = ["left", "left_value"];
const RIGHT_ALIASES: [&str; 2] = ["right", "right_value"];
const RANGE_ALIASES: [&str; 3] = ["normal_range", "range", "expected_range"];
const STATUS_ALIASES: [&str; 2] = ["status", "result"];
const PROBE_ALIASES: [&str; 3] = ["probe", "question", "symptom_probe"];
const FORMULA_ALIASES: [&str; 2] = ["formula", "derivation"];
const SUMMARY_PROBE_ALIASES: [&str; 3] = ["potential_symptom_questions", "probes", "questions"];

/// Canonical range-compliance status. Always one of these three values,
/// regardless of how the source document spelled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricStatus {
    InRange,
    OutOfRange,
    Missing,
}

impl std::fmt::Display for MetricStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricStatus::InRange => write!(f, "IN_RANGE"),
            MetricStatus::OutOfRange => write!(f, "OUT_OF_RANGE"),
            MetricStatus::Missing => write!(f, "MISSING"),
        }
    }
}

/// One canonical, post-normalization metric.
///
/// `value`, `left_value` and `right_value` use NaN as the missing sentinel.
#[derive(Debug, Clone, Serialize)]
pub struct MetricRecord {
    pub location: String,
    pub metric: String,
    pub value: f64,
    pub left_value: f64,
    pub right_value: f64,
    pub normal_range: String,
    pub status: MetricStatus,
    pub probe: String,
    pub formula: String,
}

/// Derived per-document summary. Never stored independently of the metric
/// list it was computed from.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultSummary {
    pub in_range: usize,
    pub out_of_range: usize,
    pub missing: usize,
    /// De-duplicated symptom probes, first-appearance order: metric-derived
    /// probes from out-of-range metrics first, then document-supplied ones.
    pub probes: Vec<String>,
}

/// Where a normalized result came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultProvenance {
    LiveSession,
    ImportedFile(PathBuf),
}

impl std::fmt::Display for ResultProvenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultProvenance::LiveSession => write!(f, "live session"),
            ResultProvenance::ImportedFile(path) => write!(f, "file: {}", path.display()),
        }
    }
}

/// Canonical output of [`normalize`].
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedResult {
    pub metrics: Vec<MetricRecord>,
    pub summary: ResultSummary,
}

/// Display filter over the canonical metric list.
///
/// Filtering never mutates the list or the summary; counts always reflect
/// the full unfiltered set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricFilter {
    #[default]
    All,
    InRangeOnly,
    OutOfRangeOnly,
    MissingOnly,
}

impl MetricFilter {
    pub fn apply<'a>(&self, metrics: &'a [MetricRecord]) -> Vec<&'a MetricRecord> {
        metrics
            .iter()
            .filter(|m| match self {
                MetricFilter::All => true,
                MetricFilter::InRangeOnly => m.status == MetricStatus::InRange,
                MetricFilter::OutOfRangeOnly => m.status == MetricStatus::OutOfRange,
                MetricFilter::MissingOnly => m.status == MetricStatus::Missing,
            })
            .collect()
    }
}

/// Replace bare non-finite numeric tokens (`NaN`, `Infinity`, `-Infinity`)
/// with `null` so the document parses as strict JSON.
///
/// The engine serializes through a writer that emits these literals for
/// non-finite floats. Tokens inside string literals are left untouched.
pub fn sanitize_json_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = rest.chars().next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            rest = &rest[c.len_utf8()..];
            continue;
        }

        if c == '"' {
            in_string = true;
            out.push(c);
            rest = &rest[1..];
        } else if rest.starts_with("NaN") {
            out.push_str("null");
            rest = &rest[3..];
        } else if rest.starts_with("Infinity") {
            out.push_str("null");
            rest = &rest[8..];
        } else if rest.starts_with("-Infinity") {
            out.push_str("null");
            rest = &rest[9..];
        } else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }
    out
}

/// Normalize a raw result document text: sanitize non-finite tokens, parse,
/// then run [`normalize`].
pub fn normalize_text(text: &str) -> Result<NormalizedResult> {
    let value: Value = serde_json::from_str(&sanitize_json_text(text))?;
    normalize(&value)
}

/// Normalize an arbitrary result document into canonical metrics plus a
/// derived summary.
///
/// The metrics array is located by breadth-first search over the document's
/// own nesting (objects and arrays), taking the first node that exposes a
/// `metrics` sequence field. Fails with [`Error::NoMetricsFound`] if none
/// exists within the explored depth.
pub fn normalize(document: &Value) -> Result<NormalizedResult> {
    let raw_metrics = find_sequence(document, "metrics").ok_or(Error::NoMetricsFound)?;

    let metrics: Vec<MetricRecord> = raw_metrics.iter().map(normalize_element).collect();

    let mut summary = ResultSummary::default();
    let mut seen: HashSet<String> = HashSet::new();
    for metric in &metrics {
        match metric.status {
            MetricStatus::InRange => summary.in_range += 1,
            MetricStatus::OutOfRange => summary.out_of_range += 1,
            MetricStatus::Missing => summary.missing += 1,
        }
        if metric.status == MetricStatus::OutOfRange {
            let probe = metric.probe.trim();
            if !probe.is_empty() && seen.insert(probe.to_string()) {
                summary.probes.push(probe.to_string());
            }
        }
    }

    // Document-supplied probes merge in after the metric-derived ones.
    for probe in document_probes(document) {
        let probe = probe.trim();
        if !probe.is_empty() && seen.insert(probe.to_string()) {
            summary.probes.push(probe.to_string());
        }
    }

    Ok(NormalizedResult { metrics, summary })
}

/// Breadth-first search for the first node exposing `key` as an array.
fn find_sequence<'a>(root: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    let mut queue: std::collections::VecDeque<(&Value, usize)> =
        std::collections::VecDeque::new();
    queue.push_back((root, 0));

    while let Some((node, depth)) = queue.pop_front() {
        if depth > SEARCH_DEPTH_LIMIT {
            continue;
        }
        match node {
            Value::Object(map) => {
                if let Some(Value::Array(items)) = map.get(key) {
                    return Some(items);
                }
                for child in map.values() {
                    queue.push_back((child, depth + 1));
                }
            }
            Value::Array(items) => {
                for child in items {
                    queue.push_back((child, depth + 1));
                }
            }
            _ => {}
        }
    }
    None
}

/// Probe strings listed by the document's own summary object, if any.
fn document_probes(document: &Value) -> Vec<String> {
    let mut queue: std::collections::VecDeque<(&Value, usize)> =
        std::collections::VecDeque::new();
    queue.push_back((document, 0));

    while let Some((node, depth)) = queue.pop_front() {
        if depth > SEARCH_DEPTH_LIMIT {
            continue;
        }
        if let Value::Object(map) = node {
            if let Some(Value::Object(summary)) = map.get("summary") {
                for alias in SUMMARY_PROBE_ALIASES {
                    if let Some(Value::Array(items)) = summary.get(alias) {
                        return items
                            .iter()
                            .filter_map(|v| v.as_str().map(|s| s.to_string()))
                            .collect();
                    }
                }
            }
            for child in map.values() {
                queue.push_back((child, depth + 1));
            }
        }
    }
    Vec::new()
}

/// First present alias wins; every external field access is a fallible lookup.
fn aliased<'a>(element: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    let map = element.as_object()?;
    aliases.iter().find_map(|a| map.get(*a))
}

fn aliased_string(element: &Value, aliases: &[&str]) -> String {
    aliased(element, aliases)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn aliased_number(element: &Value, aliases: &[&str]) -> f64 {
    match aliased(element, aliases) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        // Producers have been seen quoting numeric values
        Some(Value::String(s)) => s.trim().parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

fn normalize_element(element: &Value) -> MetricRecord {
    let value = aliased_number(element, &VALUE_ALIASES);
    let normal_range = aliased_string(element, &RANGE_ALIASES);

    // Precedence: an explicit status field that canonicalizes wins; otherwise
    // infer from the normal-range text.
    let explicit = aliased(element, &STATUS_ALIASES)
        .and_then(|v| v.as_str())
        .and_then(canonicalize_status);
    let status = explicit.unwrap_or_else(|| infer_status(value, &normal_range));

    MetricRecord {
        location: aliased_string(element, &LOCATION_ALIASES),
        metric: aliased_string(element, &NAME_ALIASES),
        value,
        left_value: aliased_number(element, &LEFT_ALIASES),
        right_value: aliased_number(element, &RIGHT_ALIASES),
        normal_range,
        status,
        probe: aliased_string(element, &PROBE_ALIASES),
        formula: aliased_string(element, &FORMULA_ALIASES),
    }
}

/// Canonicalize a producer-supplied status string into the closed status set.
///
/// Case-folds, collapses whitespace and hyphen runs to underscores, then maps
/// through the alias table. Returns `None` for empty/`na`/unrecognized
/// spellings so the caller falls through to range inference.
pub fn canonicalize_status(raw: &str) -> Option<MetricStatus> {
    let mut folded = String::with_capacity(raw.len());
    let mut last_underscore = false;
    for c in raw.trim().chars() {
        if c.is_whitespace() || c == '-' {
            if !last_underscore && !folded.is_empty() {
                folded.push('_');
                last_underscore = true;
            }
        } else {
            folded.extend(c.to_lowercase());
            last_underscore = c == '_';
        }
    }

    match folded.as_str() {
        "in" | "in_range" | "pass" | "ok" => Some(MetricStatus::InRange),
        "out" | "out_of_range" | "fail" => Some(MetricStatus::OutOfRange),
        "missing" => Some(MetricStatus::Missing),
        _ => None,
    }
}

/// Infer compliance from a free-text normal-range specification.
///
/// Textual patterns tried in order: absolute-value ceiling (`abs(..) <= N`),
/// `<= N`, `>= N`, `< N`, `> N`, numeric interval `A-B` (order-independent,
/// inclusive), then a residual absolute-value rule (text mentions `abs` and
/// exactly one number). Unmatchable text, or a non-finite value, yields
/// `Missing`.
pub fn infer_status(value: f64, range_text: &str) -> MetricStatus {
    if !value.is_finite() {
        return MetricStatus::Missing;
    }
    let text = range_text.trim();
    if text.is_empty() {
        return MetricStatus::Missing;
    }
    let lowered = text.to_lowercase();

    let compliant = |ok: bool| {
        if ok {
            MetricStatus::InRange
        } else {
            MetricStatus::OutOfRange
        }
    };

    if lowered.contains("abs") {
        if let Some(limit) = number_after(&lowered, "<=") {
            return compliant(value.abs() <= limit);
        }
    }
    if let Some(limit) = number_after(&lowered, "<=") {
        return compliant(value <= limit);
    }
    if let Some(limit) = number_after(&lowered, ">=") {
        return compliant(value >= limit);
    }
    if let Some(limit) = number_after(&lowered, "<") {
        return compliant(value < limit);
    }
    if let Some(limit) = number_after(&lowered, ">") {
        return compliant(value > limit);
    }

    let numbers = extract_numbers(&lowered);
    if numbers.len() == 2 && lowered.contains('-') {
        let (low, high) = if numbers[0] <= numbers[1] {
            (numbers[0], numbers[1])
        } else {
            (numbers[1], numbers[0])
        };
        return compliant(low <= value && value <= high);
    }

    if lowered.contains("abs") && numbers.len() == 1 {
        return compliant(value.abs() <= numbers[0]);
    }

    MetricStatus::Missing
}

/// First number following `op` in `text`, if `op` occurs.
fn number_after(text: &str, op: &str) -> Option<f64> {
    // "<" must not match the "<" inside "<="
    let idx = if op == "<" || op == ">" {
        let mut found = None;
        for (i, _) in text.match_indices(op) {
            if text[i + 1..].starts_with('=') {
                continue;
            }
            found = Some(i);
            break;
        }
        found?
    } else {
        text.find(op)?
    };
    extract_numbers(&text[idx + op.len()..]).first().copied()
}

/// All standalone numbers in `text`, skipping digits embedded in identifiers
/// (so `F3` contributes nothing).
fn extract_numbers(text: &str) -> Vec<f64> {
    let bytes = text.as_bytes();
    let mut numbers = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_alphabetic() || c == '_' {
            // Consume the identifier wholesale, digits included
            while i < bytes.len()
                && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
            {
                i += 1;
            }
            continue;
        }
        if c.is_ascii_digit() || (c == '-' && i + 1 < bytes.len() && (bytes[i + 1] as char).is_ascii_digit()) {
            let negative = c == '-';
            // A '-' directly after a number is a range separator, not a sign
            let sign_ok = !negative
                || i == 0
                || !(bytes[i - 1] as char).is_ascii_digit();
            let start = if negative && sign_ok { i } else if negative { i + 1 } else { i };
            i = if negative { i + 1 } else { i };
            while i < bytes.len()
                && ((bytes[i] as char).is_ascii_digit() || bytes[i] == b'.')
            {
                i += 1;
            }
            if let Ok(n) = text[start..i].parse::<f64>() {
                numbers.push(n);
            }
            continue;
        }
        i += 1;
    }
    numbers
}
