//! Reply normalization: free-form model text → typed [`EventRecord`]s.
//!
//! The answer service is asked for a list of `{time, event, sum}` objects
//! but returns it embedded in prose, wrapped in code fences, sprinkled with
//! escape characters and line breaks, and sometimes in literal syntax that
//! is not strict JSON. Every tolerance heuristic for that format lives here
//! so that drift in the service's output only touches this module.
//!
//! # Pipeline
//!
//! 1. [`compact`] removes backslashes, fences (with their language tag),
//!    and all whitespace.
//! 2. [`payload_span`] slices from the first `[{` to the last `}]`.
//! 3. The slice is handed to each [`PARSE_STRATEGIES`] entry in order;
//!    the first success wins.
//! 4. Every object entry becomes an [`EventRecord`]; citation spans like
//!    `^[1][2]^` are lifted out of the event text into `reference_ids`.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::TimelineError;
use crate::literal::parse_literal;
use crate::models::{EventRecord, MAX_LOCAL_ID};

static RE_FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```(?:python|json)?").unwrap());

// Non-greedy so `A^[1]^B^[2]^C` yields two spans, not one.
static RE_CITATION_SPAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\^(.*?)\^").unwrap());

static RE_BRACKETED_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(\d+)\]").unwrap());

type ParseFn = fn(&str) -> Result<Value, String>;

/// Structured-data dialects tried in order; the first success wins.
pub const PARSE_STRATEGIES: &[(&str, ParseFn)] = &[("json", parse_json), ("literal", parse_literal)];

fn parse_json(input: &str) -> Result<Value, String> {
    serde_json::from_str(input).map_err(|e| e.to_string())
}

/// Parse a raw service reply into event records.
///
/// # Errors
///
/// Returns [`TimelineError::Parse`] when no strategy can parse the payload
/// or when the parsed value is not a list. Non-object list entries are
/// skipped, so a list of scalars yields an empty `Vec` rather than an error.
pub fn normalize(raw: &str) -> Result<Vec<EventRecord>, TimelineError> {
    let compacted = compact(raw);
    let payload = payload_span(&compacted);

    let value = parse_payload(payload)?;
    let Value::Array(items) = value else {
        return Err(TimelineError::Parse(
            "top-level value is not a list".to_string(),
        ));
    };

    Ok(items.iter().filter_map(record_from_value).collect())
}

/// Strip escapes, fences, and every whitespace character.
///
/// Whitespace is dropped everywhere, including inside string values: the
/// service inserts line breaks at arbitrary points of the payload.
pub fn compact(raw: &str) -> String {
    let unescaped = raw.replace('\\', "");
    let unfenced = RE_FENCE.replace_all(&unescaped, "");
    unfenced.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Slice to the outermost `[{ ... }]` span when one exists.
pub fn payload_span(text: &str) -> &str {
    match (text.find("[{"), text.rfind("}]")) {
        (Some(start), Some(end)) if start < end => &text[start..end + 2],
        _ => text,
    }
}

fn parse_payload(payload: &str) -> Result<Value, TimelineError> {
    let mut last_err = String::from("no parse strategy configured");
    for (name, strategy) in PARSE_STRATEGIES {
        match strategy(payload) {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::debug!(strategy = *name, error = %e, "parse strategy failed");
                last_err = format!("{} parse failed: {}", name, e);
            }
        }
    }
    Err(TimelineError::Parse(last_err))
}

fn record_from_value(item: &Value) -> Option<EventRecord> {
    let obj = item.as_object()?;
    let field = |key: &str| obj.get(key).map(coerce_string).unwrap_or_default();

    let time = field("time");
    let raw_event = field("event");
    let summary = match obj.get("sum") {
        Some(v) => coerce_string(v),
        None => field("summary"),
    };
    let (event, reference_ids) = extract_citations(&raw_event);

    Some(EventRecord {
        time,
        event,
        summary,
        reference_ids,
    })
}

fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Lift `^...^` citation spans out of event text.
///
/// Every `[n]` inside a span contributes `n` to the returned id list,
/// which is sorted and deduplicated. Well-formed spans are removed from
/// the text; stray carets are left as they are. Ids above
/// [`MAX_LOCAL_ID`] are skipped.
pub fn extract_citations(event: &str) -> (String, Vec<u64>) {
    let ids: BTreeSet<u64> = RE_CITATION_SPAN
        .captures_iter(event)
        .flat_map(|span| {
            let inner = span.get(1).map_or("", |m| m.as_str());
            RE_BRACKETED_ID
                .captures_iter(inner)
                .filter_map(|id| id[1].parse::<u64>().ok())
                .filter(|id| *id <= MAX_LOCAL_ID)
                .collect::<Vec<_>>()
        })
        .collect();

    let cleaned = RE_CITATION_SPAN.replace_all(event, "").trim().to_string();
    (cleaned, ids.into_iter().collect())
}
