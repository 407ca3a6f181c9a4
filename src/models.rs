//! Core data models that flow through the timeline pipeline.
//!
//! Records and references are created per query unit with *local*
//! reference ids, rewritten once into the run-wide *global* id space by
//! [`crate::orchestrate::merge`], and then treated as immutable output.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Largest local reference id accepted from the answer service.
///
/// Larger citation ids are dropped by the normalizer and larger reference
/// ids fail the attempt, so shifting into the global id space cannot
/// overflow.
pub const MAX_LOCAL_ID: u64 = u32::MAX as u64;

/// One dated event parsed from the answer service.
///
/// Serialized with the persisted field names `time`, `event`, `sum`,
/// and `refer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Free-text date, usually `YYYY-MM-DD` but not guaranteed.
    pub time: String,
    /// Event description with citation markers removed.
    pub event: String,
    /// Optional elaboration; empty when the service omitted it.
    #[serde(rename = "sum", default)]
    pub summary: String,
    /// Sorted, deduplicated reference ids cited by this event.
    #[serde(rename = "refer", default)]
    pub reference_ids: Vec<u64>,
}

impl EventRecord {
    /// Shift every cited id into the global id space.
    ///
    /// Ids that would overflow `u64` are dropped rather than wrapped.
    pub fn offset_references(&mut self, offset: u64) {
        self.reference_ids = self
            .reference_ids
            .iter()
            .filter_map(|id| id.checked_add(offset))
            .collect();
    }
}

/// A source cited by the answer service.
///
/// Only `id` and `url` are interpreted. Any other field supplied by the
/// service is carried through in `extra` and written back out unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub id: u64,
    #[serde(default)]
    pub url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Reference {
    pub fn new(id: u64, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            extra: Map::new(),
        }
    }
}

/// One planned query, covering a single month or the open range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryUnit {
    /// Position in the plan; used to restore order after concurrent fetches.
    pub index: usize,
    /// Natural-language query sent to the answer service.
    pub query_text: String,
    /// Eight-character `YYYY年MM月` label, or empty for an open-ended query.
    pub period_prefix: String,
}

/// Output of fetching one [`QueryUnit`], still in its local id space.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub index: usize,
    pub period_prefix: String,
    pub records: Vec<EventRecord>,
    pub references: Vec<Reference>,
    /// Number of attempts made, including the successful one.
    pub attempts: u32,
    /// True when every attempt failed and the unit contributes nothing.
    pub degraded: bool,
}

impl FetchResult {
    /// Empty contribution for a unit that could not be fetched.
    pub fn degraded(index: usize, period_prefix: impl Into<String>, attempts: u32) -> Self {
        Self {
            index,
            period_prefix: period_prefix.into(),
            records: Vec::new(),
            references: Vec::new(),
            attempts,
            degraded: true,
        }
    }
}

/// A query unit that contributed nothing to the final timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DegradedUnit {
    pub index: usize,
    pub period_prefix: String,
}

/// Merged result of a full run, in plan order with global reference ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timeline {
    pub events: Vec<EventRecord>,
    pub references: Vec<Reference>,
    pub degraded_units: Vec<DegradedUnit>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_uses_persisted_field_names() {
        let record = EventRecord {
            time: "2012-04-10".to_string(),
            event: "黄岩岛对峙开始".to_string(),
            summary: String::new(),
            reference_ids: vec![1, 3],
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["sum"], "");
        assert_eq!(json["refer"], serde_json::json!([1, 3]));
        assert!(json.get("summary").is_none());
    }

    #[test]
    fn reference_extra_fields_pass_through() {
        let raw = serde_json::json!({
            "id": 4,
            "url": "https://example.org/a",
            "name": "Example",
            "type": 2
        });
        let reference: Reference = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(reference.id, 4);
        assert_eq!(reference.extra.get("name").unwrap(), "Example");
        assert_eq!(serde_json::to_value(&reference).unwrap(), raw);
    }

    #[test]
    fn offset_shifts_every_id() {
        let mut record = EventRecord {
            time: String::new(),
            event: String::new(),
            summary: String::new(),
            reference_ids: vec![0, 2],
        };
        record.offset_references(5);
        assert_eq!(record.reference_ids, vec![5, 7]);
    }

    #[test]
    fn offset_drops_ids_past_u64() {
        let mut record = EventRecord {
            time: String::new(),
            event: String::new(),
            summary: String::new(),
            reference_ids: vec![1, u64::MAX],
        };
        record.offset_references(3);
        assert_eq!(record.reference_ids, vec![4]);
    }
}
