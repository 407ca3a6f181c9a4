//! Fetching one query unit, with retry.
//!
//! Each attempt queries the answer service, normalizes the reply, keeps
//! only the events dated inside the unit's month, and coerces the
//! reference ids. Any failure burns one attempt. When every attempt fails
//! the unit degrades to an empty [`FetchResult`] flagged `degraded`; it
//! never fails the run.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::client::AnswerService;
use crate::config::FetchConfig;
use crate::error::TimelineError;
use crate::models::{EventRecord, FetchResult, QueryUnit, Reference, MAX_LOCAL_ID};
use crate::normalize::normalize;
use crate::planner::period_to_iso;

/// Runs query units against an [`AnswerService`].
#[derive(Clone)]
pub struct UnitFetcher {
    service: Arc<dyn AnswerService>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl UnitFetcher {
    pub fn new(service: Arc<dyn AnswerService>, config: &FetchConfig) -> Self {
        Self {
            service,
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay(),
        }
    }

    /// Fetch `unit`, retrying with a fixed delay between attempts.
    pub async fn fetch(&self, unit: &QueryUnit) -> FetchResult {
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.retry_delay).await;
            }

            match self.attempt(unit).await {
                Ok((records, references)) => {
                    tracing::debug!(
                        unit = unit.index,
                        attempt,
                        records = records.len(),
                        references = references.len(),
                        "unit fetched"
                    );
                    return FetchResult {
                        index: unit.index,
                        period_prefix: unit.period_prefix.clone(),
                        records,
                        references,
                        attempts: attempt,
                        degraded: false,
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        unit = unit.index,
                        period = %unit.period_prefix,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "fetch attempt failed"
                    );
                }
            }
        }

        tracing::warn!(
            unit = unit.index,
            period = %unit.period_prefix,
            "unit degraded after exhausting retries"
        );
        FetchResult::degraded(unit.index, unit.period_prefix.clone(), self.max_attempts)
    }

    async fn attempt(
        &self,
        unit: &QueryUnit,
    ) -> Result<(Vec<EventRecord>, Vec<Reference>), TimelineError> {
        let reply = self.service.query(&unit.query_text).await?;
        let records = normalize(&reply.text)?;
        let records = filter_to_period(&unit.period_prefix, records);
        let references = references_from_payload(&reply.references)?;
        Ok((records, references))
    }
}

/// Keep only records dated inside the month named by `period_prefix`.
///
/// A record is kept when its `time` starts with the month's `YYYY-MM`
/// form or with the prefix itself. An empty prefix, or one that does not
/// parse as a `YYYY年MM月` month, disables filtering.
pub fn filter_to_period(period_prefix: &str, records: Vec<EventRecord>) -> Vec<EventRecord> {
    if period_prefix.is_empty() {
        return records;
    }
    let Some(iso) = period_to_iso(period_prefix) else {
        return records;
    };
    let local: String = period_prefix.chars().take(8).collect();

    records
        .into_iter()
        .filter(|r| r.time.starts_with(&iso) || r.time.starts_with(&local))
        .collect()
}

/// Extract the reference list from a service reference payload.
///
/// Looks under `payload.references`, then a top-level `references`.
///
/// # Errors
///
/// [`TimelineError::ReferenceId`] when neither list is present, or for a
/// non-object entry, an id that is not an integer in `0..=MAX_LOCAL_ID`,
/// or an id repeated within the payload.
pub fn references_from_payload(payload: &Value) -> Result<Vec<Reference>, TimelineError> {
    let entries = payload
        .pointer("/payload/references")
        .filter(|v| v.is_array())
        .or_else(|| payload.get("references"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            TimelineError::ReferenceId("reply carries no reference list".to_string())
        })?;

    let mut seen = HashSet::new();
    let mut references = Vec::with_capacity(entries.len());
    for entry in entries {
        let Value::Object(fields) = entry else {
            return Err(TimelineError::ReferenceId(format!(
                "reference entry is not an object: {}",
                entry
            )));
        };
        let mut fields = fields.clone();
        let raw_id = fields.remove("id").unwrap_or(Value::Null);
        let id = coerce_id(&raw_id)?;
        if !seen.insert(id) {
            return Err(TimelineError::ReferenceId(format!("duplicate id {}", id)));
        }
        let url = match fields.remove("url") {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        references.push(Reference {
            id,
            url,
            extra: fields,
        });
    }
    Ok(references)
}

fn coerce_id(raw: &Value) -> Result<u64, TimelineError> {
    let id = match raw {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && (0.0..=MAX_LOCAL_ID as f64).contains(f))
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    let id = id.filter(|id| *id <= MAX_LOCAL_ID);
    id.ok_or_else(|| TimelineError::ReferenceId(format!("cannot use {} as an id", raw)))
}
