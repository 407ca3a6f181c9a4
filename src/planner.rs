//! Query planning: topic + date range → one [`QueryUnit`] per month.
//!
//! A range is decomposed into calendar months so each answer-service call
//! covers a narrow window; narrow windows produce denser, better-dated
//! answers than a single query over years.

use chrono::{Months, NaiveDate};

use crate::config::QueryConfig;
use crate::error::TimelineError;
use crate::models::QueryUnit;

/// Start value meaning "no range": a single open-ended query is planned.
pub const NO_RANGE: &str = "-1";

/// `strftime` pattern of the eight-character period prefix.
pub const PERIOD_FORMAT: &str = "%Y年%m月";

/// Plan with the default query templates.
pub fn plan(topic: &str, start: &str, end: &str) -> Result<Vec<QueryUnit>, TimelineError> {
    plan_with(&QueryConfig::default(), topic, start, end)
}

/// Plan the query units for `topic` between `start` and `end` inclusive.
///
/// Bounds are `YYYY-MM` strings and may be given in either order. When
/// `start` is [`NO_RANGE`], `end` is ignored and one unit with an empty
/// period prefix is returned.
///
/// # Errors
///
/// [`TimelineError::DateFormat`] if either bound is not a valid year-month.
pub fn plan_with(
    templates: &QueryConfig,
    topic: &str,
    start: &str,
    end: &str,
) -> Result<Vec<QueryUnit>, TimelineError> {
    if start.trim() == NO_RANGE {
        return Ok(vec![QueryUnit {
            index: 0,
            query_text: templates.render_open(topic),
            period_prefix: String::new(),
        }]);
    }

    let mut first = parse_year_month(start)?;
    let mut last = parse_year_month(end)?;
    if first > last {
        std::mem::swap(&mut first, &mut last);
    }

    let mut units = Vec::new();
    let mut current = Some(first);
    while let Some(month) = current.filter(|m| *m <= last) {
        let period = month.format(PERIOD_FORMAT).to_string();
        units.push(QueryUnit {
            index: units.len(),
            query_text: templates.render_month(&period, topic),
            period_prefix: period,
        });
        current = month.checked_add_months(Months::new(1));
    }
    Ok(units)
}

/// Parse a `YYYY-MM` value into the first day of that month.
pub fn parse_year_month(input: &str) -> Result<NaiveDate, TimelineError> {
    let trimmed = input.trim();
    NaiveDate::parse_from_str(&format!("{}-01", trimmed), "%Y-%m-%d").map_err(|e| {
        TimelineError::DateFormat {
            input: trimmed.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Convert a period prefix back to its `YYYY-MM` form.
///
/// Only the first eight characters are considered. Returns `None` when they
/// are not a `YYYY年MM月` value.
pub fn period_to_iso(prefix: &str) -> Option<String> {
    let head: String = prefix.chars().take(8).collect();
    NaiveDate::parse_from_str(&format!("{}01", head), "%Y年%m月%d")
        .ok()
        .map(|d| d.format("%Y-%m").to_string())
}
