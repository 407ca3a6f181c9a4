//! Persist a timeline as JSON and export it as CSV.
//!
//! The JSON files are the batch-mode artifacts: one array of events
//! (`time`, `event`, `sum`, `refer`) and one array of references. The CSV
//! is the spreadsheet-friendly view, with each event's reference ids
//! resolved to their URLs.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::models::{EventRecord, Reference, Timeline};

/// One CSV row: an event with its citations resolved to URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineRow {
    pub time: String,
    pub event: String,
    pub summary: String,
    /// `"; "`-joined URLs of the cited references.
    pub refer: String,
}

/// Paths written by [`write_timeline`].
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub events: PathBuf,
    pub references: PathBuf,
    pub csv: Option<PathBuf>,
}

/// Write `value` as pretty JSON, creating parent directories.
///
/// Non-ASCII text is written as-is, not `\u` escaped.
pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Resolve each event's reference ids to URLs.
///
/// Ids with no matching reference are dropped from the joined string.
pub fn resolve_rows(events: &[EventRecord], references: &[Reference]) -> Vec<TimelineRow> {
    let urls: HashMap<u64, &str> = references
        .iter()
        .map(|r| (r.id, r.url.as_str()))
        .collect();

    events
        .iter()
        .map(|e| TimelineRow {
            time: e.time.clone(),
            event: e.event.clone(),
            summary: e.summary.clone(),
            refer: e
                .reference_ids
                .iter()
                .filter_map(|id| urls.get(id).copied())
                .collect::<Vec<_>>()
                .join("; "),
        })
        .collect()
}

/// Write rows as UTF-8 CSV with a byte-order mark so spreadsheet tools
/// detect the encoding.
pub fn write_csv(path: &Path, rows: &[TimelineRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = String::from("\u{feff}time,event,sum,refer\n");
    for row in rows {
        let fields = [&row.time, &row.event, &row.summary, &row.refer];
        let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    std::fs::write(path, out).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// CSV file name for a topic, with path separators replaced.
pub fn csv_file_name(topic: &str) -> String {
    let safe: String = topic
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    format!("{}_timeline.csv", safe.trim())
}

/// Persist both JSON arrays and, if `csv` is set, the resolved CSV.
pub fn write_timeline(dir: &Path, topic: &str, timeline: &Timeline, csv: bool) -> Result<OutputPaths> {
    let paths = OutputPaths {
        events: dir.join("events.json"),
        references: dir.join("references.json"),
        csv: csv.then(|| dir.join(csv_file_name(topic))),
    };

    save_json(&paths.events, &timeline.events)?;
    save_json(&paths.references, &timeline.references)?;
    if let Some(csv_path) = &paths.csv {
        let rows = resolve_rows(&timeline.events, &timeline.references);
        write_csv(csv_path, &rows)?;
    }
    Ok(paths)
}

/// Rebuild the CSV from persisted JSON arrays.
pub fn run_export(events: &Path, references: &Path, output: &Path) -> Result<()> {
    let events: Vec<EventRecord> = load_json(events)?;
    let references: Vec<Reference> = load_json(references)?;
    let rows = resolve_rows(&events, &references);
    write_csv(output, &rows)?;
    eprintln!("Exported {} events to {}", rows.len(), output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn event(ids: Vec<u64>) -> EventRecord {
        EventRecord {
            time: "2012-04-10".to_string(),
            event: "对峙, 开始".to_string(),
            summary: "say \"no\"".to_string(),
            reference_ids: ids,
        }
    }

    #[test]
    fn rows_join_known_urls() {
        let refs = vec![Reference::new(0, "https://a"), Reference::new(2, "https://c")];
        let rows = resolve_rows(&[event(vec![0, 1, 2])], &refs);
        assert_eq!(rows[0].refer, "https://a; https://c");
    }

    #[test]
    fn csv_quotes_special_fields() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"no\""), "\"say \"\"no\"\"\"");
    }

    #[test]
    fn csv_has_bom_and_header() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("t.csv");
        let rows = resolve_rows(&[event(vec![])], &[]);
        write_csv(&path, &rows).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("\u{feff}time,event,sum,refer\n"));
        assert!(content.contains("2012-04-10,\"对峙, 开始\",\"say \"\"no\"\"\","));
    }

    #[test]
    fn json_keeps_non_ascii_unescaped() {
        let tmp = TempDir::new().unwrap();
        let timeline = Timeline {
            events: vec![event(vec![0])],
            references: vec![Reference::new(0, "https://a")],
            degraded_units: Vec::new(),
        };
        let paths = write_timeline(&tmp.path().join("out"), "中菲/南海", &timeline, true).unwrap();
        let events = std::fs::read_to_string(&paths.events).unwrap();
        assert!(events.contains("对峙"));
        assert!(events.contains("\"refer\""));
        assert_eq!(
            paths.csv.unwrap().file_name().unwrap().to_str().unwrap(),
            "中菲_南海_timeline.csv"
        );

        let restored: Vec<EventRecord> = load_json(&paths.events).unwrap();
        assert_eq!(restored, timeline.events);
    }
}
