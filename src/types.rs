use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// One parsed event.
///
/// Optional fields are `None` when the element was missing or its text did
/// not coerce; they are omitted from the serialized object rather than
/// written as `null`. Field order here is the output field order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<i64>,
    #[serde(default)]
    pub event_data: BTreeMap<String, String>,
}

impl Record {
    /// Inserts a `Data` entry. Entries without a name are dropped and a
    /// repeated name overwrites the earlier value.
    pub fn insert_data(&mut self, name: &str, value: String) {
        if name.is_empty() {
            return;
        }
        self.event_data.insert(name.to_string(), value);
    }
}

/// Event ID set and inclusive start timestamp restricting a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    event_ids: BTreeSet<i32>,
    start: Option<String>,
}

impl QueryFilter {
    pub fn new<I>(event_ids: I, start: Option<String>) -> Self
    where
        I: IntoIterator<Item = i32>,
    {
        Self {
            event_ids: event_ids.into_iter().collect(),
            start: start.filter(|s| !s.trim().is_empty()),
        }
    }

    pub fn start(&self) -> Option<&str> {
        self.start.as_deref()
    }

    pub fn matches_everything(&self) -> bool {
        self.event_ids.is_empty() && self.start.is_none()
    }

    /// Renders the XPath filter expression understood by the event log query
    /// engine.
    pub fn render(&self) -> String {
        let ids = self
            .event_ids
            .iter()
            .map(|id| format!("EventID={id}"))
            .collect::<Vec<_>>()
            .join(" or ");

        match (ids.is_empty(), &self.start) {
            (false, Some(ts)) => format!("*[System[({ids}) and TimeCreated[@SystemTime>='{ts}']]]"),
            (false, None) => format!("*[System[{ids}]]"),
            (true, Some(ts)) => format!("*[System[TimeCreated[@SystemTime>='{ts}']]]"),
            (true, None) => "*".to_string(),
        }
    }

    /// Evaluates the filter against an already parsed record, for readers
    /// that have no query engine of their own.
    pub fn matches(&self, record: &Record) -> bool {
        if !self.event_ids.is_empty() {
            match record.event_id {
                Some(id) if self.event_ids.contains(&id) => {}
                _ => return false,
            }
        }

        if let Some(start) = &self.start {
            match &record.time_created {
                Some(created) => return !is_before(created, start),
                None => return false,
            }
        }

        true
    }
}

impl fmt::Display for QueryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

// Compares as instants when both sides are RFC 3339, otherwise falls back to
// string order, which agrees for same-shaped ISO-8601 UTC stamps.
fn is_before(created: &str, start: &str) -> bool {
    match (
        DateTime::parse_from_rfc3339(created),
        DateTime::parse_from_rfc3339(start),
    ) {
        (Ok(created), Ok(start)) => created < start,
        _ => created < start,
    }
}

/// Where events are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceTarget {
    /// A live channel such as `Security` or
    /// `Microsoft-Windows-PowerShell/Operational`.
    Channel(String),
    /// An exported `.evtx` file.
    File(PathBuf),
}

impl fmt::Display for SourceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceTarget::Channel(name) => write!(f, "channel {name}"),
            SourceTarget::File(path) => write!(f, "file {}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_ids_and_start() {
        let filter = QueryFilter::new([4624, 4625], Some("2024-01-01T00:00:00.000Z".to_string()));
        assert_eq!(
            filter.render(),
            "*[System[(EventID=4624 or EventID=4625) and TimeCreated[@SystemTime>='2024-01-01T00:00:00.000Z']]]"
        );
    }

    #[test]
    fn test_render_ids_only() {
        let filter = QueryFilter::new([4625, 4624, 4624], None);
        assert_eq!(filter.render(), "*[System[EventID=4624 or EventID=4625]]");
    }

    #[test]
    fn test_render_start_only() {
        let filter = QueryFilter::new([], Some("2024-03-05T10:00:00.000Z".to_string()));
        assert_eq!(
            filter.render(),
            "*[System[TimeCreated[@SystemTime>='2024-03-05T10:00:00.000Z']]]"
        );
    }

    #[test]
    fn test_render_match_all() {
        assert_eq!(QueryFilter::new([], None).render(), "*");
        assert_eq!(QueryFilter::new([], Some("  ".to_string())).render(), "*");
    }

    #[test]
    fn test_matches_event_ids() {
        let filter = QueryFilter::new([4624], None);
        let mut record = Record::default();
        assert!(!filter.matches(&record));

        record.event_id = Some(4624);
        assert!(filter.matches(&record));

        record.event_id = Some(4625);
        assert!(!filter.matches(&record));
    }

    #[test]
    fn test_matches_start_is_inclusive() {
        let filter = QueryFilter::new([], Some("2024-01-01T00:00:00.000Z".to_string()));
        let mut record = Record {
            time_created: Some("2024-01-01T00:00:00.0000000Z".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&record));

        record.time_created = Some("2023-12-31T23:59:59.9999999Z".to_string());
        assert!(!filter.matches(&record));

        record.time_created = None;
        assert!(!filter.matches(&record));
    }

    #[test]
    fn test_insert_data_skips_empty_name() {
        let mut record = Record::default();
        record.insert_data("", "ignored".to_string());
        record.insert_data("TargetUserName", "alice".to_string());
        record.insert_data("TargetUserName", "bob".to_string());

        assert_eq!(record.event_data.len(), 1);
        assert_eq!(record.event_data["TargetUserName"], "bob");
    }

    #[test]
    fn test_serialize_omits_absent_fields() {
        let record = Record {
            event_id: Some(7),
            ..Default::default()
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"event_id":7,"event_data":{}}"#);
    }
}
