//! Incremental cursors
//!
//! An [`Incremental`] names a cursor field. During a run a [`CursorTracker`]
//! drops every record whose cursor is not strictly greater than the value
//! persisted by the last successful run and remembers the largest value it
//! let through. The pipeline persists that maximum only after the
//! resource's rows are committed.

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_common::Record;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// What to do with a record whose cursor field is absent or null
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MissingCursor {
    /// Treat the record as new
    #[default]
    Include,
    /// Drop the record
    Exclude,
    /// Fail the resource
    Fail,
}

/// Incremental loading hint for a resource or a file listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incremental {
    /// Dotted path to the cursor field, e.g. `STOP` or `meta.updated_at`
    pub cursor_path: String,

    /// Lower bound used before any value has been persisted
    #[serde(default)]
    pub initial_value: Option<Value>,

    #[serde(default)]
    pub on_missing: MissingCursor,
}

impl Incremental {
    pub fn new(cursor_path: impl Into<String>) -> Self {
        Self {
            cursor_path: cursor_path.into(),
            initial_value: None,
            on_missing: MissingCursor::default(),
        }
    }

    pub fn initial_value(mut self, value: impl Into<Value>) -> Self {
        self.initial_value = Some(value.into());
        self
    }

    pub fn on_missing(mut self, policy: MissingCursor) -> Self {
        self.on_missing = policy;
        self
    }
}

/// Look up a dotted path in a record.
pub fn lookup<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = record.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Compare two cursor values.
///
/// Numbers compare numerically, strings lexically, booleans false < true.
/// Values of different kinds cannot be ordered.
pub fn compare_cursor(left: &Value, right: &Value) -> Result<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                return Ok(a.cmp(&b));
            }
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            a.partial_cmp(&b)
                .ok_or_else(|| IngestError::cursor(format!("cannot compare {} and {}", a, b)))
        },
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
        _ => Err(IngestError::cursor(format!(
            "cannot compare cursor values {} and {}",
            left, right
        ))),
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    last_value: Option<Value>,
    max_seen: Option<Value>,
}

/// Filters records against one cursor during a run.
///
/// Clones share state, so a tracker handed to a record source is observed
/// by the pipeline when it persists cursors.
#[derive(Debug, Clone)]
pub struct CursorTracker {
    incremental: Incremental,
    state: Arc<Mutex<TrackerState>>,
}

impl CursorTracker {
    /// Start from the persisted value, falling back to the initial value.
    pub fn new(incremental: Incremental, persisted: Option<Value>) -> Self {
        let last_value = persisted.or_else(|| incremental.initial_value.clone());
        Self {
            incremental,
            state: Arc::new(Mutex::new(TrackerState {
                last_value,
                max_seen: None,
            })),
        }
    }

    pub fn cursor_path(&self) -> &str {
        &self.incremental.cursor_path
    }

    /// Keep only records past the last persisted cursor.
    pub fn filter(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut kept = Vec::with_capacity(records.len());

        for record in records {
            let cursor = match lookup(&record, &self.incremental.cursor_path) {
                Some(value) if !value.is_null() => value.clone(),
                _ => {
                    match self.incremental.on_missing {
                        MissingCursor::Include => kept.push(record),
                        MissingCursor::Exclude => {},
                        MissingCursor::Fail => {
                            return Err(IngestError::cursor(format!(
                                "record has no value for cursor '{}'",
                                self.incremental.cursor_path
                            )))
                        },
                    }
                    continue;
                },
            };

            if let Some(last) = &state.last_value {
                if compare_cursor(&cursor, last)? != Ordering::Greater {
                    continue;
                }
            }

            let advance = match &state.max_seen {
                Some(max) => compare_cursor(&cursor, max)? == Ordering::Greater,
                None => true,
            };
            if advance {
                state.max_seen = Some(cursor);
            }
            kept.push(record);
        }

        Ok(kept)
    }

    /// Value to persist after a successful load.
    pub fn end_value(&self) -> Option<Value> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.max_seen.clone().or_else(|| state.last_value.clone())
    }
}

/// Every cursor tracked for one resource during one run.
///
/// Persisted state is a JSON object keyed by `scope:cursor_path`.
#[derive(Debug, Clone, Default)]
pub struct CursorSet {
    persisted: Record,
    trackers: Arc<Mutex<BTreeMap<String, CursorTracker>>>,
}

impl CursorSet {
    pub fn new(persisted: Option<Record>) -> Self {
        Self {
            persisted: persisted.unwrap_or_default(),
            trackers: Arc::default(),
        }
    }

    /// Get or create the tracker for a cursor in the given scope.
    pub fn tracker(&self, scope: &str, incremental: &Incremental) -> CursorTracker {
        let key = format!("{}:{}", scope, incremental.cursor_path);
        let mut trackers = self.trackers.lock().unwrap_or_else(PoisonError::into_inner);
        trackers
            .entry(key.clone())
            .or_insert_with(|| {
                CursorTracker::new(incremental.clone(), self.persisted.get(&key).cloned())
            })
            .clone()
    }

    /// Persisted state merged with the end values of this run's trackers.
    pub fn to_state(&self) -> Record {
        let mut state = self.persisted.clone();
        let trackers = self.trackers.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, tracker) in trackers.iter() {
            if let Some(value) = tracker.end_value() {
                state.insert(key.clone(), value);
            }
        }
        state
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(values: Value) -> Vec<Record> {
        sluice_common::types::records_from_value(values).unwrap()
    }

    #[test]
    fn test_compare_cursor() {
        assert_eq!(compare_cursor(&json!(2), &json!(10)).unwrap(), Ordering::Less);
        assert_eq!(compare_cursor(&json!(2.5), &json!(2)).unwrap(), Ordering::Greater);
        assert_eq!(
            compare_cursor(&json!("2024-02-01"), &json!("2024-01-31")).unwrap(),
            Ordering::Greater
        );
        assert!(compare_cursor(&json!("10"), &json!(10)).is_err());
    }

    #[test]
    fn test_lookup_dotted_path() {
        let record = records(json!({"meta": {"updated": 5}, "id": 1})).remove(0);
        assert_eq!(lookup(&record, "meta.updated"), Some(&json!(5)));
        assert_eq!(lookup(&record, "id"), Some(&json!(1)));
        assert_eq!(lookup(&record, "meta.missing"), None);
        assert_eq!(lookup(&record, "id.nested"), None);
    }

    #[test]
    fn test_filter_is_strictly_greater() {
        let tracker = CursorTracker::new(Incremental::new("id"), Some(json!(2)));
        let kept = tracker
            .filter(records(json!([{"id": 1}, {"id": 2}, {"id": 3}, {"id": 5}])))
            .unwrap();

        assert_eq!(kept.len(), 2);
        assert_eq!(tracker.end_value(), Some(json!(5)));
    }

    #[test]
    fn test_no_new_data_keeps_cursor() {
        let tracker = CursorTracker::new(Incremental::new("id"), Some(json!(5)));
        let kept = tracker.filter(records(json!([{"id": 4}, {"id": 5}]))).unwrap();

        assert!(kept.is_empty());
        assert_eq!(tracker.end_value(), Some(json!(5)));
    }

    #[test]
    fn test_initial_value_applies_without_state() {
        let tracker = CursorTracker::new(Incremental::new("id").initial_value(10), None);
        let kept = tracker.filter(records(json!([{"id": 9}, {"id": 11}]))).unwrap();
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_missing_cursor_policies() {
        let input = json!([{"id": 1}, {"other": true}, {"id": null}]);

        let include = CursorTracker::new(Incremental::new("id"), None);
        assert_eq!(include.filter(records(input.clone())).unwrap().len(), 3);

        let exclude = CursorTracker::new(
            Incremental::new("id").on_missing(MissingCursor::Exclude),
            None,
        );
        assert_eq!(exclude.filter(records(input.clone())).unwrap().len(), 1);

        let fail = CursorTracker::new(Incremental::new("id").on_missing(MissingCursor::Fail), None);
        assert!(matches!(
            fail.filter(records(input)),
            Err(IngestError::IncrementalCursor(_))
        ));
    }

    #[test]
    fn test_cursor_set_round_trips_state() {
        let set = CursorSet::new(None);
        let tracker = set.tracker("resource", &Incremental::new("STOP"));
        tracker
            .filter(records(json!([{"STOP": "2024-01-02"}, {"STOP": "2024-01-05"}])))
            .unwrap();

        let state = set.to_state();
        assert_eq!(state["resource:STOP"], json!("2024-01-05"));

        let next = CursorSet::new(Some(state));
        let tracker = next.tracker("resource", &Incremental::new("STOP"));
        let kept = tracker.filter(records(json!([{"STOP": "2024-01-05"}]))).unwrap();
        assert!(kept.is_empty());
    }
}
