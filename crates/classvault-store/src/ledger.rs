//! Timestamp ledger: syncable key → instant of its last local write.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::StoreResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimestampLedger {
    entries: BTreeMap<String, DateTime<Utc>>,
}

impl TimestampLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the persisted form; an absent value is an empty ledger.
    pub fn from_json(raw: Option<&str>) -> StoreResult<Self> {
        match raw {
            Some(json) if !json.trim().is_empty() => Ok(serde_json::from_str(json)?),
            _ => Ok(Self::new()),
        }
    }

    pub fn to_json(&self) -> StoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn get(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.get(key).copied()
    }

    /// Overwrite the entry, e.g. with a cloud timestamp after a download.
    pub fn set(&mut self, key: &str, at: DateTime<Utc>) {
        self.entries.insert(key.to_string(), at);
    }

    /// Record a local write at `now`.
    ///
    /// The entry strictly increases even if the wall clock is behind the
    /// previous value (which can come from another device's clock).
    pub fn touch(&mut self, key: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        let next = match self.get(key) {
            Some(prev) if prev >= now => prev + Duration::milliseconds(1),
            _ => now,
        };
        self.set(key, next);
        next
    }

    pub fn remove(&mut self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DateTime<Utc>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn absent_or_blank_is_empty() {
        assert!(TimestampLedger::from_json(None).unwrap().is_empty());
        assert!(TimestampLedger::from_json(Some("  ")).unwrap().is_empty());
    }

    #[test]
    fn json_roundtrip_is_a_plain_object() {
        let mut ledger = TimestampLedger::new();
        ledger.set("classes", ts("2024-01-01T10:00:00Z"));
        let json = ledger.to_json().unwrap();
        assert!(json.starts_with("{\"classes\":\"2024-01-01T10:00:00"));

        let parsed = TimestampLedger::from_json(Some(&json)).unwrap();
        assert_eq!(parsed, ledger);
    }

    #[test]
    fn touch_uses_now_when_clock_moves_forward() {
        let mut ledger = TimestampLedger::new();
        ledger.set("exams", ts("2024-01-01T10:00:00Z"));
        let at = ledger.touch("exams", ts("2024-01-02T00:00:00Z"));
        assert_eq!(at, ts("2024-01-02T00:00:00Z"));
    }

    #[test]
    fn touch_is_monotonic_when_clock_is_behind() {
        let mut ledger = TimestampLedger::new();
        let remote = ts("2030-01-01T00:00:00Z");
        ledger.set("exams", remote);
        let at = ledger.touch("exams", ts("2024-01-01T00:00:00Z"));
        assert!(at > remote, "a local write must always supersede the adopted timestamp");
    }

    #[test]
    fn corrupted_ledger_is_an_error() {
        assert!(TimestampLedger::from_json(Some("[1,2")).is_err());
    }

    mod proptest_suite {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn touch_strictly_increases(offsets in proptest::collection::vec(-5_000i64..5_000, 1..32)) {
                let base = ts("2024-06-01T00:00:00Z");
                let mut ledger = TimestampLedger::new();
                let mut last = None;
                for offset in offsets {
                    let at = ledger.touch("classes", base + Duration::milliseconds(offset));
                    if let Some(prev) = last {
                        prop_assert!(at > prev);
                    }
                    last = Some(at);
                }
            }
        }
    }
}
