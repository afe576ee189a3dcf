//! Event query model
//!
//! Time range, control-name filter, value predicates, ordering, paging and
//! aggregation over cached change events. Queries canonicalize to a stable
//! string key so the result cache can recognize repeats.

use serde::{Deserialize, Serialize};

use cl_core::{ChangeEvent, ControlValue};

/// Value predicate applied per event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ValuePredicate {
    Eq { value: ControlValue },
    Neq { value: ControlValue },
    Gt { value: f64 },
    Gte { value: f64 },
    Lt { value: f64 },
    Lte { value: f64 },
    Between { min: f64, max: f64 },
    In { values: Vec<ControlValue> },
    /// Matches events whose previous value equals the operand
    ChangedFrom { value: ControlValue },
    /// Matches events whose new value equals the operand
    ChangedTo { value: ControlValue },
}

impl ValuePredicate {
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match self {
            ValuePredicate::Eq { value } => event.value == *value,
            ValuePredicate::Neq { value } => event.value != *value,
            ValuePredicate::Gt { value } => numeric(event).is_some_and(|n| n > *value),
            ValuePredicate::Gte { value } => numeric(event).is_some_and(|n| n >= *value),
            ValuePredicate::Lt { value } => numeric(event).is_some_and(|n| n < *value),
            ValuePredicate::Lte { value } => numeric(event).is_some_and(|n| n <= *value),
            ValuePredicate::Between { min, max } => {
                numeric(event).is_some_and(|n| n >= *min && n <= *max)
            }
            ValuePredicate::In { values } => values.iter().any(|v| event.value == *v),
            ValuePredicate::ChangedFrom { value } => {
                event.previous_value.as_ref() == Some(value)
            }
            ValuePredicate::ChangedTo { value } => event.value == *value,
        }
    }
}

fn numeric(event: &ChangeEvent) -> Option<f64> {
    match &event.value {
        ControlValue::Number(n) => Some(*n),
        _ => None,
    }
}

/// Result ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    #[default]
    Timestamp,
    Value,
}

/// Result aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    None,
    /// Only events carrying a recorded previous value
    ChangesOnly,
    /// The newest event per control name
    LatestPerControl,
}

/// One query over the event cache
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventQuery {
    /// Restrict to one group; absent means all groups
    pub group_id: Option<String>,
    /// Inclusive monotonic-ns range start
    pub start_time: Option<u64>,
    /// Inclusive monotonic-ns range end
    pub end_time: Option<u64>,
    /// Restrict to these control names
    pub control_names: Option<Vec<String>>,
    pub predicate: Option<ValuePredicate>,
    pub order_by: OrderBy,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub aggregation: Aggregation,
}

impl EventQuery {
    /// Stable cache key: sorted names, fields in fixed order
    pub fn canonical_key(&self) -> String {
        let names = self.control_names.as_ref().map(|names| {
            let mut sorted = names.clone();
            sorted.sort();
            sorted.join(",")
        });
        let predicate = self
            .predicate
            .as_ref()
            .and_then(|p| serde_json::to_string(p).ok())
            .unwrap_or_default();
        format!(
            "g={};t={}..{};n={};p={};o={:?};l={};s={};a={:?}",
            self.group_id.as_deref().unwrap_or("*"),
            self.start_time.unwrap_or(0),
            self.end_time.unwrap_or(u64::MAX),
            names.as_deref().unwrap_or("*"),
            predicate,
            self.order_by,
            self.limit.map_or(-1i64, |l| l as i64),
            self.offset.unwrap_or(0),
            self.aggregation,
        )
    }

    /// Filter, aggregate, order and page a collected event set
    pub fn apply(&self, mut events: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
        if let Some(names) = &self.control_names {
            events.retain(|e| names.iter().any(|n| *n == e.control_name));
        }
        if let Some(predicate) = &self.predicate {
            events.retain(|e| predicate.matches(e));
        }

        match self.aggregation {
            Aggregation::None => {}
            Aggregation::ChangesOnly => {
                events.retain(|e| e.previous_value.is_some());
            }
            Aggregation::LatestPerControl => {
                events.sort_by_key(|e| (e.timestamp, e.sequence_number));
                let mut latest: Vec<ChangeEvent> = Vec::new();
                for event in events.drain(..) {
                    if let Some(existing) =
                        latest.iter_mut().find(|e| e.control_name == event.control_name)
                    {
                        *existing = event;
                    } else {
                        latest.push(event);
                    }
                }
                events = latest;
            }
        }

        match self.order_by {
            OrderBy::Timestamp => {
                events.sort_by_key(|e| (e.timestamp, e.sequence_number));
            }
            OrderBy::Value => {
                events.sort_by(|a, b| {
                    let an = a.value.as_f64();
                    let bn = b.value.as_f64();
                    match (an, bn) {
                        (Some(x), Some(y)) => {
                            x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal)
                        }
                        (Some(_), None) => std::cmp::Ordering::Less,
                        (None, Some(_)) => std::cmp::Ordering::Greater,
                        (None, None) => a.string.cmp(&b.string),
                    }
                });
            }
        }

        let offset = self.offset.unwrap_or(0);
        if offset > 0 {
            events = events.into_iter().skip(offset).collect();
        }
        if let Some(limit) = self.limit {
            events.truncate(limit);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, value: f64, seq: u64) -> ChangeEvent {
        ChangeEvent {
            group_id: "g".into(),
            control_name: name.into(),
            value: ControlValue::Number(value),
            string: value.to_string(),
            previous_value: (seq > 1).then(|| ControlValue::Number(value - 1.0)),
            previous_string: None,
            delta: (seq > 1).then_some(1.0),
            timestamp: seq * 1_000,
            timestamp_ms: seq,
            sequence_number: seq,
        }
    }

    #[test]
    fn test_predicates() {
        let e = event("A.x", 5.0, 2);
        assert!(ValuePredicate::Eq { value: ControlValue::Number(5.0) }.matches(&e));
        assert!(ValuePredicate::Neq { value: ControlValue::Number(4.0) }.matches(&e));
        assert!(ValuePredicate::Gt { value: 4.0 }.matches(&e));
        assert!(!ValuePredicate::Gt { value: 5.0 }.matches(&e));
        assert!(ValuePredicate::Gte { value: 5.0 }.matches(&e));
        assert!(ValuePredicate::Lt { value: 6.0 }.matches(&e));
        assert!(ValuePredicate::Lte { value: 5.0 }.matches(&e));
        assert!(ValuePredicate::Between { min: 4.0, max: 6.0 }.matches(&e));
        assert!(!ValuePredicate::Between { min: 6.0, max: 9.0 }.matches(&e));
        assert!(ValuePredicate::In {
            values: vec![ControlValue::Number(1.0), ControlValue::Number(5.0)]
        }
        .matches(&e));
        assert!(ValuePredicate::ChangedFrom { value: ControlValue::Number(4.0) }.matches(&e));
        assert!(ValuePredicate::ChangedTo { value: ControlValue::Number(5.0) }.matches(&e));
    }

    #[test]
    fn test_numeric_predicates_skip_text() {
        let mut e = event("A.s", 0.0, 2);
        e.value = ControlValue::Text("On".into());
        assert!(!ValuePredicate::Gt { value: -1.0 }.matches(&e));
        assert!(ValuePredicate::Eq { value: ControlValue::Text("On".into()) }.matches(&e));
    }

    #[test]
    fn test_name_filter_and_paging() {
        let events = vec![
            event("A.x", 1.0, 1),
            event("A.y", 2.0, 2),
            event("A.x", 3.0, 3),
            event("A.x", 4.0, 4),
        ];
        let q = EventQuery {
            control_names: Some(vec!["A.x".into()]),
            offset: Some(1),
            limit: Some(1),
            ..Default::default()
        };
        let out = q.apply(events);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sequence_number, 3);
    }

    #[test]
    fn test_latest_per_control() {
        let events = vec![
            event("A.x", 1.0, 1),
            event("A.y", 2.0, 2),
            event("A.x", 3.0, 3),
        ];
        let q = EventQuery {
            aggregation: Aggregation::LatestPerControl,
            ..Default::default()
        };
        let out = q.apply(events);
        assert_eq!(out.len(), 2);
        let x = out.iter().find(|e| e.control_name == "A.x").unwrap();
        assert_eq!(x.sequence_number, 3);
    }

    #[test]
    fn test_changes_only_drops_first_observations() {
        let events = vec![event("A.x", 1.0, 1), event("A.x", 2.0, 2)];
        let q = EventQuery {
            aggregation: Aggregation::ChangesOnly,
            ..Default::default()
        };
        let out = q.apply(events);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sequence_number, 2);
    }

    #[test]
    fn test_order_by_value() {
        let events = vec![
            event("A.x", 9.0, 1),
            event("A.y", -2.0, 2),
            event("A.z", 4.0, 3),
        ];
        let q = EventQuery {
            order_by: OrderBy::Value,
            ..Default::default()
        };
        let out = q.apply(events);
        let values: Vec<f64> = out.iter().filter_map(|e| e.value.as_f64()).collect();
        assert_eq!(values, vec![-2.0, 4.0, 9.0]);
    }

    #[test]
    fn test_canonical_key_sorts_names() {
        let a = EventQuery {
            control_names: Some(vec!["B.y".into(), "A.x".into()]),
            ..Default::default()
        };
        let b = EventQuery {
            control_names: Some(vec!["A.x".into(), "B.y".into()]),
            ..Default::default()
        };
        assert_eq!(a.canonical_key(), b.canonical_key());

        let c = EventQuery {
            control_names: Some(vec!["A.x".into()]),
            ..Default::default()
        };
        assert_ne!(a.canonical_key(), c.canonical_key());
    }
}
