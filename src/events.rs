use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::sync::Arc;

use crate::automation::Curve;
use crate::error::EventError;
use crate::timing::RatePoint;

/// One slot of an event tuple as it appears in a project file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
    List(Vec<f64>),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(number) => write!(f, "{number}"),
            Value::Text(text) => write!(f, "{text:?}"),
            Value::List(values) => write!(f, "{values:?}"),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<f64>> for Value {
    fn from(value: Vec<f64>) -> Self {
        Value::List(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Rate,
    Meter,
    Note,
    Start,
    Stop,
    Param,
    Sequence,
    Log,
}

impl EventType {
    pub fn name(self) -> &'static str {
        match self {
            EventType::Rate => "rate",
            EventType::Meter => "meter",
            EventType::Note => "note",
            EventType::Start => "start",
            EventType::Stop => "stop",
            EventType::Param => "param",
            EventType::Sequence => "sequence",
            EventType::Log => "log",
        }
    }

    /// Accepted tuple lengths, counting the beat and the type tag.
    pub fn arity(self) -> RangeInclusive<usize> {
        match self {
            EventType::Rate => 3..=4,
            EventType::Meter => 4..=4,
            EventType::Note => 5..=5,
            EventType::Start => 4..=4,
            EventType::Stop => 3..=4,
            EventType::Param => 4..=6,
            EventType::Sequence => 5..=5,
            EventType::Log => 3..=3,
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            EventType::Rate => "Should be of the form [beat, \"rate\", rate, curve]",
            EventType::Meter => "Should be of the form [beat, \"meter\", numerator, denominator]",
            EventType::Note => "Should be of the form [beat, \"note\", id, value, duration]",
            EventType::Start => "Should be of the form [beat, \"start\", id, value]",
            EventType::Stop => "Should be of the form [beat, \"stop\", id, value]",
            EventType::Param => {
                "Should be of the form [beat, \"param\", name, value, curve, duration]"
            }
            EventType::Sequence => {
                "Should be of the form [beat, \"sequence\", id, target, duration]"
            }
            EventType::Log => "Should be of the form [beat, \"log\", text]",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "rate" => EventType::Rate,
            "meter" => EventType::Meter,
            "note" => EventType::Note,
            "start" => EventType::Start,
            "stop" => EventType::Stop,
            "param" => EventType::Param,
            "sequence" => EventType::Sequence,
            "log" => EventType::Log,
            other => return Err(EventError::UnknownType(other.to_string())),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    Rate {
        rate: f64,
        curve: Curve,
    },
    Meter {
        numerator: u32,
        denominator: u32,
    },
    Note {
        id: Value,
        value: f64,
        duration: f64,
    },
    Start {
        id: Value,
        value: f64,
    },
    Stop {
        id: Value,
        value: Option<f64>,
    },
    Param {
        name: String,
        value: f64,
        curve: Curve,
        duration: f64,
    },
    /// Plays the named sequence for `duration` beats. `target: None` inherits
    /// the parent head's target.
    Sequence {
        id: String,
        target: Option<String>,
        duration: f64,
    },
    Log {
        text: String,
    },
}

impl EventData {
    pub fn kind(&self) -> EventType {
        match self {
            EventData::Rate { .. } => EventType::Rate,
            EventData::Meter { .. } => EventType::Meter,
            EventData::Note { .. } => EventType::Note,
            EventData::Start { .. } => EventType::Start,
            EventData::Stop { .. } => EventType::Stop,
            EventData::Param { .. } => EventType::Param,
            EventData::Sequence { .. } => EventType::Sequence,
            EventData::Log { .. } => EventType::Log,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Value>", into = "Vec<Value>")]
pub struct Event {
    pub beat: f64,
    pub data: EventData,
}

impl Event {
    pub fn new(beat: f64, data: EventData) -> Self {
        Self { beat, data }
    }

    pub fn rate(beat: f64, rate: f64, curve: Curve) -> Self {
        Self::new(beat, EventData::Rate { rate, curve })
    }

    pub fn meter(beat: f64, numerator: u32, denominator: u32) -> Self {
        Self::new(
            beat,
            EventData::Meter {
                numerator,
                denominator,
            },
        )
    }

    pub fn note(beat: f64, id: impl Into<Value>, value: f64, duration: f64) -> Self {
        Self::new(
            beat,
            EventData::Note {
                id: id.into(),
                value,
                duration,
            },
        )
    }

    pub fn start(beat: f64, id: impl Into<Value>, value: f64) -> Self {
        Self::new(
            beat,
            EventData::Start {
                id: id.into(),
                value,
            },
        )
    }

    pub fn stop(beat: f64, id: impl Into<Value>) -> Self {
        Self::new(
            beat,
            EventData::Stop {
                id: id.into(),
                value: None,
            },
        )
    }

    pub fn param(beat: f64, name: impl Into<String>, value: f64, curve: Curve, duration: f64) -> Self {
        Self::new(
            beat,
            EventData::Param {
                name: name.into(),
                value,
                curve,
                duration,
            },
        )
    }

    pub fn sequence(beat: f64, id: impl Into<String>, target: Option<&str>, duration: f64) -> Self {
        Self::new(
            beat,
            EventData::Sequence {
                id: id.into(),
                target: target.map(str::to_string),
                duration,
            },
        )
    }

    pub fn log(beat: f64, text: impl Into<String>) -> Self {
        Self::new(beat, EventData::Log { text: text.into() })
    }

    pub fn kind(&self) -> EventType {
        self.data.kind()
    }

    /// Checks the numeric constraints each event type places on its slots.
    pub fn validate(&self) -> Result<(), EventError> {
        if !self.beat.is_finite() || self.beat < 0.0 {
            return Err(EventError::InvalidBeat(self.beat.to_string()));
        }

        let kind = self.kind();
        let slot = |slot: usize, reason: &'static str| EventError::Slot { kind, slot, reason };

        match &self.data {
            EventData::Rate { rate, curve } => {
                if !(rate.is_finite() && *rate > 0.0) {
                    return Err(slot(2, "rate must be a positive number"));
                }
                if !matches!(curve, Curve::Step | Curve::Linear | Curve::Exponential) {
                    return Err(slot(3, "curve must be step, linear or exponential"));
                }
            }
            EventData::Meter {
                numerator,
                denominator,
            } => {
                if *numerator == 0 {
                    return Err(slot(2, "numerator must be a positive integer"));
                }
                if *denominator == 0 {
                    return Err(slot(3, "denominator must be a positive integer"));
                }
            }
            EventData::Note {
                id,
                value,
                duration,
            } => {
                if matches!(id, Value::List(_)) {
                    return Err(slot(2, "id must be a number or a string"));
                }
                if !value.is_finite() {
                    return Err(slot(3, "value must be a number"));
                }
                if !(duration.is_finite() && *duration > 0.0) {
                    return Err(slot(4, "duration must be a positive number"));
                }
            }
            EventData::Start { id, value } => {
                if matches!(id, Value::List(_)) {
                    return Err(slot(2, "id must be a number or a string"));
                }
                if !value.is_finite() {
                    return Err(slot(3, "value must be a number"));
                }
            }
            EventData::Stop { id, .. } => {
                if matches!(id, Value::List(_)) {
                    return Err(slot(2, "id must be a number or a string"));
                }
            }
            EventData::Param {
                name,
                value,
                curve,
                duration,
            } => {
                if name.is_empty() {
                    return Err(slot(2, "name must not be empty"));
                }
                if !value.is_finite() {
                    return Err(slot(3, "value must be a number"));
                }
                if let Curve::Values(samples) = curve {
                    if samples.is_empty() {
                        return Err(slot(3, "curve needs at least one sample"));
                    }
                }
                if !(duration.is_finite() && *duration >= 0.0) {
                    return Err(slot(5, "duration must not be negative"));
                }
            }
            EventData::Sequence { id, duration, .. } => {
                if id.is_empty() {
                    return Err(slot(2, "id must not be empty"));
                }
                if !(duration.is_finite() && *duration > 0.0) {
                    return Err(slot(4, "duration must be a positive number"));
                }
            }
            EventData::Log { .. } => {}
        }

        Ok(())
    }

    /// Parses and validates an event tuple such as `[1, "note", "C4", 1, 2]`.
    pub fn from_values(values: &[Value]) -> Result<Self, EventError> {
        let Some(first) = values.first() else {
            return Err(EventError::Empty);
        };
        let beat = first
            .as_number()
            .ok_or_else(|| EventError::InvalidBeat(first.to_string()))?;
        let kind: EventType = match values.get(1) {
            Some(Value::Text(tag)) => tag.parse()?,
            Some(other) => return Err(EventError::UnknownType(other.to_string())),
            None => return Err(EventError::UnknownType(String::new())),
        };
        if !kind.arity().contains(&values.len()) {
            return Err(EventError::Arity {
                kind,
                found: values.len(),
            });
        }

        let number = |slot: usize| {
            values[slot].as_number().ok_or(EventError::Slot {
                kind,
                slot,
                reason: "expected a number",
            })
        };
        let text = |slot: usize| {
            values[slot]
                .as_text()
                .map(str::to_string)
                .ok_or(EventError::Slot {
                    kind,
                    slot,
                    reason: "expected a string",
                })
        };
        let count = |slot: usize| {
            let value = number(slot)?;
            if value.fract() != 0.0 || value < 0.0 || value > u32::MAX as f64 {
                return Err(EventError::Slot {
                    kind,
                    slot,
                    reason: "expected a whole number",
                });
            }
            Ok(value as u32)
        };
        let curve = |slot: usize| -> Result<Curve, EventError> {
            match values.get(slot) {
                None => Ok(Curve::Step),
                Some(Value::Text(name)) => name
                    .parse()
                    .map_err(|_| EventError::UnknownCurve(name.clone())),
                Some(_) => Err(EventError::Slot {
                    kind,
                    slot,
                    reason: "expected a curve name",
                }),
            }
        };

        let data = match kind {
            EventType::Rate => EventData::Rate {
                rate: number(2)?,
                curve: curve(3)?,
            },
            EventType::Meter => EventData::Meter {
                numerator: count(2)?,
                denominator: count(3)?,
            },
            EventType::Note => EventData::Note {
                id: values[2].clone(),
                value: number(3)?,
                duration: number(4)?,
            },
            EventType::Start => EventData::Start {
                id: values[2].clone(),
                value: number(3)?,
            },
            EventType::Stop => EventData::Stop {
                id: values[2].clone(),
                value: values.get(3).map(|_| number(3)).transpose()?,
            },
            EventType::Param => {
                let duration = values.get(5).map(|_| number(5)).transpose()?.unwrap_or(0.0);
                match (&values[3], values.get(4)) {
                    (Value::List(samples), Some(Value::Text(name))) if name == "curve" => {
                        EventData::Param {
                            name: text(2)?,
                            value: samples.last().copied().unwrap_or(0.0),
                            curve: Curve::Values(Arc::from(samples.as_slice())),
                            duration,
                        }
                    }
                    _ => EventData::Param {
                        name: text(2)?,
                        value: number(3)?,
                        curve: curve(4)?,
                        duration,
                    },
                }
            }
            EventType::Sequence => {
                let target = text(3)?;
                EventData::Sequence {
                    id: text(2)?,
                    target: match target.as_str() {
                        "" | "self" => None,
                        _ => Some(target),
                    },
                    duration: number(4)?,
                }
            }
            EventType::Log => EventData::Log { text: text(2)? },
        };

        let event = Event::new(beat, data);
        event.validate()?;
        Ok(event)
    }

    pub fn to_values(&self) -> Vec<Value> {
        let mut values = vec![Value::Number(self.beat), Value::from(self.kind().name())];
        match &self.data {
            EventData::Rate { rate, curve } => {
                values.push(Value::Number(*rate));
                if *curve != Curve::Step {
                    values.push(Value::from(curve.name()));
                }
            }
            EventData::Meter {
                numerator,
                denominator,
            } => {
                values.push(Value::from(*numerator));
                values.push(Value::from(*denominator));
            }
            EventData::Note {
                id,
                value,
                duration,
            } => {
                values.push(id.clone());
                values.push(Value::Number(*value));
                values.push(Value::Number(*duration));
            }
            EventData::Start { id, value } => {
                values.push(id.clone());
                values.push(Value::Number(*value));
            }
            EventData::Stop { id, value } => {
                values.push(id.clone());
                values.extend(value.map(Value::Number));
            }
            EventData::Param {
                name,
                value,
                curve,
                duration,
            } => {
                values.push(Value::from(name.as_str()));
                match curve {
                    Curve::Values(samples) => values.push(Value::List(samples.to_vec())),
                    _ => values.push(Value::Number(*value)),
                }
                if *curve != Curve::Step || *duration != 0.0 {
                    values.push(Value::from(curve.name()));
                }
                if *duration != 0.0 {
                    values.push(Value::Number(*duration));
                }
            }
            EventData::Sequence {
                id,
                target,
                duration,
            } => {
                values.push(Value::from(id.as_str()));
                values.push(Value::from(target.as_deref().unwrap_or("self")));
                values.push(Value::Number(*duration));
            }
            EventData::Log { text } => values.push(Value::from(text.as_str())),
        }
        values
    }
}

impl TryFrom<Vec<Value>> for Event {
    type Error = EventError;

    fn try_from(values: Vec<Value>) -> Result<Self, Self::Error> {
        Event::from_values(&values)
    }
}

impl From<Event> for Vec<Value> {
    fn from(event: Event) -> Self {
        event.to_values()
    }
}

/// Events ordered by beat. Events sharing a beat keep insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Event>", into = "Vec<Event>")]
pub struct EventList {
    events: Vec<Event>,
}

impl EventList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn as_slice(&self) -> &[Event] {
        &self.events
    }

    /// Inserts after any event already at the same beat, returning the index.
    pub fn insert(&mut self, event: Event) -> usize {
        let index = self.events.partition_point(|e| e.beat <= event.beat);
        self.events.insert(index, event);
        index
    }

    /// Index of the first event at or after `beat`.
    pub fn index_at(&self, beat: f64) -> usize {
        self.events.partition_point(|e| e.beat < beat)
    }

    /// Events with `from <= beat < to`.
    pub fn range(&self, from: f64, to: f64) -> &[Event] {
        let start = self.index_at(from);
        let end = self.index_at(to).max(start);
        &self.events[start..end]
    }

    pub fn rates(&self) -> Vec<RatePoint> {
        self.events
            .iter()
            .filter_map(|event| match &event.data {
                EventData::Rate { rate, curve } => Some(RatePoint {
                    beat: event.beat,
                    rate: *rate,
                    curve: curve.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn has_rates(&self) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event.data, EventData::Rate { .. }))
    }
}

impl From<Vec<Event>> for EventList {
    fn from(mut events: Vec<Event>) -> Self {
        events.sort_by(|a, b| a.beat.total_cmp(&b.beat));
        Self { events }
    }
}

impl From<EventList> for Vec<Event> {
    fn from(list: EventList) -> Self {
        list.events
    }
}

impl FromIterator<Event> for EventList {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl<'a> IntoIterator for &'a EventList {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
