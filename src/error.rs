use thiserror::Error;

use crate::events::EventType;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventError {
    #[error("Empty event")]
    Empty,
    #[error("Event beat must be a non-negative number, got {0}")]
    InvalidBeat(String),
    #[error("Unknown event type \"{0}\"")]
    UnknownType(String),
    #[error("Invalid \"{kind}\" event. {}", .kind.hint())]
    Arity { kind: EventType, found: usize },
    #[error("Invalid \"{kind}\" event, slot {slot}: {reason}. {}", .kind.hint())]
    Slot {
        kind: EventType,
        slot: usize,
        reason: &'static str,
    },
    #[error("Unknown curve \"{0}\"")]
    UnknownCurve(String),
    #[error("\"{kind}\" events cannot be recorded into {by}")]
    NotAccepted { kind: EventType, by: &'static str },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimingError {
    #[error("invalid stop time {stop:.3} before current position {current:.3}")]
    StopBeforePosition { stop: f64, current: f64 },
    #[error("cannot start, already started at {0:.3}")]
    AlreadyStarted(f64),
    #[error("cannot stop, not started")]
    NotStarted,
    #[error("{0} does not accept negative values, got {1}")]
    Negative(&'static str, f64),
    #[error("{0} must be positive, got {1}")]
    NotPositive(&'static str, f64),
    #[error("unknown head")]
    UnknownHead,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("target {target} has no \"{capability}\" capability")]
    MissingCapability {
        target: String,
        capability: &'static str,
    },
    #[error("target {target} has no parameter \"{name}\"")]
    MissingParam { target: String, name: String },
    #[error("unknown target \"{0}\"")]
    UnknownTarget(String),
    #[error("sequence \"{0}\" not found")]
    MissingSequence(String),
    #[error("sequence \"{0}\" would start inside itself at the same moment")]
    Recursive(String),
    #[error("sequence \"{sequence}\" nested {depth} deep")]
    TooDeep { sequence: String, depth: usize },
}

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("serialize error: {0}")]
    Serialize(#[from] ron::Error),
}

/// Failure reported by a `Target` implementation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TargetError {
    #[error("no \"{0}\" capability")]
    Unsupported(&'static str),
    #[error("no parameter \"{0}\"")]
    UnknownParam(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Event(#[from] EventError),
    #[error(transparent)]
    Timing(#[from] TimingError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Project(#[from] ProjectError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
