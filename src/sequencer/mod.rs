mod command;
mod head;
mod registry;

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thunderdome::Arena;
use tracing::{debug, info, warn};

pub use command::{Command, CommandId, CommandKind, CommandPool};
pub use head::HeadId;
pub use registry::{SequenceRegistry, SharedRegistry};

use crate::automation::Curve;
use crate::config::Config;
use crate::distribute::{TargetRegistry, distribute};
use crate::error::{DispatchError, Error, TimingError};
use crate::events::{Event, EventData, EventList};
use crate::timing::{Frame, Status, Transport};
use head::Head;

/// Heads between the root and the deepest child, root included.
const MAX_DEPTH: usize = 64;

/// What one call into the tree did.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub frame: Option<Frame>,
    /// Commands in dispatch order, including those whose target rejected them
    pub commands: Vec<Command>,
    pub errors: Vec<DispatchError>,
    pub started: Vec<HeadId>,
    pub stopped: Vec<HeadId>,
}

impl FrameReport {
    pub fn dispatched(&self) -> usize {
        self.commands.len()
    }
}

/// The playback tree. A root head reads the main event list against the
/// transport, and `sequence` events spawn child heads reading named lists
/// against their parent's beats.
pub struct Sequencer {
    heads: Arena<Head>,
    root: Option<HeadId>,
    root_events: Arc<EventList>,
    transport: Transport,
    registry: SharedRegistry,
    targets: TargetRegistry,
    pool: CommandPool,
    default_target: String,
    epsilon: f64,
}

impl Sequencer {
    pub fn new(
        config: &Config,
        transport: Transport,
        registry: SharedRegistry,
        targets: TargetRegistry,
        default_target: impl Into<String>,
    ) -> Self {
        Self {
            heads: Arena::new(),
            root: None,
            root_events: Arc::new(EventList::new()),
            transport,
            registry,
            targets,
            pool: CommandPool::new(),
            default_target: default_target.into(),
            epsilon: config.epsilon,
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    pub fn targets(&self) -> &TargetRegistry {
        &self.targets
    }

    pub fn targets_mut(&mut self) -> &mut TargetRegistry {
        &mut self.targets
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventList {
        &self.root_events
    }

    /// Replaces the main event list. A playing root picks it up from its
    /// current position.
    pub fn set_events(&mut self, events: EventList) {
        self.root_events = Arc::new(events);
        if let Some(head) = self.root.and_then(|root| self.heads.get_mut(root.0)) {
            head.events = self.root_events.clone();
            head.refresh_rates(self.epsilon);
            head.resync_latest();
        }
    }

    /// The root head, while it is alive.
    pub fn root(&self) -> Option<HeadId> {
        self.root.filter(|root| self.heads.contains(root.0))
    }

    pub fn is_playing(&self) -> bool {
        self.root().is_some()
    }

    pub fn status(&self, id: HeadId) -> Status {
        self.heads.get(id.0).map_or(Status::Done, |head| head.status)
    }

    pub fn children(&self, id: HeadId) -> &[HeadId] {
        self.heads
            .get(id.0)
            .map(|head| head.children.as_slice())
            .unwrap_or_default()
    }

    pub fn head_count(&self) -> usize {
        self.heads.len()
    }

    /// Commands waiting for the other half of their start/stop pair.
    pub fn commands_in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    pub fn start(&mut self, time: f64) -> Result<HeadId, TimingError> {
        if time < 0.0 {
            return Err(TimingError::Negative("start time", time));
        }
        if let Some(root) = self.root() {
            let location = self.heads[root.0].start_location;
            return Err(TimingError::AlreadyStarted(
                self.transport.time_at_beat(location),
            ));
        }
        if self.transport.status(time) == Status::Idle {
            self.transport.start(time)?;
        }

        let location = self.transport.beat_at_time(time);
        let head = Head::new(
            "root",
            self.root_events.clone(),
            None,
            location,
            None,
            self.default_target.clone(),
            self.epsilon,
        );
        let root = HeadId(self.heads.insert(head));
        self.root = Some(root);
        info!(time, beat = location, "sequencer start");
        Ok(root)
    }

    /// Stops the root head and the transport. Stopping twice does nothing.
    pub fn stop(&mut self, time: f64) -> Result<FrameReport, TimingError> {
        let Some(root) = self.root else {
            return Err(TimingError::NotStarted);
        };
        if !self.heads.contains(root.0) {
            return Ok(FrameReport::default());
        }

        let report = self.stop_head(root, time)?;
        self.transport.stop(time)?;
        Ok(report)
    }

    /// Schedules `id` to stop at `time`. If that point has already been read
    /// the head is stopped right away at its read position, flushing any notes
    /// still held so none are left hanging.
    pub fn stop_head(&mut self, id: HeadId, time: f64) -> Result<FrameReport, TimingError> {
        let Some(location) = self.parent_beat_at_time(id, time) else {
            return Ok(FrameReport::default());
        };
        let current = self.transport.current_time();
        if time < current {
            return Err(TimingError::StopBeforePosition {
                stop: time,
                current,
            });
        }

        let head = &self.heads[id.0];
        if head.stop_location.is_some_and(|stop| stop <= location) {
            return Ok(FrameReport::default());
        }

        let cursor = head.cursor;
        if location <= head.location_at_beat(cursor) {
            let at = self.time_at_local_beat(id, cursor).unwrap_or(time);
            let mut report = FrameReport::default();
            let mut due = Vec::new();
            self.finish(id, at, &mut due, &mut report);
            self.dispatch(due, &mut report);
            return Ok(report);
        }

        self.heads[id.0].stop_location = Some(location);
        debug!(head = %self.heads[id.0].name, time, location, "stop scheduled");
        Ok(FrameReport::default())
    }

    /// Inserts `event` into the list of head `id` at the beat playing at
    /// `time`. The head gets its own copy of a shared list.
    pub fn record(&mut self, id: HeadId, time: f64, event: Event) -> Result<(), Error> {
        event.validate()?;
        let beat = self
            .local_beat_at_time(id, time)
            .ok_or(TimingError::UnknownHead)?
            .max(0.0);

        let is_root = self.root() == Some(id);
        let head = &mut self.heads[id.0];
        let is_rate = matches!(event.data, EventData::Rate { .. });
        let is_param = matches!(event.data, EventData::Param { .. });
        head.events_mut().insert(Event::new(beat, event.data));
        if is_rate {
            head.refresh_rates(self.epsilon);
        }
        if is_param {
            head.resync_latest();
        }
        if is_root {
            self.root_events = head.events.clone();
        }
        Ok(())
    }

    pub fn beat_at_time(&self, id: HeadId, time: f64) -> Result<f64, TimingError> {
        self.local_beat_at_time(id, time)
            .ok_or(TimingError::UnknownHead)
    }

    pub fn time_at_beat(&self, id: HeadId, beat: f64) -> Result<f64, TimingError> {
        self.time_at_local_beat(id, beat)
            .ok_or(TimingError::UnknownHead)
    }

    /// Reads every head for the window `[t1, t2)` and dispatches what fell due.
    pub fn frame(&mut self, frame: Frame) -> FrameReport {
        self.transport.advance(frame.t1);
        let mut report = FrameReport {
            frame: Some(frame),
            ..FrameReport::default()
        };
        let Some(root) = self.root() else {
            return report;
        };

        let mut due = Vec::new();
        let location = self.transport.beat_at_time(frame.t2);
        self.process_head(root, location, &mut due, &mut report);
        self.dispatch(due, &mut report);

        debug!(
            t1 = frame.t1,
            t2 = frame.t2,
            commands = report.commands.len(),
            "frame"
        );
        report
    }

    fn parent_beat_at_time(&self, id: HeadId, time: f64) -> Option<f64> {
        match self.heads.get(id.0)?.parent {
            Some(parent) => self.local_beat_at_time(parent, time),
            None => Some(self.transport.beat_at_time(time)),
        }
    }

    fn local_beat_at_time(&self, id: HeadId, time: f64) -> Option<f64> {
        let mut path = vec![id];
        let mut current = self.heads.get(id.0)?;
        while let Some(parent) = current.parent {
            path.push(parent);
            current = self.heads.get(parent.0)?;
        }

        let mut beat = self.transport.beat_at_time(time);
        for id in path.iter().rev() {
            beat = self.heads.get(id.0)?.beat_at_location(beat);
        }
        Some(beat)
    }

    fn time_at_local_beat(&self, mut id: HeadId, mut beat: f64) -> Option<f64> {
        loop {
            let head = self.heads.get(id.0)?;
            let location = head.location_at_beat(beat);
            match head.parent {
                Some(parent) => {
                    id = parent;
                    beat = location;
                }
                None => return Some(self.transport.time_at_beat(location)),
            }
        }
    }

    /// Refuses a child that would restart an ancestor playing the same
    /// sequence from the same moment, or that nests past `MAX_DEPTH`.
    fn nesting_error(&self, parent: HeadId, sequence: &str, beat: f64) -> Option<DispatchError> {
        let time = self.time_at_local_beat(parent, beat)?;
        let mut depth = 0;
        let mut current = Some(parent);
        while let Some(id) = current {
            let head = self.heads.get(id.0)?;
            if let Some(grandparent) = head.parent.filter(|_| head.name == sequence) {
                let start = self.time_at_local_beat(grandparent, head.start_location)?;
                if (start - time).abs() <= self.epsilon {
                    return Some(DispatchError::Recursive(sequence.to_string()));
                }
            }
            depth += 1;
            current = head.parent;
        }
        (depth >= MAX_DEPTH).then(|| DispatchError::TooDeep {
            sequence: sequence.to_string(),
            depth,
        })
    }

    fn acquire(&mut self, id: HeadId, beat: f64, target: &str, kind: CommandKind) -> CommandId {
        let time = self.time_at_local_beat(id, beat).unwrap_or(f64::NAN);
        self.pool.acquire(Command::new(beat, time, target, kind))
    }

    fn process_head(
        &mut self,
        id: HeadId,
        parent_end: f64,
        due: &mut Vec<CommandId>,
        report: &mut FrameReport,
    ) {
        let Some(head) = self.heads.get_mut(id.0) else {
            return;
        };
        if parent_end <= head.start_location {
            return;
        }
        if head.status == Status::Cued {
            head.status = Status::Playing;
            report.started.push(id);
            info!(head = %head.name, "head start");
        }

        let stopping = head.stop_location.is_some_and(|stop| parent_end >= stop);
        let end = head
            .stop_location
            .map_or(parent_end, |stop| stop.min(parent_end));
        let from = head.cursor;
        let to = head.beat_at_location(end).max(from);
        let stop_beat = head.stop_location.map(|stop| head.beat_at_location(stop));
        let events = head.events.clone();
        let target = head.target.clone();
        let is_root = head.parent.is_none();
        let mut latest = std::mem::take(&mut head.latest);
        let mut pending = std::mem::take(&mut head.pending_stops);
        head.cursor = to;

        let window = events.range(from, to);
        let mut last_param: HashMap<&str, usize> = HashMap::new();
        for (index, event) in window.iter().enumerate() {
            if let EventData::Param { name, .. } = &event.data {
                last_param.insert(name, index);
            }
        }

        let mut spawned = Vec::new();
        for (index, event) in window.iter().enumerate() {
            match &event.data {
                EventData::Rate { .. } => {}
                EventData::Meter {
                    numerator,
                    denominator,
                } => {
                    if is_root {
                        let location = self.heads[id.0].location_at_beat(event.beat);
                        self.transport
                            .insert_meter(location, *numerator, *denominator);
                    } else {
                        debug!(beat = event.beat, "meter ignored outside the root head");
                    }
                }
                EventData::Param {
                    name,
                    value,
                    curve,
                    duration,
                } => {
                    if last_param.get(name.as_str()) != Some(&index) {
                        continue;
                    }
                    if latest.get(name).is_some_and(|&sent| sent >= event.beat) {
                        continue;
                    }
                    latest.insert(name.clone(), event.beat);
                    due.push(self.acquire(
                        id,
                        event.beat,
                        &target,
                        CommandKind::Automate {
                            name: name.clone(),
                            value: *value,
                            curve: curve.clone(),
                            duration: *duration,
                        },
                    ));
                }
                EventData::Note {
                    id: note,
                    value,
                    duration,
                } => {
                    let start = self.acquire(
                        id,
                        event.beat,
                        &target,
                        CommandKind::Start {
                            id: note.clone(),
                            value: *value,
                        },
                    );
                    let stop_at = event.beat + duration;
                    let stop = self.acquire(
                        id,
                        stop_at,
                        &target,
                        CommandKind::Stop {
                            id: note.clone(),
                            value: None,
                        },
                    );
                    if let Some(command) = self.pool.get_mut(start) {
                        command.pair = Some(stop);
                    }
                    if let Some(command) = self.pool.get_mut(stop) {
                        command.pair = Some(start);
                    }
                    due.push(start);
                    if stop_at < to {
                        due.push(stop);
                    } else {
                        pending.push(stop);
                    }
                }
                EventData::Start { id: key, value } => {
                    due.push(self.acquire(
                        id,
                        event.beat,
                        &target,
                        CommandKind::Start {
                            id: key.clone(),
                            value: *value,
                        },
                    ));
                }
                EventData::Stop { id: key, value } => {
                    due.push(self.acquire(
                        id,
                        event.beat,
                        &target,
                        CommandKind::Stop {
                            id: key.clone(),
                            value: *value,
                        },
                    ));
                }
                EventData::Log { text } => {
                    due.push(self.acquire(
                        id,
                        event.beat,
                        &target,
                        CommandKind::Log { text: text.clone() },
                    ));
                }
                EventData::Sequence {
                    id: sequence,
                    target: child_target,
                    duration,
                } => {
                    if let Some(error) = self.nesting_error(id, sequence, event.beat) {
                        warn!(beat = event.beat, "{error}");
                        report.errors.push(error);
                        continue;
                    }
                    let Some(list) = self.registry.load().get(sequence) else {
                        let error = DispatchError::MissingSequence(sequence.clone());
                        warn!(beat = event.beat, "{error}");
                        report.errors.push(error);
                        continue;
                    };
                    let child = Head::new(
                        sequence.clone(),
                        list,
                        Some(id),
                        event.beat,
                        Some(event.beat + duration),
                        child_target.clone().unwrap_or_else(|| target.clone()),
                        self.epsilon,
                    );
                    spawned.push(HeadId(self.heads.insert(child)));
                }
            }
        }

        // Exponential ramps have to reach the target before they begin, so
        // the next one per parameter is sent as soon as it is seen.
        let ahead = &events.as_slice()[events.index_at(to)..];
        let mut seen = HashSet::new();
        for event in ahead {
            if stop_beat.is_some_and(|stop| event.beat >= stop) {
                break;
            }
            let EventData::Param {
                name,
                value,
                curve,
                duration,
            } = &event.data
            else {
                continue;
            };
            if !seen.insert(name.as_str()) || *curve != Curve::Exponential {
                continue;
            }
            if latest.get(name).is_none_or(|&sent| sent < event.beat) {
                latest.insert(name.clone(), event.beat);
                due.push(self.acquire(
                    id,
                    event.beat,
                    &target,
                    CommandKind::Automate {
                        name: name.clone(),
                        value: *value,
                        curve: curve.clone(),
                        duration: *duration,
                    },
                ));
            }
        }

        let mut held = Vec::with_capacity(pending.len());
        for stop in pending {
            let beat = self.pool.get(stop).map_or(f64::NEG_INFINITY, |c| c.beat);
            if beat < to {
                let time = self.time_at_local_beat(id, beat).unwrap_or(f64::NAN);
                if let Some(command) = self.pool.get_mut(stop) {
                    command.time = time;
                }
                due.push(stop);
            } else {
                held.push(stop);
            }
        }

        let head = &mut self.heads[id.0];
        head.latest = latest;
        head.pending_stops = held;
        head.children.extend(spawned);
        let children = head.children.clone();

        for child in children {
            self.process_head(child, to, due, report);
        }

        if stopping {
            let at = self.time_at_local_beat(id, to).unwrap_or(f64::NAN);
            self.finish(id, at, due, report);
        }
    }

    /// Stops `id` and its subtree at `time`, firing held note stops, and
    /// removes it from the tree.
    fn finish(
        &mut self,
        id: HeadId,
        time: f64,
        due: &mut Vec<CommandId>,
        report: &mut FrameReport,
    ) {
        let Some(head) = self.heads.get_mut(id.0) else {
            return;
        };
        let pending = std::mem::take(&mut head.pending_stops);
        let children = std::mem::take(&mut head.children);
        let parent = head.parent;

        for stop in pending {
            let scheduled = self
                .pool
                .get(stop)
                .and_then(|command| self.time_at_local_beat(id, command.beat))
                .unwrap_or(time);
            if let Some(command) = self.pool.get_mut(stop) {
                command.time = scheduled.min(time);
            }
            due.push(stop);
        }

        for child in children {
            self.finish(child, time, due, report);
        }

        if let Some(parent) = parent.and_then(|parent| self.heads.get_mut(parent.0)) {
            parent.children.retain(|child| *child != id);
        }
        if let Some(head) = self.heads.remove(id.0) {
            info!(head = %head.name, time, "head stop");
        }
        report.stopped.push(id);
    }

    fn dispatch(&mut self, mut due: Vec<CommandId>, report: &mut FrameReport) {
        let pool = &self.pool;
        due.sort_by(|a, b| match (pool.get(*a), pool.get(*b)) {
            (Some(a), Some(b)) => a
                .time
                .total_cmp(&b.time)
                .then_with(|| b.is_stop().cmp(&a.is_stop())),
            _ => Ordering::Equal,
        });

        for id in due {
            let Some(command) = self.pool.get(id) else {
                continue;
            };
            let pair = command.pair;
            let is_stop = command.is_stop();
            if is_stop {
                let handle = pair
                    .and_then(|start| self.pool.get(start))
                    .and_then(Command::handle);
                if let Some(command) = self.pool.get_mut(id) {
                    command.handle = handle;
                }
            }

            let Some(command) = self.pool.get(id) else {
                continue;
            };
            match distribute(command, &self.targets) {
                Ok(Some(handle)) => {
                    if let Some(command) = self.pool.get_mut(id) {
                        command.handle = Some(handle);
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(time = command.time, "dropped command: {error}");
                    report.errors.push(error);
                }
            }

            if let Some(command) = self.pool.get(id) {
                report.commands.push(command.clone());
            }

            if is_stop {
                if let Some(start) = pair {
                    self.pool.release(start);
                }
                self.pool.release(id);
            } else if pair.is_none() {
                self.pool.release(id);
            }
        }
    }
}
