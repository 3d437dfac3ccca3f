use std::collections::HashMap;
use std::sync::Arc;
use thunderdome::Index;

use super::command::CommandId;
use crate::events::{EventData, EventList};
use crate::timing::{RateMap, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeadId(pub(crate) Index);

/// One node of the playback tree.
///
/// Positions come in two units: locations are beats of the parent (or of the
/// transport for the root), beats are this head's own event list beats.
#[derive(Debug)]
pub(crate) struct Head {
    pub(crate) name: String,
    pub(crate) events: Arc<EventList>,
    pub(crate) rates: RateMap,
    /// Lookup only, parents own their children
    pub(crate) parent: Option<HeadId>,
    pub(crate) children: Vec<HeadId>,
    pub(crate) start_location: f64,
    pub(crate) stop_location: Option<f64>,
    /// Everything before this beat has been read
    pub(crate) cursor: f64,
    pub(crate) pending_stops: Vec<CommandId>,
    /// Beat of the last automation sent per parameter
    pub(crate) latest: HashMap<String, f64>,
    pub(crate) status: Status,
    pub(crate) target: String,
}

impl Head {
    pub(crate) fn new(
        name: impl Into<String>,
        events: Arc<EventList>,
        parent: Option<HeadId>,
        start_location: f64,
        stop_location: Option<f64>,
        target: impl Into<String>,
        epsilon: f64,
    ) -> Self {
        let mut head = Self {
            name: name.into(),
            events,
            rates: RateMap::default(),
            parent,
            children: Vec::new(),
            start_location,
            stop_location,
            cursor: 0.0,
            pending_stops: Vec::new(),
            latest: HashMap::new(),
            status: Status::Cued,
            target: target.into(),
        };
        head.refresh_rates(epsilon);
        head
    }

    pub(crate) fn refresh_rates(&mut self, epsilon: f64) {
        self.rates = if self.events.has_rates() {
            RateMap::from_rates(&self.events.rates(), epsilon)
        } else {
            RateMap::default()
        };
    }

    pub(crate) fn events_mut(&mut self) -> &mut EventList {
        Arc::make_mut(&mut self.events)
    }

    /// Forgets parameters sent ahead of the cursor whose next event in the
    /// list is no longer the one that was sent, so edits before it still play.
    pub(crate) fn resync_latest(&mut self) {
        let cursor = self.cursor;
        let ahead = &self.events.as_slice()[self.events.index_at(cursor)..];
        self.latest.retain(|name, sent| {
            *sent < cursor
                || ahead
                    .iter()
                    .find(|event| {
                        matches!(&event.data, EventData::Param { name: next, .. } if next == name)
                    })
                    .is_some_and(|event| event.beat == *sent)
        });
    }

    pub(crate) fn beat_at_location(&self, location: f64) -> f64 {
        self.rates.beat_at(location - self.start_location)
    }

    pub(crate) fn location_at_beat(&self, beat: f64) -> f64 {
        self.start_location + self.rates.location_at(beat)
    }
}
