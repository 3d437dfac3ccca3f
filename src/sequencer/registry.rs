use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::events::EventList;

/// Named event lists that `sequence` events refer to.
#[derive(Debug, Clone, Default)]
pub struct SequenceRegistry {
    sequences: HashMap<String, Arc<EventList>>,
}

/// Registry handle shared with whoever authors sequences. A reload swaps the
/// whole registry; heads already playing keep the list they started with.
pub type SharedRegistry = Arc<ArcSwap<SequenceRegistry>>;

impl SequenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, events: EventList) {
        self.sequences.insert(id.into(), Arc::new(events));
    }

    pub fn get(&self, id: &str) -> Option<Arc<EventList>> {
        self.sequences.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sequences.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(ArcSwap::from_pointee(self))
    }
}

impl<S: Into<String>> FromIterator<(S, EventList)> for SequenceRegistry {
    fn from_iter<I: IntoIterator<Item = (S, EventList)>>(iter: I) -> Self {
        let mut registry = Self::new();
        for (id, events) in iter {
            registry.insert(id, events);
        }
        registry
    }
}
