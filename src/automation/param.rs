use super::curve::{self, Curve, T60};

#[derive(Debug, Clone, PartialEq)]
pub struct AutomationEvent {
    pub time: f64,
    pub value: f64,
    pub curve: Curve,
    /// Time constant for `Target`, length for `Values`, otherwise unused
    pub duration: f64,
}

impl AutomationEvent {
    pub fn new(time: f64, value: f64, curve: Curve, duration: f64) -> Self {
        Self {
            time,
            value,
            curve,
            duration,
        }
    }
}

/// The scheduled value-over-time of a single parameter.
///
/// Events are kept in time order. Scheduling an event cancels everything at
/// or after its time, holding whatever value the cancelled curve had reached.
#[derive(Debug, Clone, PartialEq)]
pub struct Automation {
    events: Vec<AutomationEvent>,
    base: f64,
    epsilon: f64,
}

impl Automation {
    pub fn new(base: f64) -> Self {
        Self::with_epsilon(base, 1e-9)
    }

    pub fn with_epsilon(base: f64, epsilon: f64) -> Self {
        Self {
            events: Vec::new(),
            base,
            epsilon,
        }
    }

    pub fn events(&self) -> &[AutomationEvent] {
        &self.events
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn value_at_time(&self, time: f64) -> f64 {
        evaluate(&self.events, self.base, self.epsilon, time)
    }

    /// Value the event at `index` starts from, ie. what its curve interpolates
    /// away from.
    pub(crate) fn value_before(&self, index: usize) -> f64 {
        evaluate(
            &self.events[..index],
            self.base,
            self.epsilon,
            self.events[index].time,
        )
    }

    /// Value an event holds at its own time, the start value of any ramp that
    /// follows it.
    pub(crate) fn value_at_event(&self, index: usize) -> f64 {
        let event = &self.events[index];
        match event.curve {
            Curve::Target => self.value_before(index),
            _ => event.value,
        }
    }

    /// Schedules an event, cancelling and holding anything at or after `time`.
    /// Returns the time at which the new curve settles.
    pub fn automate(&mut self, time: f64, curve: Curve, value: f64, duration: f64) -> f64 {
        self.hold(time);

        let curve = match curve {
            Curve::Exponential => {
                let from = self
                    .events
                    .last()
                    .map_or(self.base, |event| event.value);
                if curve::is_degenerate_exponential(from, value, self.epsilon) {
                    Curve::Step
                } else {
                    Curve::Exponential
                }
            }
            curve => curve,
        };

        let value = match &curve {
            Curve::Values(samples) => samples.last().copied().unwrap_or(value),
            _ => value,
        };

        self.events
            .push(AutomationEvent::new(time, value, curve, duration.max(0.0)));
        self.end_time()
    }

    /// Cancel-and-hold: drops every event at or after `time` and, where that
    /// cut through a moving curve, inserts an event that keeps the value the
    /// curve had reached at `time`.
    pub fn hold(&mut self, time: f64) -> f64 {
        let cut = self.events.partition_point(|event| event.time < time);
        if cut == self.events.len() {
            return time;
        }

        let value = self.value_at_time(time);
        let cancelled = self.events[cut].curve.clone();
        self.events.truncate(cut);

        if cancelled.is_ramp() {
            let curve = if cancelled == Curve::Exponential
                && curve::is_degenerate_exponential(
                    self.events.last().map_or(self.base, |event| event.value),
                    value,
                    self.epsilon,
                ) {
                Curve::Step
            } else {
                cancelled
            };
            self.events
                .push(AutomationEvent::new(time, value, curve, 0.0));
        } else if matches!(
            self.events.last().map(|event| &event.curve),
            Some(Curve::Target) | Some(Curve::Values(_))
        ) {
            self.events
                .push(AutomationEvent::new(time, value, Curve::Step, 0.0));
        }

        time
    }

    /// Forgets events that no longer influence values at or after `time`.
    pub fn purge(&mut self, time: f64) {
        let index = self.events.partition_point(|event| event.time <= time);
        if index < 2 {
            return;
        }

        let keep = index - 1;
        self.base = self.value_before(keep);
        self.events.drain(..keep);
    }

    /// Time at which the last scheduled curve reaches its final value.
    pub fn end_time(&self) -> f64 {
        self.events.last().map_or(0.0, |event| {
            event.time
                + match event.curve {
                    Curve::Target => event.duration * T60,
                    Curve::Values(_) => event.duration,
                    _ => 0.0,
                }
        })
    }
}

fn evaluate(events: &[AutomationEvent], base: f64, epsilon: f64, time: f64) -> f64 {
    let index = events.partition_point(|event| event.time <= time);
    if index == 0 {
        return base;
    }

    let n = index - 1;
    let event = &events[n];
    let start = |n: usize| match events[n].curve {
        Curve::Target => evaluate(&events[..n], base, epsilon, events[n].time),
        _ => events[n].value,
    };

    if let Some(next) = events.get(index) {
        match next.curve {
            Curve::Linear => {
                return curve::linear(start(n), next.value, event.time, next.time, time);
            }
            Curve::Exponential => {
                return curve::exponential(
                    start(n),
                    next.value,
                    event.time,
                    next.time,
                    time,
                    epsilon,
                );
            }
            _ => {}
        }
    }

    match &event.curve {
        Curve::Target => curve::target(start(n), event.value, event.time, event.duration, time),
        Curve::Values(samples) => curve::values(samples, event.time, event.duration, time),
        _ => event.value,
    }
}
