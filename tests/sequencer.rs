use beatline::{
    Config, Curve, DispatchError, Error, Event, EventError, EventList, FrameReport,
    FrameScheduler, Handle, SequenceRegistry, Sequencer, Status, Target, TargetError,
    TargetRegistry, TimingError, Transport, Value,
};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Start {
        time: f64,
        id: Value,
    },
    Stop {
        time: f64,
        id: Value,
        handle: Option<Handle>,
    },
    Automate {
        name: String,
        time: f64,
        value: f64,
        curve: Curve,
    },
}

type Calls = Arc<Mutex<Vec<Call>>>;

struct Recorder {
    calls: Calls,
    next_handle: u64,
}

impl Target for Recorder {
    fn start(&mut self, time: f64, id: &Value, _value: f64) -> Result<Handle, TargetError> {
        self.next_handle += 1;
        self.calls.lock().push(Call::Start {
            time,
            id: id.clone(),
        });
        Ok(Handle(self.next_handle))
    }

    fn stop(
        &mut self,
        time: f64,
        id: &Value,
        _value: Option<f64>,
        handle: Option<Handle>,
    ) -> Result<(), TargetError> {
        self.calls.lock().push(Call::Stop {
            time,
            id: id.clone(),
            handle,
        });
        Ok(())
    }

    fn automate(
        &mut self,
        name: &str,
        time: f64,
        curve: &Curve,
        value: f64,
        _duration: f64,
    ) -> Result<(), TargetError> {
        self.calls.lock().push(Call::Automate {
            name: name.to_string(),
            time,
            value,
            curve: curve.clone(),
        });
        Ok(())
    }
}

/// Accepts nothing.
struct Deaf;

impl Target for Deaf {}

fn sequencer(events: Vec<Event>, sequences: Vec<(&str, Vec<Event>)>) -> (Sequencer, Calls) {
    let config = Config::default();
    let calls = Calls::default();
    let mut targets = TargetRegistry::new();
    targets.insert(
        "synth",
        Recorder {
            calls: calls.clone(),
            next_handle: 0,
        },
    );
    targets.insert("deaf", Deaf);

    let registry: SequenceRegistry = sequences
        .into_iter()
        .map(|(id, events)| (id, EventList::from(events)))
        .collect();
    let mut sequencer = Sequencer::new(
        &config,
        Transport::new(&config),
        registry.into_shared(),
        targets,
        "synth",
    );
    sequencer.set_events(events.into());
    (sequencer, calls)
}

/// Drives frames from a simulated clock ticking every 0.12 s.
struct Clock {
    frames: FrameScheduler,
    now: f64,
}

impl Clock {
    fn start() -> Self {
        let mut frames = FrameScheduler::new(&Config::default());
        frames.listen();
        frames.start(0.0);
        Self { frames, now: 0.0 }
    }

    fn step(&mut self, sequencer: &mut Sequencer) -> FrameReport {
        let report = match self.frames.next_frame(self.now) {
            Some(frame) => sequencer.frame(frame),
            None => FrameReport::default(),
        };
        self.now += 0.12;
        report
    }

    fn run_until(&mut self, sequencer: &mut Sequencer, until: f64) -> Vec<FrameReport> {
        let mut reports = Vec::new();
        while self.now <= until {
            reports.push(self.step(sequencer));
        }
        reports
    }
}

fn assert_close(a: f64, b: f64) {
    assert!((a - b).abs() < 1e-9, "{a} != {b}");
}

#[test]
fn note_start_and_stop_times() {
    let (mut sequencer, calls) = sequencer(vec![Event::note(1.0, "C4", 1.0, 2.0)], vec![]);
    sequencer.start(0.0).unwrap();
    Clock::start().run_until(&mut sequencer, 3.0);

    let calls = calls.lock();
    assert_eq!(calls.len(), 2);
    match (&calls[0], &calls[1]) {
        (Call::Start { time: start, id }, Call::Stop { time: stop, handle, .. }) => {
            assert_eq!(*id, Value::from("C4"));
            assert_close(*start, 0.5);
            assert_close(*stop, 1.5);
            assert_eq!(*handle, Some(Handle(1)));
        }
        other => panic!("unexpected calls {other:?}"),
    }
    assert_eq!(sequencer.commands_in_flight(), 0);
}

#[test]
fn note_stop_is_carried_to_a_later_frame() {
    let (mut sequencer, calls) = sequencer(vec![Event::note(1.0, "C4", 1.0, 2.0)], vec![]);
    sequencer.start(0.0).unwrap();
    let mut clock = Clock::start();
    clock.run_until(&mut sequencer, 0.3);

    assert_eq!(calls.lock().len(), 1);
    assert_eq!(sequencer.commands_in_flight(), 2);
}

#[test]
fn scheduled_stop_flushes_held_notes() {
    let (mut sequencer, calls) = sequencer(vec![Event::note(0.0, "A", 1.0, 8.0)], vec![]);
    let root = sequencer.start(0.0).unwrap();
    let mut clock = Clock::start();
    clock.run_until(&mut sequencer, 0.5);

    sequencer.stop(2.0).unwrap();
    assert_eq!(sequencer.status(root), Status::Playing);
    clock.run_until(&mut sequencer, 3.0);

    let calls = calls.lock();
    assert!(matches!(calls.last(), Some(Call::Stop { time, .. }) if (time - 2.0).abs() < 1e-9));
    assert_eq!(sequencer.status(root), Status::Done);
    assert_eq!(sequencer.commands_in_flight(), 0);
}

#[test]
fn stopping_inside_the_read_window_finishes_at_once() {
    let (mut sequencer, calls) = sequencer(vec![Event::note(0.0, "A", 1.0, 8.0)], vec![]);
    let root = sequencer.start(0.0).unwrap();
    let mut clock = Clock::start();
    clock.run_until(&mut sequencer, 0.5);

    let now = sequencer.transport().current_time();
    let report = sequencer.stop(now).unwrap();
    assert_eq!(report.stopped, vec![root]);
    assert_eq!(report.commands.len(), 1);
    assert!(report.commands[0].is_stop());
    assert!(report.commands[0].time >= now);
    assert_eq!(calls.lock().len(), 2);
    assert_eq!(sequencer.commands_in_flight(), 0);
}

#[test]
fn stop_twice_is_a_no_op() {
    let (mut sequencer, calls) = sequencer(vec![Event::note(0.0, "A", 1.0, 8.0)], vec![]);
    sequencer.start(0.0).unwrap();
    let mut clock = Clock::start();
    clock.run_until(&mut sequencer, 0.5);

    let now = sequencer.transport().current_time();
    sequencer.stop(now).unwrap();
    let count = calls.lock().len();

    let second = sequencer.stop(now).unwrap();
    assert!(second.commands.is_empty());
    clock.run_until(&mut sequencer, 2.0);
    let third = sequencer.stop(0.0).unwrap();
    assert!(third.commands.is_empty());
    assert_eq!(calls.lock().len(), count);
}

#[test]
fn stop_before_position_is_rejected() {
    let (mut sequencer, _) = sequencer(vec![], vec![]);
    assert_eq!(sequencer.stop(1.0).unwrap_err(), TimingError::NotStarted);

    let root = sequencer.start(0.0).unwrap();
    Clock::start().run_until(&mut sequencer, 1.0);
    assert!(matches!(
        sequencer.stop(0.1),
        Err(TimingError::StopBeforePosition { .. })
    ));
    assert_eq!(sequencer.status(root), Status::Playing);
}

#[test]
fn starting_twice_is_rejected() {
    let (mut sequencer, _) = sequencer(vec![], vec![]);
    sequencer.start(0.0).unwrap();
    assert!(matches!(
        sequencer.start(1.0),
        Err(TimingError::AlreadyStarted(_))
    ));
}

#[test]
fn tempo_change_reaches_child_heads() {
    let loop_events = vec![Event::note(2.0, "x", 1.0, 1.0)];
    let (mut sequencer, calls) = sequencer(
        vec![Event::sequence(0.0, "loop", None, 16.0)],
        vec![("loop", loop_events.clone())],
    );
    let root = sequencer.start(0.0).unwrap();
    let mut clock = Clock::start();
    let first = clock.step(&mut sequencer);
    assert_eq!(first.started.len(), 2);
    assert_eq!(sequencer.children(root).len(), 1);

    // half speed from beat 1 on
    sequencer.transport_mut().set_tempo(0.5, 60.0).unwrap();
    clock.run_until(&mut sequencer, 3.0);

    let calls = calls.lock();
    match calls.first() {
        Some(Call::Start { time, .. }) => assert_close(*time, 1.5),
        other => panic!("unexpected {other:?}"),
    }
    let registry = sequencer.registry().load();
    assert_eq!(registry.get("loop").map(|list| list.len()), Some(loop_events.len()));
}

#[test]
fn child_rate_scales_its_events() {
    let (mut sequencer, calls) = sequencer(
        vec![Event::sequence(1.0, "fast", None, 4.0)],
        vec![(
            "fast",
            vec![
                Event::rate(0.0, 2.0, Curve::Step),
                Event::note(2.0, "x", 1.0, 2.0),
            ],
        )],
    );
    sequencer.start(0.0).unwrap();
    Clock::start().run_until(&mut sequencer, 4.0);

    // local beat 2 is parent beat 2, local beat 4 is parent beat 3
    let calls = calls.lock();
    assert_eq!(calls.len(), 2);
    assert!(matches!(calls[0], Call::Start { time, .. } if (time - 1.0).abs() < 1e-9));
    assert!(matches!(calls[1], Call::Stop { time, .. } if (time - 1.5).abs() < 1e-9));
}

#[test]
fn child_heads_end_with_their_duration() {
    let (mut sequencer, calls) = sequencer(
        vec![Event::sequence(0.0, "loop", None, 2.0)],
        vec![("loop", vec![Event::note(1.0, "held", 1.0, 10.0)])],
    );
    let root = sequencer.start(0.0).unwrap();
    let mut clock = Clock::start();
    let reports = clock.run_until(&mut sequencer, 2.0);

    let child = reports[0].started[1];
    assert_eq!(sequencer.status(child), Status::Done);
    assert!(sequencer.children(root).is_empty());
    assert_eq!(sequencer.head_count(), 1);

    // the held note is cut at the end of the child, beat 2
    let calls = calls.lock();
    assert!(matches!(calls.last(), Some(Call::Stop { time, .. }) if (time - 1.0).abs() < 1e-9));
    assert_eq!(sequencer.commands_in_flight(), 0);
}

#[test]
fn sequence_starting_itself_is_refused() {
    let (mut sequencer, calls) = sequencer(
        vec![Event::sequence(0.0, "a", None, 4.0)],
        vec![(
            "a",
            vec![
                Event::sequence(0.0, "a", None, 4.0),
                Event::note(0.25, "x", 1.0, 0.1),
            ],
        )],
    );
    sequencer.start(0.0).unwrap();
    let report = Clock::start().step(&mut sequencer);

    assert_eq!(report.errors, vec![DispatchError::Recursive("a".to_string())]);
    assert_eq!(sequencer.head_count(), 2);
    assert_eq!(calls.lock().len(), 2);
}

#[test]
fn nesting_is_capped() {
    // every level runs faster than its parent, so all of them start within
    // the first frame without ever lining up
    let (mut sequencer, _calls) = sequencer(
        vec![Event::sequence(0.0, "a", None, 4.0)],
        vec![(
            "a",
            vec![
                Event::rate(0.0, 1.25, Curve::Step),
                Event::sequence(0.1, "a", None, 4.0),
            ],
        )],
    );
    sequencer.start(0.0).unwrap();
    let report = Clock::start().step(&mut sequencer);

    assert_eq!(
        report.errors,
        vec![DispatchError::TooDeep {
            sequence: "a".to_string(),
            depth: 64,
        }]
    );
    assert_eq!(sequencer.head_count(), 64);
}

#[test]
fn only_the_root_sets_meters() {
    let (mut sequencer, _calls) = sequencer(
        vec![
            Event::meter(0.5, 3, 1),
            Event::sequence(0.0, "inner", None, 4.0),
        ],
        vec![("inner", vec![Event::meter(0.0, 7, 1)])],
    );
    sequencer.start(0.0).unwrap();
    Clock::start().step(&mut sequencer);

    let transport = sequencer.transport();
    assert_eq!(transport.meter_at_beat(0.0).numerator, 4);
    assert_eq!(transport.meter_at_beat(1.0).numerator, 3);
}

#[test]
fn one_automation_per_parameter_per_frame() {
    let (mut sequencer, calls) = sequencer(
        vec![
            Event::param(0.0, "gain", 0.1, Curve::Step, 0.0),
            Event::param(0.1, "gain", 0.2, Curve::Step, 0.0),
            Event::param(0.2, "gain", 0.3, Curve::Step, 0.0),
            Event::param(0.2, "pan", 1.0, Curve::Step, 0.0),
        ],
        vec![],
    );
    sequencer.start(0.0).unwrap();
    Clock::start().step(&mut sequencer);

    let calls = calls.lock();
    assert_eq!(
        *calls,
        vec![
            Call::Automate {
                name: "gain".to_string(),
                time: 0.1,
                value: 0.3,
                curve: Curve::Step,
            },
            Call::Automate {
                name: "pan".to_string(),
                time: 0.1,
                value: 1.0,
                curve: Curve::Step,
            },
        ]
    );
}

#[test]
fn exponential_ramps_are_sent_ahead() {
    let (mut sequencer, calls) = sequencer(
        vec![
            Event::param(0.0, "cutoff", 100.0, Curve::Step, 0.0),
            Event::param(8.0, "cutoff", 1000.0, Curve::Exponential, 0.0),
        ],
        vec![],
    );
    sequencer.start(0.0).unwrap();
    let mut clock = Clock::start();
    let first = clock.step(&mut sequencer);
    assert_eq!(first.commands.len(), 2);
    assert_close(first.commands[1].time, 4.0);

    clock.run_until(&mut sequencer, 5.0);
    assert_eq!(calls.lock().len(), 2);
}

#[test]
fn recorded_param_before_a_sent_ramp_still_plays() {
    let (mut sequencer, calls) = sequencer(
        vec![
            Event::param(0.0, "gain", 1.0, Curve::Step, 0.0),
            Event::param(8.0, "gain", 4.0, Curve::Exponential, 0.0),
        ],
        vec![],
    );
    let root = sequencer.start(0.0).unwrap();
    let mut clock = Clock::start();
    clock.step(&mut sequencer);
    sequencer
        .record(root, 2.0, Event::param(0.0, "gain", 0.5, Curve::Step, 0.0))
        .unwrap();
    clock.run_until(&mut sequencer, 5.0);

    let calls = calls.lock();
    let sent: Vec<(f64, f64)> = calls
        .iter()
        .filter_map(|call| match call {
            Call::Automate { time, value, .. } => Some((*time, *value)),
            _ => None,
        })
        .collect();
    assert_eq!(sent.len(), 4, "{sent:?}");
    assert_close(sent[2].0, 2.0);
    assert_eq!(sent[2].1, 0.5);
    // the ramp was cancelled by the step, so it goes out again
    assert_close(sent[3].0, 4.0);
    assert_eq!(sent[3].1, 4.0);
}

#[test]
fn missing_sequence_only_drops_that_event() {
    let (mut sequencer, calls) = sequencer(
        vec![
            Event::sequence(0.0, "nope", None, 4.0),
            Event::note(0.0, "A", 1.0, 0.5),
        ],
        vec![],
    );
    sequencer.start(0.0).unwrap();
    let report = Clock::start().step(&mut sequencer);

    assert_eq!(
        report.errors,
        vec![DispatchError::MissingSequence("nope".to_string())]
    );
    assert_eq!(calls.lock().len(), 2);
}

#[test]
fn missing_capability_is_reported_and_skipped() {
    let (mut sequencer, calls) = sequencer(
        vec![
            Event::sequence(0.0, "quiet", Some("deaf"), 4.0),
            Event::note(0.25, "A", 1.0, 0.25),
        ],
        vec![("quiet", vec![Event::note(0.0, "B", 1.0, 0.25)])],
    );
    sequencer.start(0.0).unwrap();
    let report = Clock::start().step(&mut sequencer);

    assert_eq!(report.errors.len(), 2);
    assert!(report.errors.iter().all(|error| matches!(
        error,
        DispatchError::MissingCapability { target, .. } if target == "deaf"
    )));
    assert_eq!(calls.lock().len(), 2);
    assert_eq!(sequencer.commands_in_flight(), 0);
}

#[test]
fn malformed_records_are_rejected() {
    let (mut sequencer, _) = sequencer(vec![], vec![]);
    let root = sequencer.start(0.0).unwrap();
    let error = sequencer
        .record(root, 0.0, Event::note(0.0, "A", 1.0, -1.0))
        .unwrap_err();
    assert!(matches!(error, Error::Event(EventError::Slot { slot: 4, .. })));
    assert!(sequencer.events().is_empty());
}

#[test]
fn recorded_notes_play() {
    let (mut sequencer, calls) = sequencer(vec![], vec![]);
    let root = sequencer.start(0.0).unwrap();
    sequencer
        .record(root, 1.0, Event::note(0.0, "A", 1.0, 1.0))
        .unwrap();
    assert_eq!(sequencer.events().as_slice()[0].beat, 2.0);

    Clock::start().run_until(&mut sequencer, 2.0);
    let calls = calls.lock();
    assert!(matches!(calls[0], Call::Start { time, .. } if (time - 1.0).abs() < 1e-9));
}

#[test]
fn commands_are_recycled() {
    let notes = (0..32)
        .map(|beat| Event::note(beat as f64 * 0.5, "n", 1.0, 0.75))
        .collect();
    let (mut sequencer, calls) = sequencer(notes, vec![]);
    sequencer.start(0.0).unwrap();
    let mut clock = Clock::start();
    clock.run_until(&mut sequencer, 3.0);
    assert!(sequencer.commands_in_flight() <= 4);

    clock.run_until(&mut sequencer, 10.0);
    assert_eq!(sequencer.commands_in_flight(), 0);
    assert_eq!(calls.lock().len(), 64);
}

#[test]
fn stops_go_before_starts_at_the_same_time() {
    let (mut sequencer, calls) = sequencer(
        vec![
            Event::note(0.2, "A", 1.0, 0.3),
            Event::note(0.5, "A", 1.0, 0.3),
        ],
        vec![],
    );
    sequencer.start(0.0).unwrap();
    Clock::start().step(&mut sequencer);

    let calls = calls.lock();
    assert!(matches!(calls[1], Call::Stop { .. }));
    assert!(matches!(calls[2], Call::Start { .. }));
}
