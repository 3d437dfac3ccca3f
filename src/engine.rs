use crossbeam::channel::{self, Receiver, Sender};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::Project;
use crate::distribute::TargetRegistry;
use crate::events::{Event, EventData};
use crate::sequencer::{FrameReport, Sequencer};
use crate::timing::{Frame, FrameScheduler, Transport};

#[derive(Debug, Clone)]
pub enum EngineCommand {
    LoadProject(PathBuf),
    ReloadProject(Project),
    /// Start playback at a host time, or now
    Play { at: Option<f64> },
    Stop { at: Option<f64> },
    SetTempo { bpm: f64 },
    /// Record into the transport (rate, meter) or the playing root head
    Record { time: Option<f64>, event: Event },
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum EngineUpdate {
    ProjectLoaded { project: Project },
    PlaybackState { playing: bool },
    Frame { frame: Frame, dispatched: usize },
    Error { message: String },
}

pub struct EngineHandle {
    pub command_tx: Sender<EngineCommand>,
    pub update_rx: Receiver<EngineUpdate>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn send(&self, command: EngineCommand) {
        let _ = self.command_tx.send(command);
    }

    /// Asks the engine to stop and waits for its thread.
    pub fn shutdown(mut self) {
        let _ = self.command_tx.send(EngineCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

pub fn spawn_engine(targets: TargetRegistry) -> EngineHandle {
    let (command_tx, command_rx) = channel::unbounded();
    let (update_tx, update_rx) = channel::unbounded();

    let thread = std::thread::spawn(move || {
        engine_thread(command_rx, update_tx, targets);
    });

    EngineHandle {
        command_tx,
        update_rx,
        thread: Some(thread),
    }
}

/// Seconds since the engine started.
struct HostClock {
    origin: Instant,
}

impl HostClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

struct EngineState {
    clock: HostClock,
    targets: TargetRegistry,
    sequencer: Option<Sequencer>,
    frames: Option<FrameScheduler>,
    ticker: Option<Receiver<Instant>>,
}

impl EngineState {
    fn load(&mut self, project: &Project) {
        let config = &project.config;
        let transport = Transport::new(config);
        let registry = project.registry().into_shared();
        let mut sequencer = Sequencer::new(
            config,
            transport,
            registry,
            self.targets.clone(),
            project.target.clone(),
        );
        sequencer.set_events(project.events.clone());

        self.sequencer = Some(sequencer);
        self.frames = Some(FrameScheduler::new(config));
        self.ticker = None;
    }

    fn reload(&mut self, project: &Project) -> Result<(), String> {
        let sequencer = self.sequencer.as_mut().ok_or("No project loaded")?;
        sequencer.registry().store(Arc::new(project.registry()));
        sequencer.set_events(project.events.clone());
        Ok(())
    }

    fn play(&mut self, at: Option<f64>) -> Result<(), String> {
        let now = self.clock.now();
        let (Some(sequencer), Some(frames)) = (self.sequencer.as_mut(), self.frames.as_mut()) else {
            return Err("No project loaded".to_string());
        };

        sequencer
            .start(at.unwrap_or(now).max(now))
            .map_err(|e| e.to_string())?;
        if frames.listen() {
            frames.start(now);
            self.ticker = Some(channel::tick(frames.interval()));
        }
        Ok(())
    }

    fn stop(&mut self, at: Option<f64>) -> Result<FrameReport, String> {
        let now = self.clock.now();
        let sequencer = self.sequencer.as_mut().ok_or("No project loaded")?;
        sequencer
            .stop(at.unwrap_or(now).max(sequencer.transport().current_time()))
            .map_err(|e| e.to_string())
    }

    fn record(&mut self, time: Option<f64>, event: Event) -> Result<(), String> {
        let now = self.clock.now();
        let sequencer = self.sequencer.as_mut().ok_or("No project loaded")?;
        let time = time.unwrap_or(now);
        match event.data {
            EventData::Rate { .. } | EventData::Meter { .. } => sequencer
                .transport_mut()
                .record(time, &event)
                .map_err(|e| e.to_string()),
            _ => {
                let root = sequencer.root().ok_or("Nothing is playing")?;
                sequencer
                    .record(root, time, event)
                    .map_err(|e| e.to_string())
            }
        }
    }

    fn set_tempo(&mut self, bpm: f64) -> Result<(), String> {
        let now = self.clock.now();
        let sequencer = self.sequencer.as_mut().ok_or("No project loaded")?;
        sequencer
            .transport_mut()
            .set_tempo(now, bpm)
            .map_err(|e| e.to_string())
    }

    /// Runs one frame. Returns false once the tree has finished playing.
    fn tick(&mut self, update_tx: &Sender<EngineUpdate>) -> bool {
        let now = self.clock.now();
        let (Some(sequencer), Some(frames)) = (self.sequencer.as_mut(), self.frames.as_mut()) else {
            return false;
        };

        if let Some(frame) = frames.next_frame(now) {
            let report = sequencer.frame(frame);
            debug!(t1 = frame.t1, t2 = frame.t2, "frame");
            let _ = update_tx.send(EngineUpdate::Frame {
                frame,
                dispatched: report.dispatched(),
            });
        }

        if sequencer.is_playing() {
            return true;
        }
        frames.unlisten();
        self.ticker = None;
        false
    }
}

fn engine_thread(
    command_rx: Receiver<EngineCommand>,
    update_tx: Sender<EngineUpdate>,
    targets: TargetRegistry,
) {
    let mut state = EngineState {
        clock: HostClock::new(),
        targets,
        sequencer: None,
        frames: None,
        ticker: None,
    };
    let idle = channel::never::<Instant>();

    loop {
        let ticker = state.ticker.clone().unwrap_or_else(|| idle.clone());

        crossbeam::select! {
            recv(command_rx) -> command => match command {
                Ok(EngineCommand::LoadProject(path)) => match Project::load(&path) {
                    Ok(project) => {
                        info!(name = %project.name, "project loaded");
                        state.load(&project);
                        let _ = update_tx.send(EngineUpdate::PlaybackState { playing: false });
                        let _ = update_tx.send(EngineUpdate::ProjectLoaded { project });
                    }
                    Err(e) => {
                        error!("failed to load project: {e}");
                        let _ = update_tx.send(EngineUpdate::Error {
                            message: format!("Failed to load project: {}", e),
                        });
                    }
                },
                Ok(EngineCommand::ReloadProject(project)) => {
                    info!(name = %project.name, "reloading sequences");
                    if let Err(message) = state.reload(&project) {
                        let _ = update_tx.send(EngineUpdate::Error { message });
                    }
                }
                Ok(EngineCommand::Play { at }) => match state.play(at) {
                    Ok(()) => {
                        let _ = update_tx.send(EngineUpdate::PlaybackState { playing: true });
                    }
                    Err(message) => {
                        let _ = update_tx.send(EngineUpdate::Error { message });
                    }
                },
                Ok(EngineCommand::Stop { at }) => {
                    if let Err(message) = state.stop(at) {
                        let _ = update_tx.send(EngineUpdate::Error { message });
                    }
                }
                Ok(EngineCommand::SetTempo { bpm }) => {
                    if let Err(message) = state.set_tempo(bpm) {
                        let _ = update_tx.send(EngineUpdate::Error { message });
                    }
                }
                Ok(EngineCommand::Record { time, event }) => {
                    if let Err(message) = state.record(time, event) {
                        let _ = update_tx.send(EngineUpdate::Error { message });
                    }
                }
                Ok(EngineCommand::Shutdown) | Err(_) => break,
            },
            recv(ticker) -> _ => {
                if !state.tick(&update_tx) {
                    info!("playback finished");
                    let _ = update_tx.send(EngineUpdate::PlaybackState { playing: false });
                }
            }
        }
    }
}
