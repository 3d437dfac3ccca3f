pub mod automation;
pub mod config;
pub mod distribute;
pub mod engine;
pub mod error;
pub mod events;
pub mod project;
pub mod sequencer;
pub mod timing;

pub use automation::{Automation, AutomationEvent, Curve};
pub use config::Config;
pub use distribute::{Handle, LogTarget, SharedTarget, Target, TargetRegistry, distribute};
pub use engine::{EngineCommand, EngineHandle, EngineUpdate, spawn_engine};
pub use error::{DispatchError, Error, EventError, ProjectError, Result, TargetError, TimingError};
pub use events::{Event, EventData, EventList, EventType, Value};
pub use project::{Project, SequenceData};
pub use sequencer::{
    Command, CommandKind, FrameReport, HeadId, SequenceRegistry, Sequencer, SharedRegistry,
};
pub use timing::{Frame, FrameScheduler, Status, Transport};
