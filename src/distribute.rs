use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::automation::{Automation, Curve};
use crate::error::{DispatchError, TargetError};
use crate::events::Value;
use crate::sequencer::{Command, CommandKind};

/// Opaque token a target hands back from `start` and receives again on the
/// matching `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u64);

/// Anything that can receive scheduled commands. Every capability is
/// optional and unsupported by default.
pub trait Target: Send {
    fn start(&mut self, _time: f64, _id: &Value, _value: f64) -> Result<Handle, TargetError> {
        Err(TargetError::Unsupported("start"))
    }

    fn stop(
        &mut self,
        _time: f64,
        _id: &Value,
        _value: Option<f64>,
        _handle: Option<Handle>,
    ) -> Result<(), TargetError> {
        Err(TargetError::Unsupported("stop"))
    }

    fn automate(
        &mut self,
        _name: &str,
        _time: f64,
        _curve: &Curve,
        _value: f64,
        _duration: f64,
    ) -> Result<(), TargetError> {
        Err(TargetError::Unsupported("automate"))
    }
}

pub type SharedTarget = Arc<Mutex<dyn Target>>;

#[derive(Clone, Default)]
pub struct TargetRegistry {
    targets: HashMap<String, SharedTarget>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Target + 'static>(&mut self, id: impl Into<String>, target: T) -> SharedTarget {
        let shared: SharedTarget = Arc::new(Mutex::new(target));
        self.targets.insert(id.into(), shared.clone());
        shared
    }

    pub fn insert_shared(&mut self, id: impl Into<String>, target: SharedTarget) {
        self.targets.insert(id.into(), target);
    }

    pub fn get(&self, id: &str) -> Option<&SharedTarget> {
        self.targets.get(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<SharedTarget> {
        self.targets.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.targets.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.targets.keys()).finish()
    }
}

/// Calls the capability a command needs on its target. Returns the handle of
/// a started gesture.
pub fn distribute(
    command: &Command,
    targets: &TargetRegistry,
) -> Result<Option<Handle>, DispatchError> {
    if let CommandKind::Log { text } = &command.kind {
        info!(time = command.time, beat = command.beat, "{text}");
        return Ok(None);
    }

    let target = targets
        .get(&command.target)
        .ok_or_else(|| DispatchError::UnknownTarget(command.target.clone()))?;
    let mut target = target.lock();

    let result = match &command.kind {
        CommandKind::Start { id, value } => target.start(command.time, id, *value).map(Some),
        CommandKind::Stop { id, value } => target
            .stop(command.time, id, *value, command.handle)
            .map(|_| None),
        CommandKind::Automate {
            name,
            value,
            curve,
            duration,
        } => target
            .automate(name, command.time, curve, *value, *duration)
            .map(|_| None),
        CommandKind::Log { .. } => Ok(None),
    };

    result.map_err(|error| match error {
        TargetError::Unsupported(capability) => DispatchError::MissingCapability {
            target: command.target.clone(),
            capability,
        },
        TargetError::UnknownParam(name) => DispatchError::MissingParam {
            target: command.target.clone(),
            name,
        },
    })
}

/// Target that logs every call and keeps the automation it receives, so
/// parameter values can be read back.
#[derive(Debug)]
pub struct LogTarget {
    name: String,
    next_handle: u64,
    params: HashMap<String, Automation>,
}

impl LogTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_handle: 0,
            params: HashMap::new(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&Automation> {
        self.params.get(name)
    }

    pub fn value_at_time(&self, name: &str, time: f64) -> Option<f64> {
        self.params.get(name).map(|param| param.value_at_time(time))
    }
}

impl Target for LogTarget {
    fn start(&mut self, time: f64, id: &Value, value: f64) -> Result<Handle, TargetError> {
        self.next_handle += 1;
        info!(target_name = %self.name, time, %id, value, "start");
        Ok(Handle(self.next_handle))
    }

    fn stop(
        &mut self,
        time: f64,
        id: &Value,
        value: Option<f64>,
        handle: Option<Handle>,
    ) -> Result<(), TargetError> {
        info!(target_name = %self.name, time, %id, ?value, ?handle, "stop");
        Ok(())
    }

    fn automate(
        &mut self,
        name: &str,
        time: f64,
        curve: &Curve,
        value: f64,
        duration: f64,
    ) -> Result<(), TargetError> {
        debug!(target_name = %self.name, param = name, time, %curve, value, duration, "automate");
        self.params
            .entry(name.to_string())
            .or_insert_with(|| Automation::new(0.0))
            .automate(time, curve.clone(), value, duration);
        Ok(())
    }
}
