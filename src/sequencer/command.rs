use thunderdome::{Arena, Index};

use crate::automation::Curve;
use crate::distribute::Handle;
use crate::events::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId(pub(crate) Index);

#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    Start {
        id: Value,
        value: f64,
    },
    Stop {
        id: Value,
        value: Option<f64>,
    },
    Automate {
        name: String,
        value: f64,
        curve: Curve,
        duration: f64,
    },
    Log {
        text: String,
    },
}

/// A due event resolved to an absolute time and a target.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub beat: f64,
    pub time: f64,
    pub target: String,
    pub kind: CommandKind,
    /// The other half of a note's start/stop pair
    pub(crate) pair: Option<CommandId>,
    pub(crate) handle: Option<Handle>,
}

impl Command {
    pub fn new(beat: f64, time: f64, target: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            beat,
            time,
            target: target.into(),
            kind,
            pair: None,
            handle: None,
        }
    }

    pub fn is_stop(&self) -> bool {
        matches!(self.kind, CommandKind::Stop { .. })
    }

    pub fn handle(&self) -> Option<Handle> {
        self.handle
    }
}

/// Slot arena for in-flight commands. Released slots are reused by later
/// acquisitions, so steady playback stops allocating once warmed up.
#[derive(Debug, Default)]
pub struct CommandPool {
    commands: Arena<Command>,
}

impl CommandPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self, command: Command) -> CommandId {
        CommandId(self.commands.insert(command))
    }

    pub fn release(&mut self, id: CommandId) -> Option<Command> {
        self.commands.remove(id.0)
    }

    pub fn get(&self, id: CommandId) -> Option<&Command> {
        self.commands.get(id.0)
    }

    pub fn get_mut(&mut self, id: CommandId) -> Option<&mut Command> {
        self.commands.get_mut(id.0)
    }

    /// Commands acquired and not yet released.
    pub fn in_flight(&self) -> usize {
        self.commands.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(text: &str) -> Command {
        Command::new(
            0.0,
            0.0,
            "",
            CommandKind::Log {
                text: text.to_string(),
            },
        )
    }

    #[test]
    fn released_slots_are_reused() {
        let mut pool = CommandPool::new();
        let a = pool.acquire(log("a"));
        pool.acquire(log("b"));
        pool.release(a);
        let c = pool.acquire(log("c"));
        assert_eq!(c.0.slot(), a.0.slot());
        assert_eq!(pool.in_flight(), 2);
        assert!(pool.get(a).is_none());
        assert_eq!(pool.get(c).map(|command| command.kind.clone()), Some(log("c").kind));
    }
}
