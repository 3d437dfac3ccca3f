use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::ProjectError;
use crate::events::EventList;
use crate::sequencer::SequenceRegistry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceData {
    pub id: String,
    pub events: EventList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(default)]
    pub config: Config,
    /// Target of the root head and of sequences that inherit theirs
    #[serde(default = "default_target")]
    pub target: String,
    /// Further target ids sequences may address
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub events: EventList,
    #[serde(default)]
    pub sequences: Vec<SequenceData>,
}

fn default_target() -> String {
    "main".to_string()
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            target: default_target(),
            targets: Vec::new(),
            events: EventList::new(),
            sequences: Vec::new(),
        }
    }

    pub fn registry(&self) -> SequenceRegistry {
        self.sequences
            .iter()
            .map(|sequence| (sequence.id.clone(), sequence.events.clone()))
            .collect()
    }

    /// Every target id the project mentions, the default one first.
    pub fn target_ids(&self) -> Vec<String> {
        let mut ids = vec![self.target.clone()];
        for id in &self.targets {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }

    /// A project path is either a `.ron` file or a directory holding
    /// `project.ron`.
    fn file_path(project_path: &Path) -> PathBuf {
        if project_path.extension().is_some_and(|ext| ext == "ron") {
            project_path.to_path_buf()
        } else {
            project_path.join("project.ron")
        }
    }

    pub fn save(&self, project_path: &Path) -> Result<(), ProjectError> {
        let ron_path = Self::file_path(project_path);
        if let Some(dir) = ron_path.parent() {
            fs::create_dir_all(dir)?;
        }

        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(ron_path, ron_string)?;

        Ok(())
    }

    pub fn load(project_path: &Path) -> Result<Self, ProjectError> {
        let ron_string = fs::read_to_string(Self::file_path(project_path))?;
        Self::from_ron(&ron_string)
    }

    pub fn from_ron(source: &str) -> Result<Self, ProjectError> {
        Ok(ron::from_str(source)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;

    const PROJECT: &str = r#"(
        name: "test",
        config: (lookahead: 0.05),
        target: "synth",
        events: [
            [0, "sequence", "loop", "self", 8],
            [1, "note", "C4", 1, 2],
        ],
        sequences: [
            (id: "loop", events: [[0, "param", "gain", 0.5]]),
        ],
    )"#;

    #[test]
    fn loads_event_tuples() {
        let project = Project::from_ron(PROJECT).unwrap();
        assert_eq!(project.config.lookahead, 0.05);
        assert_eq!(project.config.frame_duration, 0.24);
        assert_eq!(project.events.len(), 2);
        assert_eq!(project.events.as_slice()[1], Event::note(1.0, "C4", 1.0, 2.0));
        assert!(project.registry().contains("loop"));
    }

    #[test]
    fn malformed_event_fails_to_load() {
        let source = r#"(name: "bad", events: [[0, "note", "C4"]])"#;
        let error = Project::from_ron(source).unwrap_err();
        assert!(error.to_string().contains("note"));
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir().join(format!("beatline-project-{}", std::process::id()));
        let project = Project::from_ron(PROJECT).unwrap();
        project.save(&dir).unwrap();
        let loaded = Project::load(&dir).unwrap();
        assert_eq!(loaded, project);
        let _ = fs::remove_dir_all(&dir);
    }
}
