//! Named workflow skills with trigger-based matching.

use serde::{Deserialize, Serialize};

/// A specialized workflow injected into context when a task matches one
/// of its triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub name:        String,
    pub description: String,
    /// Case-insensitive substrings that activate this skill.
    pub triggers:    Vec<String>,
    /// The workflow text injected into the conversation.
    pub workflow:    String,
}

/// Registered skills. First matching trigger wins.
#[derive(Debug, Clone, Default)]
pub struct SkillSet {
    skills: Vec<Skill>,
}

impl SkillSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, skill: Skill) {
        self.skills.push(skill);
    }

    pub fn get(&self, name: &str) -> Option<&Skill> {
        self.skills.iter().find(|s| s.name == name)
    }

    pub fn list(&self) -> impl Iterator<Item = &Skill> {
        self.skills.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// The first skill with a trigger contained in the task text.
    pub fn match_task(&self, task: &str) -> Option<&Skill> {
        let lower = task.to_lowercase();
        self.skills
            .iter()
            .find(|s| s.triggers.iter().any(|t| lower.contains(&t.to_lowercase())))
    }

    /// Load skills from a directory of JSON files. Unreadable files are
    /// skipped.
    pub fn load_dir(dir: impl AsRef<std::path::Path>) -> Self {
        let mut set = Self::new();
        let Ok(entries) = std::fs::read_dir(dir) else {
            return set;
        };
        for entry in entries.flatten() {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                if let Ok(raw) = std::fs::read_to_string(entry.path()) {
                    if let Ok(skill) = serde_json::from_str::<Skill>(&raw) {
                        set.register(skill);
                    }
                }
            }
        }
        set
    }
}
