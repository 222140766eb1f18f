//! Load a named skill workflow into the conversation.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::skills::SkillSet;
use crate::tools::{Tool, ToolArgs, ToolResult};

pub struct SkillTool {
    skills: Arc<SkillSet>,
}

impl SkillTool {
    pub fn new(skills: Arc<SkillSet>) -> Self {
        Self { skills }
    }
}

#[async_trait]
impl Tool for SkillTool {
    fn name(&self) -> &str {
        "skill"
    }

    fn description(&self) -> &str {
        "Load a specialized workflow skill by name, or list available skills."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Skill name to load. Omit to list available skills."
                }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, args: &ToolArgs) -> ToolResult {
        let name = args.get("name").and_then(|v| v.as_str()).unwrap_or_default();

        if name.is_empty() || name == "list" {
            let listing: Vec<String> = self
                .skills
                .list()
                .map(|s| format!("- {}: {}", s.name, s.description))
                .collect();
            return if listing.is_empty() {
                ToolResult::ok("No skills available.")
            } else {
                ToolResult::ok(listing.join("\n"))
            };
        }

        match self.skills.get(name) {
            Some(skill) => ToolResult::ok(format!(
                "# Skill: {}\n\n{}\n\n## Workflow\n\n{}",
                skill.name, skill.description, skill.workflow
            )),
            None => ToolResult::fail(format!("Unknown skill: '{}'", name)),
        }
    }
}
