//! Bootstrap prompt builder.
//!
//! Materializes the instruction blob handed to a child agent as its final
//! argument. Reads workspace files only; every file except the spec name
//! itself is optional.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::models::AgentConfig;

/// Steering documents injected when present under `.kiro/steering/`.
const STEERING_FILES: &[&str] = &["product.md", "tech.md", "structure.md"];

/// Spec documents included under `## Spec Documents`, in order.
const SPEC_DOCUMENTS: &[&str] = &["requirements.md", "design.md", "tasks.md"];

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Spec name must not be empty")]
    EmptySpecName,
}

/// Builds the bootstrap prompt for one spec.
#[derive(Debug, Clone)]
pub struct BootstrapPromptBuilder {
    workspace_root: PathBuf,
    config: AgentConfig,
}

impl BootstrapPromptBuilder {
    pub fn new(workspace_root: impl Into<PathBuf>, config: AgentConfig) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            config,
        }
    }

    /// Produce the full prompt text for `spec_name`.
    pub fn build_prompt(&self, spec_name: &str) -> Result<String, PromptError> {
        if spec_name.trim().is_empty() {
            return Err(PromptError::EmptySpecName);
        }

        if let Some(ref template_path) = self.config.bootstrap_template {
            let path = Path::new(template_path);
            match std::fs::read_to_string(path) {
                Ok(template) => return Ok(self.render_template(&template, spec_name)),
                Err(e) => {
                    tracing::warn!(
                        template = %path.display(),
                        error = %e,
                        "Bootstrap template not readable, falling back to default"
                    );
                }
            }
        }

        Ok(self.default_prompt(spec_name))
    }

    fn render_template(&self, template: &str, spec_name: &str) -> String {
        template
            .replace("{{specName}}", spec_name)
            .replace("{{specPath}}", &format!(".kiro/specs/{spec_name}/"))
            .replace("{{steeringContext}}", &self.steering_context())
            .replace("{{taskInstructions}}", &task_instructions(spec_name))
    }

    fn default_prompt(&self, spec_name: &str) -> String {
        let mut prompt = String::from("# Bootstrap Prompt\n\n");

        prompt.push_str("## Project Overview\n\n");
        prompt.push_str(&self.project_overview());
        prompt.push_str("\n\n");

        prompt.push_str("## Target Spec\n\n");
        prompt.push_str(&format!(
            "You are working on the spec \"{spec_name}\" located at `.kiro/specs/{spec_name}/`.\n\n"
        ));

        prompt.push_str("## Spec Documents\n\n");
        prompt.push_str(&self.spec_documents(spec_name));

        prompt.push_str("## Steering Context\n\n");
        prompt.push_str(&self.steering_context());
        prompt.push('\n');

        prompt.push_str("## Task Execution Instructions\n\n");
        prompt.push_str(&task_instructions(spec_name));

        prompt
    }

    /// `.kiro/README.md` up to its second `---` separator, or a fixed
    /// fallback when the file is absent.
    fn project_overview(&self) -> String {
        let readme = self.workspace_root.join(".kiro").join("README.md");
        match std::fs::read_to_string(&readme) {
            Ok(content) => {
                let mut separators = 0;
                let mut kept = Vec::new();
                for line in content.lines() {
                    if line.trim() == "---" {
                        separators += 1;
                        if separators == 2 {
                            break;
                        }
                    }
                    kept.push(line);
                }
                kept.join("\n").trim().to_string()
            }
            Err(_) => {
                "This workspace is managed by kse, a spec-driven development \
                 workflow engine."
                    .to_string()
            }
        }
    }

    fn spec_documents(&self, spec_name: &str) -> String {
        let spec_dir = self
            .workspace_root
            .join(".kiro")
            .join("specs")
            .join(spec_name);

        let mut section = String::new();
        for doc in SPEC_DOCUMENTS {
            section.push_str(&format!("### {doc}\n\n"));
            match std::fs::read_to_string(spec_dir.join(doc)) {
                Ok(content) => {
                    section.push_str(content.trim());
                    section.push_str("\n\n");
                }
                Err(_) => section.push_str("(not found)\n\n"),
            }
        }
        section
    }

    fn steering_context(&self) -> String {
        let steering_dir = self.workspace_root.join(".kiro").join("steering");

        let mut section = String::new();
        for name in STEERING_FILES {
            if let Ok(content) = std::fs::read_to_string(steering_dir.join(name)) {
                section.push_str(&format!("### {name}\n\n{}\n\n", content.trim()));
            }
        }
        section
    }
}

fn task_instructions(spec_name: &str) -> String {
    format!(
        "You are the sub-agent responsible for executing the Spec \"{spec_name}\".\n\
         \n\
         1. Read the task list at `.kiro/specs/{spec_name}/tasks.md`.\n\
         2. Execute each task in order, top to bottom.\n\
         3. Mark each task as completed in the task list as you finish it.\n\
         \n\
         Quality requirements:\n\
         - All code must compile and pass linting.\n\
         - New functionality must have tests.\n\
         - Do not leave tasks half-finished; complete or report each one.\n"
    )
}
