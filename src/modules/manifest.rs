//! YAML module manifests.
//!
//! A manifest declares a module's commands as shapes plus the event each one
//! emits. "Building" a module is compiling its manifest into an in-memory
//! descriptor; there is no code generation, which is what makes hot reload
//! a pure data swap.
//!
//! ```yaml
//! name: groceries
//! category: llm
//! system_prompt: You maintain the household grocery list.
//! agent_model: qwen3
//! commands:
//!   - name: AddGroceryItem
//!     description: Add an item to the grocery list
//!     event: GroceryItemAdded
//!     fields:
//!       - name: item
//!         kind: string
//!         description: What to add
//!       - name: quantity
//!         kind: integer
//!         required: false
//! ```

use crate::aggregate::{Aggregate, GenericAggregate};
use crate::command::{build_payload, CommandShape, FieldKind, FieldSpec};
use crate::event::EventRecord;
use crate::modules::{Module, ModuleCategory, ModuleCommand, Reaction};
use serde::Deserialize;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum ManifestError {
    Io { message: String },
    Parse { message: String },
    Invalid { message: String },
}

impl Display for ManifestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { message } => write!(f, "manifest unreadable: {}", message),
            Self::Parse { message } => write!(f, "manifest malformed: {}", message),
            Self::Invalid { message } => write!(f, "manifest invalid: {}", message),
        }
    }
}

impl std::error::Error for ManifestError {}

#[derive(Debug, Deserialize)]
struct RawManifest {
    name: String,
    #[serde(default = "default_category")]
    category: ModuleCategory,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    agent_model: Option<String>,
    #[serde(default)]
    commands: Vec<RawCommand>,
    #[serde(default)]
    reactions: Vec<RawReaction>,
}

fn default_category() -> ModuleCategory {
    ModuleCategory::Llm
}

#[derive(Debug, Deserialize)]
struct RawCommand {
    name: String,
    #[serde(default)]
    description: String,
    /// Event type emitted when the command succeeds.
    event: String,
    #[serde(default)]
    fields: Vec<FieldSpec>,
}

#[derive(Debug, Deserialize)]
struct RawReaction {
    on: String,
    command: String,
}

#[derive(Debug, Clone)]
struct CompiledCommand {
    name: String,
    description: String,
    event_type: String,
    shape: CommandShape,
}

/// A module compiled from a manifest.
#[derive(Debug)]
pub struct ManifestModule {
    name: String,
    category: ModuleCategory,
    system_prompt: Option<String>,
    agent_model: Option<String>,
    commands: Vec<CompiledCommand>,
    reactions: Vec<Reaction>,
}

/// Reads and compiles a manifest file.
pub fn compile_manifest(path: &Path) -> Result<ManifestModule, ManifestError> {
    let text = std::fs::read_to_string(path).map_err(|e| ManifestError::Io {
        message: e.to_string(),
    })?;
    compile_manifest_str(&text)
}

pub fn compile_manifest_str(text: &str) -> Result<ManifestModule, ManifestError> {
    let raw: RawManifest = serde_yaml::from_str(text).map_err(|e| ManifestError::Parse {
        message: e.to_string(),
    })?;

    if raw.name.trim().is_empty() {
        return Err(ManifestError::Invalid {
            message: "module name is empty".to_string(),
        });
    }

    let mut commands = Vec::new();
    for command in &raw.commands {
        if command.name.trim().is_empty() {
            return Err(ManifestError::Invalid {
                message: format!("module {}: command with empty name", raw.name),
            });
        }
        if command.event.trim().is_empty() {
            return Err(ManifestError::Invalid {
                message: format!("command {}: no event declared", command.name),
            });
        }
        if commands
            .iter()
            .any(|c: &CompiledCommand| c.name == command.name)
        {
            return Err(ManifestError::Invalid {
                message: format!("duplicate command name: {}", command.name),
            });
        }
        let shape = CommandShape {
            fields: command.fields.clone(),
        };
        check_shape(&command.name, &shape)?;
        commands.push(CompiledCommand {
            name: command.name.clone(),
            description: command.description.clone(),
            event_type: command.event.clone(),
            shape,
        });
    }

    let reactions = raw
        .reactions
        .iter()
        .map(|r| Reaction {
            on: r.on.clone(),
            command: r.command.clone(),
        })
        .collect();

    Ok(ManifestModule {
        name: raw.name,
        category: raw.category,
        system_prompt: raw.system_prompt,
        agent_model: raw.agent_model,
        commands,
        reactions,
    })
}

/// Object fields must carry nested shapes; catching this at compile time
/// keeps dispatch-time shape errors down to bad input only.
fn check_shape(command: &str, shape: &CommandShape) -> Result<(), ManifestError> {
    for field in &shape.fields {
        if field.kind == FieldKind::Object {
            match &field.shape {
                Some(nested) => check_shape(command, nested)?,
                None => {
                    return Err(ManifestError::Invalid {
                        message: format!(
                            "command {}: object field {} has no nested shape",
                            command, field.name
                        ),
                    })
                }
            }
        }
    }
    Ok(())
}

impl Module for ManifestModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> ModuleCategory {
        self.category
    }

    fn commands(&self) -> Vec<ModuleCommand> {
        self.commands
            .iter()
            .map(|command| {
                let shape = command.shape.clone();
                let event_type = command.event_type.clone();
                let aggregate_id = self.name.clone();
                ModuleCommand {
                    name: command.name.clone(),
                    description: command.description.clone(),
                    shape: command.shape.clone(),
                    handler: Arc::new(move |input, _| {
                        let payload = build_payload(&shape, input)?;
                        Ok(vec![EventRecord::new(&aggregate_id, &event_type, payload)])
                    }),
                }
            })
            .collect()
    }

    fn declared_events(&self) -> Vec<String> {
        self.commands
            .iter()
            .map(|command| command.event_type.clone())
            .collect()
    }

    fn reactions(&self) -> Vec<Reaction> {
        self.reactions.clone()
    }

    fn system_prompt(&self) -> Option<String> {
        self.system_prompt.clone()
    }

    fn agent_model(&self) -> Option<String> {
        self.agent_model.clone()
    }

    fn aggregate(&self) -> Option<Box<dyn Aggregate>> {
        Some(Box::new(GenericAggregate::new(
            &self.name,
            self.declared_events(),
        )))
    }
}

#[cfg(test)]
#[path = "tests/manifest_tests.rs"]
mod tests;
