//! Dynamic module registry.
//!
//! Modules contribute commands, event reactions, an aggregate projection,
//! and (for LLM modules) a system prompt and tool schemas. Registrations
//! are versioned: reloading a module swaps in a fresh descriptor and
//! retires the old gate, so stale closures are inert but never evicted.

pub mod manifest;
pub mod watcher;

pub use manifest::{compile_manifest, ManifestError, ManifestModule};
pub use watcher::ModuleWatcher;

use crate::aggregate::Aggregate;
use crate::bus::{Dispatch, SubscriptionId};
use crate::command::CommandShape;
use crate::event::EventTypeRegistry;
use crate::processor::{CommandHandler, EventProcessor, ModuleGate};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleCategory {
    /// Internal plumbing; commands are not offered to the LLM.
    System,
    /// Agent-facing: exposes tools, a system prompt, and optionally a model.
    Llm,
}

/// A command contributed by a module.
pub struct ModuleCommand {
    pub name: String,
    pub description: String,
    pub shape: CommandShape,
    pub handler: CommandHandler,
}

/// Declarative event reaction: when `on` occurs, dispatch `command` with the
/// event's payload as input.
#[derive(Debug, Clone)]
pub struct Reaction {
    pub on: String,
    pub command: String,
}

pub trait Module: Send + Sync {
    fn name(&self) -> &str;
    fn category(&self) -> ModuleCategory;
    fn commands(&self) -> Vec<ModuleCommand>;
    fn declared_events(&self) -> Vec<String>;

    fn reactions(&self) -> Vec<Reaction> {
        Vec::new()
    }
    fn system_prompt(&self) -> Option<String> {
        None
    }
    fn agent_model(&self) -> Option<String> {
        None
    }
    fn aggregate(&self) -> Option<Box<dyn Aggregate>> {
        None
    }
}

struct ModuleEntry {
    version: u64,
    gate: Arc<ModuleGate>,
    module: Arc<dyn Module>,
    source: Option<PathBuf>,
    subscriptions: Vec<SubscriptionId>,
}

/// Versioned module registrations, wired into one processor.
pub struct ModuleRegistry {
    processor: Arc<EventProcessor>,
    types: Arc<EventTypeRegistry>,
    entries: RwLock<HashMap<String, ModuleEntry>>,
}

impl ModuleRegistry {
    pub fn new(processor: Arc<EventProcessor>, types: Arc<EventTypeRegistry>) -> Self {
        Self {
            processor,
            types,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Registers (or re-registers) a module and installs its contributions.
    ///
    /// A previous registration under the same name is retired first: its
    /// gate goes stale and its reaction subscriptions are removed. The new
    /// version's aggregate is hydrated from the module's logged history, so
    /// a reload never loses projected state.
    pub fn register(&self, module: Arc<dyn Module>, source: Option<PathBuf>) -> Arc<ModuleGate> {
        let name = module.name().to_string();

        let version = {
            let Ok(mut entries) = self.entries.write() else {
                return Arc::new(ModuleGate::new(&name, 1));
            };
            let version = entries.get(&name).map(|e| e.version + 1).unwrap_or(1);
            if let Some(old) = entries.remove(&name) {
                old.gate.retire();
                for id in old.subscriptions {
                    self.processor.bus().unsubscribe(id);
                }
                tracing::info!(module = %name, version = old.version, "retired module registration");
            }
            version
        };

        let gate = Arc::new(ModuleGate::new(&name, version));

        for event_type in module.declared_events() {
            self.types.register_passthrough(&event_type);
        }

        for command in module.commands() {
            self.processor.register_module_command(
                &command.name,
                command.handler,
                Some(command.shape),
                Arc::clone(&gate),
            );
        }

        let mut subscriptions = Vec::new();
        for reaction in module.reactions() {
            let reaction_gate = Arc::clone(&gate);
            let command = reaction.command.clone();
            let id = self.processor.subscribe(
                &reaction.on,
                Arc::new(move |event, _, _| {
                    if !reaction_gate.is_active() {
                        return Ok(Vec::new());
                    }
                    Ok(vec![Dispatch::Command {
                        name: command.clone(),
                        payload: event.data.clone(),
                    }])
                }),
            );
            subscriptions.push(id);
        }

        if let Some(aggregate) = module.aggregate() {
            self.processor.register_aggregate(aggregate);
        }

        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                name.clone(),
                ModuleEntry {
                    version,
                    gate: Arc::clone(&gate),
                    module,
                    source,
                    subscriptions,
                },
            );
        }

        tracing::info!(module = %name, version, "registered module");
        gate
    }

    /// Loads every manifest in a directory. Bad manifests are skipped with a
    /// diagnostic; the rest still load. Returns how many registered.
    pub fn load_dir(&self, dir: &Path) -> usize {
        let Ok(read_dir) = std::fs::read_dir(dir) else {
            tracing::info!(dir = %dir.display(), "module directory missing, nothing to load");
            return 0;
        };

        let mut loaded = 0;
        let mut paths: Vec<PathBuf> = read_dir
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| is_manifest(path))
            .collect();
        paths.sort();

        for path in paths {
            match compile_manifest(&path) {
                Ok(module) => {
                    self.register(Arc::new(module), Some(path));
                    loaded += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        manifest = %path.display(),
                        error = %err,
                        "skipping unloadable module manifest"
                    );
                }
            }
        }
        loaded
    }

    /// Recompiles and swaps the module at `path`. Compile failures leave the
    /// current registration active.
    pub fn reload_path(&self, path: &Path) {
        match compile_manifest(path) {
            Ok(module) => {
                self.register(Arc::new(module), Some(path.to_path_buf()));
            }
            Err(err) => {
                tracing::warn!(
                    manifest = %path.display(),
                    error = %err,
                    "module reload failed, keeping current version"
                );
            }
        }
    }

    /// Marks the module loaded from `path` stale. The entry stays in the
    /// registry for inspection; its commands now resolve to a stale error.
    pub fn unload_path(&self, path: &Path) {
        let Ok(entries) = self.entries.read() else {
            return;
        };
        for entry in entries.values() {
            if entry.source.as_deref() == Some(path) {
                entry.gate.retire();
                tracing::info!(
                    module = entry.module.name(),
                    version = entry.version,
                    "module unloaded, gate retired"
                );
            }
        }
    }

    /// Active module by name.
    pub fn module(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| {
                entries
                    .get(name)
                    .filter(|entry| entry.gate.is_active())
                    .map(|entry| Arc::clone(&entry.module))
            })
    }

    /// Active LLM-category modules, name-sorted for stable tool listings.
    pub fn llm_modules(&self) -> Vec<Arc<dyn Module>> {
        let mut modules: Vec<Arc<dyn Module>> = self
            .entries
            .read()
            .map(|entries| {
                entries
                    .values()
                    .filter(|entry| {
                        entry.gate.is_active()
                            && entry.module.category() == ModuleCategory::Llm
                    })
                    .map(|entry| Arc::clone(&entry.module))
                    .collect()
            })
            .unwrap_or_default();
        modules.sort_by(|a, b| a.name().cmp(b.name()));
        modules
    }

    /// Current version of a module's registration, if any.
    pub fn version_of(&self, name: &str) -> Option<u64> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(name).map(|entry| entry.version))
    }

    pub fn processor(&self) -> &Arc<EventProcessor> {
        &self.processor
    }
}

fn is_manifest(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
