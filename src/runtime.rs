//! Wires the pieces into a running assistant: event store, dispatch
//! pipeline, module registry, orchestration, and the background scheduler.
//!
//! `Runtime::bootstrap` rebuilds all state by replaying the event log, so a
//! crash at any point resumes from the last persisted event.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::bus::EventBus;
use crate::config::{RuntimeConfig, StoreBackend};
use crate::event::{EventTypeRegistry, Payload};
use crate::event_store::{EventStore, FileEventStore, SqliteEventStore};
use crate::modules::watcher::{self, ModuleWatcher};
use crate::modules::ModuleRegistry;
use crate::orchestration::{
    LlmClient, OrchestrationAggregate, OrchestrationEvent, RequestOrchestrator,
};
use crate::processor::{CommandError, EventProcessor};
use crate::recovery::RecoveryManager;
use crate::scheduler::Scheduler;
use crate::structured_logger::StructuredLogger;

const FAULT_WINDOW: Duration = Duration::from_secs(60);
const MAX_FAULTS_PER_WINDOW: u32 = 5;

pub struct Runtime {
    config: RuntimeConfig,
    logger: Arc<StructuredLogger>,
    recovery: Arc<RecoveryManager>,
    processor: Arc<EventProcessor>,
    registry: Arc<ModuleRegistry>,
    orchestrator: Arc<RequestOrchestrator>,
    scheduler: Scheduler,
    // Dropping the watcher stops hot reload, so it lives as long as the runtime.
    _watcher: Option<ModuleWatcher>,
}

impl Runtime {
    /// Builds a runtime from configuration: opens the event store, loads
    /// module manifests (each registration replays its history into the
    /// module's projection), and wires the orchestrator. Refuses to start
    /// if the log cannot be fully decoded.
    pub fn bootstrap(config: RuntimeConfig, llm: Arc<dyn LlmClient>) -> Result<Self> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let logger = Arc::new(
            StructuredLogger::new(&session_id, &config.logs_dir())
                .context("Failed to open structured log")?,
        );

        let recovery = Arc::new(RecoveryManager::new(FAULT_WINDOW, MAX_FAULTS_PER_WINDOW));
        {
            let logger = Arc::clone(&logger);
            recovery.register_handler(Arc::new(move |fault| logger.log_fault(fault)));
        }

        let types = Arc::new(EventTypeRegistry::new());
        OrchestrationEvent::register_types(&types);

        let store: Arc<dyn EventStore> = match config.store {
            StoreBackend::File => Arc::new(FileEventStore::new(config.event_log_path())),
            StoreBackend::Sqlite => Arc::new(
                SqliteEventStore::open(&config.sqlite_path(), Arc::clone(&types))
                    .context("Failed to open event database")?,
            ),
        };
        store.load().context("Failed to load event log")?;

        let bus = Arc::new(EventBus::new());
        {
            let logger = Arc::clone(&logger);
            bus.subscribe_all(Arc::new(move |event| logger.log_event_record(event)));
        }

        let processor = Arc::new(EventProcessor::new(
            Arc::clone(&store),
            bus,
            config.max_cascade_depth as usize,
        ));
        processor.register_aggregate(Box::new(OrchestrationAggregate::new(config.chat_context)));

        let registry = Arc::new(ModuleRegistry::new(
            Arc::clone(&processor),
            Arc::clone(&types),
        ));
        let modules_dir = config.resolved_modules_dir();
        let loaded = registry.load_dir(&modules_dir);
        logger.log(
            "Runtime",
            serde_json::json!({
                "type": "ModulesLoaded",
                "dir": modules_dir.display().to_string(),
                "count": loaded
            }),
        );

        let orchestrator = RequestOrchestrator::new(
            Arc::clone(&processor),
            Arc::clone(&registry),
            Arc::clone(&recovery),
            llm,
            config.llm.model.clone(),
        );
        orchestrator.wire();

        let watcher = if config.hot_reload {
            match watcher::watch_dir(&modules_dir, Arc::clone(&registry)) {
                Ok(watcher) => Some(watcher),
                Err(err) => {
                    tracing::warn!(
                        dir = %modules_dir.display(),
                        error = %err,
                        "module hot reload disabled"
                    );
                    None
                }
            }
        } else {
            None
        };

        let scheduler = Scheduler::new(Arc::clone(&recovery));

        logger.log(
            "Runtime",
            serde_json::json!({
                "type": "Started",
                "store": config.store,
                "events": store.events().len()
            }),
        );

        Ok(Self {
            config,
            logger,
            recovery,
            processor,
            registry,
            orchestrator,
            scheduler,
            _watcher: watcher,
        })
    }

    /// Runs a command through the dispatch pipeline.
    pub fn execute(&self, name: &str, payload: Payload) -> Result<(), CommandError> {
        self.logger.log_command(name, &payload);
        self.processor.execute_command(name, payload)
    }

    /// Cancels scheduled work and records the shutdown.
    pub fn shutdown(&self) {
        self.scheduler.cancel_all();
        self.logger.log("Runtime", serde_json::json!({ "type": "Stopped" }));
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn processor(&self) -> &Arc<EventProcessor> {
        &self.processor
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<RequestOrchestrator> {
        &self.orchestrator
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn recovery(&self) -> &Arc<RecoveryManager> {
        &self.recovery
    }

    pub fn logger(&self) -> &Arc<StructuredLogger> {
        &self.logger
    }
}

#[cfg(test)]
#[path = "tests/runtime_tests.rs"]
mod tests;
