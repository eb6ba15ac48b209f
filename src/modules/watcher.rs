//! Manifest hot reload.
//!
//! Watches the modules directory and swaps registrations when manifests
//! change. The watcher handle must stay alive for the lifetime of the
//! runtime; dropping it stops the notifications.

use crate::modules::ModuleRegistry;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;

pub struct ModuleWatcher {
    _watcher: RecommendedWatcher,
}

/// Starts watching `dir` for manifest creates, edits, and removals.
pub fn watch_dir(dir: &Path, registry: Arc<ModuleRegistry>) -> notify::Result<ModuleWatcher> {
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        let event = match result {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "module watcher error");
                return;
            }
        };
        for path in &event.paths {
            if !is_manifest(path) {
                continue;
            }
            match event.kind {
                EventKind::Create(_) | EventKind::Modify(_) => {
                    tracing::info!(manifest = %path.display(), "manifest changed, reloading");
                    registry.reload_path(path);
                }
                EventKind::Remove(_) => {
                    tracing::info!(manifest = %path.display(), "manifest removed, unloading");
                    registry.unload_path(path);
                }
                _ => {}
            }
        }
    })?;

    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(ModuleWatcher { _watcher: watcher })
}

fn is_manifest(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}
