pub mod module;
pub mod registry;
pub mod script;

use std::path::Path;

use serde::Deserialize;
use slog::{info, warn};

use crate::error::ServerError;

pub use module::Module;
pub use registry::{EventRegistry, ModuleManifest};
pub use script::{CallbackHandle, EventArgs, SandboxEnv, ScriptEngine, ScriptValue};

/// The ordered module list read from `modules.toml`, the Rust-native
/// counterpart to the original's `modules` table in `modules/modules.lua`.
#[derive(Debug, Clone, Deserialize)]
struct ModuleList {
    modules: Vec<String>,
}

/// Bundles the event registry with the scripting engine that backs it.
/// The two are always mutated together (every registry call that touches
/// a module ends up invoking or releasing something in the engine), so
/// they share a single lock rather than risking inconsistent lock
/// ordering between two `Mutex`es.
pub struct ScriptHost {
    pub registry: EventRegistry,
    pub engine: Box<dyn ScriptEngine>,
}

impl ScriptHost {
    pub fn new(engine: Box<dyn ScriptEngine>) -> Self {
        ScriptHost { registry: EventRegistry::new(), engine }
    }

    pub fn emit_no_ret(&mut self, event: &str, args: &EventArgs) {
        self.registry.emit_no_ret(event, args, self.engine.as_mut());
    }

    pub fn emit_keyed(&mut self, event: &str, identifier: &str, args: &EventArgs) {
        self.registry.emit_keyed(event, identifier, args, self.engine.as_mut());
    }

    pub fn remove_all_connections_by_id(&mut self, identifier: &str) {
        self.registry.remove_all_connections_by_id(identifier, self.engine.as_mut());
    }

    /// Loads every module named in `<modules_path>/modules.toml`, in
    /// order, reading each module's own `manifest.toml` for its
    /// dependency list and file set. A module whose manifest can't be
    /// read is skipped with a warning rather than aborting startup,
    /// mirroring `ModuleManager::loadModules`'s per-directory handling;
    /// a missing or unreadable `modules.toml` itself is fatal.
    pub fn load_modules_from_disk(&mut self, modules_path: &Path, logger: &slog::Logger) -> Result<(), ServerError> {
        let list_path = modules_path.join("modules.toml");
        let list: ModuleList = serdeconv::from_toml_file(&list_path)
            .map_err(|e| ServerError::Modules(format!("failed to read {}: {}", list_path.display(), e)))?;

        for name in &list.modules {
            let manifest_path = modules_path.join(name).join("manifest.toml");
            let manifest: ModuleManifest = match serdeconv::from_toml_file(&manifest_path) {
                Ok(m) => m,
                Err(e) => {
                    warn!(logger, "skipping module, manifest unreadable"; "module" => name, "path" => %manifest_path.display(), "error" => %e);
                    continue;
                }
            };

            match self.registry.load_module(name, &manifest, self.engine.as_mut()) {
                Ok(()) => info!(logger, "module loaded"; "module" => name),
                Err(e) => warn!(logger, "failed to load module"; "module" => name, "error" => %e),
            }
        }
        Ok(())
    }
}
