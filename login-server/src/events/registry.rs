use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Deserialize;

use super::module::Module;
use super::script::{CallbackHandle, EventArgs, ScriptEngine, ScriptValue};

/// The sandboxed `settings.lua`-like manifest each module directory
/// carries. Modeled as data rather than parsed from a real Lua table,
/// since the scripting runtime itself is an external collaborator here.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModuleManifest {
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub const_file: Option<String>,
}

/// The global event fabric: modules plus the two registration-order
/// indices described by the module invariants (a module appears in an
/// event's index iff its own per-event list for that event is non-empty).
#[derive(Default)]
pub struct EventRegistry {
    modules: IndexMap<String, Module>,
    positional_index: HashMap<String, Vec<String>>,
    keyed_index: HashMap<String, Vec<String>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        EventRegistry::default()
    }

    pub fn is_loaded(&self, module_name: &str) -> bool {
        self.modules.contains_key(module_name)
    }

    pub fn connect(
        &mut self,
        module_name: &str,
        event: &str,
        callback: CallbackHandle,
        identifier: Option<&str>,
    ) -> Result<(), String> {
        let module = self
            .modules
            .get_mut(module_name)
            .ok_or_else(|| format!("unknown module '{}'", module_name))?;
        match identifier {
            None => {
                if module.connect_positional(event, callback) {
                    self.positional_index
                        .entry(event.to_string())
                        .or_default()
                        .push(module_name.to_string());
                }
                Ok(())
            }
            Some(id) => {
                let became_nonempty = module
                    .connect_keyed(event, id, callback)
                    .map_err(|_| format!("duplicate keyed subscription for '{}'/{}", event, id))?;
                if became_nonempty {
                    self.keyed_index
                        .entry(event.to_string())
                        .or_default()
                        .push(module_name.to_string());
                }
                Ok(())
            }
        }
    }

    pub fn connect_once(
        &mut self,
        module_name: &str,
        event: &str,
        callback: CallbackHandle,
        identifier: Option<&str>,
    ) -> Result<(), String> {
        self.connect(module_name, event, callback, identifier)?;
        let module = self.modules.get_mut(module_name).unwrap();
        match identifier {
            None => module.mark_once(callback),
            Some(id) => module.mark_once_keyed(event, id),
        }
        Ok(())
    }

    fn disconnect_positional_inner(
        &mut self,
        module_name: &str,
        event: &str,
        callback: CallbackHandle,
        engine: &mut dyn ScriptEngine,
    ) {
        if let Some(module) = self.modules.get_mut(module_name) {
            if module.disconnect_positional(event, callback) {
                if let Some(list) = self.positional_index.get_mut(event) {
                    list.retain(|m| m != module_name);
                }
            }
        }
        engine.release(callback);
    }

    fn disconnect_identifier_inner(
        &mut self,
        module_name: &str,
        event: &str,
        identifier: &str,
        engine: &mut dyn ScriptEngine,
    ) {
        let callback = self
            .modules
            .get(module_name)
            .and_then(|m| m.keyed_callback(event, identifier));

        if let Some(module) = self.modules.get_mut(module_name) {
            if module.disconnect_identifier(event, identifier) {
                if let Some(list) = self.keyed_index.get_mut(event) {
                    list.retain(|m| m != module_name);
                }
            }
        }
        if let Some(cb) = callback {
            engine.release(cb);
        }
    }

    pub fn disconnect(
        &mut self,
        module_name: &str,
        event: &str,
        callback: CallbackHandle,
        engine: &mut dyn ScriptEngine,
    ) {
        self.disconnect_positional_inner(module_name, event, callback, engine);
    }

    pub fn disconnect_identifier(
        &mut self,
        module_name: &str,
        event: &str,
        identifier: &str,
        engine: &mut dyn ScriptEngine,
    ) {
        self.disconnect_identifier_inner(module_name, event, identifier, engine);
    }

    /// Positional emit, discarding results.
    pub fn emit_no_ret(&mut self, event: &str, args: &EventArgs, engine: &mut dyn ScriptEngine) {
        let module_names = self.positional_index.get(event).cloned().unwrap_or_default();
        for module_name in module_names {
            let callbacks = match self.modules.get(&module_name) {
                Some(m) => m.positional_callbacks(event),
                None => continue,
            };
            for callback in callbacks {
                let sandbox = match self.modules.get(&module_name) {
                    Some(m) => m.sandbox,
                    None => continue,
                };
                engine.invoke_no_ret(sandbox, callback, args);

                let once = self.modules.get(&module_name).map(|m| m.is_once(callback)).unwrap_or(false);
                if once {
                    self.disconnect_positional_inner(&module_name, event, callback, engine);
                }
            }
        }
    }

    /// Positional emit, collecting up to `n_results` return values per
    /// invocation.
    pub fn emit_collect(
        &mut self,
        event: &str,
        args: &EventArgs,
        n_results: usize,
        engine: &mut dyn ScriptEngine,
    ) -> Vec<ScriptValue> {
        let module_names = self.positional_index.get(event).cloned().unwrap_or_default();
        let mut results = Vec::new();
        for module_name in module_names {
            let callbacks = match self.modules.get(&module_name) {
                Some(m) => m.positional_callbacks(event),
                None => continue,
            };
            for callback in callbacks {
                let sandbox = match self.modules.get(&module_name) {
                    Some(m) => m.sandbox,
                    None => continue,
                };
                results.extend(engine.invoke_collect(sandbox, callback, args, n_results));

                let once = self.modules.get(&module_name).map(|m| m.is_once(callback)).unwrap_or(false);
                if once {
                    self.disconnect_positional_inner(&module_name, event, callback, engine);
                }
            }
        }
        results
    }

    /// Keyed emit: only the callback bound to `identifier`, if any, is
    /// invoked per module. A de-duplication guard skips invoking the same
    /// callback handle twice in a row across the iteration.
    pub fn emit_keyed(&mut self, event: &str, identifier: &str, args: &EventArgs, engine: &mut dyn ScriptEngine) {
        let module_names = self.keyed_index.get(event).cloned().unwrap_or_default();
        let mut last: Option<CallbackHandle> = None;
        for module_name in module_names {
            let callback = match self.modules.get(&module_name) {
                Some(m) => m.keyed_callback(event, identifier),
                None => continue,
            };
            let callback = match callback {
                Some(cb) => cb,
                None => continue,
            };
            if last == Some(callback) {
                continue;
            }
            let sandbox = match self.modules.get(&module_name) {
                Some(m) => m.sandbox,
                None => continue,
            };
            engine.invoke_no_ret(sandbox, callback, args);
            last = Some(callback);

            let once = self
                .modules
                .get(&module_name)
                .map(|m| m.is_once_keyed(event, identifier))
                .unwrap_or(false);
            if once {
                self.disconnect_identifier_inner(&module_name, event, identifier, engine);
            }
        }
    }

    /// Invokes with a pre-built table reference and returns the minimum of
    /// the integer results, used for veto/priority decisions. `None` if
    /// nothing responded.
    pub fn emit_by_table_ref(
        &mut self,
        event: &str,
        table_ref: i64,
        engine: &mut dyn ScriptEngine,
    ) -> Option<i64> {
        let module_names = self.positional_index.get(event).cloned().unwrap_or_default();
        let mut min: Option<i64> = None;
        for module_name in module_names {
            let callbacks = match self.modules.get(&module_name) {
                Some(m) => m.positional_callbacks(event),
                None => continue,
            };
            for callback in callbacks {
                let sandbox = match self.modules.get(&module_name) {
                    Some(m) => m.sandbox,
                    None => continue,
                };
                if let Some(v) = engine.invoke_table_ref(sandbox, callback, table_ref) {
                    min = Some(min.map_or(v, |cur| cur.min(v)));
                }

                let once = self.modules.get(&module_name).map(|m| m.is_once(callback)).unwrap_or(false);
                if once {
                    self.disconnect_positional_inner(&module_name, event, callback, engine);
                }
            }
        }
        min
    }

    pub fn remove_all_connections_by_id(&mut self, identifier: &str, engine: &mut dyn ScriptEngine) {
        let module_names: Vec<String> = self.modules.keys().cloned().collect();
        for module_name in module_names {
            let events = match self.modules.get(&module_name) {
                Some(m) => m.keyed_events_for_identifier(identifier),
                None => continue,
            };
            for event in events {
                self.disconnect_identifier_inner(&module_name, &event, identifier, engine);
            }
        }
    }

    fn free_connections(&mut self, module_name: &str, engine: &mut dyn ScriptEngine) {
        let (positional, keyed) = match self.modules.get(module_name) {
            Some(m) => m.all_bindings(),
            None => return,
        };
        for (event, callback) in positional {
            self.disconnect_positional_inner(module_name, &event, callback, engine);
        }
        for (event, identifier) in keyed {
            self.disconnect_identifier_inner(module_name, &event, &identifier, engine);
        }
    }

    pub fn load_module(
        &mut self,
        name: &str,
        manifest: &ModuleManifest,
        engine: &mut dyn ScriptEngine,
    ) -> Result<(), String> {
        for dep in &manifest.dependencies {
            if !self.modules.contains_key(dep) {
                return Err(format!("module '{}' depends on unloaded module '{}'", name, dep));
            }
        }

        let sandbox = engine.new_sandbox();
        if let Some(const_file) = &manifest.const_file {
            engine.load_file(sandbox, const_file)?;
        }
        for file in &manifest.files {
            engine.load_file(sandbox, file)?;
        }
        engine.call_init(sandbox);

        self.modules
            .insert(name.to_string(), Module::new(name, sandbox, manifest.dependencies.clone()));

        let args: EventArgs = vec![("name", ScriptValue::Str(name.to_string()))];
        self.emit_no_ret("onLoadModule", &args, engine);
        Ok(())
    }

    pub fn unload_module(&mut self, name: &str, engine: &mut dyn ScriptEngine) {
        if let Some(module) = self.modules.get(name) {
            engine.call_terminate(module.sandbox);
        }
        self.free_connections(name, engine);
        self.modules.shift_remove(name);
    }
}
