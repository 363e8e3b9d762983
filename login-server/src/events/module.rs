use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use super::script::{CallbackHandle, SandboxEnv};

/// A named, independently sandboxed handler group.
pub struct Module {
    pub name: String,
    pub sandbox: SandboxEnv,
    pub dependencies: Vec<String>,
    /// event -> ordered callback list
    positional: HashMap<String, Vec<CallbackHandle>>,
    /// event -> (identifier -> callback), insertion order preserved so
    /// `removeAllConnectionsById` and snapshots behave deterministically
    keyed: HashMap<String, IndexMap<String, CallbackHandle>>,
    once_callbacks: HashSet<CallbackHandle>,
    once_keyed: HashMap<String, HashSet<String>>,
}

impl Module {
    pub fn new(name: impl Into<String>, sandbox: SandboxEnv, dependencies: Vec<String>) -> Self {
        Module {
            name: name.into(),
            sandbox,
            dependencies,
            positional: HashMap::new(),
            keyed: HashMap::new(),
            once_callbacks: HashSet::new(),
            once_keyed: HashMap::new(),
        }
    }

    /// Returns `true` if this module had no positional subscribers for
    /// `event` before the call (i.e. the registry's global index needs a
    /// new entry for this module).
    pub fn connect_positional(&mut self, event: &str, callback: CallbackHandle) -> bool {
        let list = self.positional.entry(event.to_string()).or_default();
        let was_empty = list.is_empty();
        list.push(callback);
        was_empty
    }

    /// `Ok(true)` if this was the module's first keyed subscriber for the
    /// event (index needs updating); `Err(())` if the key already exists.
    pub fn connect_keyed(
        &mut self,
        event: &str,
        identifier: &str,
        callback: CallbackHandle,
    ) -> Result<bool, ()> {
        let map = self.keyed.entry(event.to_string()).or_default();
        if map.contains_key(identifier) {
            return Err(());
        }
        let was_empty = map.is_empty();
        map.insert(identifier.to_string(), callback);
        Ok(was_empty)
    }

    pub fn mark_once(&mut self, callback: CallbackHandle) {
        self.once_callbacks.insert(callback);
    }

    pub fn mark_once_keyed(&mut self, event: &str, identifier: &str) {
        self.once_keyed
            .entry(event.to_string())
            .or_default()
            .insert(identifier.to_string());
    }

    pub fn is_once(&self, callback: CallbackHandle) -> bool {
        self.once_callbacks.contains(&callback)
    }

    pub fn is_once_keyed(&self, event: &str, identifier: &str) -> bool {
        self.once_keyed
            .get(event)
            .map(|set| set.contains(identifier))
            .unwrap_or(false)
    }

    pub fn positional_callbacks(&self, event: &str) -> Vec<CallbackHandle> {
        self.positional.get(event).cloned().unwrap_or_default()
    }

    pub fn keyed_callback(&self, event: &str, identifier: &str) -> Option<CallbackHandle> {
        self.keyed.get(event).and_then(|m| m.get(identifier).copied())
    }

    /// Removes `callback` from `event`'s positional list. Returns `true`
    /// if the list became empty (caller must then drop this module from
    /// the positional index for `event`).
    pub fn disconnect_positional(&mut self, event: &str, callback: CallbackHandle) -> bool {
        if let Some(list) = self.positional.get_mut(event) {
            list.retain(|c| *c != callback);
            self.once_callbacks.remove(&callback);
            return list.is_empty();
        }
        false
    }

    /// Removes the keyed callback bound to `identifier` on `event`.
    /// Returns `true` if the keyed map became empty.
    pub fn disconnect_identifier(&mut self, event: &str, identifier: &str) -> bool {
        if let Some(map) = self.keyed.get_mut(event) {
            map.shift_remove(identifier);
            if let Some(set) = self.once_keyed.get_mut(event) {
                set.remove(identifier);
            }
            return map.is_empty();
        }
        false
    }

    /// Every `(event, identifier)` this module currently holds a keyed
    /// subscription for. Used by `removeAllConnectionsById`.
    pub fn keyed_events_for_identifier<'a>(&'a self, identifier: &'a str) -> Vec<String> {
        self.keyed
            .iter()
            .filter(|(_, m)| m.contains_key(identifier))
            .map(|(event, _)| event.clone())
            .collect()
    }

    /// Snapshot of every binding this module owns, for `freeConnections`.
    pub fn all_bindings(&self) -> (Vec<(String, CallbackHandle)>, Vec<(String, String)>) {
        let positional = self
            .positional
            .iter()
            .flat_map(|(event, list)| list.iter().map(move |cb| (event.clone(), *cb)))
            .collect();
        let keyed = self
            .keyed
            .iter()
            .flat_map(|(event, map)| map.keys().map(move |id| (event.clone(), id.clone())))
            .collect();
        (positional, keyed)
    }

    pub fn has_positional(&self, event: &str) -> bool {
        self.positional.get(event).map(|l| !l.is_empty()).unwrap_or(false)
    }

    pub fn has_keyed(&self, event: &str) -> bool {
        self.keyed.get(event).map(|m| !m.is_empty()).unwrap_or(false)
    }
}
