//! C6: the shared variable store, grounded on
//! `original_source/src/hub/var.c`'s `Hub_Var_setValue`/`addSubscriber`/
//! `deleteSubscriber` and spec.md §4.6.
//!
//! Each variable is guarded by its own `RwLock` (spec.md §5 lock ordering:
//! a session's own state is always acquired before any variable lock, and
//! variables are never locked two at a time in a path that could race with
//! another thread's opposite order).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, bail};

use crate::config::VarDef;
use crate::session::Session;

struct VarState {
    value: f64,
    subscribers: Vec<Arc<Session>>,
}

pub struct Variable {
    pub name: String,
    pub persistent: bool,
    pub readonly: bool,
    state: RwLock<VarState>,
}

impl Variable {
    fn new(def: &VarDef, initial: f64) -> Variable {
        Variable {
            name: def.name.clone(),
            persistent: def.persistent,
            readonly: def.readonly,
            state: RwLock::new(VarState { value: initial, subscribers: Vec::new() }),
        }
    }

    pub fn get(&self) -> f64 {
        self.state.read().unwrap_or_else(|p| p.into_inner()).value
    }

    /// Set the value and return the current subscriber list so the caller
    /// can fan a `WATCH` update out to each one after releasing this lock.
    fn set(&self, value: f64) -> Vec<Arc<Session>> {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        state.value = value;
        state.subscribers.clone()
    }

    fn add_subscriber(&self, session: &Arc<Session>) {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        if !state.subscribers.iter().any(|s| Arc::ptr_eq(s, session)) {
            state.subscribers.push(Arc::clone(session));
        }
    }

    fn remove_subscriber(&self, session: &Arc<Session>) {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        state.subscribers.retain(|s| !Arc::ptr_eq(s, session));
    }
}

/// Format a value for the wire (`VAR.VALUE`/`WATCH` updates): six decimal
/// places, matching spec.md §4.6/§6's `"%f"`. The persistence file uses a
/// different, four-decimal format — see `persist::flush`.
pub fn format_wire_value(value: f64) -> String {
    format!("{:.6}", value)
}

pub struct VarStore {
    vars: HashMap<String, Arc<Variable>>,
}

impl VarStore {
    /// Build the store from a set of definitions, with initial values taken
    /// from `persisted` where present and falling back to each variable's
    /// configured default otherwise.
    pub fn new(defs: &[VarDef], persisted: &HashMap<String, f64>) -> VarStore {
        let mut vars = HashMap::with_capacity(defs.len());
        for def in defs {
            let initial = persisted.get(&def.name).copied().unwrap_or(def.default);
            vars.insert(def.name.clone(), Arc::new(Variable::new(def, initial)));
        }
        VarStore { vars }
    }

    /// Returns the current value along with whether the variable is
    /// read-only, so callers can render `VAR.VALUE`'s `"RO"`/`"RW"` tag
    /// without a second lookup.
    pub fn get(&self, name: &str) -> anyhow::Result<(f64, bool)> {
        self.vars
            .get(name)
            .map(|v| (v.get(), v.readonly))
            .ok_or_else(|| anyhow!("no such variable ({})", name))
    }

    /// Set `name` to `value`. Fails if the variable doesn't exist or is
    /// read-only — both cases are reported identically to callers that kick
    /// on error, matching `process.c`'s single "Invalid variable access"
    /// message for either condition.
    pub fn set(&self, name: &str, value: f64) -> anyhow::Result<Vec<Arc<Session>>> {
        let var = self
            .vars
            .get(name)
            .ok_or_else(|| anyhow!("invalid variable access ({})", name))?;
        if var.readonly {
            bail!("invalid variable access ({})", name);
        }
        Ok(var.set(value))
    }

    pub fn subscribe(&self, name: &str, session: &Arc<Session>) -> anyhow::Result<()> {
        let var = self.vars.get(name).ok_or_else(|| anyhow!("no such variable ({})", name))?;
        var.add_subscriber(session);
        Ok(())
    }

    /// Unsubscribing an unknown variable name is a no-op: it happens
    /// routinely during teardown if a session named a variable that was
    /// never actually registered.
    pub fn unsubscribe(&self, name: &str, session: &Arc<Session>) {
        if let Some(var) = self.vars.get(name) {
            var.remove_subscriber(session);
        }
    }

    pub fn is_persistent(&self, name: &str) -> bool {
        self.vars.get(name).map(|v| v.persistent).unwrap_or(false)
    }

    /// Snapshot of every persistent variable's current value, for the
    /// persistence writer to flush to disk.
    pub fn persistent_snapshot(&self) -> HashMap<String, f64> {
        self.vars
            .values()
            .filter(|v| v.persistent)
            .map(|v| (v.name.clone(), v.get()))
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }
}
