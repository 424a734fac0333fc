//! `MessageMap` (§4.4): the loaded catalog, resolving messages by name
//! and by observed wire bytes, and owning the condition DAG.

use super::condition::ConditionGraph;
use super::key;
use super::{Direction, Message};
use crate::error::{Error, Result};
use crate::symbol::{MasterSymbols, Symbol};
use std::collections::HashMap;

/// `(circuit, name, write?)` — the lookup-by-name identity (§4.4,
/// "Message lookup and derivation").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NameKey {
    circuit: String,
    name: String,
    is_write: bool,
}

/// Maximum id length honored when building lookup keys, matching the
/// upstream default (three id bytes plus PB/SB).
const MAX_ID_LENGTH: usize = 4;

/// The loaded message catalog.
#[derive(Default)]
pub struct MessageMap {
    by_key: HashMap<u64, Message>,
    by_name: HashMap<NameKey, u64>,
    conditions: ConditionGraph,
}

impl MessageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message definition, indexing it by both its identity key
    /// and its `(circuit, name)`.
    pub fn insert(&mut self, message: Message) -> Result<()> {
        let def = message.def();
        let key = def.key();
        if self.by_key.contains_key(&key) {
            return Err(Error::Duplicate(format!("{}.{} collides on key {key:#x}", def.circuit, def.name)));
        }
        let name_key = NameKey {
            circuit: def.circuit.clone(),
            name: def.name.clone(),
            is_write: def.is_write(),
        };
        self.by_name.insert(name_key, key);
        self.by_key.insert(key, message);
        Ok(())
    }

    /// Validate that every registered condition forms a DAG; call once
    /// after loading a catalog, before it is used for lookups.
    pub fn check_conditions(&self) -> Result<()> {
        self.conditions.check_acyclic()
    }

    /// Register `owner`'s condition for DAG checking (called by the CSV
    /// loader as conditions are parsed).
    pub fn register_condition(&mut self, owner: impl Into<String>, condition: &super::Condition) {
        self.conditions.register(owner, condition);
    }

    /// Look up a message directly by its identity key (e.g. to resolve a
    /// poll entry back to its message).
    pub fn by_key(&self, key: u64) -> Option<&Message> {
        self.by_key.get(&key)
    }

    /// Look up a message by `(circuit, name, is_write)`.
    pub fn by_name(&self, circuit: &str, name: &str, is_write: bool) -> Option<&Message> {
        let name_key = NameKey {
            circuit: circuit.to_string(),
            name: name.to_string(),
            is_write,
        };
        self.by_name.get(&name_key).and_then(|key| self.by_key.get(key))
    }

    /// Look up the message matching a received master telegram, trying
    /// every source-class/id-length combination from longest to
    /// shortest, per §4.4's "iteratively shortens" lookup rule.
    pub fn by_wire(&self, master: &MasterSymbols) -> Option<&Message> {
        key::lookup_keys(master, MAX_ID_LENGTH)
            .into_iter()
            .find_map(|key| self.by_key.get(&key))
    }

    /// Look up a message mutably by its identity key (used by the
    /// dispatcher to store a just-completed exchange).
    pub fn by_wire_mut(&mut self, master: &MasterSymbols) -> Option<&mut Message> {
        let key = key::lookup_keys(master, MAX_ID_LENGTH)
            .into_iter()
            .find(|key| self.by_key.contains_key(key))?;
        self.by_key.get_mut(&key)
    }

    /// All messages with `priority > 0` eligible for polling.
    pub fn pollable(&self) -> impl Iterator<Item = &Message> {
        self.by_key.values().filter(|m| {
            matches!(m.def().direction, Direction::Read { poll_priority } if poll_priority > 0)
        })
    }

    /// Every message whose `last_change_time` falls within
    /// `(since, until]`, for a listener's windowed change notification
    /// (§4.5, "Cache and notifications").
    pub fn changed_between(&self, since: std::time::Instant, until: std::time::Instant) -> Vec<&Message> {
        self.by_key
            .values()
            .filter(|m| match m.last_change_time() {
                Some(t) => t > since && t <= until,
                None => false,
            })
            .collect()
    }

    /// Derive `template` (a message with `dst == SYN`) to a concrete
    /// destination and insert the derivation as its own catalog entry,
    /// returning its key.
    pub fn derive(&mut self, template_key: u64, dst: Symbol) -> Result<u64> {
        let template = self
            .by_key
            .get(&template_key)
            .ok_or_else(|| Error::NotFound(format!("no template at key {template_key:#x}")))?;
        let derived = template.derive(dst);
        let key = derived.def().key();
        self.by_key.insert(key, derived);
        Ok(key)
    }

    /// Number of distinct messages currently held.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
