//! Medium registry (§3 "Medium", §4.2).
//!
//! A naive port would tie every pipeline object (`Medium`) to its owning
//! `UsageEnvironment` through a raw back-pointer, with the environment
//! in turn owning a linked list of mediums for name lookup. Reproducing
//! that in safe Rust would mean cyclic `Rc`/reference-counted
//! back-pointers between sources, filters, sinks and the environment that
//! created them.
//!
//! Instead this registry is *arena-like*: every medium is registered
//! under an opaque [`MediumId`] handle, and pipeline objects refer to
//! each other by handle rather than by pointer (§9 "Cyclic ownership").
//! `close` releases the slot; there is no shared ownership to untangle.

use std::any::Any;
use std::collections::HashMap;

use crate::error::{EngineError, Result};

/// Opaque handle to a registered medium. Stable for the medium's lifetime;
/// reused slots get a fresh id, never a recycled one, so a stale id looked
/// up after `close` reliably misses rather than aliasing a new medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MediumId(u64);

struct Entry {
    name: String,
    type_tag: &'static str,
    value: Box<dyn Any>,
}

/// Process-scoped (really: per-[`Environment`](crate::env::Environment))
/// table of named media objects (§4.2).
///
/// Lookups are name-based for the RTSP/API surface but internal
/// cross-references between pipeline objects should prefer [`MediumId`]
/// over going back through a name string.
#[derive(Default)]
pub struct Registry {
    next_id: u64,
    anon_counters: HashMap<&'static str, u64>,
    entries: HashMap<MediumId, Entry>,
    names: HashMap<String, MediumId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new medium, generating a name of the form `"<type_tag><n>"`
    /// when `name` is `None` (§4.2: "Names are generated by a per-environment
    /// counter with a type-tag prefix when unspecified").
    pub fn register<T: Any>(
        &mut self,
        type_tag: &'static str,
        name: Option<String>,
        value: T,
    ) -> MediumId {
        let id = MediumId(self.next_id);
        self.next_id += 1;

        let name = name.unwrap_or_else(|| {
            let counter = self.anon_counters.entry(type_tag).or_insert(0);
            let generated = format!("{type_tag}{counter}");
            *counter += 1;
            generated
        });

        tracing::debug!(medium_id = id.0, %name, type_tag, "medium registered");
        self.names.insert(name.clone(), id);
        self.entries.insert(
            id,
            Entry {
                name,
                type_tag,
                value: Box::new(value),
            },
        );
        id
    }

    /// Remove a medium from the registry. Idempotent: closing an id that
    /// is absent (already closed, or never registered) is a no-op and
    /// returns `false` (§3 invariant: `close` is idempotent).
    pub fn close(&mut self, id: MediumId) -> bool {
        match self.entries.remove(&id) {
            Some(entry) => {
                self.names.remove(&entry.name);
                tracing::debug!(medium_id = id.0, name = %entry.name, "medium closed");
                true
            }
            None => false,
        }
    }

    pub fn id_for_name(&self, name: &str) -> Option<MediumId> {
        self.names.get(name).copied()
    }

    pub fn type_tag(&self, id: MediumId) -> Option<&'static str> {
        self.entries.get(&id).map(|e| e.type_tag)
    }

    pub fn name(&self, id: MediumId) -> Option<&str> {
        self.entries.get(&id).map(|e| e.name.as_str())
    }

    /// Typed lookup by id. Returns `None` if the id is stale/closed or the
    /// stored value isn't a `T` (the type-predicate check from §4.2).
    pub fn get<T: Any>(&self, id: MediumId) -> Option<&T> {
        self.entries.get(&id)?.value.downcast_ref::<T>()
    }

    pub fn get_mut<T: Any>(&mut self, id: MediumId) -> Option<&mut T> {
        self.entries.get_mut(&id)?.value.downcast_mut::<T>()
    }

    /// Typed lookup by name, combining `id_for_name` + `get` (§4.2
    /// `lookup`), but surfaced as a typed error rather than a plain
    /// `Option`: this is the entry point the RTSP/API surface calls with
    /// a caller-supplied name, so a miss should say *why* — no such
    /// name ([`EngineError::NotFound`]) versus wrong concrete type
    /// ([`EngineError::WrongKind`]) — rather than collapsing both into
    /// `None`. The id-based [`get`](Self::get)/[`get_mut`](Self::get_mut)
    /// stay `Option`-returning since their callers already hold a
    /// `MediumId` just handed back by `register`, where a miss can only
    /// mean the medium was since closed.
    pub fn lookup<T: Any>(&self, name: &str) -> Result<&T> {
        let id = self
            .id_for_name(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        let entry = self.entries.get(&id).expect("id_for_name only returns live ids");
        entry
            .value
            .downcast_ref::<T>()
            .ok_or(EngineError::WrongKind(name.to_string(), entry.type_tag))
    }

    pub fn lookup_mut<T: Any>(&mut self, name: &str) -> Result<&mut T> {
        let id = self
            .id_for_name(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        let entry = self.entries.get_mut(&id).expect("id_for_name only returns live ids");
        let type_tag = entry.type_tag;
        entry
            .value
            .downcast_mut::<T>()
            .ok_or(EngineError::WrongKind(name.to_string(), type_tag))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_names_are_type_tagged_and_counted() {
        let mut reg = Registry::new();
        let a = reg.register("GroupSocket", None, 1u32);
        let b = reg.register("GroupSocket", None, 2u32);
        assert_eq!(reg.name(a), Some("GroupSocket0"));
        assert_eq!(reg.name(b), Some("GroupSocket1"));
    }

    #[test]
    fn explicit_name_is_used_verbatim() {
        let mut reg = Registry::new();
        let id = reg.register("RtpSink", Some("audio-sink".into()), 7u32);
        assert_eq!(reg.name(id), Some("audio-sink"));
        assert_eq!(reg.lookup::<u32>("audio-sink").unwrap(), &7);
    }

    #[test]
    fn close_is_idempotent_and_lookups_miss_afterward() {
        let mut reg = Registry::new();
        let id = reg.register("GroupSocket", Some("gs".into()), 42u32);
        assert!(reg.close(id));
        assert!(!reg.close(id), "second close must be a no-op, not panic");
        assert!(matches!(reg.lookup::<u32>("gs"), Err(EngineError::NotFound(_))));
        assert!(reg.get::<u32>(id).is_none());
    }

    #[test]
    fn typed_lookup_rejects_wrong_kind() {
        let mut reg = Registry::new();
        let id = reg.register("GroupSocket", Some("gs".into()), 42u32);
        assert!(reg.get::<String>(id).is_none());
        assert_eq!(reg.get::<u32>(id), Some(&42));
    }

    #[test]
    fn named_lookup_of_missing_name_is_not_found() {
        let reg = Registry::new();
        assert!(matches!(reg.lookup::<u32>("nope"), Err(EngineError::NotFound(name)) if name == "nope"));
    }

    #[test]
    fn named_lookup_of_wrong_type_is_wrong_kind() {
        let mut reg = Registry::new();
        reg.register("GroupSocket", Some("gs".into()), 42u32);
        let err = reg.lookup::<String>("gs").unwrap_err();
        assert!(matches!(err, EngineError::WrongKind(name, tag) if name == "gs" && tag == "GroupSocket"));

        let err = reg.lookup_mut::<String>("gs").unwrap_err();
        assert!(matches!(err, EngineError::WrongKind(name, tag) if name == "gs" && tag == "GroupSocket"));
    }

    #[test]
    fn stale_id_after_reregistration_does_not_alias() {
        let mut reg = Registry::new();
        let id1 = reg.register("GroupSocket", Some("gs".into()), 1u32);
        reg.close(id1);
        let id2 = reg.register("GroupSocket", Some("gs".into()), 2u32);
        assert_ne!(id1, id2);
        assert!(reg.get::<u32>(id1).is_none());
        assert_eq!(reg.get::<u32>(id2), Some(&2));
    }
}
