use std::collections::BTreeMap;

use shoal_types::{Address, Key, Metadata, Value};

/// Where the command entered this member's pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote(Address),
}

/// Copy-on-write view of one key for the duration of a single operation.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedEntry {
    pub key: Key,
    pub value: Option<Value>,
    /// Value observed when the entry was wrapped.
    pub original: Option<Value>,
    pub metadata: Metadata,
    pub removed: bool,
    pub valid: bool,
    pub changed: bool,
}

impl VersionedEntry {
    pub fn new(key: Key, value: Option<Value>, metadata: Metadata) -> Self {
        VersionedEntry {
            key,
            original: value.clone(),
            value,
            metadata,
            removed: false,
            valid: true,
            changed: false,
        }
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Replace the value and hand back the one it displaced.
    pub fn set_value(&mut self, value: Value) -> Option<Value> {
        self.value.replace(value)
    }

    /// Value as seen by a reader: `None` for removed entries.
    pub fn visible_value(&self) -> Option<&Value> {
        if self.removed {
            None
        } else {
            self.value.as_ref()
        }
    }
}

/// Per-operation working set. Never shared between operations.
#[derive(Debug)]
pub struct InvocationContext {
    origin: Origin,
    entries: BTreeMap<Key, VersionedEntry>,
    /// Keys touched by a transaction command, used to pick its recipients.
    affected_keys: Vec<Key>,
}

impl InvocationContext {
    pub fn new(origin: Origin) -> Self {
        InvocationContext {
            origin,
            entries: BTreeMap::new(),
            affected_keys: Vec::new(),
        }
    }

    pub fn local() -> Self {
        Self::new(Origin::Local)
    }

    pub fn remote(from: Address) -> Self {
        Self::new(Origin::Remote(from))
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn is_origin_local(&self) -> bool {
        matches!(self.origin, Origin::Local)
    }

    pub fn lookup_entry(&self, key: &str) -> Option<&VersionedEntry> {
        self.entries.get(key)
    }

    pub fn lookup_entry_mut(&mut self, key: &str) -> Option<&mut VersionedEntry> {
        self.entries.get_mut(key)
    }

    pub fn put_entry(&mut self, entry: VersionedEntry) {
        self.entries.insert(entry.key.clone(), entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &VersionedEntry> {
        self.entries.values()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut VersionedEntry> {
        self.entries.values_mut()
    }

    pub fn set_affected_keys(&mut self, keys: Vec<Key>) {
        self.affected_keys = keys;
    }

    pub fn affected_keys(&self) -> &[Key] {
        &self.affected_keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_value_returns_displaced_value() {
        let mut e = VersionedEntry::new("k".into(), Some(b"a".to_vec()), Metadata::default());
        assert_eq!(e.set_value(b"b".to_vec()), Some(b"a".to_vec()));
        assert_eq!(e.original, Some(b"a".to_vec()));
        assert_eq!(e.value, Some(b"b".to_vec()));
    }

    #[test]
    fn removed_entries_are_not_visible() {
        let mut e = VersionedEntry::new("k".into(), Some(b"a".to_vec()), Metadata::default());
        e.removed = true;
        assert!(e.visible_value().is_none());
        assert!(!e.is_null());
    }

    #[test]
    fn context_tracks_origin() {
        assert!(InvocationContext::local().is_origin_local());
        let ctx = InvocationContext::remote(Address::new("node-b"));
        assert_eq!(ctx.origin(), &Origin::Remote(Address::new("node-b")));
    }
}
