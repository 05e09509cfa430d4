use std::collections::BTreeMap;

use shoal_types::{Flag, Flags, Key, Metadata, ShoalError, Value};

use crate::command::{CommandKind, CommandResult};
use crate::context::InvocationContext;
use crate::notifier::CacheNotifier;
use crate::payload::{Delta, Payload};

fn notify_modified(
    notifier: &dyn CacheNotifier,
    flags: &Flags,
    key: &Key,
    previous: Option<&Value>,
    ctx: &InvocationContext,
    kind: CommandKind,
) {
    if !flags.contains(Flag::SkipListenerNotification) {
        notifier.notify_cache_entry_modified(key, previous, previous.is_none(), true, ctx, kind);
    }
}

// ---------------------------------------------------------------------------
// Put
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PutKeyValueCommand {
    pub key: Key,
    pub payload: Payload,
    pub metadata: Metadata,
    pub put_if_absent: bool,
    /// Skip the absent-check of a conditional put and never return the prior value.
    pub ignore_previous_value: bool,
    pub flags: Flags,
    pub successful: bool,
}

impl PartialEq for PutKeyValueCommand {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.payload == other.payload
            && self.metadata == other.metadata
            && self.put_if_absent == other.put_if_absent
            && self.ignore_previous_value == other.ignore_previous_value
            && self.flags == other.flags
    }
}

impl PutKeyValueCommand {
    pub const COMMAND_ID: u8 = 8;

    pub fn new(key: impl Into<Key>, value: Value) -> Self {
        Self::with_payload(key, Payload::Full(value), Flags::new())
    }

    pub fn delta(key: impl Into<Key>, delta: Delta) -> Self {
        Self::with_payload(key, Payload::Delta(delta), Flags::of([Flag::DeltaWrite]))
    }

    fn with_payload(key: impl Into<Key>, payload: Payload, flags: Flags) -> Self {
        PutKeyValueCommand {
            key: key.into(),
            payload,
            metadata: Metadata::default(),
            put_if_absent: false,
            ignore_previous_value: false,
            flags,
            successful: true,
        }
    }

    pub fn if_absent(mut self) -> Self {
        self.put_if_absent = true;
        self
    }

    pub fn ignoring_previous_value(mut self) -> Self {
        self.ignore_previous_value = true;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.flags.insert(flag);
        self
    }

    pub(crate) fn perform(
        &mut self,
        ctx: &mut InvocationContext,
        notifier: &dyn CacheNotifier,
    ) -> Result<CommandResult, ShoalError> {
        self.successful = true;

        let Some(entry) = ctx.lookup_entry(&self.key) else {
            // Not wrapped on this member: nothing to apply.
            if self.flags.contains(Flag::PutForExternalRead) {
                self.successful = false;
            }
            return Ok(CommandResult { successful: self.successful, value: None });
        };

        let current = entry.value.clone();
        let was_removed = entry.removed;
        let visible = if was_removed { None } else { current.clone() };

        if self.put_if_absent && !self.ignore_previous_value && visible.is_some() {
            self.successful = false;
            return Ok(CommandResult::unsuccessful(visible));
        }

        let new_value = match &self.payload {
            Payload::Full(v) => v.clone(),
            Payload::Delta(d) => d.merge(visible.as_deref())?,
        };

        notify_modified(notifier, &self.flags, &self.key, visible.as_ref(), ctx, CommandKind::Put);

        let Some(entry) = ctx.lookup_entry_mut(&self.key) else {
            return Ok(CommandResult::empty());
        };
        let previous = entry.set_value(new_value);
        let previous = if was_removed {
            entry.removed = false;
            entry.valid = true;
            None
        } else {
            previous
        };
        entry.metadata = self.metadata;
        entry.changed = true;

        let returned = if self.ignore_previous_value { None } else { previous };
        Ok(CommandResult::ok(returned))
    }
}

// ---------------------------------------------------------------------------
// Remove
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RemoveCommand {
    pub key: Key,
    /// Remove only if the current value equals this one.
    pub value: Option<Value>,
    pub flags: Flags,
    pub successful: bool,
}

impl PartialEq for RemoveCommand {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value == other.value && self.flags == other.flags
    }
}

impl RemoveCommand {
    pub const COMMAND_ID: u8 = 10;

    pub fn new(key: impl Into<Key>) -> Self {
        RemoveCommand { key: key.into(), value: None, flags: Flags::new(), successful: true }
    }

    pub fn if_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.flags.insert(flag);
        self
    }

    pub(crate) fn perform(&mut self, ctx: &mut InvocationContext, notifier: &dyn CacheNotifier) -> CommandResult {
        self.successful = true;
        let current = match ctx.lookup_entry(&self.key) {
            Some(e) if !e.is_null() && !e.removed => e.value.clone(),
            _ => {
                self.successful = false;
                return CommandResult::unsuccessful(None);
            }
        };
        if let Some(expected) = &self.value {
            if current.as_ref() != Some(expected) {
                self.successful = false;
                return CommandResult::unsuccessful(None);
            }
        }

        if !self.flags.contains(Flag::SkipListenerNotification) {
            notifier.notify_cache_entry_removed(&self.key, current.as_ref(), true, ctx, CommandKind::Remove);
        }
        if let Some(entry) = ctx.lookup_entry_mut(&self.key) {
            entry.removed = true;
            entry.valid = false;
            entry.changed = true;
            entry.value = None;
        }
        CommandResult::ok(current)
    }
}

// ---------------------------------------------------------------------------
// Replace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReplaceCommand {
    pub key: Key,
    /// Replace only if the current value equals this one.
    pub old_value: Option<Value>,
    pub new_value: Value,
    pub metadata: Metadata,
    pub flags: Flags,
    pub successful: bool,
}

impl PartialEq for ReplaceCommand {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.old_value == other.old_value
            && self.new_value == other.new_value
            && self.metadata == other.metadata
            && self.flags == other.flags
    }
}

impl ReplaceCommand {
    pub const COMMAND_ID: u8 = 11;

    pub fn new(key: impl Into<Key>, new_value: Value) -> Self {
        ReplaceCommand {
            key: key.into(),
            old_value: None,
            new_value,
            metadata: Metadata::default(),
            flags: Flags::new(),
            successful: true,
        }
    }

    pub fn if_value(mut self, old_value: Value) -> Self {
        self.old_value = Some(old_value);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.flags.insert(flag);
        self
    }

    pub(crate) fn perform(&mut self, ctx: &mut InvocationContext, notifier: &dyn CacheNotifier) -> CommandResult {
        self.successful = true;
        let current = match ctx.lookup_entry(&self.key) {
            Some(e) if !e.is_null() && !e.removed => e.value.clone(),
            _ => {
                self.successful = false;
                return CommandResult::unsuccessful(None);
            }
        };
        if let Some(expected) = &self.old_value {
            if current.as_ref() != Some(expected) {
                self.successful = false;
                return CommandResult::unsuccessful(current);
            }
        }

        notify_modified(notifier, &self.flags, &self.key, current.as_ref(), ctx, CommandKind::Replace);
        let Some(entry) = ctx.lookup_entry_mut(&self.key) else {
            return CommandResult::empty();
        };
        let previous = entry.set_value(self.new_value.clone());
        entry.metadata = self.metadata;
        entry.changed = true;
        CommandResult::ok(previous)
    }
}

// ---------------------------------------------------------------------------
// PutMap
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutMapCommand {
    pub map: BTreeMap<Key, Value>,
    pub metadata: Metadata,
    pub flags: Flags,
}

impl PutMapCommand {
    pub const COMMAND_ID: u8 = 9;

    pub fn new(map: BTreeMap<Key, Value>) -> Self {
        PutMapCommand { map, metadata: Metadata::default(), flags: Flags::new() }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.flags.insert(flag);
        self
    }

    /// Applies every pair whose key is wrapped in `ctx`; other keys belong to other members.
    pub(crate) fn perform(&self, ctx: &mut InvocationContext, notifier: &dyn CacheNotifier) -> CommandResult {
        for (key, value) in &self.map {
            let previous = match ctx.lookup_entry(key) {
                Some(e) => e.visible_value().cloned(),
                None => continue,
            };
            notify_modified(notifier, &self.flags, key, previous.as_ref(), ctx, CommandKind::PutMap);
            if let Some(entry) = ctx.lookup_entry_mut(key) {
                entry.set_value(value.clone());
                entry.metadata = self.metadata;
                entry.removed = false;
                entry.valid = true;
                entry.changed = true;
            }
        }
        CommandResult::empty()
    }
}

// ---------------------------------------------------------------------------
// Clear
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearCommand {
    pub flags: Flags,
}

impl ClearCommand {
    pub const COMMAND_ID: u8 = 5;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.flags.insert(flag);
        self
    }

    /// Marks every wrapped entry removed.
    pub(crate) fn perform(&self, ctx: &mut InvocationContext, notifier: &dyn CacheNotifier) -> CommandResult {
        let live: Vec<(Key, Option<Value>)> = ctx
            .entries()
            .filter(|e| !e.removed)
            .map(|e| (e.key.clone(), e.value.clone()))
            .collect();
        for (key, previous) in live {
            if !self.flags.contains(Flag::SkipListenerNotification) {
                notifier.notify_cache_entry_removed(&key, previous.as_ref(), true, ctx, CommandKind::Clear);
            }
            if let Some(entry) = ctx.lookup_entry_mut(&key) {
                entry.removed = true;
                entry.valid = false;
                entry.changed = true;
                entry.value = None;
            }
        }
        CommandResult::empty()
    }
}
