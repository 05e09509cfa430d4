use parking_lot::Mutex;

use shoal_types::{Key, Value};

use crate::command::CommandKind;
use crate::context::InvocationContext;

/// Receives entry-level change events from `perform`.
///
/// Called once per successful mutation, before the new value is written to the
/// working entry (`pre == true`). Implementations must not block.
pub trait CacheNotifier: Send + Sync {
    fn notify_cache_entry_modified(
        &self,
        key: &Key,
        previous: Option<&Value>,
        is_creation: bool,
        pre: bool,
        ctx: &InvocationContext,
        kind: CommandKind,
    );

    fn notify_cache_entry_removed(
        &self,
        key: &Key,
        previous: Option<&Value>,
        pre: bool,
        ctx: &InvocationContext,
        kind: CommandKind,
    );
}

pub struct NoopNotifier;

impl CacheNotifier for NoopNotifier {
    fn notify_cache_entry_modified(&self, _: &Key, _: Option<&Value>, _: bool, _: bool, _: &InvocationContext, _: CommandKind) {}

    fn notify_cache_entry_removed(&self, _: &Key, _: Option<&Value>, _: bool, _: &InvocationContext, _: CommandKind) {}
}

/// Emits every event at `trace` level.
pub struct TracingNotifier;

impl CacheNotifier for TracingNotifier {
    fn notify_cache_entry_modified(
        &self,
        key: &Key,
        previous: Option<&Value>,
        is_creation: bool,
        pre: bool,
        ctx: &InvocationContext,
        kind: CommandKind,
    ) {
        tracing::trace!(
            %key,
            %kind,
            is_creation,
            pre,
            had_previous = previous.is_some(),
            local = ctx.is_origin_local(),
            "entry modified"
        );
    }

    fn notify_cache_entry_removed(
        &self,
        key: &Key,
        previous: Option<&Value>,
        pre: bool,
        ctx: &InvocationContext,
        kind: CommandKind,
    ) {
        tracing::trace!(
            %key,
            %kind,
            pre,
            had_previous = previous.is_some(),
            local = ctx.is_origin_local(),
            "entry removed"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Modified {
        key: Key,
        previous: Option<Value>,
        is_creation: bool,
        pre: bool,
        kind: CommandKind,
    },
    Removed {
        key: Key,
        previous: Option<Value>,
        pre: bool,
        kind: CommandKind,
    },
}

/// Keeps every event in arrival order.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().clone()
    }
}

impl CacheNotifier for RecordingNotifier {
    fn notify_cache_entry_modified(
        &self,
        key: &Key,
        previous: Option<&Value>,
        is_creation: bool,
        pre: bool,
        _ctx: &InvocationContext,
        kind: CommandKind,
    ) {
        self.events.lock().push(Notification::Modified {
            key: key.clone(),
            previous: previous.cloned(),
            is_creation,
            pre,
            kind,
        });
    }

    fn notify_cache_entry_removed(
        &self,
        key: &Key,
        previous: Option<&Value>,
        pre: bool,
        _ctx: &InvocationContext,
        kind: CommandKind,
    ) {
        self.events.lock().push(Notification::Removed {
            key: key.clone(),
            previous: previous.cloned(),
            pre,
            kind,
        });
    }
}
