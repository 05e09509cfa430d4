use shoal_types::{Flag, Flags, Key};

use crate::command::CommandResult;
use crate::context::InvocationContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetKeyValueCommand {
    pub key: Key,
    pub flags: Flags,
}

impl GetKeyValueCommand {
    pub const COMMAND_ID: u8 = 4;

    pub fn new(key: impl Into<Key>) -> Self {
        GetKeyValueCommand { key: key.into(), flags: Flags::new() }
    }

    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.flags.insert(flag);
        self
    }

    pub(crate) fn perform(&self, ctx: &InvocationContext) -> CommandResult {
        CommandResult::ok(read_visible(ctx, &self.key))
    }
}

/// Read issued by a non-owner to the owners of `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusteredGetCommand {
    pub key: Key,
    pub flags: Flags,
}

impl ClusteredGetCommand {
    pub const COMMAND_ID: u8 = 16;

    pub fn new(key: impl Into<Key>) -> Self {
        ClusteredGetCommand { key: key.into(), flags: Flags::new() }
    }

    /// Local read executed by the owner on behalf of the requester.
    pub fn to_local_get(&self) -> GetKeyValueCommand {
        GetKeyValueCommand {
            key: self.key.clone(),
            flags: self.flags.clone().with(Flag::CacheModeLocal),
        }
    }

    pub(crate) fn perform(&self, ctx: &InvocationContext) -> CommandResult {
        CommandResult::ok(read_visible(ctx, &self.key))
    }
}

fn read_visible(ctx: &InvocationContext, key: &str) -> Option<shoal_types::Value> {
    ctx.lookup_entry(key)
        .and_then(|e| e.visible_value())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::VersionedEntry;
    use shoal_types::Metadata;

    #[test]
    fn get_reads_the_working_entry() {
        let mut ctx = InvocationContext::local();
        ctx.put_entry(VersionedEntry::new("k".into(), Some(b"v".to_vec()), Metadata::default()));
        let r = GetKeyValueCommand::new("k").perform(&ctx);
        assert_eq!(r, CommandResult::ok(Some(b"v".to_vec())));
        assert_eq!(GetKeyValueCommand::new("other").perform(&ctx), CommandResult::ok(None));
    }

    #[test]
    fn clustered_get_becomes_local_get() {
        let get = ClusteredGetCommand::new("k").to_local_get();
        assert_eq!(get.key, "k");
        assert!(get.flags.contains(Flag::CacheModeLocal));
    }
}
