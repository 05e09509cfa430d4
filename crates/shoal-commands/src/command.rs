use std::fmt;

use shoal_types::{Flag, Flags, Key, ShoalError, Value};

use crate::context::InvocationContext;
use crate::notifier::CacheNotifier;
use crate::read::{ClusteredGetCommand, GetKeyValueCommand};
use crate::tx::{CommitCommand, PrepareCommand, RollbackCommand, TxCompletionNotificationCommand};
use crate::write::{ClearCommand, PutKeyValueCommand, PutMapCommand, RemoveCommand, ReplaceCommand};

/// Outcome of a command. An unsuccessful conditional write is reported here,
/// not as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub successful: bool,
    pub value: Option<Value>,
}

impl CommandResult {
    pub fn ok(value: Option<Value>) -> Self {
        CommandResult { successful: true, value }
    }

    pub fn unsuccessful(value: Option<Value>) -> Self {
        CommandResult { successful: false, value }
    }

    pub fn empty() -> Self {
        Self::ok(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Get,
    ClusteredGet,
    Put,
    PutMap,
    Remove,
    Replace,
    Clear,
    Prepare,
    Commit,
    Rollback,
    TxCompletion,
}

impl CommandKind {
    pub fn is_write(self) -> bool {
        matches!(
            self,
            CommandKind::Put
                | CommandKind::PutMap
                | CommandKind::Remove
                | CommandKind::Replace
                | CommandKind::Clear
        )
    }

    pub fn is_transactional(self) -> bool {
        matches!(
            self,
            CommandKind::Prepare
                | CommandKind::Commit
                | CommandKind::Rollback
                | CommandKind::TxCompletion
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::Get => "get",
            CommandKind::ClusteredGet => "clustered-get",
            CommandKind::Put => "put",
            CommandKind::PutMap => "put-map",
            CommandKind::Remove => "remove",
            CommandKind::Replace => "replace",
            CommandKind::Clear => "clear",
            CommandKind::Prepare => "prepare",
            CommandKind::Commit => "commit",
            CommandKind::Rollback => "rollback",
            CommandKind::TxCompletion => "tx-completion",
        };
        f.write_str(name)
    }
}

/// Closed set of operations understood by the grid.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get(GetKeyValueCommand),
    ClusteredGet(ClusteredGetCommand),
    Put(PutKeyValueCommand),
    PutMap(PutMapCommand),
    Remove(RemoveCommand),
    Replace(ReplaceCommand),
    Clear(ClearCommand),
    Prepare(PrepareCommand),
    Commit(CommitCommand),
    Rollback(RollbackCommand),
    TxCompletion(TxCompletionNotificationCommand),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Get(_) => CommandKind::Get,
            Command::ClusteredGet(_) => CommandKind::ClusteredGet,
            Command::Put(_) => CommandKind::Put,
            Command::PutMap(_) => CommandKind::PutMap,
            Command::Remove(_) => CommandKind::Remove,
            Command::Replace(_) => CommandKind::Replace,
            Command::Clear(_) => CommandKind::Clear,
            Command::Prepare(_) => CommandKind::Prepare,
            Command::Commit(_) => CommandKind::Commit,
            Command::Rollback(_) => CommandKind::Rollback,
            Command::TxCompletion(_) => CommandKind::TxCompletion,
        }
    }

    pub fn command_id(&self) -> u8 {
        match self {
            Command::Get(_) => GetKeyValueCommand::COMMAND_ID,
            Command::ClusteredGet(_) => ClusteredGetCommand::COMMAND_ID,
            Command::Put(_) => PutKeyValueCommand::COMMAND_ID,
            Command::PutMap(_) => PutMapCommand::COMMAND_ID,
            Command::Remove(_) => RemoveCommand::COMMAND_ID,
            Command::Replace(_) => ReplaceCommand::COMMAND_ID,
            Command::Clear(_) => ClearCommand::COMMAND_ID,
            Command::Prepare(_) => PrepareCommand::COMMAND_ID,
            Command::Commit(_) => CommitCommand::COMMAND_ID,
            Command::Rollback(_) => RollbackCommand::COMMAND_ID,
            Command::TxCompletion(_) => TxCompletionNotificationCommand::COMMAND_ID,
        }
    }

    /// Single target key, if the command has one.
    pub fn key(&self) -> Option<&Key> {
        match self {
            Command::Get(c) => Some(&c.key),
            Command::ClusteredGet(c) => Some(&c.key),
            Command::Put(c) => Some(&c.key),
            Command::Remove(c) => Some(&c.key),
            Command::Replace(c) => Some(&c.key),
            Command::PutMap(_)
            | Command::Clear(_)
            | Command::Prepare(_)
            | Command::Commit(_)
            | Command::Rollback(_)
            | Command::TxCompletion(_) => None,
        }
    }

    /// Every key the command writes or reads, deduplicated and sorted.
    pub fn affected_keys(&self) -> Vec<Key> {
        let mut keys = match self {
            Command::PutMap(c) => c.map.keys().cloned().collect(),
            Command::Prepare(c) => c.modifications.iter().flat_map(Command::affected_keys).collect(),
            other => other.key().cloned().into_iter().collect::<Vec<_>>(),
        };
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn flags(&self) -> Option<&Flags> {
        match self {
            Command::Get(c) => Some(&c.flags),
            Command::ClusteredGet(c) => Some(&c.flags),
            Command::Put(c) => Some(&c.flags),
            Command::PutMap(c) => Some(&c.flags),
            Command::Remove(c) => Some(&c.flags),
            Command::Replace(c) => Some(&c.flags),
            Command::Clear(c) => Some(&c.flags),
            Command::Prepare(_) | Command::Commit(_) | Command::Rollback(_) | Command::TxCompletion(_) => None,
        }
    }

    pub fn flags_mut(&mut self) -> Option<&mut Flags> {
        match self {
            Command::Get(c) => Some(&mut c.flags),
            Command::ClusteredGet(c) => Some(&mut c.flags),
            Command::Put(c) => Some(&mut c.flags),
            Command::PutMap(c) => Some(&mut c.flags),
            Command::Remove(c) => Some(&mut c.flags),
            Command::Replace(c) => Some(&mut c.flags),
            Command::Clear(c) => Some(&mut c.flags),
            Command::Prepare(_) | Command::Commit(_) | Command::Rollback(_) | Command::TxCompletion(_) => None,
        }
    }

    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags().map(|f| f.contains(flag)).unwrap_or(false)
    }

    /// Adds `flag` where the command carries flags; transaction commands ignore it.
    pub fn add_flag(&mut self, flag: Flag) {
        if let Some(flags) = self.flags_mut() {
            flags.insert(flag);
        }
    }

    pub fn is_write(&self) -> bool {
        self.kind().is_write()
    }

    /// Outcome of the last `perform`; commands without a precondition always succeed.
    pub fn is_successful(&self) -> bool {
        match self {
            Command::Put(c) => c.successful,
            Command::Remove(c) => c.successful,
            Command::Replace(c) => c.successful,
            Command::Get(_)
            | Command::ClusteredGet(_)
            | Command::PutMap(_)
            | Command::Clear(_)
            | Command::Prepare(_)
            | Command::Commit(_)
            | Command::Rollback(_)
            | Command::TxCompletion(_) => true,
        }
    }

    /// Apply the command to the working entries of `ctx`.
    pub fn perform(
        &mut self,
        ctx: &mut InvocationContext,
        notifier: &dyn CacheNotifier,
    ) -> Result<CommandResult, ShoalError> {
        match self {
            Command::Get(c) => Ok(c.perform(ctx)),
            Command::ClusteredGet(c) => Ok(c.perform(ctx)),
            Command::Put(c) => c.perform(ctx, notifier),
            Command::PutMap(c) => Ok(c.perform(ctx, notifier)),
            Command::Remove(c) => Ok(c.perform(ctx, notifier)),
            Command::Replace(c) => Ok(c.perform(ctx, notifier)),
            Command::Clear(c) => Ok(c.perform(ctx, notifier)),
            Command::Prepare(_) | Command::Commit(_) | Command::Rollback(_) | Command::TxCompletion(_) => {
                Ok(CommandResult::empty())
            }
        }
    }
}

macro_rules! impl_from_command {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Command {
                fn from(c: $ty) -> Self {
                    Command::$variant(c)
                }
            }
        )*
    };
}

impl_from_command! {
    Get => GetKeyValueCommand,
    ClusteredGet => ClusteredGetCommand,
    Put => PutKeyValueCommand,
    PutMap => PutMapCommand,
    Remove => RemoveCommand,
    Replace => ReplaceCommand,
    Clear => ClearCommand,
    Prepare => PrepareCommand,
    Commit => CommitCommand,
    Rollback => RollbackCommand,
    TxCompletion => TxCompletionNotificationCommand,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::GlobalTransaction;
    use shoal_types::Address;
    use std::collections::BTreeMap;

    #[test]
    fn command_ids_are_stable() {
        let gtx = GlobalTransaction::new(Address::new("a"));
        let ids: Vec<u8> = vec![
            Command::from(GetKeyValueCommand::new("k")),
            ClearCommand::new().into(),
            PutKeyValueCommand::new("k", b"v".to_vec()).into(),
            PutMapCommand::new(BTreeMap::new()).into(),
            RemoveCommand::new("k").into(),
            ReplaceCommand::new("k", b"v".to_vec()).into(),
            PrepareCommand::new(gtx.clone(), vec![], false).into(),
            RollbackCommand::new(gtx.clone()).into(),
            CommitCommand::new(gtx.clone()).into(),
            ClusteredGetCommand::new("k").into(),
            TxCompletionNotificationCommand::new(gtx).into(),
        ]
        .iter()
        .map(Command::command_id)
        .collect();
        assert_eq!(ids, vec![4, 5, 8, 9, 10, 11, 12, 13, 14, 16, 22]);
    }

    #[test]
    fn prepare_affected_keys_are_sorted_union() {
        let gtx = GlobalTransaction::new(Address::new("a"));
        let mods = vec![
            PutKeyValueCommand::new("b", b"1".to_vec()).into(),
            PutMapCommand::new(BTreeMap::from([
                ("c".to_string(), b"2".to_vec()),
                ("a".to_string(), b"3".to_vec()),
            ]))
            .into(),
            RemoveCommand::new("b").into(),
        ];
        let prepare = Command::from(PrepareCommand::new(gtx, mods, false));
        assert_eq!(prepare.affected_keys(), vec!["a", "b", "c"]);
        assert!(prepare.key().is_none());
    }

    #[test]
    fn add_flag_is_ignored_by_tx_commands() {
        let mut commit = Command::from(CommitCommand::new(GlobalTransaction::new(Address::new("a"))));
        commit.add_flag(Flag::CacheModeLocal);
        assert!(!commit.has_flag(Flag::CacheModeLocal));

        let mut put = Command::from(PutKeyValueCommand::new("k", b"v".to_vec()));
        put.add_flag(Flag::CacheModeLocal);
        assert!(put.has_flag(Flag::CacheModeLocal));
    }
}
