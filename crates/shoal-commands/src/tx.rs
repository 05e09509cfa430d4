use std::fmt;

use shoal_types::Address;

use crate::command::Command;

/// Identity of a transaction: a v4 UUID plus the member that started it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct GlobalTransaction {
    pub id: String,
    pub origin: Address,
}

impl GlobalTransaction {
    pub fn new(origin: Address) -> Self {
        GlobalTransaction { id: uuid::Uuid::new_v4().to_string(), origin }
    }
}

impl fmt::Display for GlobalTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.origin)
    }
}

/// First phase: ship the modifications and validate them on every owner.
#[derive(Debug, Clone, PartialEq)]
pub struct PrepareCommand {
    pub gtx: GlobalTransaction,
    pub modifications: Vec<Command>,
    /// Commit immediately after a successful prepare.
    pub one_phase: bool,
}

impl PrepareCommand {
    pub const COMMAND_ID: u8 = 12;

    pub fn new(gtx: GlobalTransaction, modifications: Vec<Command>, one_phase: bool) -> Self {
        PrepareCommand { gtx, modifications, one_phase }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitCommand {
    pub gtx: GlobalTransaction,
}

impl CommitCommand {
    pub const COMMAND_ID: u8 = 14;

    pub fn new(gtx: GlobalTransaction) -> Self {
        CommitCommand { gtx }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackCommand {
    pub gtx: GlobalTransaction,
}

impl RollbackCommand {
    pub const COMMAND_ID: u8 = 13;

    pub fn new(gtx: GlobalTransaction) -> Self {
        RollbackCommand { gtx }
    }
}

/// Tells owners that the originator is done with `gtx` so they can drop its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxCompletionNotificationCommand {
    pub gtx: GlobalTransaction,
}

impl TxCompletionNotificationCommand {
    pub const COMMAND_ID: u8 = 22;

    pub fn new(gtx: GlobalTransaction) -> Self {
        TxCompletionNotificationCommand { gtx }
    }
}
