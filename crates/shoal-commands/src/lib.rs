pub mod command;
pub mod context;
pub mod marshal;
pub mod notifier;
pub mod payload;
pub mod read;
pub mod tx;
pub mod write;

pub use command::{Command, CommandKind, CommandResult};
pub use context::{InvocationContext, Origin, VersionedEntry};
pub use marshal::{decode, encode, Param, WireCommand};
pub use notifier::{CacheNotifier, Notification, NoopNotifier, RecordingNotifier, TracingNotifier};
pub use payload::{Delta, Payload};
pub use read::{ClusteredGetCommand, GetKeyValueCommand};
pub use tx::{CommitCommand, GlobalTransaction, PrepareCommand, RollbackCommand, TxCompletionNotificationCommand};
pub use write::{ClearCommand, PutKeyValueCommand, PutMapCommand, RemoveCommand, ReplaceCommand};
