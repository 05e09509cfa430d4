use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use shoal_commands::{
    ClusteredGetCommand, Command, CommandResult, InvocationContext, Payload, PutKeyValueCommand, RemoveCommand,
    VersionedEntry,
};
use shoal_partition::TopologyManager;
use shoal_remoting::{Response, ResponseMode, RpcManager, RpcOptions, Transport};
use shoal_types::{Address, Flag, Flags, Key, Metadata, ShoalError, Value};

use crate::config::CacheConfig;
use crate::convert::response_to_result;
use crate::interceptor::{Interceptor, Next};

/// Routes commands to the owners of their keys.
///
/// A single-key write runs on the primary owner first and is then replicated
/// to the backups as a local-only, unconditional command. Writes issued on a
/// non-owner are forwarded to the primary. Reads of keys this member does not
/// own are fetched from the owners before the local read runs.
pub struct DistributionInterceptor<T> {
    rpc: Arc<RpcManager<T>>,
    topology: Arc<TopologyManager>,
    local: Address,
    config: CacheConfig,
}

impl<T: Transport> DistributionInterceptor<T> {
    pub fn new(rpc: Arc<RpcManager<T>>, topology: Arc<TopologyManager>, config: CacheConfig) -> Self {
        let local = rpc.address().clone();
        DistributionInterceptor { rpc, topology, local, config }
    }

    fn owners(&self, key: &str) -> Vec<Address> {
        self.topology.current().ch.locate_owners(key).to_vec()
    }

    /// Owners of `keys` other than this member.
    fn remote_owners<'k>(&self, keys: impl IntoIterator<Item = &'k Key>) -> Vec<Address> {
        let topology = self.topology.current();
        let set: BTreeSet<Address> = keys
            .into_iter()
            .flat_map(|k| topology.ch.locate_owners(k).to_vec())
            .filter(|a| a != &self.local)
            .collect();
        set.into_iter().collect()
    }

    fn replication_options(&self, flags: Option<&Flags>) -> RpcOptions {
        let forced = |f| flags.map(|fl| fl.contains(f)).unwrap_or(false);
        let sync = if forced(Flag::ForceAsynchronous) {
            false
        } else {
            forced(Flag::ForceSynchronous) || self.config.sync_replication
        };
        if sync {
            RpcOptions::synchronous(self.config.remote_timeout())
        } else {
            RpcOptions::asynchronous()
        }
    }

    async fn send(&self, recipients: &[Address], cmd: &Command, options: &RpcOptions) -> Result<(), ShoalError> {
        if recipients.is_empty() {
            return Ok(());
        }
        self.rpc.invoke_remotely(Some(recipients), cmd, options).await?;
        Ok(())
    }

    /// Send `backup` to every backup owner. Synchronously, a backup that does
    /// not acknowledge fails the write: the backups that did apply it get
    /// `previous` back, and the primary never commits its own copy.
    async fn replicate(
        &self,
        key: &Key,
        backups: &[Address],
        backup: &Command,
        previous: Option<(Option<Value>, Metadata)>,
        flags: Option<&Flags>,
    ) -> Result<(), ShoalError> {
        let options = self.replication_options(flags);
        if backups.is_empty() || !options.mode.is_synchronous() {
            return self.send(backups, backup, &options).await;
        }

        let calls = backups
            .iter()
            .map(|b| self.rpc.invoke_remotely(Some(std::slice::from_ref(b)), backup, &options));
        let mut applied = Vec::new();
        let mut failure = None;
        for (target, outcome) in backups.iter().zip(join_all(calls).await) {
            match outcome {
                Ok(responses) if matches!(responses.get(target), Some(Response::Success { .. })) => {
                    applied.push(target.clone());
                }
                Ok(responses) => {
                    failure.get_or_insert_with(|| {
                        ShoalError::remote(target, format!("backup not acknowledged: {:?}", responses.get(target)))
                    });
                }
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        let Some(err) = failure else {
            return Ok(());
        };

        tracing::warn!(%key, applied = applied.len(), error = %err, "backup failed, restoring previous value");
        let (value, metadata) = previous.unwrap_or((None, Metadata::default()));
        let mut restore: Command = match value {
            Some(v) => PutKeyValueCommand::new(key.clone(), v)
                .with_metadata(metadata)
                .ignoring_previous_value()
                .into(),
            None => RemoveCommand::new(key.clone()).into(),
        };
        restore.add_flag(Flag::CacheModeLocal);
        if let Err(e) = self.send(&applied, &restore, &options).await {
            tracing::warn!(%key, error = %e, "restoring backups failed");
        }
        Err(err)
    }

    async fn single_key_write(
        &self,
        key: Key,
        ctx: &mut InvocationContext,
        cmd: &mut Command,
        next: Next<'_>,
    ) -> Result<CommandResult, ShoalError> {
        let owners = self.owners(&key);
        let Some(primary) = owners.first().cloned() else {
            return next.invoke(ctx, cmd).await;
        };

        if primary == self.local {
            let previous = ctx.lookup_entry(&key).map(|e| (e.value.clone(), e.metadata));
            let result = next.invoke(ctx, cmd).await?;
            if cmd.is_successful() {
                let backups: Vec<Address> = owners.into_iter().filter(|a| a != &self.local).collect();
                let backup = backup_command(ctx, cmd);
                self.replicate(&key, &backups, &backup, previous, cmd.flags()).await?;
            }
            return Ok(result);
        }

        if !ctx.is_origin_local() {
            return next.invoke(ctx, cmd).await;
        }
        let options = if cmd.has_flag(Flag::ForceAsynchronous) {
            RpcOptions::asynchronous()
        } else {
            RpcOptions::synchronous(self.config.remote_timeout())
        };
        tracing::trace!(%key, %primary, "forwarding write to primary owner");
        let responses = self.rpc.invoke_remotely(Some(std::slice::from_ref(&primary)), cmd, &options).await?;
        response_to_result(&primary, responses.get(&primary))
    }

    async fn remote_get(&self, key: &Key, flags: &Flags, ctx: &mut InvocationContext) -> Result<(), ShoalError> {
        let owners = self.remote_owners([key]);
        if owners.is_empty() {
            return Ok(());
        }
        let get: Command = ClusteredGetCommand { key: key.clone(), flags: flags.clone() }.into();
        let options = RpcOptions::new(ResponseMode::WaitForValidResponse, self.config.remote_timeout());
        let responses = self.rpc.invoke_remotely(Some(&owners), &get, &options).await?;
        let value = responses.values().find_map(|r| match r {
            Response::Success { value: Some(v), .. } => Some(v.clone()),
            _ => None,
        });
        ctx.put_entry(VersionedEntry::new(key.clone(), value, Metadata::default()));
        Ok(())
    }
}

/// Command the primary sends to backup owners once the write has been
/// applied: local-only, and with every condition already resolved.
fn backup_command(ctx: &InvocationContext, cmd: &Command) -> Command {
    let mut backup = match cmd {
        Command::Put(c) => {
            let mut put = c.clone();
            put.put_if_absent = false;
            put.ignore_previous_value = true;
            if put.payload.is_delta() {
                if let Some(v) = ctx.lookup_entry(&put.key).and_then(|e| e.value.clone()) {
                    put.payload = Payload::Full(v);
                    put.flags = Flags::of(put.flags.iter().filter(|f| *f != Flag::DeltaWrite));
                }
            }
            Command::Put(put)
        }
        Command::Remove(c) => {
            let mut remove = c.clone();
            remove.value = None;
            Command::Remove(remove)
        }
        Command::Replace(c) => {
            let mut put = PutKeyValueCommand::new(c.key.clone(), c.new_value.clone())
                .with_metadata(c.metadata)
                .ignoring_previous_value();
            put.flags = c.flags.clone();
            Command::Put(put)
        }
        other => other.clone(),
    };
    backup.add_flag(Flag::CacheModeLocal);
    backup
}

#[async_trait]
impl<T: Transport> Interceptor for DistributionInterceptor<T> {
    fn name(&self) -> &'static str {
        "distribution"
    }

    async fn handle(
        &self,
        ctx: &mut InvocationContext,
        cmd: &mut Command,
        next: Next<'_>,
    ) -> Result<CommandResult, ShoalError> {
        if cmd.has_flag(Flag::CacheModeLocal) {
            return next.invoke(ctx, cmd).await;
        }
        match cmd {
            Command::Get(c) => {
                if ctx.lookup_entry(&c.key).is_none() {
                    let (key, flags) = (c.key.clone(), c.flags.clone());
                    self.remote_get(&key, &flags, ctx).await?;
                }
                next.invoke(ctx, cmd).await
            }
            Command::ClusteredGet(_) => next.invoke(ctx, cmd).await,
            Command::Put(c) => {
                let key = c.key.clone();
                self.single_key_write(key, ctx, cmd, next).await
            }
            Command::Remove(c) => {
                let key = c.key.clone();
                self.single_key_write(key, ctx, cmd, next).await
            }
            Command::Replace(c) => {
                let key = c.key.clone();
                self.single_key_write(key, ctx, cmd, next).await
            }
            Command::PutMap(c) => {
                let recipients = self.remote_owners(c.map.keys());
                let result = next.invoke(ctx, cmd).await?;
                if ctx.is_origin_local() {
                    let options = self.replication_options(cmd.flags());
                    let mut replica = cmd.clone();
                    replica.add_flag(Flag::CacheModeLocal);
                    self.send(&recipients, &replica, &options).await?;
                }
                Ok(result)
            }
            Command::Clear(_) => {
                let result = next.invoke(ctx, cmd).await?;
                if ctx.is_origin_local() {
                    let options = self.replication_options(cmd.flags());
                    let mut replica = cmd.clone();
                    replica.add_flag(Flag::CacheModeLocal);
                    self.rpc.broadcast(&replica, &options).await?;
                }
                Ok(result)
            }
            Command::Prepare(_) => {
                let result = next.invoke(ctx, cmd).await?;
                if ctx.is_origin_local() {
                    let recipients = self.remote_owners(ctx.affected_keys());
                    let mut options = RpcOptions::synchronous(self.config.remote_timeout());
                    if self.config.total_order_transactions {
                        options = options.with_total_order();
                    }
                    self.send(&recipients, cmd, &options).await?;
                }
                Ok(result)
            }
            Command::Commit(_) | Command::Rollback(_) => {
                let result = next.invoke(ctx, cmd).await?;
                if ctx.is_origin_local() {
                    let recipients = self.remote_owners(ctx.affected_keys());
                    // Skips the total-order queue so it never waits behind later prepares.
                    let mut options = self.replication_options(None).with_priority();
                    if self.config.total_order_transactions {
                        options = options.with_total_order();
                    }
                    self.send(&recipients, cmd, &options).await?;
                }
                Ok(result)
            }
            Command::TxCompletion(_) => {
                let result = next.invoke(ctx, cmd).await?;
                if ctx.is_origin_local() {
                    let recipients = self.remote_owners(ctx.affected_keys());
                    if !recipients.is_empty() {
                        // Fire and forget; the rpc manager logs failures.
                        drop(self.rpc.invoke_remotely_in_future(
                            Some(recipients),
                            cmd.clone(),
                            RpcOptions::synchronous(self.config.remote_timeout()),
                        ));
                    }
                }
                Ok(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_commands::{Delta, RemoveCommand, ReplaceCommand};

    fn ctx_with(key: &str, value: &[u8]) -> InvocationContext {
        let mut ctx = InvocationContext::local();
        ctx.put_entry(VersionedEntry::new(key.into(), Some(value.to_vec()), Metadata::default()));
        ctx
    }

    #[test]
    fn backup_of_conditional_put_is_unconditional() {
        let cmd: Command = PutKeyValueCommand::new("k", vec![1]).if_absent().into();
        let Command::Put(b) = backup_command(&InvocationContext::local(), &cmd) else {
            panic!("expected a put");
        };
        assert!(!b.put_if_absent);
        assert!(b.ignore_previous_value);
        assert!(b.flags.contains(Flag::CacheModeLocal));
    }

    #[test]
    fn backup_of_delta_carries_the_merged_value() {
        let cmd: Command = PutKeyValueCommand::delta("k", Delta::Append(b"!".to_vec())).into();
        let ctx = ctx_with("k", b"hi!");
        let Command::Put(b) = backup_command(&ctx, &cmd) else {
            panic!("expected a put");
        };
        assert_eq!(b.payload, Payload::Full(b"hi!".to_vec()));
        assert!(!b.flags.contains(Flag::DeltaWrite));
    }

    #[test]
    fn backup_of_replace_and_remove_drop_expected_values() {
        let replace: Command = ReplaceCommand::new("k", vec![2]).if_value(vec![1]).into();
        match backup_command(&InvocationContext::local(), &replace) {
            Command::Put(p) => {
                assert_eq!(p.payload, Payload::Full(vec![2]));
                assert!(p.flags.contains(Flag::CacheModeLocal));
            }
            other => panic!("unexpected backup {other:?}"),
        }

        let remove: Command = RemoveCommand::new("k").if_value(vec![1]).into();
        match backup_command(&InvocationContext::local(), &remove) {
            Command::Remove(r) => assert_eq!(r.value, None),
            other => panic!("unexpected backup {other:?}"),
        }
    }
}
