use std::sync::Arc;

use async_trait::async_trait;

use shoal_commands::{Command, CommandResult, InvocationContext, VersionedEntry};
use shoal_partition::TopologyManager;
use shoal_storage::DataContainer;
use shoal_types::{Address, Key, Metadata, ShoalError, Value};

use crate::interceptor::{Interceptor, Next};

/// Copies the keys a command touches from the data container into the
/// invocation context, and writes changed entries back once the rest of the
/// chain has succeeded.
///
/// Only keys this member owns in the current topology are wrapped.
pub struct EntryWrappingInterceptor<C> {
    container: Arc<C>,
    topology: Arc<TopologyManager>,
    local: Address,
}

enum Write {
    Put(Key, Value, Metadata),
    Remove(Key),
}

impl<C: DataContainer> EntryWrappingInterceptor<C> {
    pub fn new(container: Arc<C>, topology: Arc<TopologyManager>, local: Address) -> Self {
        EntryWrappingInterceptor { container, topology, local }
    }

    async fn wrap(&self, ctx: &mut InvocationContext, key: &Key) -> Result<(), ShoalError> {
        if ctx.lookup_entry(key).is_some() || !self.topology.current().ch.is_owner(&self.local, key) {
            return Ok(());
        }
        let entry = match self.container.get(key).await? {
            Some(stored) => VersionedEntry::new(key.clone(), Some(stored.value), stored.metadata),
            None => VersionedEntry::new(key.clone(), None, Metadata::default()),
        };
        ctx.put_entry(entry);
        Ok(())
    }

    async fn wrap_all(&self, ctx: &mut InvocationContext) -> Result<(), ShoalError> {
        for stored in self.container.entries().await? {
            if ctx.lookup_entry(&stored.key).is_none() {
                ctx.put_entry(VersionedEntry::new(stored.key, Some(stored.value), stored.metadata));
            }
        }
        Ok(())
    }

    async fn commit(&self, ctx: &InvocationContext) -> Result<(), ShoalError> {
        let writes: Vec<Write> = ctx
            .entries()
            .filter(|e| e.changed)
            .filter_map(|e| match (&e.value, e.removed) {
                (_, true) => Some(Write::Remove(e.key.clone())),
                (Some(v), false) => Some(Write::Put(e.key.clone(), v.clone(), e.metadata)),
                (None, false) => None,
            })
            .collect();
        for w in writes {
            match w {
                Write::Put(key, value, metadata) => self.container.put(key, value, metadata).await?,
                Write::Remove(key) => {
                    self.container.remove(&key).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<C: DataContainer> Interceptor for EntryWrappingInterceptor<C> {
    fn name(&self) -> &'static str {
        "entry-wrapping"
    }

    async fn handle(
        &self,
        ctx: &mut InvocationContext,
        cmd: &mut Command,
        next: Next<'_>,
    ) -> Result<CommandResult, ShoalError> {
        match cmd {
            Command::Get(_)
            | Command::ClusteredGet(_)
            | Command::Put(_)
            | Command::Remove(_)
            | Command::Replace(_)
            | Command::PutMap(_) => {
                for key in cmd.affected_keys() {
                    self.wrap(ctx, &key).await?;
                }
            }
            Command::Clear(_) => self.wrap_all(ctx).await?,
            Command::Prepare(_) | Command::Commit(_) | Command::Rollback(_) | Command::TxCompletion(_) => {}
        }
        let result = next.invoke(ctx, cmd).await?;
        self.commit(ctx).await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::{ChainBuilder, InterceptorChain};
    use crate::interceptors::call::CallInterceptor;
    use shoal_commands::{ClearCommand, GetKeyValueCommand, NoopNotifier, PutKeyValueCommand, RemoveCommand};
    use shoal_storage::MemDataContainer;

    fn chain(container: &Arc<MemDataContainer>, topology: TopologyManager) -> InterceptorChain {
        ChainBuilder::new()
            .push(Arc::new(EntryWrappingInterceptor::new(container.clone(), Arc::new(topology), Address::new("a"))))
            .push(Arc::new(CallInterceptor::new(Arc::new(NoopNotifier))))
            .build()
    }

    async fn run(chain: &InterceptorChain, cmd: impl Into<Command>) -> CommandResult {
        let mut cmd = cmd.into();
        chain.invoke(&mut InvocationContext::local(), &mut cmd).await.unwrap()
    }

    #[tokio::test]
    async fn writes_reach_the_container_only_after_success() {
        let container = Arc::new(MemDataContainer::new());
        let chain = chain(&container, TopologyManager::new(&[Address::new("a")], 1, 8));

        assert_eq!(run(&chain, PutKeyValueCommand::new("k", b"v".to_vec())).await, CommandResult::ok(None));
        assert_eq!(container.get("k").await.unwrap().unwrap().value, b"v".to_vec());
        assert_eq!(run(&chain, GetKeyValueCommand::new("k")).await.value, Some(b"v".to_vec()));

        // Conditional put that fails leaves the container untouched.
        let r = run(&chain, PutKeyValueCommand::new("k", b"w".to_vec()).if_absent()).await;
        assert!(!r.successful);
        assert_eq!(container.get("k").await.unwrap().unwrap().value, b"v".to_vec());

        run(&chain, RemoveCommand::new("k")).await;
        assert!(container.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_removes_every_entry() {
        let container = Arc::new(MemDataContainer::new());
        let chain = chain(&container, TopologyManager::new(&[Address::new("a")], 1, 8));
        for k in ["x", "y", "z"] {
            run(&chain, PutKeyValueCommand::new(k, vec![1])).await;
        }
        assert_eq!(container.len().await.unwrap(), 3);
        run(&chain, ClearCommand::new()).await;
        assert_eq!(container.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn keys_owned_elsewhere_are_not_wrapped() {
        let container = Arc::new(MemDataContainer::new());
        let topology = TopologyManager::new(&[Address::new("a"), Address::new("b")], 1, 16);
        let foreign = (0..100)
            .map(|i| format!("k{i}"))
            .find(|k| !topology.current().ch.is_owner(&Address::new("a"), k))
            .unwrap();
        let chain = chain(&container, topology);

        run(&chain, PutKeyValueCommand::new(foreign.clone(), vec![1])).await;
        assert_eq!(container.len().await.unwrap(), 0);
        assert_eq!(run(&chain, GetKeyValueCommand::new(foreign)).await.value, None);
    }
}
