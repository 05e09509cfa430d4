use std::collections::BTreeMap;
use std::sync::Arc;

use shoal_commands::{
    CacheNotifier, ClearCommand, Command, CommandResult, CommitCommand, Delta, GetKeyValueCommand, GlobalTransaction,
    InvocationContext, PrepareCommand, PutKeyValueCommand, PutMapCommand, RemoveCommand, ReplaceCommand,
    RollbackCommand, TxCompletionNotificationCommand,
};
use shoal_partition::{AvailabilityStrategy, OwnershipOracle, PartitionHandlingManager, TopologyManager};
use shoal_remoting::{AtomicStatistics, InboundHandler, RpcManager, StatisticsSink, Transport};
use shoal_storage::DataContainer;
use shoal_types::{Address, AvailabilityMode, Flag, Key, Metadata, ShoalError, Value};

use crate::config::CacheConfig;
use crate::interceptor::{ChainBuilder, InterceptorChain};
use crate::interceptors::{
    CacheMgmtInterceptor, CallInterceptor, DistributionInterceptor, EntryWrappingInterceptor,
    InvocationContextInterceptor, LockManager, LockingInterceptor, PartitionHandlingInterceptor, TransactionTable,
    TxInterceptor,
};
use crate::interceptors::stats::{CacheStatistics, CacheStatsSnapshot};
use crate::remote::RemoteCommandHandler;

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Modifications collected by the caller and applied atomically on commit.
#[derive(Debug, Clone)]
pub struct Transaction {
    gtx: GlobalTransaction,
    modifications: Vec<Command>,
}

impl Transaction {
    pub fn gtx(&self) -> &GlobalTransaction {
        &self.gtx
    }

    pub fn put(&mut self, key: impl Into<Key>, value: Value) -> &mut Self {
        self.modifications.push(PutKeyValueCommand::new(key, value).into());
        self
    }

    pub fn apply_delta(&mut self, key: impl Into<Key>, delta: Delta) -> &mut Self {
        self.modifications.push(PutKeyValueCommand::delta(key, delta).into());
        self
    }

    pub fn remove(&mut self, key: impl Into<Key>) -> &mut Self {
        self.modifications.push(RemoveCommand::new(key).into());
        self
    }

    pub fn len(&self) -> usize {
        self.modifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modifications.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// One member's view of the distributed cache.
///
/// Every operation is turned into a command and run through the interceptor
/// chain with a local invocation context.
pub struct Cache<C, T> {
    config: CacheConfig,
    local: Address,
    container: Arc<C>,
    chain: Arc<InterceptorChain>,
    rpc: Arc<RpcManager<T>>,
    rpc_stats: Arc<AtomicStatistics>,
    cache_stats: Arc<CacheStatistics>,
    topology: Arc<TopologyManager>,
    partition: Arc<PartitionHandlingManager>,
    strategy: Arc<AvailabilityStrategy>,
    transactions: Arc<TransactionTable>,
    locks: Arc<LockManager>,
}

impl<C: DataContainer, T: Transport> Cache<C, T> {
    pub fn new(
        config: CacheConfig,
        container: Arc<C>,
        transport: Arc<T>,
        initial_members: &[Address],
        notifier: Arc<dyn CacheNotifier>,
    ) -> Self {
        let local = transport.address().clone();
        let topology = Arc::new(TopologyManager::new(initial_members, config.num_owners, config.num_segments));
        let partition = Arc::new(PartitionHandlingManager::new(
            Arc::clone(&topology) as Arc<dyn OwnershipOracle>,
            initial_members.iter().cloned(),
        ));
        let strategy = Arc::new(AvailabilityStrategy::new(local.clone(), partition.clone(), topology.clone()));

        let rpc_stats = Arc::new(AtomicStatistics::new());
        let sink = config.statistics_enabled.then(|| rpc_stats.clone() as Arc<dyn StatisticsSink>);
        let rpc = Arc::new(RpcManager::new(transport.clone(), sink));

        let cache_stats = Arc::new(CacheStatistics::new());
        let transactions = Arc::new(TransactionTable::new());
        let locks = LockManager::new();

        let chain = ChainBuilder::new()
            .push(Arc::new(InvocationContextInterceptor))
            .push_if(config.statistics_enabled, || Arc::new(CacheMgmtInterceptor::new(cache_stats.clone())))
            .push_if(config.partition_handling_enabled, || {
                Arc::new(PartitionHandlingInterceptor::new(partition.clone(), transport.clone()))
            })
            .push(Arc::new(LockingInterceptor::new(locks.clone(), config.lock_acquisition_timeout())))
            .push(Arc::new(TxInterceptor::new(
                transactions.clone(),
                locks.clone(),
                config.lock_acquisition_timeout(),
            )))
            .push(Arc::new(EntryWrappingInterceptor::new(container.clone(), topology.clone(), local.clone())))
            .push(Arc::new(DistributionInterceptor::new(rpc.clone(), topology.clone(), config.clone())))
            .push(Arc::new(CallInterceptor::new(notifier)))
            .build();
        tracing::debug!(member = %local, interceptors = ?chain.names(), "cache started");

        Cache {
            config,
            local,
            container,
            chain: Arc::new(chain),
            rpc,
            rpc_stats,
            cache_stats,
            topology,
            partition,
            strategy,
            transactions,
            locks,
        }
    }

    pub async fn invoke(&self, cmd: impl Into<Command>) -> Result<CommandResult, ShoalError> {
        let mut cmd = cmd.into();
        self.chain.invoke(&mut InvocationContext::local(), &mut cmd).await
    }

    pub async fn get(&self, key: impl Into<Key>) -> Result<Option<Value>, ShoalError> {
        Ok(self.invoke(GetKeyValueCommand::new(key)).await?.value)
    }

    /// Store `value` and return the previous one.
    pub async fn put(&self, key: impl Into<Key>, value: Value) -> Result<Option<Value>, ShoalError> {
        Ok(self.invoke(PutKeyValueCommand::new(key, value)).await?.value)
    }

    pub async fn put_with_metadata(
        &self,
        key: impl Into<Key>,
        value: Value,
        metadata: Metadata,
    ) -> Result<Option<Value>, ShoalError> {
        Ok(self.invoke(PutKeyValueCommand::new(key, value).with_metadata(metadata)).await?.value)
    }

    /// On failure the result carries the value already present.
    pub async fn put_if_absent(&self, key: impl Into<Key>, value: Value) -> Result<CommandResult, ShoalError> {
        self.invoke(PutKeyValueCommand::new(key, value).if_absent()).await
    }

    /// Populate `key` after a read from an external source. Never overwrites
    /// and never reports failure.
    pub async fn put_for_external_read(&self, key: impl Into<Key>, value: Value) {
        let key = key.into();
        let cmd = PutKeyValueCommand::new(key.clone(), value)
            .if_absent()
            .with_flag(Flag::PutForExternalRead)
            .with_flag(Flag::ZeroLockAcquisitionTimeout);
        if let Err(e) = self.invoke(cmd).await {
            tracing::debug!(%key, error = %e, "put for external read dropped");
        }
    }

    pub async fn apply_delta(&self, key: impl Into<Key>, delta: Delta) -> Result<(), ShoalError> {
        self.invoke(PutKeyValueCommand::delta(key, delta)).await?;
        Ok(())
    }

    pub async fn replace(&self, key: impl Into<Key>, value: Value) -> Result<Option<Value>, ShoalError> {
        Ok(self.invoke(ReplaceCommand::new(key, value)).await?.value)
    }

    pub async fn replace_if(&self, key: impl Into<Key>, old: Value, new: Value) -> Result<bool, ShoalError> {
        Ok(self.invoke(ReplaceCommand::new(key, new).if_value(old)).await?.successful)
    }

    pub async fn remove(&self, key: impl Into<Key>) -> Result<Option<Value>, ShoalError> {
        Ok(self.invoke(RemoveCommand::new(key)).await?.value)
    }

    pub async fn remove_if(&self, key: impl Into<Key>, value: Value) -> Result<bool, ShoalError> {
        Ok(self.invoke(RemoveCommand::new(key).if_value(value)).await?.successful)
    }

    pub async fn put_all(&self, map: BTreeMap<Key, Value>) -> Result<(), ShoalError> {
        self.invoke(PutMapCommand::new(map)).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), ShoalError> {
        self.invoke(ClearCommand::new()).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    pub fn begin(&self) -> Transaction {
        Transaction { gtx: GlobalTransaction::new(self.local.clone()), modifications: Vec::new() }
    }

    /// Two-phase commit. A failed prepare is rolled back on every owner and
    /// its error returned.
    pub async fn commit(&self, tx: Transaction) -> Result<(), ShoalError> {
        if tx.is_empty() {
            return Ok(());
        }
        let gtx = tx.gtx;
        if let Err(e) = self.invoke(PrepareCommand::new(gtx.clone(), tx.modifications, false)).await {
            tracing::info!(%gtx, error = %e, "prepare failed; rolling back");
            if let Err(re) = self.invoke(RollbackCommand::new(gtx.clone())).await {
                tracing::warn!(%gtx, error = %re, "rollback failed");
            }
            return Err(e);
        }
        self.invoke(CommitCommand::new(gtx.clone())).await?;
        self.invoke(TxCompletionNotificationCommand::new(gtx)).await?;
        Ok(())
    }

    /// Discard a transaction that was never committed.
    pub async fn rollback(&self, tx: Transaction) -> Result<(), ShoalError> {
        self.invoke(RollbackCommand::new(tx.gtx)).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn address(&self) -> &Address {
        &self.local
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn availability(&self) -> AvailabilityMode {
        self.partition.availability_mode()
    }

    pub fn partition_handling_manager(&self) -> &Arc<PartitionHandlingManager> {
        &self.partition
    }

    pub fn availability_strategy(&self) -> &Arc<AvailabilityStrategy> {
        &self.strategy
    }

    pub fn topology(&self) -> &Arc<TopologyManager> {
        &self.topology
    }

    pub fn rpc_manager(&self) -> &Arc<RpcManager<T>> {
        &self.rpc
    }

    pub fn statistics(&self) -> CacheStatsSnapshot {
        self.cache_stats.snapshot()
    }

    pub fn rpc_statistics(&self) -> &AtomicStatistics {
        &self.rpc_stats
    }

    pub fn reset_statistics(&self) {
        self.cache_stats.reset();
        self.rpc_stats.reset();
    }

    pub fn transactions(&self) -> &Arc<TransactionTable> {
        &self.transactions
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn interceptor_names(&self) -> Vec<&'static str> {
        self.chain.names()
    }

    /// Handler to register with the transport for commands from peers.
    pub fn inbound_handler(&self) -> Arc<dyn InboundHandler> {
        Arc::new(RemoteCommandHandler::new(Arc::clone(&self.chain)))
    }

    /// Entries held by this member.
    pub async fn local_size(&self) -> Result<usize, ShoalError> {
        self.container.len().await
    }

    pub fn container(&self) -> &Arc<C> {
        &self.container
    }
}
