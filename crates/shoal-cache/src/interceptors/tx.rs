use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use shoal_commands::{Command, CommandResult, GlobalTransaction, InvocationContext};
use shoal_types::{Flag, Key, ShoalError};

use crate::interceptor::{Interceptor, Next};
use crate::interceptors::locking::LockManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Prepared,
    Committed,
}

#[derive(Debug, Clone)]
struct TxState {
    modifications: Vec<Command>,
    status: TxStatus,
}

impl TxState {
    fn affected_keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self.modifications.iter().flat_map(Command::affected_keys).collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// Transactions known to this member, from prepare until completion.
#[derive(Default)]
pub struct TransactionTable {
    txs: Mutex<HashMap<GlobalTransaction, TxState>>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, gtx: &GlobalTransaction) -> Option<TxStatus> {
        self.txs.lock().get(gtx).map(|t| t.status)
    }

    pub fn len(&self) -> usize {
        self.txs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prepared(&self, gtx: GlobalTransaction, modifications: Vec<Command>) {
        self.txs.lock().insert(gtx, TxState { modifications, status: TxStatus::Prepared });
    }

    fn get(&self, gtx: &GlobalTransaction) -> Option<TxState> {
        self.txs.lock().get(gtx).cloned()
    }

    fn mark_committed(&self, gtx: &GlobalTransaction) {
        if let Some(tx) = self.txs.lock().get_mut(gtx) {
            tx.status = TxStatus::Committed;
        }
    }

    fn remove(&self, gtx: &GlobalTransaction) -> Option<TxState> {
        self.txs.lock().remove(gtx)
    }
}

/// Records prepared transactions and applies their modifications on commit.
///
/// Modifications are replayed through the rest of the chain as local-only
/// commands, each in its own context, under the locks of the affected keys.
pub struct TxInterceptor {
    table: Arc<TransactionTable>,
    locks: Arc<LockManager>,
    lock_timeout: Duration,
}

impl TxInterceptor {
    pub fn new(table: Arc<TransactionTable>, locks: Arc<LockManager>, lock_timeout: Duration) -> Self {
        TxInterceptor { table, locks, lock_timeout }
    }

    async fn apply(&self, ctx: &InvocationContext, tx: &TxState, next: Next<'_>) -> Result<(), ShoalError> {
        let _held = self.locks.acquire(&tx.affected_keys(), self.lock_timeout).await?;
        for m in &tx.modifications {
            let mut m = m.clone();
            m.add_flag(Flag::CacheModeLocal);
            let mut mctx = InvocationContext::new(ctx.origin().clone());
            next.invoke(&mut mctx, &mut m).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Interceptor for TxInterceptor {
    fn name(&self) -> &'static str {
        "tx"
    }

    async fn handle(
        &self,
        ctx: &mut InvocationContext,
        cmd: &mut Command,
        next: Next<'_>,
    ) -> Result<CommandResult, ShoalError> {
        match cmd {
            Command::Prepare(p) => {
                let gtx = p.gtx.clone();
                let one_phase = p.one_phase;
                let state = TxState { modifications: p.modifications.clone(), status: TxStatus::Prepared };
                ctx.set_affected_keys(state.affected_keys());
                self.table.prepared(gtx.clone(), state.modifications.clone());

                // On failure the entry stays until the rollback, which needs
                // its keys to reach the owners that did prepare.
                let result = next.invoke(ctx, cmd).await?;
                if one_phase {
                    // Prepare locks are still held by the locking stage.
                    for m in &state.modifications {
                        let mut m = m.clone();
                        m.add_flag(Flag::CacheModeLocal);
                        let mut mctx = InvocationContext::new(ctx.origin().clone());
                        next.invoke(&mut mctx, &mut m).await?;
                    }
                    self.table.remove(&gtx);
                }
                tracing::debug!(%gtx, one_phase, "transaction prepared");
                Ok(result)
            }
            Command::Commit(c) => {
                let gtx = c.gtx.clone();
                match self.table.get(&gtx) {
                    Some(tx) if tx.status == TxStatus::Prepared => {
                        ctx.set_affected_keys(tx.affected_keys());
                        self.apply(ctx, &tx, next).await?;
                        self.table.mark_committed(&gtx);
                        tracing::debug!(%gtx, mods = tx.modifications.len(), "transaction committed");
                    }
                    Some(tx) => ctx.set_affected_keys(tx.affected_keys()),
                    None => tracing::debug!(%gtx, "commit for unknown transaction"),
                }
                next.invoke(ctx, cmd).await
            }
            Command::Rollback(c) => {
                if let Some(tx) = self.table.remove(&c.gtx) {
                    ctx.set_affected_keys(tx.affected_keys());
                    tracing::debug!(gtx = %c.gtx, "transaction rolled back");
                }
                next.invoke(ctx, cmd).await
            }
            Command::TxCompletion(c) => {
                if let Some(tx) = self.table.remove(&c.gtx) {
                    ctx.set_affected_keys(tx.affected_keys());
                }
                next.invoke(ctx, cmd).await
            }
            Command::Get(_)
            | Command::ClusteredGet(_)
            | Command::Put(_)
            | Command::PutMap(_)
            | Command::Remove(_)
            | Command::Replace(_)
            | Command::Clear(_) => next.invoke(ctx, cmd).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::ChainBuilder;
    use shoal_commands::{CommitCommand, PrepareCommand, PutKeyValueCommand, RollbackCommand, TxCompletionNotificationCommand};
    use shoal_types::Address;

    /// Records every command that reaches it.
    #[derive(Default)]
    struct Sink(Mutex<Vec<(Command, Vec<Key>)>>);

    #[async_trait]
    impl Interceptor for Sink {
        fn name(&self) -> &'static str {
            "sink"
        }

        async fn handle(&self, ctx: &mut InvocationContext, cmd: &mut Command, _: Next<'_>) -> Result<CommandResult, ShoalError> {
            self.0.lock().push((cmd.clone(), ctx.affected_keys().to_vec()));
            Ok(CommandResult::empty())
        }
    }

    fn setup() -> (Arc<TransactionTable>, Arc<Sink>, crate::interceptor::InterceptorChain) {
        let table = Arc::new(TransactionTable::new());
        let sink = Arc::new(Sink::default());
        let chain = ChainBuilder::new()
            .push(Arc::new(TxInterceptor::new(table.clone(), LockManager::new(), Duration::from_millis(50))))
            .push(sink.clone())
            .build();
        (table, sink, chain)
    }

    async fn run(chain: &crate::interceptor::InterceptorChain, cmd: impl Into<Command>) -> Result<CommandResult, ShoalError> {
        let mut cmd = cmd.into();
        chain.invoke(&mut InvocationContext::local(), &mut cmd).await
    }

    #[tokio::test]
    async fn commit_replays_modifications_locally() {
        let (table, sink, chain) = setup();
        let gtx = GlobalTransaction::new(Address::new("a"));
        let mods = vec![
            PutKeyValueCommand::new("x", vec![1]).into(),
            PutKeyValueCommand::new("y", vec![2]).into(),
        ];
        run(&chain, PrepareCommand::new(gtx.clone(), mods, false)).await.unwrap();
        assert_eq!(table.status(&gtx), Some(TxStatus::Prepared));

        run(&chain, CommitCommand::new(gtx.clone())).await.unwrap();
        assert_eq!(table.status(&gtx), Some(TxStatus::Committed));

        let seen = sink.0.lock().clone();
        // prepare, two replayed puts, commit
        assert_eq!(seen.len(), 4);
        assert!(seen[1].0.has_flag(Flag::CacheModeLocal));
        assert_eq!(seen[3].1, vec!["x".to_string(), "y".to_string()]);

        run(&chain, TxCompletionNotificationCommand::new(gtx.clone())).await.unwrap();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn rollback_forgets_the_transaction() {
        let (table, sink, chain) = setup();
        let gtx = GlobalTransaction::new(Address::new("a"));
        run(&chain, PrepareCommand::new(gtx.clone(), vec![PutKeyValueCommand::new("x", vec![1]).into()], false))
            .await
            .unwrap();
        run(&chain, RollbackCommand::new(gtx.clone())).await.unwrap();
        assert!(table.is_empty());
        // Commit after rollback replays nothing.
        run(&chain, CommitCommand::new(gtx)).await.unwrap();
        let kinds: Vec<_> = sink.0.lock().iter().map(|(c, _)| c.kind()).collect();
        assert_eq!(kinds.len(), 3);
    }

    #[tokio::test]
    async fn one_phase_prepare_applies_immediately() {
        let (table, sink, chain) = setup();
        let gtx = GlobalTransaction::new(Address::new("a"));
        run(&chain, PrepareCommand::new(gtx, vec![PutKeyValueCommand::new("x", vec![1]).into()], true))
            .await
            .unwrap();
        assert!(table.is_empty());
        assert_eq!(sink.0.lock().len(), 2);
    }
}
