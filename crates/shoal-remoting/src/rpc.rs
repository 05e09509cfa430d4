use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use shoal_commands::{encode, Command, CommandKind};
use shoal_types::{Address, ShoalError};

use crate::stats::{StatKind, StatisticsSink};
use crate::transport::{Response, RpcOptions, Transport};

type Responses = BTreeMap<Address, Response>;

/// Sends commands to peers and records round-trip statistics.
///
/// Only prepare, commit, rollback, tx-completion and clustered-get are
/// instrumented. When no sink is configured nothing is measured, not even
/// the clock. No retries: the transport owns failure handling.
pub struct RpcManager<T> {
    transport: Arc<T>,
    stats: Option<Arc<dyn StatisticsSink>>,
}

impl<T> Clone for RpcManager<T> {
    fn clone(&self) -> Self {
        RpcManager { transport: Arc::clone(&self.transport), stats: self.stats.clone() }
    }
}

impl<T: Transport> RpcManager<T> {
    pub fn new(transport: Arc<T>, stats: Option<Arc<dyn StatisticsSink>>) -> Self {
        RpcManager { transport, stats }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn address(&self) -> &Address {
        self.transport.address()
    }

    pub fn members(&self) -> Vec<Address> {
        self.transport.members()
    }

    pub fn statistics_enabled(&self) -> bool {
        self.stats.is_some()
    }

    pub async fn invoke_remotely(
        &self,
        recipients: Option<&[Address]>,
        cmd: &Command,
        options: &RpcOptions,
    ) -> Result<Responses, ShoalError> {
        self.invoke(recipients, cmd, options, options.mode.is_synchronous()).await
    }

    /// Send to every other member of the current view.
    pub async fn broadcast(&self, cmd: &Command, options: &RpcOptions) -> Result<Responses, ShoalError> {
        self.invoke(None, cmd, options, options.mode.is_synchronous()).await
    }

    /// Spawn the invocation and hand back its join handle. Recorded as an
    /// asynchronous round trip whatever the response mode.
    pub fn invoke_remotely_in_future(
        &self,
        recipients: Option<Vec<Address>>,
        cmd: Command,
        options: RpcOptions,
    ) -> JoinHandle<Result<Responses, ShoalError>> {
        let this = self.clone();
        tokio::spawn(async move { this.invoke(recipients.as_deref(), &cmd, &options, false).await })
    }

    async fn invoke(
        &self,
        recipients: Option<&[Address]>,
        cmd: &Command,
        options: &RpcOptions,
        sync: bool,
    ) -> Result<Responses, ShoalError> {
        let started = self.stats.as_ref().map(|_| Instant::now());
        let payload = encode(cmd)?;
        tracing::trace!(kind = %cmd.kind(), ?recipients, mode = ?options.mode, "remote invocation");

        let result = self.transport.send(recipients, payload, options).await;

        if let (Some(sink), Some(started)) = (&self.stats, started) {
            self.update_stats(sink.as_ref(), cmd.kind(), sync, started.elapsed(), recipients);
        }
        if let Err(e) = &result {
            tracing::warn!(kind = %cmd.kind(), error = %e, "remote invocation failed");
        }
        result
    }

    fn update_stats(
        &self,
        sink: &dyn StatisticsSink,
        kind: CommandKind,
        sync: bool,
        elapsed: Duration,
        recipients: Option<&[Address]>,
    ) {
        let micros = elapsed.as_micros() as u64;
        let nodes = || {
            recipients
                .map(<[Address]>::len)
                .unwrap_or_else(|| self.transport.members().len()) as u64
        };
        let (rtt, num_rtts, asynch, num_async, num_nodes) = match kind {
            CommandKind::Prepare => (
                StatKind::RttPrepare,
                StatKind::NumRttsPrepare,
                StatKind::AsyncPrepare,
                StatKind::NumAsyncPrepare,
                StatKind::NumNodesPrepare,
            ),
            CommandKind::Commit => (
                StatKind::RttCommit,
                StatKind::NumRttsCommit,
                StatKind::AsyncCommit,
                StatKind::NumAsyncCommit,
                StatKind::NumNodesCommit,
            ),
            CommandKind::Rollback => (
                StatKind::RttRollback,
                StatKind::NumRttsRollback,
                StatKind::AsyncRollback,
                StatKind::NumAsyncRollback,
                StatKind::NumNodesRollback,
            ),
            CommandKind::TxCompletion => {
                sink.add_value(StatKind::AsyncCompleteNotify, micros);
                sink.increment(StatKind::NumAsyncCompleteNotify);
                sink.add_value(StatKind::NumNodesCommit, nodes());
                return;
            }
            CommandKind::ClusteredGet => {
                sink.add_value(StatKind::RttGet, micros);
                sink.increment(StatKind::NumRttsGet);
                sink.add_value(StatKind::NumNodesGet, nodes());
                return;
            }
            CommandKind::Get
            | CommandKind::Put
            | CommandKind::PutMap
            | CommandKind::Remove
            | CommandKind::Replace
            | CommandKind::Clear => return,
        };
        if sync {
            sink.add_value(rtt, micros);
            sink.increment(num_rtts);
        } else {
            sink.add_value(asynch, micros);
            sink.increment(num_async);
        }
        sink.add_value(num_nodes, nodes());
    }
}
