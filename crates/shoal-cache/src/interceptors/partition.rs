use std::sync::Arc;

use async_trait::async_trait;

use shoal_commands::{Command, CommandResult, InvocationContext};
use shoal_partition::PartitionHandlingManager;
use shoal_remoting::Transport;
use shoal_types::{Key, ShoalError};

use crate::interceptor::{Interceptor, Next};

/// Gates commands on the availability of their keys' owners.
///
/// Writes are checked before anything downstream runs. Reads are checked
/// after they complete, since the member may have entered degraded mode while
/// a remote read was in flight.
///
/// Reads are judged against the view this member has installed. Until a
/// member observes a split it keeps serving the values it holds, even for
/// keys whose ownership the other side has already moved.
pub struct PartitionHandlingInterceptor<T> {
    manager: Arc<PartitionHandlingManager>,
    transport: Arc<T>,
}

impl<T: Transport> PartitionHandlingInterceptor<T> {
    pub fn new(manager: Arc<PartitionHandlingManager>, transport: Arc<T>) -> Self {
        PartitionHandlingInterceptor { manager, transport }
    }

    async fn read(
        &self,
        key: Key,
        ctx: &mut InvocationContext,
        cmd: &mut Command,
        next: Next<'_>,
    ) -> Result<CommandResult, ShoalError> {
        let result = match next.invoke(ctx, cmd).await {
            Ok(r) => r,
            // Only an unavailable owner produces a failed remote read here.
            Err(e) if e.is_remote_invocation() => return Err(ShoalError::key_unavailable(&key)),
            Err(e) => return Err(e),
        };

        self.manager
            .check_read(&key, result.value.is_some(), &self.transport.members())?;
        Ok(result)
    }
}

#[async_trait]
impl<T: Transport> Interceptor for PartitionHandlingInterceptor<T> {
    fn name(&self) -> &'static str {
        "partition-handling"
    }

    async fn handle(
        &self,
        ctx: &mut InvocationContext,
        cmd: &mut Command,
        next: Next<'_>,
    ) -> Result<CommandResult, ShoalError> {
        match cmd {
            Command::Put(c) => self.manager.check_write(&c.key)?,
            Command::Remove(c) => self.manager.check_write(&c.key)?,
            Command::Replace(c) => self.manager.check_write(&c.key)?,
            Command::PutMap(c) => {
                for key in c.map.keys() {
                    self.manager.check_write(key)?;
                }
            }
            Command::Clear(_) => self.manager.check_clear()?,
            Command::Prepare(_) => {
                for key in cmd.affected_keys() {
                    self.manager.check_write(&key)?;
                }
            }
            Command::Get(c) => {
                let key = c.key.clone();
                return self.read(key, ctx, cmd, next).await;
            }
            Command::ClusteredGet(c) => {
                let key = c.key.clone();
                return self.read(key, ctx, cmd, next).await;
            }
            Command::Commit(_) | Command::Rollback(_) | Command::TxCompletion(_) => {}
        }
        next.invoke(ctx, cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::interceptor::ChainBuilder;
    use shoal_commands::{ClearCommand, GetKeyValueCommand, PutKeyValueCommand, PutMapCommand};
    use shoal_partition::OwnershipOracle;
    use shoal_remoting::LocalNetwork;
    use shoal_types::{Address, AvailabilityMode};

    struct FixedOracle;

    impl OwnershipOracle for FixedOracle {
        fn owners(&self, key: &str) -> Vec<Address> {
            match key {
                "local" => vec![Address::new("A")],
                _ => vec![Address::new("B"), Address::new("C")],
            }
        }
    }

    /// Stands in for the rest of the chain.
    struct Downstream {
        outcome: Result<CommandResult, ShoalError>,
        calls: parking_lot::Mutex<u32>,
    }

    #[async_trait]
    impl Interceptor for Downstream {
        fn name(&self) -> &'static str {
            "downstream"
        }

        async fn handle(&self, _: &mut InvocationContext, _: &mut Command, _: Next<'_>) -> Result<CommandResult, ShoalError> {
            *self.calls.lock() += 1;
            self.outcome.clone()
        }
    }

    struct Fixture {
        manager: Arc<PartitionHandlingManager>,
        downstream: Arc<Downstream>,
        chain: crate::interceptor::InterceptorChain,
    }

    /// Member `A` of {A, B, C} after a split that isolates it.
    fn isolated_a(outcome: Result<CommandResult, ShoalError>) -> Fixture {
        let net = LocalNetwork::new();
        let transport = Arc::new(net.join(Address::new("A")));
        let manager = Arc::new(PartitionHandlingManager::new(
            Arc::new(FixedOracle),
            [Address::new("A"), Address::new("B"), Address::new("C")],
        ));
        manager.set_availability(AvailabilityMode::Degraded, [Address::new("A")]);
        let downstream = Arc::new(Downstream { outcome, calls: parking_lot::Mutex::new(0) });
        let chain = ChainBuilder::new()
            .push(Arc::new(PartitionHandlingInterceptor::new(manager.clone(), transport)))
            .push(downstream.clone())
            .build();
        Fixture { manager, downstream, chain }
    }

    async fn run(f: &Fixture, cmd: impl Into<Command>) -> Result<CommandResult, ShoalError> {
        let mut cmd = cmd.into();
        f.chain.invoke(&mut InvocationContext::local(), &mut cmd).await
    }

    #[tokio::test]
    async fn write_to_unreachable_owners_is_rejected_before_downstream() {
        let f = isolated_a(Ok(CommandResult::empty()));
        let err = run(&f, PutKeyValueCommand::new("k", vec![1])).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(*f.downstream.calls.lock(), 0);

        assert!(run(&f, PutKeyValueCommand::new("local", vec![1])).await.is_ok());
        assert_eq!(*f.downstream.calls.lock(), 1);
    }

    #[tokio::test]
    async fn put_map_checks_every_key_and_clear_fails_when_degraded() {
        let f = isolated_a(Ok(CommandResult::empty()));
        let map = BTreeMap::from([("local".to_string(), vec![1]), ("k".to_string(), vec![2])]);
        assert!(run(&f, PutMapCommand::new(map)).await.is_err());
        assert_eq!(run(&f, ClearCommand::new()).await, Err(ShoalError::ClusterUnavailable));
        assert_eq!(*f.downstream.calls.lock(), 0);

        f.manager.set_availability(AvailabilityMode::Available, [Address::new("A")]);
        assert!(run(&f, ClearCommand::new()).await.is_ok());
    }

    #[tokio::test]
    async fn failed_remote_read_becomes_unavailable() {
        let f = isolated_a(Err(ShoalError::remote("B", "unreachable")));
        let err = run(&f, GetKeyValueCommand::new("k")).await.unwrap_err();
        assert_eq!(err, ShoalError::KeyUnavailable { key: "k".into() });
        assert_eq!(*f.downstream.calls.lock(), 1);
    }

    #[tokio::test]
    async fn absent_read_fails_when_no_owner_is_a_member() {
        let f = isolated_a(Ok(CommandResult::ok(None)));
        // Transport view of A is {A}; owners of "k" are {B, C}.
        assert!(run(&f, GetKeyValueCommand::new("k")).await.unwrap_err().is_unavailable());
        assert_eq!(run(&f, GetKeyValueCommand::new("local")).await, Ok(CommandResult::ok(None)));
    }

    #[tokio::test]
    async fn found_read_of_foreign_key_fails_while_degraded() {
        let f = isolated_a(Ok(CommandResult::ok(Some(vec![9]))));
        assert!(run(&f, GetKeyValueCommand::new("k")).await.is_err());
        assert_eq!(
            run(&f, GetKeyValueCommand::new("local")).await,
            Ok(CommandResult::ok(Some(vec![9])))
        );
    }

    #[tokio::test]
    async fn found_read_is_served_until_the_split_is_observed() {
        let net = LocalNetwork::new();
        let transport = Arc::new(net.join(Address::new("A")));
        // The transport already sees only {A}; the manager still holds the full view.
        let manager = Arc::new(PartitionHandlingManager::new(
            Arc::new(FixedOracle),
            [Address::new("A"), Address::new("B"), Address::new("C")],
        ));
        let downstream = Arc::new(Downstream {
            outcome: Ok(CommandResult::ok(Some(vec![7]))),
            calls: parking_lot::Mutex::new(0),
        });
        let chain = ChainBuilder::new()
            .push(Arc::new(PartitionHandlingInterceptor::new(manager.clone(), transport)))
            .push(downstream.clone())
            .build();
        let f = Fixture { manager, downstream, chain };

        assert_eq!(run(&f, GetKeyValueCommand::new("k")).await, Ok(CommandResult::ok(Some(vec![7]))));

        f.manager.set_availability(AvailabilityMode::Degraded, [Address::new("A")]);
        assert!(run(&f, GetKeyValueCommand::new("k")).await.unwrap_err().is_unavailable());
        assert_eq!(*f.downstream.calls.lock(), 2);
    }
}
