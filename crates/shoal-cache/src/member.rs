use std::sync::Arc;

use tokio::task::JoinHandle;

use shoal_commands::TracingNotifier;
use shoal_remoting::{LocalNetwork, LocalTransport, Transport};
use shoal_storage::{ExpiryReaper, MemDataContainer};
use shoal_types::{Address, ViewListener};

use crate::cache::Cache;
use crate::config::CacheConfig;

pub type LocalCache = Cache<MemDataContainer, LocalTransport>;

/// A cache member running on an in-process network, with its expiry reaper.
pub struct GridMember {
    cache: Arc<LocalCache>,
    network: Arc<LocalNetwork>,
    address: Address,
    reaper: JoinHandle<()>,
}

impl GridMember {
    /// Start one member per name. All members join the network before any
    /// cache is built, so every cache starts from the full view.
    pub fn start_cluster(network: &Arc<LocalNetwork>, names: &[&str], config: &CacheConfig) -> Vec<GridMember> {
        let transports: Vec<LocalTransport> = names.iter().map(|n| network.join(Address::new(*n))).collect();
        let members = network.all_members();
        transports
            .into_iter()
            .map(|t| Self::assemble(network, t, &members, config))
            .collect()
    }

    /// Join a running cluster. Existing members rebalance when they see the
    /// new view; no data is transferred.
    pub fn start(network: &Arc<LocalNetwork>, name: &str, config: &CacheConfig) -> GridMember {
        let transport = network.join(Address::new(name));
        let members = network.view_of(transport.address());
        Self::assemble(network, transport, &members, config)
    }

    fn assemble(
        network: &Arc<LocalNetwork>,
        transport: LocalTransport,
        members: &[Address],
        config: &CacheConfig,
    ) -> GridMember {
        let address = transport.address().clone();
        let container = Arc::new(MemDataContainer::new());
        let cache = Arc::new(Cache::new(
            config.clone(),
            container.clone(),
            Arc::new(transport),
            members,
            Arc::new(TracingNotifier),
        ));
        network.register_handler(&address, cache.inbound_handler());
        network.add_view_listener(&address, cache.availability_strategy().clone() as Arc<dyn ViewListener>);
        let reaper = ExpiryReaper::new(container, config.expiry_reaper_interval()).spawn();
        tracing::info!(member = %address, "grid member started");
        GridMember { cache, network: Arc::clone(network), address, reaper }
    }

    pub fn cache(&self) -> &Arc<LocalCache> {
        &self.cache
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn network(&self) -> &Arc<LocalNetwork> {
        &self.network
    }

    /// Leave the network and stop background work. Leaving drops the
    /// network's reference to this member's handler.
    pub fn stop(self) {
        self.network.leave(&self.address);
        self.reaper.abort();
        tracing::info!(member = %self.address, "grid member stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use shoal_commands::payload::decode_counter;
    use shoal_commands::Delta;
    use shoal_remoting::{InboundHandler, Response, StatKind};
    use shoal_storage::DataContainer;
    use shoal_types::{AvailabilityMode, Metadata, ShoalError};

    /// Fails every command it receives.
    struct Rejecting;

    #[async_trait::async_trait]
    impl InboundHandler for Rejecting {
        async fn handle(&self, _origin: Address, _payload: Vec<u8>) -> Response {
            Response::Exception { message: "rejected".into() }
        }
    }

    fn cluster(names: &[&str]) -> (Arc<LocalNetwork>, Vec<GridMember>) {
        let network = LocalNetwork::new();
        let members = GridMember::start_cluster(&network, names, &CacheConfig::default());
        (network, members)
    }

    /// First key in `k0..` for which `pred` holds on `member`'s topology.
    fn key_where(member: &GridMember, pred: impl Fn(&[Address]) -> bool) -> String {
        let topology = member.cache().topology().current();
        (0..1000)
            .map(|i| format!("k{i}"))
            .find(|k| pred(topology.ch.locate_owners(k)))
            .expect("no matching key")
    }

    #[tokio::test]
    async fn writes_are_visible_from_every_member() {
        let (_net, m) = cluster(&["a", "b", "c"]);
        for i in 0..20 {
            m[i % 3].cache().put(format!("key-{i}"), vec![i as u8]).await.unwrap();
        }
        for i in 0..20 {
            for member in &m {
                assert_eq!(member.cache().get(format!("key-{i}")).await.unwrap(), Some(vec![i as u8]));
            }
        }
        // Two owners per key: each entry is stored twice across the cluster.
        let mut total = 0;
        for member in &m {
            total += member.cache().local_size().await.unwrap();
        }
        assert_eq!(total, 40);
    }

    #[tokio::test]
    async fn conditional_writes_from_a_non_owner() {
        let (_net, m) = cluster(&["a", "b", "c"]);
        let key = key_where(&m[0], |owners| !owners.contains(&Address::new("a")));

        assert!(m[1].cache().put_if_absent(key.clone(), vec![1]).await.unwrap().successful);
        let r = m[0].cache().put_if_absent(key.clone(), vec![2]).await.unwrap();
        assert!(!r.successful);
        assert_eq!(r.value, Some(vec![1]));

        assert!(!m[0].cache().replace_if(key.clone(), vec![7], vec![3]).await.unwrap());
        assert!(m[0].cache().replace_if(key.clone(), vec![1], vec![3]).await.unwrap());
        assert_eq!(m[2].cache().get(key.clone()).await.unwrap(), Some(vec![3]));
        assert!(m[0].cache().remove_if(key.clone(), vec![3]).await.unwrap());
        for member in &m {
            assert_eq!(member.cache().get(key.clone()).await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn deltas_replicate_the_merged_value() {
        let (_net, m) = cluster(&["a", "b", "c"]);
        for member in &m {
            member.cache().apply_delta("counter", Delta::Increment(2)).await.unwrap();
        }
        for member in &m {
            let v = member.cache().get("counter").await.unwrap().unwrap();
            assert_eq!(decode_counter(&v).unwrap(), 6);
        }
    }

    #[tokio::test]
    async fn put_all_and_clear_reach_every_owner() {
        let (_net, m) = cluster(&["a", "b", "c"]);
        let map: BTreeMap<String, Vec<u8>> = (0..10).map(|i| (format!("m{i}"), vec![i])).collect();
        m[1].cache().put_all(map).await.unwrap();
        assert_eq!(m[2].cache().get("m7").await.unwrap(), Some(vec![7]));

        m[0].cache().clear().await.unwrap();
        for member in &m {
            assert_eq!(member.cache().local_size().await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn minority_partition_degrades_and_rejects_writes() {
        let (net, m) = cluster(&["a", "b", "c"]);
        net.split(&[vec![Address::new("a")], vec![Address::new("b"), Address::new("c")]]);

        assert_eq!(m[0].cache().availability(), AvailabilityMode::Degraded);
        assert_eq!(m[1].cache().availability(), AvailabilityMode::Available);
        assert_eq!(m[1].cache().topology().current().topology_id, 2);

        // Every key has an owner outside {a}.
        let err = m[0].cache().put("x", vec![1]).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(m[0].cache().clear().await, Err(ShoalError::ClusterUnavailable));

        // The majority keeps working.
        m[1].cache().put("x", vec![1]).await.unwrap();
        assert_eq!(m[2].cache().get("x").await.unwrap(), Some(vec![1]));

        net.heal();
        for member in &m {
            assert_eq!(member.cache().availability(), AvailabilityMode::Available);
        }
        m[0].cache().put("y", vec![2]).await.unwrap();
        assert_eq!(m[1].cache().get("y").await.unwrap(), Some(vec![2]));
    }

    #[tokio::test]
    async fn read_of_unreachable_owners_is_unavailable() {
        let (net, m) = cluster(&["a", "b", "c"]);
        let foreign = key_where(&m[0], |owners| !owners.contains(&Address::new("a")));
        net.split(&[vec![Address::new("a")], vec![Address::new("b"), Address::new("c")]]);

        let err = m[0].cache().get(foreign).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn transaction_commits_on_every_owner() {
        let (_net, m) = cluster(&["a", "b", "c"]);
        let mut tx = m[0].cache().begin();
        tx.put("t1", vec![1]).put("t2", vec![2]).apply_delta("t3", Delta::Increment(1));
        m[0].cache().commit(tx).await.unwrap();

        for member in &m {
            assert_eq!(member.cache().get("t1").await.unwrap(), Some(vec![1]));
            assert_eq!(member.cache().get("t2").await.unwrap(), Some(vec![2]));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        for member in &m {
            assert!(member.cache().transactions().is_empty());
        }
        assert_eq!(m[0].cache().rpc_statistics().get(StatKind::NumRttsPrepare), 1);
        assert_eq!(m[0].cache().rpc_statistics().get(StatKind::NumRttsCommit), 1);
    }

    #[tokio::test]
    async fn prepare_rejected_by_a_degraded_owner_rolls_back() {
        let (_net, m) = cluster(&["a", "b", "c"]);
        let key = key_where(&m[0], |owners| owners.contains(&Address::new("b")));
        m[1].cache()
            .partition_handling_manager()
            .set_availability(AvailabilityMode::Degraded, [Address::new("b")]);

        let mut tx = m[0].cache().begin();
        tx.put(key.clone(), vec![1]);
        let err = m[0].cache().commit(tx).await.unwrap_err();
        assert!(err.is_remote_invocation());

        for member in &m {
            assert!(member.cache().transactions().is_empty());
            assert_eq!(member.cache().container().len().await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn entries_expire_after_their_lifespan() {
        let (_net, m) = cluster(&["a", "b"]);
        m[0].cache()
            .put_with_metadata("ttl", vec![1], Metadata::default().with_lifespan_ms(30))
            .await
            .unwrap();
        assert_eq!(m[1].cache().get("ttl").await.unwrap(), Some(vec![1]));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(m[0].cache().get("ttl").await.unwrap(), None);
        assert_eq!(m[1].cache().get("ttl").await.unwrap(), None);
    }

    #[tokio::test]
    async fn late_joiner_triggers_rebalance() {
        let (net, m) = cluster(&["a", "b"]);
        let c = GridMember::start(&net, "c", &CacheConfig::default());
        assert_eq!(m[0].cache().topology().members().len(), 3);
        assert_eq!(c.cache().topology().members().len(), 3);

        c.stop();
        assert_eq!(m[0].cache().topology().current().ch.members().len(), 2);
        assert_eq!(m[0].cache().availability(), AvailabilityMode::Available);
    }

    #[tokio::test]
    async fn failed_backup_restores_the_previous_value() {
        let network = LocalNetwork::new();
        let config = CacheConfig::default().with_num_owners(3);
        let m = GridMember::start_cluster(&network, &["a", "b", "c"], &config);
        let topology = m[0].cache().topology().current();
        let mut led_by_a = (0..1000)
            .map(|i| format!("k{i}"))
            .filter(|k| topology.ch.primary_owner(k) == Some(&Address::new("a")));
        let (key, fresh) = (led_by_a.next().unwrap(), led_by_a.next().unwrap());
        m[0].cache().put(key.clone(), vec![1]).await.unwrap();

        // "b" applies backups, "c" now rejects them.
        network.register_handler(&Address::new("c"), Arc::new(Rejecting));

        let err = m[0].cache().put(key.clone(), vec![2]).await.unwrap_err();
        assert!(err.is_remote_invocation());
        let err = m[0].cache().put(fresh.clone(), vec![9]).await.unwrap_err();
        assert!(err.is_remote_invocation());

        for member in &m[..2] {
            let container = member.cache().container();
            assert_eq!(container.get(&key).await.unwrap().map(|e| e.value), Some(vec![1]));
            assert_eq!(container.get(&fresh).await.unwrap(), None);
        }
        assert_eq!(m[0].cache().get(key).await.unwrap(), Some(vec![1]));
    }

    #[tokio::test]
    async fn total_order_transactions_commit_everywhere() {
        let network = LocalNetwork::new();
        let config = CacheConfig::default().with_total_order_transactions(true);
        let m = GridMember::start_cluster(&network, &["a", "b", "c"], &config);

        let mut first = m[0].cache().begin();
        first.put("x", vec![1]).put("y", vec![1]);
        m[0].cache().commit(first).await.unwrap();
        let mut second = m[1].cache().begin();
        second.put("x", vec![2]).put("z", vec![2]);
        m[1].cache().commit(second).await.unwrap();

        for member in &m {
            assert_eq!(member.cache().get("x").await.unwrap(), Some(vec![2]));
            assert_eq!(member.cache().get("y").await.unwrap(), Some(vec![1]));
            assert_eq!(member.cache().get("z").await.unwrap(), Some(vec![2]));
        }
        assert_eq!(m[1].cache().rpc_statistics().get(StatKind::NumRttsPrepare), 1);
    }
}
