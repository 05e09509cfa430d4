use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;

use shoal_types::{Address, ShoalError, ViewListener};

use crate::transport::{InboundHandler, Response, ResponseMode, RpcOptions, Transport};

// ---------------------------------------------------------------------------
// LocalNetwork: in-process cluster with simulated partitions
// ---------------------------------------------------------------------------

#[derive(Default)]
struct NetInner {
    /// Joined member → partition group. Members talk only within a group.
    groups: BTreeMap<Address, u32>,
    handlers: BTreeMap<Address, Arc<dyn InboundHandler>>,
    listeners: BTreeMap<Address, Vec<Arc<dyn ViewListener>>>,
}

impl NetInner {
    fn view_of(&self, addr: &Address) -> Vec<Address> {
        let Some(group) = self.groups.get(addr) else {
            return Vec::new();
        };
        self.groups
            .iter()
            .filter(|(_, g)| *g == group)
            .map(|(a, _)| a.clone())
            .collect()
    }

    fn reachable(&self, from: &Address, to: &Address) -> bool {
        match (self.groups.get(from), self.groups.get(to)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

/// Shared medium for `LocalTransport`s.
///
/// Membership changes (`join`, `leave`, `split`, `heal`) install a new view on
/// every affected member and notify its view listeners.
#[derive(Default)]
pub struct LocalNetwork {
    inner: RwLock<NetInner>,
    /// Serialises total-order deliveries.
    sequencer: tokio::sync::Mutex<()>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add `address` to the default partition and return its transport.
    pub fn join(self: &Arc<Self>, address: Address) -> LocalTransport {
        self.inner.write().groups.insert(address.clone(), 0);
        tracing::info!(member = %address, "member joined");
        self.publish_views();
        LocalTransport { network: Arc::clone(self), address }
    }

    pub fn leave(&self, address: &Address) {
        {
            let mut g = self.inner.write();
            g.groups.remove(address);
            g.handlers.remove(address);
        }
        tracing::info!(member = %address, "member left");
        self.publish_views();
    }

    pub fn register_handler(&self, address: &Address, handler: Arc<dyn InboundHandler>) {
        self.inner.write().handlers.insert(address.clone(), handler);
    }

    /// Subscribe to views installed on `address`. The current view is delivered immediately.
    pub fn add_view_listener(&self, address: &Address, listener: Arc<dyn ViewListener>) {
        let view = {
            let mut g = self.inner.write();
            g.listeners.entry(address.clone()).or_default().push(Arc::clone(&listener));
            g.view_of(address)
        };
        if !view.is_empty() {
            listener.view_changed(&view);
        }
    }

    /// Partition the cluster. Each slice becomes an isolated group; members not
    /// named stay together in the default group.
    pub fn split(&self, partitions: &[Vec<Address>]) {
        {
            let mut g = self.inner.write();
            for group in g.groups.values_mut() {
                *group = 0;
            }
            for (i, part) in partitions.iter().enumerate() {
                for addr in part {
                    if let Some(group) = g.groups.get_mut(addr) {
                        *group = i as u32 + 1;
                    }
                }
            }
        }
        tracing::warn!(partitions = partitions.len(), "network split");
        self.publish_views();
    }

    /// Merge every partition back into one group.
    pub fn heal(&self) {
        {
            let mut g = self.inner.write();
            for group in g.groups.values_mut() {
                *group = 0;
            }
        }
        tracing::info!("network healed");
        self.publish_views();
    }

    pub fn view_of(&self, address: &Address) -> Vec<Address> {
        self.inner.read().view_of(address)
    }

    pub fn all_members(&self) -> Vec<Address> {
        self.inner.read().groups.keys().cloned().collect()
    }

    fn publish_views(&self) {
        // Collect under the lock, call listeners after releasing it.
        let deliveries: Vec<(Vec<Arc<dyn ViewListener>>, Vec<Address>)> = {
            let g = self.inner.read();
            g.groups
                .keys()
                .map(|addr| {
                    let listeners = g.listeners.get(addr).cloned().unwrap_or_default();
                    (listeners, g.view_of(addr))
                })
                .collect()
        };
        for (listeners, view) in deliveries {
            for l in listeners {
                l.view_changed(&view);
            }
        }
    }

    /// `None` when `to` cannot be reached from `from`.
    async fn deliver(&self, from: &Address, to: &Address, payload: Vec<u8>) -> Option<Response> {
        let handler = {
            let g = self.inner.read();
            if !g.reachable(from, to) {
                return None;
            }
            g.handlers.get(to).cloned()
        };
        match handler {
            Some(h) => Some(h.handle(from.clone(), payload).await),
            None => Some(Response::CacheNotFound),
        }
    }
}

// ---------------------------------------------------------------------------
// LocalTransport
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct LocalTransport {
    network: Arc<LocalNetwork>,
    address: Address,
}

impl LocalTransport {
    pub fn network(&self) -> &Arc<LocalNetwork> {
        &self.network
    }
}

impl Transport for LocalTransport {
    fn address(&self) -> &Address {
        &self.address
    }

    fn members(&self) -> Vec<Address> {
        self.network.view_of(&self.address)
    }

    async fn send(
        &self,
        recipients: Option<&[Address]>,
        payload: Vec<u8>,
        options: &RpcOptions,
    ) -> Result<BTreeMap<Address, Response>, ShoalError> {
        let targets: Vec<Address> = match recipients {
            Some(r) => r.iter().filter(|a| **a != self.address).cloned().collect(),
            None => self.members().into_iter().filter(|a| *a != self.address).collect(),
        };
        if targets.is_empty() {
            return Ok(BTreeMap::new());
        }

        if !options.mode.is_synchronous() {
            let network = Arc::clone(&self.network);
            let from = self.address.clone();
            tokio::spawn(async move {
                let calls = targets.iter().map(|t| network.deliver(&from, t, payload.clone()));
                for (target, resp) in targets.iter().zip(join_all(calls).await) {
                    if !matches!(resp, Some(Response::Success { .. })) {
                        tracing::debug!(%target, ?resp, "async delivery not acknowledged");
                    }
                }
            });
            return Ok(BTreeMap::new());
        }

        // Priority sends overtake the sequencer instead of queueing behind
        // ordered sends still in flight.
        let ordered = options.total_order && !options.use_priority_queue;
        let deliveries = async {
            let _turn = if ordered {
                Some(self.network.sequencer.lock().await)
            } else {
                None
            };
            let calls = targets
                .iter()
                .map(|t| self.network.deliver(&self.address, t, payload.clone()));
            join_all(calls).await
        };
        let results = match tokio::time::timeout(options.timeout, deliveries).await {
            Ok(r) => r,
            Err(_) => {
                let names: Vec<&str> = targets.iter().map(Address::as_str).collect();
                return Err(ShoalError::remote(
                    names.join(","),
                    format!("timed out after {:?}", options.timeout),
                ));
            }
        };

        collect_responses(options.mode, targets, results)
    }
}

fn collect_responses(
    mode: ResponseMode,
    targets: Vec<Address>,
    results: Vec<Option<Response>>,
) -> Result<BTreeMap<Address, Response>, ShoalError> {
    let mut out = BTreeMap::new();
    let mut first_failure = None;
    for (target, resp) in targets.into_iter().zip(results) {
        match resp {
            None => match mode {
                ResponseMode::SynchronousIgnoreLeavers | ResponseMode::WaitForValidResponse => {
                    tracing::debug!(%target, "skipping unreachable recipient");
                }
                ResponseMode::Synchronous | ResponseMode::Asynchronous => {
                    return Err(ShoalError::remote(target, "unreachable"));
                }
            },
            Some(Response::Exception { message }) => match mode {
                ResponseMode::WaitForValidResponse => {
                    first_failure.get_or_insert((target, message));
                }
                ResponseMode::Synchronous
                | ResponseMode::SynchronousIgnoreLeavers
                | ResponseMode::Asynchronous => {
                    return Err(ShoalError::remote(target, message));
                }
            },
            Some(other) => {
                out.insert(target, other);
            }
        }
    }
    if mode == ResponseMode::WaitForValidResponse && !out.values().any(Response::is_valid) {
        return Err(match first_failure {
            Some((target, message)) => ShoalError::remote(target, message),
            None => ShoalError::remote("cluster", "no valid response"),
        });
    }
    Ok(out)
}
