use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use shoal_types::{Address, ShoalError, Value};

// ---------------------------------------------------------------------------
// Delivery options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Wait for every recipient; an unreachable recipient is a failure.
    Synchronous,
    /// Wait for every recipient still in the view; leavers are skipped.
    SynchronousIgnoreLeavers,
    /// Succeed as soon as one recipient answers with a successful response.
    WaitForValidResponse,
    /// Fire and forget.
    Asynchronous,
}

impl ResponseMode {
    pub fn is_synchronous(self) -> bool {
        !matches!(self, ResponseMode::Asynchronous)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcOptions {
    pub mode: ResponseMode,
    pub timeout: Duration,
    /// Deliver in the same global order on every recipient.
    pub total_order: bool,
    pub use_priority_queue: bool,
}

impl RpcOptions {
    pub fn new(mode: ResponseMode, timeout: Duration) -> Self {
        RpcOptions { mode, timeout, total_order: false, use_priority_queue: false }
    }

    pub fn synchronous(timeout: Duration) -> Self {
        Self::new(ResponseMode::Synchronous, timeout)
    }

    pub fn asynchronous() -> Self {
        Self::new(ResponseMode::Asynchronous, Duration::ZERO)
    }

    pub fn with_total_order(mut self) -> Self {
        self.total_order = true;
        self
    }

    pub fn with_priority(mut self) -> Self {
        self.use_priority_queue = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Response {
    Success { successful: bool, value: Option<Value> },
    /// The command failed on the recipient.
    Exception { message: String },
    /// The recipient has no cache running.
    CacheNotFound,
}

impl Response {
    pub fn is_valid(&self) -> bool {
        matches!(self, Response::Success { .. })
    }
}

// ---------------------------------------------------------------------------
// Transport trait
// Uses RPITIT with an explicit `+ Send` bound so generic callers can spawn
// the returned futures.
// ---------------------------------------------------------------------------

pub trait Transport: Send + Sync + 'static {
    fn address(&self) -> &Address;

    /// Current membership view as seen by this member, sorted.
    fn members(&self) -> Vec<Address>;

    /// Deliver `payload` to `recipients` (all other members of the view when
    /// `None`). The local address is never a recipient.
    ///
    /// Synchronous modes fail with `ShoalError::RemoteInvocation` on timeout,
    /// on an unreachable recipient (except where the mode tolerates leavers)
    /// and on an `Exception` response. Asynchronous mode returns an empty map
    /// immediately.
    fn send(
        &self,
        recipients: Option<&[Address]>,
        payload: Vec<u8>,
        options: &RpcOptions,
    ) -> impl Future<Output = Result<BTreeMap<Address, Response>, ShoalError>> + Send;
}

/// Receiving side of a member.
#[async_trait::async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    async fn handle(&self, origin: Address, payload: Vec<u8>) -> Response;
}
