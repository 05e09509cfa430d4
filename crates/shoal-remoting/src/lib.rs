pub mod local;
pub mod rpc;
pub mod stats;
pub mod transport;

pub use local::{LocalNetwork, LocalTransport};
pub use rpc::RpcManager;
pub use stats::{AtomicStatistics, StatKind, StatisticsSink};
pub use transport::{InboundHandler, Response, ResponseMode, RpcOptions, Transport};
