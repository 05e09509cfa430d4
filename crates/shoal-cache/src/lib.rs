pub mod cache;
pub mod config;
mod convert;
pub mod interceptor;
pub mod interceptors;
pub mod member;
mod remote;

pub use cache::{Cache, Transaction};
pub use config::CacheConfig;
pub use interceptor::{ChainBuilder, Interceptor, InterceptorChain, Next};
pub use interceptors::stats::{CacheStatistics, CacheStatsSnapshot};
pub use member::GridMember;
pub use remote::RemoteCommandHandler;
