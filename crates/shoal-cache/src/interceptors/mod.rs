pub mod call;
pub mod distribution;
pub mod entry;
pub mod locking;
pub mod partition;
pub mod stats;
pub mod trace;
pub mod tx;

pub use call::CallInterceptor;
pub use distribution::DistributionInterceptor;
pub use entry::EntryWrappingInterceptor;
pub use locking::{LockManager, LockingInterceptor};
pub use partition::PartitionHandlingInterceptor;
pub use stats::CacheMgmtInterceptor;
pub use trace::InvocationContextInterceptor;
pub use tx::{TransactionTable, TxInterceptor};
