pub mod mem;
pub mod traits;
pub mod ttl;
pub mod types;

pub use mem::MemDataContainer;
pub use traits::DataContainer;
pub use ttl::ExpiryReaper;
pub use types::{now_ns, StoredEntry};
