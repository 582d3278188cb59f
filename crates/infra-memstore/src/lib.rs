mod lock;
mod snapshot;
mod store;

pub use lock::DataDirLock;
pub use store::MemoryStore;
