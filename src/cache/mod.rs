//! Expiring key-value caches for upstream data
//!
//! `FileStore` is the durable layer shared between processes; `MemoryStore`
//! offers the same contract in-process. Both sit behind the [`KvStore`] trait so
//! fetchers and the blacklist never know which one they talk to.

mod file_store;
mod memory;
pub mod store;

pub use file_store::FileStore;
pub use memory::MemoryStore;
pub use store::{get_json, keys, set_json, CacheError, KvStore};
