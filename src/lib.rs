//! # sectorcache
//!
//! A shared, fixed-capacity buffer cache for a sector-addressed block
//! device. Clients acquire a cached view of a sector under a reader/writer
//! discipline, read or mutate it in memory, and release it; the cache
//! takes care of demand loading, deferred writeback, eviction under
//! pressure, opportunistic read-ahead, and flush on shutdown.
//!
//! The cache is generic over [`BlockDevice`] so it can be layered under a
//! filesystem's inode, directory, and free-space-map code without knowing
//! anything about any of them — and so tests can run it against an
//! in-memory fake instead of a real disk.
//!
//! ```no_run
//! use sectorcache::{Cache, CacheConfig, LockMode, MemoryBlockDevice};
//!
//! let device = MemoryBlockDevice::new(1024);
//! let cache = Cache::new(device, CacheConfig::default());
//!
//! let handle = cache.lock(0, LockMode::Shared);
//! let data = handle.read().unwrap();
//! assert_eq!(data.len(), 512);
//! handle.unlock();
//!
//! cache.shutdown().unwrap();
//! ```

mod cache;
mod config;
mod daemons;
mod device;
mod error;
mod slot;

pub use cache::{Cache, SlotHandle};
pub use config::CacheConfig;
pub use device::{BlockDevice, FileBlockDevice, MemoryBlockDevice, INVALID_SECTOR, SECTOR_SIZE};
pub use error::CacheError;
pub use slot::LockMode;
