pub mod store;
pub mod sweeper;

pub use store::{CacheEntry, CacheKey, UrlCache, cache_key};
pub use sweeper::CacheSweeper;
