pub mod cache;
pub mod index;

pub use cache::{CacheBlobStat, CacheError, CompressedCache, PruneOutcome};
pub use index::{CacheIndex, IndexStats};
