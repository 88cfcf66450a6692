//! Multi-granularity span cache
//!
//! ```text
//!   CacheManager ── RwLock ──> IntervalIndex ──> interavl::IntervalTree
//!        │                                          │
//!        │ get_from_cache (granularity filter)      └─> buckets of Arc<Span>
//!        └ add_to_cache  (append only)
//! ```
//!
//! Spans are immutable once built and are never merged, replaced or evicted.

pub mod index;
pub mod manager;
pub mod span;

pub use index::IntervalIndex;
pub use manager::{CacheManager, CacheStats, CacheStatsSnapshot};
pub use span::{AggregateBin, AggregateSpan, RawSpan, Span};
