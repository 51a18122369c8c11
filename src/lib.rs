//! swr-fetch - A stale-while-revalidate result cache for API-backed template helpers
//!
//! This library provides:
//! - A result cache keyed by (controller, action, serialized options)
//! - Stale-while-revalidate: a stored result is served at once while it is refreshed
//! - In-flight de-duplication: one fetch per key at a time, shared by every caller
//! - A get helper that browses public resources through the cache
//!
//! # Example
//!
//! ```ignore
//! use swr_fetch::{CacheBuilder, CacheKey};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), swr_fetch::CacheError> {
//!     // One cache per service, passed to whoever needs it
//!     let cache = CacheBuilder::new().max_entries(1_000).build::<String>();
//!
//!     let key = CacheKey::new("postsPublic", "browse", &serde_json::json!({ "limit": 5 }))?;
//!
//!     // First call fetches; later calls get this value back while it is refreshed
//!     let posts = cache
//!         .get_value(key, |key| async move {
//!             Ok::<_, std::io::Error>(format!("rows for {}", key))
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

mod builder;
mod config;
mod entry;
mod error;
mod helper;
mod key;
mod metrics;
mod store;
pub mod stores;
mod swr;

// Re-export public API
pub use builder::CacheBuilder;
pub use config::{CacheConfig, GetHelperConfig};
pub use entry::{Entry, FetchKind, Lookup, Pending};
pub use error::CacheError;
pub use helper::{
    ApiClient, ApiResponse, BROWSE, ClientError, GetHelper, HelperResult, Limit, Meta,
    Pagination, QueryOptions, Resource,
};
pub use key::CacheKey;
pub use metrics::{CacheEvent, MetricsSink, TracingSink};
pub use store::EntryStore;
pub use stores::memory::HashMapStore;
pub use stores::moka::{MokaStore, MokaStoreConfig};
pub use swr::SwrCache;
