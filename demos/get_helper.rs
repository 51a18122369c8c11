//! Example demonstrating the get helper serving stale results while refreshing.
//!
//! The first query for a page fetches from the API. Repeating it returns the
//! previous response at once while a fresh one is fetched in the background.
//! Run with `RUST_LOG=swr_fetch=debug` to watch the cache decisions.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use swr_fetch::{
    ApiClient, ApiResponse, CacheBuilder, ClientError, GetHelper, GetHelperConfig, QueryOptions,
    TracingSink,
};
use tracing_subscriber::EnvFilter;

/// Stand-in for the content API: every call returns a new edition of the front page.
struct DemoApi {
    editions: AtomicUsize,
}

#[async_trait]
impl ApiClient for DemoApi {
    async fn query(
        &self,
        controller: &str,
        action: &str,
        options: &QueryOptions,
    ) -> Result<ApiResponse, ClientError> {
        let edition = self.editions.fetch_add(1, Ordering::SeqCst) + 1;
        println!("API call #{}: {}.{} {:?}", edition, controller, action, options);
        tokio::time::sleep(Duration::from_millis(50)).await;

        Ok(serde_json::from_value(json!({
            "posts": [
                { "title": format!("Front page, edition {}", edition) },
                { "title": "Release notes" }
            ],
            "meta": {
                "pagination": { "page": 1, "limit": 2, "pages": 4, "total": 8, "next": 2, "prev": null }
            }
        }))?)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = GetHelperConfig::from_json(r#"{ "threshold_ms": 40, "timeout_ms": 2000 }"#)?;

    // One cache for the whole service, owned here and handed to the helper
    let cache = CacheBuilder::from_config(&config.cache)
        .max_entries(1_000)
        .metrics(Arc::new(TracingSink))
        .build();
    let api = Arc::new(DemoApi {
        editions: AtomicUsize::new(0),
    });
    let helper = GetHelper::with_cache(api, cache, config);

    let options = QueryOptions::from_hash([("limit", "2"), ("order", "published_at desc")])?;

    for round in 1..=3 {
        let result = helper.get("posts", options.clone()).await?;
        println!(
            "Round {}: {} of {} posts, first = {}",
            round,
            result.count,
            result.pagination.as_ref().map_or(0, |p| p.total),
            result.items[0]["title"]
        );

        // Give the background refresh time to land
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    match helper.get("members", QueryOptions::default()).await {
        Ok(_) => println!("unexpected success"),
        Err(e) => println!("Rejected: {}", e),
    }

    if let Some(cache) = helper.cache() {
        cache.flush_metrics().await?;
    }

    Ok(())
}
