use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use swr_fetch::CacheKey;

/// One page of browse results
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchPage {
    pub page: u32,
    pub titles: Vec<String>,
}

impl BenchPage {
    pub fn new(page: u32) -> Self {
        Self {
            page,
            titles: (0..15).map(|i| format!("Post {}-{}", page, i)).collect(),
        }
    }
}

/// Simulated API with configurable latency
#[derive(Clone)]
pub struct FakeApi {
    latency_ms: u64,
    query_count: Arc<AtomicUsize>,
}

impl FakeApi {
    pub fn new(latency_ms: u64) -> Self {
        Self {
            latency_ms,
            query_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Latency from `API_LATENCY_MS`, 20ms when unset.
    pub fn from_env() -> Self {
        let latency_ms = std::env::var("API_LATENCY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(20);
        Self::new(latency_ms)
    }

    pub async fn browse(&self, page: u32) -> Result<BenchPage, String> {
        self.query_count.fetch_add(1, Ordering::Relaxed);

        // Simulate API latency
        tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;

        Ok(BenchPage::new(page))
    }

    #[allow(dead_code)]
    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::Relaxed)
    }
}

/// Cache key for one page of the posts browse query
pub fn page_key(page: u32) -> CacheKey {
    CacheKey::from_parts("postsPublic", "browse", format!(r#"{{"page":{}}}"#, page))
}

/// Generate page numbers for different workload patterns
pub struct KeyGenerator {
    num_pages: u32,
}

impl KeyGenerator {
    pub fn new(num_pages: u32) -> Self {
        Self { num_pages }
    }

    /// Every page once (for cold cache tests)
    pub fn sequential(&self) -> Vec<u32> {
        (0..self.num_pages).collect()
    }

    /// Pages with a skewed distribution: 80% of requests go to the first 20% of pages
    pub fn skewed(&self, count: usize) -> Vec<u32> {
        let mut rng = rand::thread_rng();
        let hot_pages = (self.num_pages / 5).max(1);

        (0..count)
            .map(|_| {
                if rng.gen_bool(0.8) {
                    rng.gen_range(0..hot_pages)
                } else {
                    rng.gen_range(hot_pages..self.num_pages)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #[tokio::test]
    async fn test_fake_api() {
        use super::FakeApi;

        let api = FakeApi::new(1);

        let page = api.browse(3).await.unwrap();
        assert_eq!(page.page, 3);
        assert_eq!(page.titles.len(), 15);

        assert_eq!(api.query_count(), 1);
    }

    #[test]
    fn test_key_generator() {
        use super::KeyGenerator;

        let key_gen = KeyGenerator::new(100);

        let seq = key_gen.sequential();
        assert_eq!(seq.len(), 100);
        assert_eq!(seq[0], 0);

        let skewed = key_gen.skewed(50);
        assert_eq!(skewed.len(), 50);
        assert!(skewed.iter().all(|page| *page < 100));
    }
}
