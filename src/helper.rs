//! The get helper: fetches a page of a public resource for a template block.
//!
//! Resolves the resource name to its API controller, serves the query through
//! the result cache when enabled, and extracts the items and pagination the
//! template needs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use crate::builder::CacheBuilder;
use crate::config::GetHelperConfig;
use crate::error::CacheError;
use crate::key::CacheKey;
use crate::swr::{SwrCache, millis};

/// The only action the get helper performs.
pub const BROWSE: &str = "browse";

/// Error type returned by [`ApiClient`] implementations.
pub type ClientError = Box<dyn std::error::Error + Send + Sync>;

/// Resources the get helper can query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Posts,
    Tags,
    Pages,
    Authors,
    Tiers,
    Newsletters,
}

impl Resource {
    pub const ALL: [Resource; 6] = [
        Resource::Posts,
        Resource::Tags,
        Resource::Pages,
        Resource::Authors,
        Resource::Tiers,
        Resource::Newsletters,
    ];

    /// The resource name as used in templates and API responses.
    pub fn name(&self) -> &'static str {
        match self {
            Resource::Posts => "posts",
            Resource::Tags => "tags",
            Resource::Pages => "pages",
            Resource::Authors => "authors",
            Resource::Tiers => "tiers",
            Resource::Newsletters => "newsletters",
        }
    }

    /// The public API controller serving this resource.
    pub fn controller(&self) -> &'static str {
        match self {
            Resource::Posts => "postsPublic",
            Resource::Tags => "tagsPublic",
            Resource::Pages => "pagesPublic",
            Resource::Authors => "authorsPublic",
            Resource::Tiers => "tiersPublic",
            Resource::Newsletters => "newslettersPublic",
        }
    }
}

impl FromStr for Resource {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|resource| resource.name() == s)
            .ok_or_else(|| CacheError::UnknownResource(s.to_string()))
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Page size: a fixed count or every row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LimitRepr", into = "LimitRepr")]
pub enum Limit {
    All,
    Count(u32),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum LimitRepr {
    Count(u32),
    Keyword(String),
}

impl TryFrom<LimitRepr> for Limit {
    type Error = CacheError;

    fn try_from(repr: LimitRepr) -> Result<Self, Self::Error> {
        match repr {
            LimitRepr::Count(count) => Ok(Limit::Count(count)),
            LimitRepr::Keyword(keyword) => keyword.parse(),
        }
    }
}

impl From<Limit> for LimitRepr {
    fn from(limit: Limit) -> Self {
        match limit {
            Limit::All => LimitRepr::Keyword("all".to_string()),
            Limit::Count(count) => LimitRepr::Count(count),
        }
    }
}

impl FromStr for Limit {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            return Ok(Limit::All);
        }
        s.parse()
            .map(Limit::Count)
            .map_err(|_| CacheError::invalid_option("limit", s))
    }
}

/// Options passed through to the browse query.
///
/// Serialized into the cache key, so field order matters and must stay stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<Limit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl QueryOptions {
    /// Parse the string pairs of a template hash.
    ///
    /// Unknown names are ignored.
    pub fn from_hash<'a, I>(pairs: I) -> Result<Self, CacheError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut options = QueryOptions::default();

        for (name, value) in pairs {
            match name {
                "filter" => options.filter = Some(value.to_string()),
                "limit" => options.limit = Some(value.parse()?),
                "order" => options.order = Some(value.to_string()),
                "include" => options.include = Some(value.to_string()),
                "fields" => options.fields = Some(value.to_string()),
                "page" => {
                    let page = value
                        .parse()
                        .map_err(|_| CacheError::invalid_option(name, value))?;
                    options.page = Some(page);
                }
                _ => tracing::debug!(option = name, "ignoring unknown get helper option"),
            }
        }

        Ok(options)
    }
}

/// Pagination metadata of a browse response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: Limit,
    pub pages: u32,
    pub total: u64,
    #[serde(default)]
    pub next: Option<u32>,
    #[serde(default)]
    pub prev: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// A browse response: one array per resource name plus optional metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(flatten)]
    pub resources: Map<String, Value>,
}

/// The API the get helper queries.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Run `action` on `controller` with the given options.
    async fn query(
        &self,
        controller: &str,
        action: &str,
        options: &QueryOptions,
    ) -> Result<ApiResponse, ClientError>;
}

/// What a template block receives.
#[derive(Debug, Clone, PartialEq)]
pub struct HelperResult {
    pub resource: Resource,
    pub items: Vec<Value>,
    /// Number of rows in this page.
    pub count: usize,
    pub pagination: Option<Pagination>,
}

impl HelperResult {
    fn from_response(resource: Resource, response: &ApiResponse) -> Self {
        let items = response
            .resources
            .get(resource.name())
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        HelperResult {
            resource,
            count: items.len(),
            items,
            pagination: response
                .meta
                .as_ref()
                .and_then(|meta| meta.pagination.clone()),
        }
    }
}

/// Fetches resources for template blocks, optionally through the result cache.
pub struct GetHelper {
    client: Arc<dyn ApiClient>,
    cache: Option<SwrCache<Arc<ApiResponse>>>,
    config: GetHelperConfig,
}

impl GetHelper {
    /// Create a helper, building its own cache if `config.cache_enabled` is set.
    pub fn new(client: Arc<dyn ApiClient>, config: GetHelperConfig) -> Self {
        let cache = config
            .cache_enabled
            .then(|| CacheBuilder::from_config(&config.cache).build());

        GetHelper {
            client,
            cache,
            config,
        }
    }

    /// Create a helper around an existing cache, ignoring `config.cache_enabled`.
    pub fn with_cache(
        client: Arc<dyn ApiClient>,
        cache: SwrCache<Arc<ApiResponse>>,
        config: GetHelperConfig,
    ) -> Self {
        GetHelper {
            client,
            cache: Some(cache),
            config,
        }
    }

    pub fn cache(&self) -> Option<&SwrCache<Arc<ApiResponse>>> {
        self.cache.as_ref()
    }

    /// Browse `resource` with `options`.
    ///
    /// With the cache enabled, a repeated query is answered with the previous
    /// response while a fresh one is fetched in the background.
    pub async fn get(
        &self,
        resource: &str,
        options: QueryOptions,
    ) -> Result<HelperResult, CacheError> {
        let resource: Resource = resource.parse()?;
        let key = CacheKey::new(resource.controller(), BROWSE, &options)?;

        let started = Instant::now();
        let query = self.query(key.clone(), options);
        let response = match self.config.timeout() {
            Some(timeout) => match tokio::time::timeout(timeout, query).await {
                Ok(response) => response?,
                Err(_) => {
                    let timeout_ms = millis(timeout);
                    tracing::error!(%key, timeout_ms, "get helper query timed out");
                    return Err(CacheError::timeout(key.to_string(), timeout_ms));
                }
            },
            None => query.await?,
        };

        let elapsed = started.elapsed();
        if let Some(threshold) = self.config.threshold()
            && elapsed > threshold
        {
            tracing::warn!(
                %key,
                elapsed_ms = millis(elapsed),
                threshold_ms = millis(threshold),
                "get helper query was slow"
            );
        }

        Ok(HelperResult::from_response(resource, &response))
    }

    async fn query(
        &self,
        key: CacheKey,
        options: QueryOptions,
    ) -> Result<Arc<ApiResponse>, CacheError> {
        let client = Arc::clone(&self.client);

        match &self.cache {
            Some(cache) => {
                cache
                    .get_value(key, move |key| async move {
                        client
                            .query(key.controller(), key.action(), &options)
                            .await
                            .map(Arc::new)
                    })
                    .await
            }
            None => client
                .query(key.controller(), key.action(), &options)
                .await
                .map(Arc::new)
                .map_err(|e| CacheError::fetch(key.to_string(), e.to_string())),
        }
    }
}
