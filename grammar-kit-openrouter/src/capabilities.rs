use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::policy::ProviderGrammarPolicy;
use crate::routing::ProviderRouting;
use crate::settings::normalized_api_base;

const CATALOG_TTL: Duration = Duration::from_secs(3600);
const CATALOG_FAILURE_TTL: Duration = Duration::from_secs(60);
const ENDPOINTS_TTL: Duration = Duration::from_secs(300);
const ENDPOINTS_FAILURE_TTL: Duration = Duration::from_secs(60);
const FETCH_TIMEOUT: Duration = Duration::from_secs(6);

/// Largest `top_logprobs` value safe to send to any routed provider.
pub const TOP_LOGPROBS_SAFE_MAX: u32 = 20;

/// Normalizes a model name for catalog lookups: slashes trimmed, lowercased.
pub fn normalized_model_name(model: &str) -> String {
    model.trim().trim_matches('/').to_lowercase()
}

/// Lookup aliases for a model: the normalized name, plus the same name with
/// a trailing `:variant` suffix stripped.
pub fn model_aliases(model: &str) -> Vec<String> {
    let normalized = normalized_model_name(model);
    if normalized.is_empty() {
        return Vec::new();
    }
    let mut aliases = vec![normalized.clone()];
    if let Some((base, _variant)) = normalized.split_once(':') {
        aliases.push(base.to_string());
    }
    aliases
}

/// Catalog metadata for one model.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelMetadata {
    /// Raw model id.
    #[serde(default)]
    pub id: String,

    /// Canonical slug, when the catalog aliases the id.
    #[serde(default)]
    pub canonical_slug: Option<String>,

    /// Request parameters the model accepts across providers.
    #[serde(default)]
    pub supported_parameters: Option<Vec<String>>,

    /// Input/output modality description.
    #[serde(default)]
    pub architecture: Option<ModelArchitecture>,
}

impl ModelMetadata {
    /// Supported parameters as a normalized set.
    pub fn supported_parameter_set(&self) -> HashSet<String> {
        normalized_set(self.supported_parameters.as_deref().unwrap_or_default())
    }

    /// Input and output modalities as normalized sets.
    pub fn modalities(&self) -> (HashSet<String>, HashSet<String>) {
        match &self.architecture {
            Some(architecture) => (
                normalized_set(&architecture.input_modalities),
                normalized_set(&architecture.output_modalities),
            ),
            None => (HashSet::new(), HashSet::new()),
        }
    }
}

/// Modality description from the model catalog.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelArchitecture {
    /// Input modalities (e.g. "text", "image", "audio").
    #[serde(default)]
    pub input_modalities: Vec<String>,

    /// Output modalities.
    #[serde(default)]
    pub output_modalities: Vec<String>,
}

/// One provider endpoint serving a model.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelEndpoint {
    /// Upstream provider name.
    #[serde(default)]
    pub provider_name: String,

    /// Endpoint tag.
    #[serde(default)]
    pub tag: String,

    /// Endpoint display name.
    #[serde(default)]
    pub name: String,

    /// Request parameters this endpoint accepts.
    #[serde(default)]
    pub supported_parameters: Option<Vec<String>>,
}

fn normalized_set(values: &[String]) -> HashSet<String> {
    values
        .iter()
        .map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty())
        .collect()
}

type Catalog = HashMap<String, ModelMetadata>;
type CacheKey = (String, String);

#[derive(Debug, Clone)]
struct Entry<T> {
    expires_at: Instant,
    payload: T,
}

/// Process-wide TTL caches for catalog and endpoint fetches.
///
/// The cache is an explicit value injected into the adapter so tests can
/// substitute a fresh one (or prime it) instead of hitting the network.
/// Reads take the mutex only to read-or-insert; fetches happen outside the
/// lock, and a later writer may overwrite a concurrent writer's entry.
#[derive(Debug, Default)]
pub struct CapabilityCache {
    catalog: Mutex<HashMap<CacheKey, Entry<Catalog>>>,
    endpoints: Mutex<HashMap<CacheKey, Entry<Vec<ModelEndpoint>>>>,
}

impl CapabilityCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the catalog for `(api_base, api_key)`, keyed by both raw id and
    /// canonical slug, with the full success TTL.
    pub fn prime_catalog(&self, api_base: &str, api_key: &str, rows: Vec<ModelMetadata>) {
        let catalog = build_catalog(rows);
        self.store_catalog(
            (normalized_api_base(api_base), api_key.trim().to_string()),
            catalog,
            CATALOG_TTL,
        );
    }

    /// Seeds the endpoint list for `(api_base, model)` with the full TTL.
    pub fn prime_endpoints(&self, api_base: &str, model: &str, endpoints: Vec<ModelEndpoint>) {
        self.store_endpoints(
            (normalized_api_base(api_base), normalized_model_name(model)),
            endpoints,
            ENDPOINTS_TTL,
        );
    }

    fn cached_catalog(&self, key: &CacheKey) -> Option<Catalog> {
        let catalog = self
            .catalog
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        catalog
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.payload.clone())
    }

    fn store_catalog(&self, key: CacheKey, payload: Catalog, ttl: Duration) {
        let mut catalog = self
            .catalog
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        catalog.insert(
            key,
            Entry {
                expires_at: Instant::now() + ttl,
                payload,
            },
        );
    }

    fn cached_endpoints(&self, key: &CacheKey) -> Option<Vec<ModelEndpoint>> {
        let endpoints = self
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        endpoints
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.payload.clone())
    }

    fn store_endpoints(&self, key: CacheKey, payload: Vec<ModelEndpoint>, ttl: Duration) {
        let mut endpoints = self
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        endpoints.insert(
            key,
            Entry {
                expires_at: Instant::now() + ttl,
                payload,
            },
        );
    }
}

fn build_catalog(rows: Vec<ModelMetadata>) -> Catalog {
    let mut catalog = Catalog::new();
    for row in rows {
        let model_id = normalized_model_name(&row.id);
        let canonical_slug = row
            .canonical_slug
            .as_deref()
            .map(normalized_model_name)
            .unwrap_or_default();
        if !canonical_slug.is_empty() {
            catalog.entry(canonical_slug).or_insert_with(|| row.clone());
        }
        if !model_id.is_empty() {
            catalog.insert(model_id, row);
        }
    }
    catalog
}

#[derive(Debug, Deserialize)]
struct CatalogPayload {
    #[serde(default)]
    data: Vec<ModelMetadata>,
}

#[derive(Debug, Deserialize)]
struct EndpointsPayload {
    #[serde(default)]
    data: EndpointsData,
}

#[derive(Debug, Default, Deserialize)]
struct EndpointsData {
    #[serde(default)]
    endpoints: Vec<ModelEndpoint>,
}

/// Answers per-model, per-routing capability questions from cached catalog
/// and endpoint fetches.
#[derive(Debug, Clone)]
pub struct CapabilityResolver {
    http: reqwest::Client,
    cache: Arc<CapabilityCache>,
    api_base: String,
    api_key: String,
}

impl CapabilityResolver {
    /// Creates a resolver over the given cache and credentials.
    pub fn new(
        http: reqwest::Client,
        cache: Arc<CapabilityCache>,
        api_base: &str,
        api_key: Option<&str>,
    ) -> Self {
        Self {
            http,
            cache,
            api_base: normalized_api_base(api_base),
            api_key: api_key.unwrap_or_default().trim().to_string(),
        }
    }

    /// The normalized API base this resolver queries.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Fetches (or returns cached) model catalog for the API base.
    pub async fn models_catalog(&self) -> Catalog {
        let key = (self.api_base.clone(), self.api_key.clone());
        if let Some(catalog) = self.cache.cached_catalog(&key) {
            debug!(api_base = %self.api_base, "model catalog cache hit");
            return catalog;
        }

        let url = format!("{}/models", self.api_base);
        let (catalog, ttl) = match self.fetch_json::<CatalogPayload>(&url).await {
            Ok(payload) => (build_catalog(payload.data), CATALOG_TTL),
            Err(err) => {
                warn!(api_base = %self.api_base, error = %err, "model catalog fetch failed");
                (Catalog::new(), CATALOG_FAILURE_TTL)
            }
        };
        self.cache.store_catalog(key, catalog.clone(), ttl);
        catalog
    }

    /// Catalog metadata for a model, resolving `:variant` aliases.
    pub async fn model_metadata(&self, model: &str) -> Option<ModelMetadata> {
        let catalog = self.models_catalog().await;
        for alias in model_aliases(model) {
            if let Some(metadata) = catalog.get(&alias) {
                return Some(metadata.clone());
            }
        }
        None
    }

    /// The catalog-level supported parameter set for a model.
    pub async fn supported_parameters(&self, model: &str) -> HashSet<String> {
        self.model_metadata(model)
            .await
            .map(|metadata| metadata.supported_parameter_set())
            .unwrap_or_default()
    }

    /// Input and output modalities for a model.
    pub async fn modalities(&self, model: &str) -> (HashSet<String>, HashSet<String>) {
        self.model_metadata(model)
            .await
            .map(|metadata| metadata.modalities())
            .unwrap_or_default()
    }

    /// URL of the per-model endpoints listing.
    pub fn endpoints_url(&self, model: &str) -> Option<String> {
        let model = model.trim().trim_matches('/');
        if model.is_empty() {
            return None;
        }
        let mut url = url::Url::parse(&format!("{}/models", self.api_base)).ok()?;
        {
            let mut segments = url.path_segments_mut().ok()?;
            match model.split_once('/') {
                Some((author, slug)) => {
                    segments.push(author);
                    segments.push(slug);
                }
                None => {
                    segments.push(model);
                }
            }
            segments.push("endpoints");
        }
        Some(url.to_string())
    }

    /// Fetches (or returns cached) endpoint records for a model.
    pub async fn model_endpoints(&self, model: &str) -> Vec<ModelEndpoint> {
        let Some(url) = self.endpoints_url(model) else {
            return Vec::new();
        };
        let key = (self.api_base.clone(), normalized_model_name(model));
        if let Some(endpoints) = self.cache.cached_endpoints(&key) {
            debug!(model = %model, "model endpoints cache hit");
            return endpoints;
        }

        let (endpoints, ttl) = match self.fetch_json::<EndpointsPayload>(&url).await {
            Ok(payload) => (payload.data.endpoints, ENDPOINTS_TTL),
            Err(err) => {
                warn!(model = %model, error = %err, "model endpoints fetch failed");
                (Vec::new(), ENDPOINTS_FAILURE_TTL)
            }
        };
        self.cache.store_endpoints(key, endpoints.clone(), ttl);
        endpoints
    }

    async fn fetch_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, reqwest::Error> {
        let mut request = self
            .http
            .get(url)
            .timeout(FETCH_TIMEOUT)
            .header("Accept", "application/json");
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }
        request.send().await?.error_for_status()?.json::<T>().await
    }

    /// Whether a request parameter is accepted for `model` under `routing`.
    ///
    /// Without an explicit provider order the catalog answers directly.
    /// Otherwise the endpoint list is filtered to the routed providers; with
    /// `require_parameters` one declaring endpoint suffices, without it all
    /// candidates must declare the parameter.
    pub async fn parameter_supported(
        &self,
        model: &str,
        parameter: &str,
        routing: &ProviderRouting,
    ) -> bool {
        let parameter = parameter.trim().to_lowercase();
        if parameter.is_empty() {
            return false;
        }

        let order = routing.normalized_order();
        let model_supported = self.supported_parameters(model).await;
        if !model_supported.is_empty() && order.is_empty() {
            return model_supported.contains(&parameter);
        }

        let endpoints = self.model_endpoints(model).await;
        let candidates = candidate_endpoints(&endpoints, &order);
        if candidates.is_empty() {
            return model_supported.contains(&parameter);
        }
        endpoints_declare_parameter(&candidates, &parameter, routing.requires_parameters())
    }

    /// `(supports_logprobs, supports_top_logprobs)` for the routing.
    pub async fn logprobs_capability(
        &self,
        model: &str,
        routing: &ProviderRouting,
    ) -> (bool, bool) {
        let supports_logprobs = self.parameter_supported(model, "logprobs", routing).await;
        let supports_top_logprobs = self
            .parameter_supported(model, "top_logprobs", routing)
            .await;
        (supports_logprobs, supports_top_logprobs)
    }

    /// Whether tool calling is accepted under the routing.
    pub async fn supports_tools(&self, model: &str, routing: &ProviderRouting) -> bool {
        self.parameter_supported(model, "tools", routing).await
    }

    /// Whether any structured response format is accepted.
    pub async fn supports_response_format(&self, model: &str, routing: &ProviderRouting) -> bool {
        self.parameter_supported(model, "response_format", routing)
            .await
            || self
                .parameter_supported(model, "structured_outputs", routing)
                .await
    }

    /// Whether reasoning controls are accepted.
    pub async fn supports_reasoning(&self, model: &str, routing: &ProviderRouting) -> bool {
        self.parameter_supported(model, "reasoning", routing).await
            || self
                .parameter_supported(model, "reasoning_effort", routing)
                .await
    }

    /// Whether a free-form grammar `response_format` is accepted.
    ///
    /// The offline-built policy is consulted first for the first routed
    /// provider; a policy verdict (either way) wins. Otherwise this requires
    /// the `response_format` parameter specifically: a model that only
    /// declares `structured_outputs` has JSON-schema support, not free-form
    /// grammar support.
    pub async fn supports_grammar_response_format(
        &self,
        model: &str,
        routing: &ProviderRouting,
        policy: &ProviderGrammarPolicy,
    ) -> bool {
        if let Some(first) = routing.first_provider() {
            if let Some(entry) = policy.provider(&first) {
                return entry.supports_grammar;
            }
        }
        self.parameter_supported(model, "response_format", routing)
            .await
    }
}

/// Endpoints matching the routed provider order, with a fuzzy substring
/// tie-break over the joined name/tag/display haystack. An empty filter
/// result falls back to every endpoint.
fn candidate_endpoints(endpoints: &[ModelEndpoint], order: &[String]) -> Vec<ModelEndpoint> {
    if order.is_empty() {
        return endpoints.to_vec();
    }
    let filtered: Vec<ModelEndpoint> = endpoints
        .iter()
        .filter(|endpoint| {
            let provider_name = endpoint.provider_name.trim().to_lowercase();
            let tag = endpoint.tag.trim().to_lowercase();
            let display = endpoint.name.trim().to_lowercase();
            let haystack = format!("{provider_name} {tag} {display}");
            order.iter().any(|token| {
                token == &provider_name || token == &tag || haystack.contains(token.as_str())
            })
        })
        .cloned()
        .collect();
    if filtered.is_empty() {
        endpoints.to_vec()
    } else {
        filtered
    }
}

fn endpoints_declare_parameter(
    endpoints: &[ModelEndpoint],
    parameter: &str,
    require_parameters: bool,
) -> bool {
    if endpoints.is_empty() {
        return false;
    }
    let declaring = endpoints
        .iter()
        .filter(|endpoint| {
            endpoint
                .supported_parameters
                .as_deref()
                .map(normalized_set)
                .is_some_and(|supported| supported.contains(parameter))
        })
        .count();
    if declaring == 0 {
        return false;
    }
    if require_parameters {
        return true;
    }
    declaring == endpoints.len()
}
