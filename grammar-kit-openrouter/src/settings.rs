use std::collections::HashMap;

/// Default OpenRouter API base.
pub const DEFAULT_API_BASE: &str = "https://openrouter.ai/api/v1";

/// Configuration for an OpenRouter-backed constrained-generation adapter.
#[derive(Debug, Clone)]
pub struct OpenRouterSettings {
    /// Base URL for API calls (e.g. "<https://openrouter.ai/api/v1>").
    pub base_url: String,

    /// API key. If set, requests carry `Authorization: Bearer <key>`.
    pub api_key: Option<String>,

    /// Optional custom headers, added after the authorization header.
    pub headers: Option<HashMap<String, String>>,

    /// Optional `HTTP-Referer` attribution header.
    pub http_referer: Option<String>,

    /// Optional `X-Title` attribution header.
    pub x_title: Option<String>,

    /// Adapter-level default reasoning effort, used when the caller does not
    /// pass one and the model supports reasoning controls.
    pub reasoning_effort: Option<String>,

    /// Default for the routing block's `require_parameters`.
    pub require_parameters: Option<bool>,

    /// Default for the routing block's `allow_fallbacks`.
    pub allow_fallbacks: Option<bool>,

    /// Preferred upstream provider, seeded into the routing `order` when the
    /// caller does not set one.
    pub provider: Option<String>,

    /// Include usage information in streaming responses.
    pub include_usage: bool,
}

impl Default for OpenRouterSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            api_key: None,
            headers: None,
            http_referer: None,
            x_title: None,
            reasoning_effort: None,
            require_parameters: None,
            allow_fallbacks: None,
            provider: None,
            include_usage: true,
        }
    }
}

impl OpenRouterSettings {
    /// Creates settings pointing at the default API base.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Adds a single header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut headers = self.headers.unwrap_or_default();
        headers.insert(key.into(), value.into());
        self.headers = Some(headers);
        self
    }

    /// Sets the `HTTP-Referer` attribution header.
    pub fn with_http_referer(mut self, referer: impl Into<String>) -> Self {
        self.http_referer = Some(referer.into());
        self
    }

    /// Sets the `X-Title` attribution header.
    pub fn with_x_title(mut self, title: impl Into<String>) -> Self {
        self.x_title = Some(title.into());
        self
    }

    /// Sets the default reasoning effort.
    pub fn with_reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = Some(effort.into());
        self
    }

    /// Sets the routing `require_parameters` default.
    pub fn with_require_parameters(mut self, require_parameters: bool) -> Self {
        self.require_parameters = Some(require_parameters);
        self
    }

    /// Sets the routing `allow_fallbacks` default.
    pub fn with_allow_fallbacks(mut self, allow_fallbacks: bool) -> Self {
        self.allow_fallbacks = Some(allow_fallbacks);
        self
    }

    /// Sets the preferred upstream provider.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets whether streaming responses report usage.
    pub fn with_include_usage(mut self, include_usage: bool) -> Self {
        self.include_usage = include_usage;
        self
    }

    /// Request headers implied by these settings.
    pub fn request_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if let Some(api_key) = self.api_key.as_deref() {
            if !api_key.is_empty() {
                headers.insert("Authorization".to_string(), format!("Bearer {api_key}"));
            }
        }
        if let Some(referer) = self.http_referer.as_deref() {
            headers.insert("HTTP-Referer".to_string(), referer.to_string());
        }
        if let Some(title) = self.x_title.as_deref() {
            headers.insert("X-Title".to_string(), title.to_string());
        }
        if let Some(extra) = &self.headers {
            headers.extend(extra.clone());
        }
        headers
    }
}

/// Normalizes an API base for cache keys and catalog URLs: lowercased,
/// truncated at the `/api/v1` marker when present, trailing slash trimmed.
pub fn normalized_api_base(raw_base: &str) -> String {
    let base = raw_base.trim().to_lowercase();
    if base.is_empty() {
        return DEFAULT_API_BASE.to_string();
    }
    const MARKER: &str = "/api/v1";
    if let Some(idx) = base.find(MARKER) {
        return base[..idx + MARKER.len()].to_string();
    }
    base.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_points_at_openrouter() {
        let settings = OpenRouterSettings::default();
        assert_eq!(settings.base_url, DEFAULT_API_BASE);
        assert!(settings.include_usage);
    }

    #[test]
    fn test_builder_chain() {
        let settings = OpenRouterSettings::new()
            .with_api_key("sk-test")
            .with_provider("Fireworks")
            .with_require_parameters(true)
            .with_header("X-Custom", "1");

        assert_eq!(settings.api_key.as_deref(), Some("sk-test"));
        assert_eq!(settings.provider.as_deref(), Some("Fireworks"));
        assert_eq!(settings.require_parameters, Some(true));
    }

    #[test]
    fn test_request_headers() {
        let headers = OpenRouterSettings::new()
            .with_api_key("sk-test")
            .with_http_referer("https://example.com")
            .with_x_title("Example")
            .request_headers();

        assert_eq!(headers.get("Authorization").unwrap(), "Bearer sk-test");
        assert_eq!(headers.get("HTTP-Referer").unwrap(), "https://example.com");
        assert_eq!(headers.get("X-Title").unwrap(), "Example");
    }

    #[test]
    fn test_normalized_api_base() {
        assert_eq!(
            normalized_api_base("https://openrouter.ai/api/v1/"),
            "https://openrouter.ai/api/v1"
        );
        assert_eq!(
            normalized_api_base("HTTPS://OpenRouter.ai/api/v1/models"),
            "https://openrouter.ai/api/v1"
        );
        assert_eq!(
            normalized_api_base("https://example.com/v1/"),
            "https://example.com/v1"
        );
        assert_eq!(normalized_api_base(""), DEFAULT_API_BASE);
    }
}
