use serde::{Deserialize, Serialize};

use crate::settings::OpenRouterSettings;

/// Caller directive biasing which upstream provider serves the call.
///
/// `order` keeps the caller's spelling for the wire; capability matching
/// always goes through [`ProviderRouting::normalized_order`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderRouting {
    /// Preferred providers, most preferred first.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub order: Vec<String>,

    /// Require every routed provider to support all request parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_parameters: Option<bool>,

    /// Allow falling back to providers outside `order`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_fallbacks: Option<bool>,
}

impl ProviderRouting {
    /// A routing directive preferring a single provider.
    pub fn preferring(provider: impl Into<String>) -> Self {
        Self {
            order: vec![provider.into()],
            ..Self::default()
        }
    }

    /// Lowercased, whitespace-trimmed provider tokens for matching.
    pub fn normalized_order(&self) -> Vec<String> {
        self.order
            .iter()
            .map(|provider| provider.trim().to_lowercase())
            .filter(|provider| !provider.is_empty())
            .collect()
    }

    /// The first provider token, normalized.
    pub fn first_provider(&self) -> Option<String> {
        self.normalized_order().into_iter().next()
    }

    /// Effective `require_parameters`, defaulting to false.
    pub fn requires_parameters(&self) -> bool {
        self.require_parameters.unwrap_or(false)
    }

    /// Overlays adapter-level settings without clobbering caller values.
    pub fn with_settings_defaults(mut self, settings: &OpenRouterSettings) -> Self {
        if self.require_parameters.is_none() {
            self.require_parameters = settings.require_parameters;
        }
        if self.allow_fallbacks.is_none() {
            self.allow_fallbacks = settings.allow_fallbacks;
        }
        if self.order.is_empty() {
            if let Some(provider) = settings.provider.as_deref() {
                let provider = provider.trim();
                if !provider.is_empty() {
                    self.order = vec![provider.to_string()];
                }
            }
        }
        self
    }

    /// Biases a constrained call toward capability-compatible providers:
    /// `require_parameters` defaults on, `allow_fallbacks` defaults off.
    /// Caller-set values always win.
    pub fn with_constraint_defaults(mut self) -> Self {
        if self.require_parameters.is_none() {
            self.require_parameters = Some(true);
        }
        if self.allow_fallbacks.is_none() {
            self.allow_fallbacks = Some(false);
        }
        self
    }

    /// The wire `provider` block, or `None` when nothing is set.
    pub fn wire_block(&self) -> Option<serde_json::Value> {
        if self.order.is_empty()
            && self.require_parameters.is_none()
            && self.allow_fallbacks.is_none()
        {
            return None;
        }
        serde_json::to_value(self).ok()
    }
}
