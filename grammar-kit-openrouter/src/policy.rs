use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use grammar_kit_dialect::GrammarDialect;

use crate::capabilities::model_aliases;
use crate::routing::ProviderRouting;

/// Built-in dialect hints for providers the policy artifact does not cover.
const PROVIDER_FORMAT_HINTS: [(&str, GrammarDialect); 1] = [("fireworks", GrammarDialect::Gbnf)];

/// Offline-built record of which upstream providers honor grammar
/// response formats, and in which dialect.
///
/// The artifact is produced by the probe tooling and persisted as JSON
/// (schema version 1 with a `generated_at` timestamp). At run time it is a
/// hint: providers it does not name fall through to the live capabilities
/// API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderGrammarPolicy {
    /// Artifact schema version.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// ISO-8601 timestamp of when the artifact was built.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,

    /// API base the probe ran against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,

    /// Per-provider verdicts, keyed by normalized provider name.
    #[serde(default)]
    pub providers: HashMap<String, ProviderGrammarEntry>,

    /// Per-model rollups, keyed by normalized model name.
    #[serde(default)]
    pub models_summary: HashMap<String, ModelGrammarSummary>,

    /// Providers with grammar support, ranked by priority.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ranked_grammar_providers: Vec<String>,
}

impl Default for ProviderGrammarPolicy {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            generated_at: None,
            api_base: None,
            providers: HashMap::new(),
            models_summary: HashMap::new(),
            ranked_grammar_providers: Vec::new(),
        }
    }
}

fn default_schema_version() -> u32 {
    1
}

/// Policy verdict for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderGrammarEntry {
    /// Display name as reported by the provider listing.
    pub provider_name: String,

    /// Whether the provider obeyed at least one grammar probe.
    pub supports_grammar: bool,

    /// The dialect with the best probe outcomes, if any.
    #[serde(default)]
    pub recommended_format: Option<GrammarDialect>,

    /// Ranking weight for constraint-biased routing.
    #[serde(default)]
    pub priority: i64,

    /// Why the verdict was reached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Per-model rollup of grammar-capable providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelGrammarSummary {
    /// Raw model id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Providers that obeyed a grammar probe for this model.
    #[serde(default)]
    pub supported_providers: Vec<String>,
}

/// Failure loading a policy artifact.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The file could not be read or written.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The file is not a valid policy artifact.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ProviderGrammarPolicy {
    /// Loads a policy artifact from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Loads a policy artifact, falling back to an empty policy (with a
    /// warning) when the file is missing or malformed.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(policy) => policy,
            Err(err) => {
                warn!(
                    path = %path.as_ref().display(),
                    error = %err,
                    "provider grammar policy unavailable, using empty policy"
                );
                Self::default()
            }
        }
    }

    /// Writes the artifact as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PolicyError> {
        let mut rendered = serde_json::to_string_pretty(self)?;
        rendered.push('\n');
        std::fs::write(path, rendered)?;
        Ok(())
    }

    /// The policy entry for a provider, by normalized name.
    pub fn provider(&self, provider: &str) -> Option<&ProviderGrammarEntry> {
        self.providers.get(&provider.trim().to_lowercase())
    }

    /// The model rollup, resolving `:variant` aliases.
    pub fn model_summary(&self, model: &str) -> Option<&ModelGrammarSummary> {
        model_aliases(model)
            .into_iter()
            .find_map(|alias| self.models_summary.get(&alias))
    }

    /// The grammar dialect to use for the routing: the policy's
    /// recommendation for the first routed provider, then the built-in
    /// hints, then the Lark default.
    pub fn grammar_format_for(&self, routing: &ProviderRouting) -> GrammarDialect {
        let Some(first) = routing.first_provider() else {
            return GrammarDialect::Lark;
        };
        if let Some(recommended) = self
            .provider(&first)
            .and_then(|entry| entry.recommended_format)
        {
            return recommended;
        }
        for (marker, dialect) in PROVIDER_FORMAT_HINTS {
            if first == marker || first.contains(marker) {
                return dialect;
            }
        }
        GrammarDialect::Lark
    }

    /// Providers known to serve this model with grammar support, for
    /// seeding a constraint-biased routing order.
    pub fn constraint_order_for(&self, model: &str) -> Option<Vec<String>> {
        let summary = self.model_summary(model)?;
        if summary.supported_providers.is_empty() {
            None
        } else {
            Some(summary.supported_providers.clone())
        }
    }
}

/// Routing defaults for a grammar-constrained call: require parameter
/// support, disable fallbacks, and seed the provider order from the policy
/// when the caller left it open.
pub fn constraint_routing_defaults(
    routing: ProviderRouting,
    model: &str,
    policy: &ProviderGrammarPolicy,
) -> ProviderRouting {
    let mut routing = routing.with_constraint_defaults();
    if routing.order.is_empty() {
        if let Some(order) = policy.constraint_order_for(model) {
            routing.order = order;
        }
    }
    routing
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy_from(value: serde_json::Value) -> ProviderGrammarPolicy {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_grammar_format_defaults_to_lark() {
        let policy = ProviderGrammarPolicy::default();
        assert_eq!(
            policy.grammar_format_for(&ProviderRouting::default()),
            GrammarDialect::Lark
        );
    }

    #[test]
    fn test_grammar_format_uses_builtin_fireworks_hint() {
        let policy = ProviderGrammarPolicy::default();
        let routing = ProviderRouting::preferring("Fireworks");
        assert_eq!(policy.grammar_format_for(&routing), GrammarDialect::Gbnf);

        let fuzzy = ProviderRouting::preferring("fireworks/serverless");
        assert_eq!(policy.grammar_format_for(&fuzzy), GrammarDialect::Gbnf);
    }

    #[test]
    fn test_grammar_format_prefers_policy_recommendation() {
        let policy = policy_from(json!({
            "schema_version": 1,
            "providers": {
                "friendli": {
                    "provider_name": "Friendli",
                    "supports_grammar": true,
                    "recommended_format": "lark"
                }
            }
        }));
        let routing = ProviderRouting::preferring("Friendli");
        assert_eq!(policy.grammar_format_for(&routing), GrammarDialect::Lark);
    }

    #[test]
    fn test_constraint_defaults_seed_known_provider_order() {
        let policy = policy_from(json!({
            "schema_version": 1,
            "models_summary": {
                "z-ai/glm-5": {
                    "model": "z-ai/glm-5",
                    "supported_providers": ["Fireworks", "Together"]
                }
            }
        }));

        let routing =
            constraint_routing_defaults(ProviderRouting::default(), "z-ai/glm-5", &policy);
        assert_eq!(routing.require_parameters, Some(true));
        assert_eq!(routing.allow_fallbacks, Some(false));
        assert_eq!(routing.order, vec!["Fireworks", "Together"]);
    }

    #[test]
    fn test_constraint_defaults_preserve_explicit_order() {
        let policy = policy_from(json!({
            "schema_version": 1,
            "models_summary": {
                "z-ai/glm-5": {"supported_providers": ["Fireworks"]}
            }
        }));

        let routing = constraint_routing_defaults(
            ProviderRouting::preferring("Friendli"),
            "z-ai/glm-5",
            &policy,
        );
        assert_eq!(routing.order, vec!["Friendli"]);
    }

    #[test]
    fn test_artifact_round_trip() {
        let dir = std::env::temp_dir().join("grammar-kit-policy-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("policy.json");

        let mut policy = ProviderGrammarPolicy {
            generated_at: Some("2026-08-01T00:00:00Z".to_string()),
            ..ProviderGrammarPolicy::default()
        };
        policy.providers.insert(
            "fireworks".to_string(),
            ProviderGrammarEntry {
                provider_name: "Fireworks".to_string(),
                supports_grammar: true,
                recommended_format: Some(GrammarDialect::Gbnf),
                priority: 100,
                reason: Some("obeyed gbnf probes".to_string()),
            },
        );
        policy.save(&path).unwrap();

        let loaded = ProviderGrammarPolicy::load(&path).unwrap();
        assert_eq!(loaded.schema_version, 1);
        let entry = loaded.provider("Fireworks").unwrap();
        assert!(entry.supports_grammar);
        assert_eq!(entry.recommended_format, Some(GrammarDialect::Gbnf));
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let policy = ProviderGrammarPolicy::load_or_default("/nonexistent/policy.json");
        assert!(policy.providers.is_empty());
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        let policy = policy_from(json!({
            "schema_version": 1,
            "generated_at": "2026-08-01T00:00:00Z",
            "formats": ["lark", "gbnf"],
            "results": [{"provider": "Fireworks", "outcome": "accepts+obeys"}],
            "providers": {
                "fireworks": {
                    "provider_name": "Fireworks",
                    "supports_grammar": true,
                    "recommended_format": "gbnf",
                    "format_outcomes": {"gbnf": {"accepts+obeys": 2}}
                }
            }
        }));
        assert!(policy.provider("fireworks").unwrap().supports_grammar);
    }
}
