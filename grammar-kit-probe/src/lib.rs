//! Offline discovery of provider grammar behavior.
//!
//! Providers behind an aggregator rarely document whether they honor
//! grammar response formats, so the probe asks them: it sends a canonical
//! request whose prompt says to reply `MAYBE` under a grammar that only
//! admits `YES` or `NO`, then classifies each provider/dialect pair as
//! rejecting the request, obeying the grammar, or accepting-but-ignoring
//! it. The rolled-up matrix becomes the policy artifact the run-time
//! capability resolver consults.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use grammar_kit_ast::{regex, Grammar};
use grammar_kit_dialect::{serialize, GrammarDialect, UnsupportedFeature};
use grammar_kit_openrouter::{
    CapabilityResolver, ModelGrammarSummary, ProviderGrammarEntry, ProviderGrammarPolicy,
};

/// Outcome of a single probe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeOutcome {
    /// The provider rejected the request (HTTP >= 400 or a structured
    /// error payload).
    #[serde(rename = "reject")]
    Reject,
    /// The provider accepted and the output satisfied the grammar.
    #[serde(rename = "accepts+obeys")]
    AcceptsObeys,
    /// The provider accepted but the output violated the grammar.
    #[serde(rename = "accepts+ignores")]
    AcceptsIgnores,
}

impl ProbeOutcome {
    /// Wire/markdown name of the outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeOutcome::Reject => "reject",
            ProbeOutcome::AcceptsObeys => "accepts+obeys",
            ProbeOutcome::AcceptsIgnores => "accepts+ignores",
        }
    }
}

/// One probe observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Model probed.
    pub model: String,
    /// Provider routed to.
    pub provider: String,
    /// Dialect sent.
    pub grammar_format: GrammarDialect,
    /// Classified outcome.
    pub outcome: ProbeOutcome,
    /// HTTP status, when a response arrived.
    pub status_code: Option<u16>,
    /// Text the provider generated, if any.
    pub generated_text: Option<String>,
    /// Human-readable classification detail.
    pub detail: String,
}

/// The persisted capability cache: the policy rollup the resolver loads,
/// plus the raw probe matrix it was derived from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityArtifact {
    /// Resolver-consumable rollup.
    #[serde(flatten)]
    pub policy: ProviderGrammarPolicy,
    /// Models probed.
    #[serde(default)]
    pub models: Vec<String>,
    /// Dialects probed.
    #[serde(default)]
    pub formats: Vec<GrammarDialect>,
    /// Raw observations.
    #[serde(default)]
    pub results: Vec<ProbeResult>,
}

/// The canonical probe grammar (`YES|NO`) rendered in the given dialect.
pub fn probe_grammar(dialect: GrammarDialect) -> Result<String, UnsupportedFeature> {
    let grammar = Grammar::new();
    serialize(dialect, &grammar, &regex("YES|NO"))
}

/// The canonical probe request body for one provider/dialect pair.
pub fn probe_request_body(model: &str, provider: &str, grammar: &str) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": "You are concise." },
            { "role": "user", "content": "Reply with MAYBE only." },
        ],
        "max_tokens": 8,
        "temperature": 0,
        "provider": {
            "order": [provider],
            "allow_fallbacks": false,
            "require_parameters": true,
        },
        "response_format": { "type": "grammar", "grammar": grammar },
    })
}

/// Pulls the generated text out of a non-streaming chat completion:
/// `message.content` as a string or typed parts, falling back to the
/// reasoning channel.
pub fn extract_content_text(payload: &Value) -> Option<String> {
    let message = payload.get("choices")?.get(0)?.get("message")?;
    match message.get("content") {
        Some(Value::String(text)) if !text.is_empty() => return Some(text.clone()),
        Some(Value::Array(parts)) => {
            let text: String = parts
                .iter()
                .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            if !text.is_empty() {
                return Some(text);
            }
        }
        _ => {}
    }
    message
        .get("reasoning_content")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Pulls a structured error message out of a response payload.
pub fn extract_error_message(payload: &Value) -> Option<String> {
    match payload.get("error")? {
        Value::String(text) => {
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        }
        Value::Object(error) => {
            if let Some(message) = error.get("message").and_then(Value::as_str) {
                let message = message.trim();
                if !message.is_empty() {
                    return Some(message.to_string());
                }
            }
            error
                .get("code")
                .map(|code| format!("provider returned error code {code}"))
        }
        _ => None,
    }
}

/// Classifies one probe response.
pub fn classify_outcome(status: u16, generated: Option<&str>) -> (ProbeOutcome, String) {
    if !(200..300).contains(&status) {
        return (
            ProbeOutcome::Reject,
            "provider rejected grammar request".to_string(),
        );
    }
    match generated.map(str::trim) {
        Some("YES") | Some("NO") => (
            ProbeOutcome::AcceptsObeys,
            "output satisfies YES|NO".to_string(),
        ),
        Some(text) if !text.is_empty() => (
            ProbeOutcome::AcceptsIgnores,
            "provider accepted request but returned unconstrained text".to_string(),
        ),
        _ => (
            ProbeOutcome::AcceptsIgnores,
            "provider accepted request but returned empty/non-text output".to_string(),
        ),
    }
}

/// Issues one probe request and classifies the outcome. Network failures
/// classify as rejections with the transport error as detail.
#[allow(clippy::too_many_arguments)]
pub async fn probe_provider(
    http: &reqwest::Client,
    api_base: &str,
    api_key: &str,
    model: &str,
    provider: &str,
    dialect: GrammarDialect,
    grammar: &str,
    timeout: Duration,
) -> ProbeResult {
    let url = format!("{}/chat/completions", api_base.trim_end_matches('/'));
    let mut request = http
        .post(&url)
        .timeout(timeout)
        .header("Accept", "application/json")
        .json(&probe_request_body(model, provider, grammar));
    if !api_key.is_empty() {
        request = request.header("Authorization", format!("Bearer {api_key}"));
    }

    let (status, raw) = match request.send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            (status, response.text().await.unwrap_or_default())
        }
        Err(err) => {
            return ProbeResult {
                model: model.to_string(),
                provider: provider.to_string(),
                grammar_format: dialect,
                outcome: ProbeOutcome::Reject,
                status_code: None,
                generated_text: None,
                detail: format!("provider rejected grammar request: {err}"),
            };
        }
    };

    let payload: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);
    if let Some(error_message) = extract_error_message(&payload) {
        return ProbeResult {
            model: model.to_string(),
            provider: provider.to_string(),
            grammar_format: dialect,
            outcome: ProbeOutcome::Reject,
            status_code: Some(status),
            generated_text: None,
            detail: format!("provider rejected grammar request: {error_message}"),
        };
    }

    let generated = extract_content_text(&payload);
    let (outcome, mut detail) = classify_outcome(status, generated.as_deref());
    if outcome == ProbeOutcome::Reject {
        let reason: String = raw.chars().take(240).collect();
        detail = format!("{detail}: {}", reason.replace('\n', " "));
    }
    ProbeResult {
        model: model.to_string(),
        provider: provider.to_string(),
        grammar_format: dialect,
        outcome,
        status_code: Some(status),
        generated_text: generated,
        detail,
    }
}

/// Distinct provider names serving a model, in listing order.
pub async fn discover_providers(resolver: &CapabilityResolver, model: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut providers = Vec::new();
    for endpoint in resolver.model_endpoints(model).await {
        let provider = endpoint.provider_name.trim().to_string();
        if provider.is_empty() || !seen.insert(provider.to_lowercase()) {
            continue;
        }
        providers.push(provider);
    }
    providers
}

#[derive(Debug, Default, Clone)]
struct OutcomeCounts {
    obeys: u32,
    ignores: u32,
    rejects: u32,
}

impl OutcomeCounts {
    fn record(&mut self, outcome: ProbeOutcome) {
        match outcome {
            ProbeOutcome::AcceptsObeys => self.obeys += 1,
            ProbeOutcome::AcceptsIgnores => self.ignores += 1,
            ProbeOutcome::Reject => self.rejects += 1,
        }
    }
}

fn recommended_format(
    per_format: &BTreeMap<String, OutcomeCounts>,
) -> Option<GrammarDialect> {
    let best = per_format
        .iter()
        .max_by_key(|(_, counts)| (counts.obeys, std::cmp::Reverse(counts.rejects)))?;
    if best.1.obeys == 0 {
        return None;
    }
    GrammarDialect::parse(best.0)
}

fn provider_priority(provider_key: &str, supports_grammar: bool) -> i64 {
    if !supports_grammar {
        return 0;
    }
    if provider_key == "fireworks" {
        100
    } else {
        80
    }
}

/// Rolls probe results into the resolver-consumable policy: per-provider
/// grammar support (any obeying probe), the recommended dialect (most
/// obeys, fewest rejects), priorities, and per-model provider rollups.
pub fn build_policy(
    api_base: &str,
    results: &[ProbeResult],
    generated_at: String,
) -> ProviderGrammarPolicy {
    let mut provider_totals: BTreeMap<String, (String, OutcomeCounts)> = BTreeMap::new();
    let mut provider_formats: BTreeMap<String, BTreeMap<String, OutcomeCounts>> = BTreeMap::new();
    let mut model_providers: BTreeMap<String, BTreeMap<String, (String, OutcomeCounts)>> =
        BTreeMap::new();

    for result in results {
        let provider_key = result.provider.trim().to_lowercase();
        let model_key = result.model.trim().trim_matches('/').to_lowercase();

        let totals = provider_totals
            .entry(provider_key.clone())
            .or_insert_with(|| (result.provider.clone(), OutcomeCounts::default()));
        totals.1.record(result.outcome);

        provider_formats
            .entry(provider_key.clone())
            .or_default()
            .entry(result.grammar_format.as_str().to_string())
            .or_default()
            .record(result.outcome);

        let model_entry = model_providers
            .entry(model_key)
            .or_default()
            .entry(provider_key)
            .or_insert_with(|| (result.provider.clone(), OutcomeCounts::default()));
        model_entry.1.record(result.outcome);
    }

    let mut policy = ProviderGrammarPolicy {
        generated_at: Some(generated_at),
        api_base: Some(api_base.to_string()),
        ..ProviderGrammarPolicy::default()
    };

    for (provider_key, (provider_name, totals)) in &provider_totals {
        let supports_grammar = totals.obeys > 0;
        let recommended = provider_formats
            .get(provider_key)
            .and_then(recommended_format);
        policy.providers.insert(
            provider_key.clone(),
            ProviderGrammarEntry {
                provider_name: provider_name.clone(),
                supports_grammar,
                recommended_format: recommended,
                priority: provider_priority(provider_key, supports_grammar),
                reason: Some(format!(
                    "obeyed {} probe(s), ignored {}, rejected {}",
                    totals.obeys, totals.ignores, totals.rejects
                )),
            },
        );
    }

    for (model_key, providers) in model_providers {
        let supported_providers: Vec<String> = providers
            .values()
            .filter(|(_, counts)| counts.obeys > 0)
            .map(|(name, _)| name.clone())
            .collect();
        policy.models_summary.insert(
            model_key.clone(),
            ModelGrammarSummary {
                model: Some(model_key),
                supported_providers,
            },
        );
    }

    let mut ranked: Vec<&ProviderGrammarEntry> = policy
        .providers
        .values()
        .filter(|entry| entry.supports_grammar)
        .collect();
    ranked.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.provider_name.to_lowercase().cmp(&b.provider_name.to_lowercase()))
    });
    policy.ranked_grammar_providers = ranked
        .into_iter()
        .map(|entry| entry.provider_name.clone())
        .collect();

    info!(
        providers = policy.providers.len(),
        supported = policy.ranked_grammar_providers.len(),
        "rolled probe matrix into policy"
    );
    policy
}

/// Renders the probe matrix as a human-readable markdown summary.
pub fn render_markdown(artifact: &CapabilityArtifact) -> String {
    let mut lines = vec![
        "# Provider Grammar Capability Matrix".to_string(),
        String::new(),
        format!(
            "- Generated at: `{}`",
            artifact.policy.generated_at.as_deref().unwrap_or("")
        ),
        format!(
            "- API base: `{}`",
            artifact.policy.api_base.as_deref().unwrap_or("")
        ),
        format!("- Models: `{}`", artifact.models.join(", ")),
        format!(
            "- Formats: `{}`",
            artifact
                .formats
                .iter()
                .map(|format| format.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
        String::new(),
        "## Provider Summary".to_string(),
        String::new(),
        "| Provider | Supports Grammar | Recommended Format | Priority |".to_string(),
        "|---|---:|---|---:|".to_string(),
    ];
    if artifact.policy.providers.is_empty() {
        lines.push("| (none) | no |  | 0 |".to_string());
    } else {
        let mut keys: Vec<&String> = artifact.policy.providers.keys().collect();
        keys.sort();
        for key in keys {
            let entry = &artifact.policy.providers[key];
            lines.push(format!(
                "| {} | {} | {} | {} |",
                entry.provider_name,
                if entry.supports_grammar { "yes" } else { "no" },
                entry
                    .recommended_format
                    .map(|format| format.as_str())
                    .unwrap_or(""),
                entry.priority,
            ));
        }
    }

    lines.extend([
        String::new(),
        "## Raw Results".to_string(),
        String::new(),
        "| Model | Provider | Format | Outcome | HTTP | Generated | Detail |".to_string(),
        "|---|---|---|---|---:|---|---|".to_string(),
    ]);
    for result in &artifact.results {
        let generated = result
            .generated_text
            .as_deref()
            .unwrap_or("")
            .replace('|', "\\|")
            .replace('\n', "\\n");
        let detail = result.detail.replace('|', "\\|").replace('\n', " ");
        lines.push(format!(
            "| {} | {} | {} | {} | {} | {} | {} |",
            result.model,
            result.provider,
            result.grammar_format,
            result.outcome.as_str(),
            result
                .status_code
                .map(|status| status.to_string())
                .unwrap_or_default(),
            generated,
            detail,
        ));
    }
    lines.push(String::new());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(
        provider: &str,
        dialect: GrammarDialect,
        outcome: ProbeOutcome,
    ) -> ProbeResult {
        ProbeResult {
            model: "m/model".to_string(),
            provider: provider.to_string(),
            grammar_format: dialect,
            outcome,
            status_code: Some(200),
            generated_text: None,
            detail: String::new(),
        }
    }

    #[test]
    fn test_probe_grammar_per_dialect() {
        assert_eq!(probe_grammar(GrammarDialect::Regex).unwrap(), "YES|NO");
        assert!(probe_grammar(GrammarDialect::Lark)
            .unwrap()
            .contains("start: /YES|NO/"));
        assert!(probe_grammar(GrammarDialect::Gbnf).unwrap().contains("root ::="));
    }

    #[test]
    fn test_probe_request_body_shape() {
        let body = probe_request_body("m/model", "Fireworks", "start: /YES|NO/");
        assert_eq!(body["provider"]["order"][0], "Fireworks");
        assert_eq!(body["provider"]["require_parameters"], true);
        assert_eq!(body["provider"]["allow_fallbacks"], false);
        assert_eq!(body["response_format"]["type"], "grammar");
        assert_eq!(body["max_tokens"], 8);
        assert_eq!(body["temperature"], 0);
    }

    #[test]
    fn test_classify_outcome() {
        assert_eq!(classify_outcome(400, None).0, ProbeOutcome::Reject);
        assert_eq!(
            classify_outcome(200, Some("YES")).0,
            ProbeOutcome::AcceptsObeys
        );
        assert_eq!(
            classify_outcome(200, Some(" NO ")).0,
            ProbeOutcome::AcceptsObeys
        );
        assert_eq!(
            classify_outcome(200, Some("MAYBE")).0,
            ProbeOutcome::AcceptsIgnores
        );
        assert_eq!(classify_outcome(200, None).0, ProbeOutcome::AcceptsIgnores);
    }

    #[test]
    fn test_extract_content_text_variants() {
        let plain = json!({"choices": [{"message": {"content": "YES"}}]});
        assert_eq!(extract_content_text(&plain).as_deref(), Some("YES"));

        let parts = json!({"choices": [{"message": {"content": [
            {"type": "text", "text": "Y"},
            {"type": "text", "text": "ES"}
        ]}}]});
        assert_eq!(extract_content_text(&parts).as_deref(), Some("YES"));

        let reasoning = json!({"choices": [{"message": {
            "content": "",
            "reasoning_content": "NO"
        }}]});
        assert_eq!(extract_content_text(&reasoning).as_deref(), Some("NO"));
    }

    #[test]
    fn test_extract_error_message_variants() {
        let object = json!({"error": {"message": "unsupported grammar"}});
        assert_eq!(
            extract_error_message(&object).as_deref(),
            Some("unsupported grammar")
        );

        let string = json!({"error": "boom"});
        assert_eq!(extract_error_message(&string).as_deref(), Some("boom"));

        let code_only = json!({"error": {"code": 404}});
        assert_eq!(
            extract_error_message(&code_only).as_deref(),
            Some("provider returned error code 404")
        );

        assert_eq!(extract_error_message(&json!({"ok": true})), None);
    }

    #[test]
    fn test_build_policy_rollup() {
        let results = vec![
            result("Fireworks", GrammarDialect::Gbnf, ProbeOutcome::AcceptsObeys),
            result("Fireworks", GrammarDialect::Gbnf, ProbeOutcome::AcceptsObeys),
            result("Fireworks", GrammarDialect::Lark, ProbeOutcome::Reject),
            result("Together", GrammarDialect::Lark, ProbeOutcome::AcceptsObeys),
            result("Friendli", GrammarDialect::Lark, ProbeOutcome::AcceptsIgnores),
        ];
        let policy = build_policy(
            "https://openrouter.ai/api/v1",
            &results,
            "2026-08-01T00:00:00Z".to_string(),
        );

        assert_eq!(policy.schema_version, 1);
        let fireworks = policy.provider("Fireworks").unwrap();
        assert!(fireworks.supports_grammar);
        assert_eq!(fireworks.recommended_format, Some(GrammarDialect::Gbnf));
        assert_eq!(fireworks.priority, 100);

        let together = policy.provider("Together").unwrap();
        assert!(together.supports_grammar);
        assert_eq!(together.priority, 80);

        let friendli = policy.provider("Friendli").unwrap();
        assert!(!friendli.supports_grammar);
        assert_eq!(friendli.recommended_format, None);
        assert_eq!(friendli.priority, 0);

        assert_eq!(
            policy.ranked_grammar_providers,
            vec!["Fireworks", "Together"]
        );

        let summary = policy.model_summary("m/model").unwrap();
        assert!(summary
            .supported_providers
            .contains(&"Fireworks".to_string()));
        assert!(!summary
            .supported_providers
            .contains(&"Friendli".to_string()));
    }

    #[test]
    fn test_recommended_format_needs_at_least_one_obey() {
        let results = vec![result(
            "Friendli",
            GrammarDialect::Lark,
            ProbeOutcome::AcceptsIgnores,
        )];
        let policy = build_policy("base", &results, "now".to_string());
        assert_eq!(
            policy.provider("Friendli").unwrap().recommended_format,
            None
        );
    }

    #[test]
    fn test_artifact_round_trips_as_policy() {
        let results = vec![result(
            "Fireworks",
            GrammarDialect::Gbnf,
            ProbeOutcome::AcceptsObeys,
        )];
        let artifact = CapabilityArtifact {
            policy: build_policy("base", &results, "now".to_string()),
            models: vec!["m/model".to_string()],
            formats: vec![GrammarDialect::Lark, GrammarDialect::Gbnf],
            results,
        };
        let rendered = serde_json::to_string(&artifact).unwrap();

        // The resolver reads the same file as a bare policy.
        let policy: ProviderGrammarPolicy = serde_json::from_str(&rendered).unwrap();
        assert!(policy.provider("Fireworks").unwrap().supports_grammar);

        let reloaded: CapabilityArtifact = serde_json::from_str(&rendered).unwrap();
        assert_eq!(reloaded.results.len(), 1);
    }

    #[test]
    fn test_render_markdown() {
        let results = vec![result(
            "Fireworks",
            GrammarDialect::Gbnf,
            ProbeOutcome::AcceptsObeys,
        )];
        let artifact = CapabilityArtifact {
            policy: build_policy("base", &results, "now".to_string()),
            models: vec!["m/model".to_string()],
            formats: vec![GrammarDialect::Gbnf],
            results,
        };
        let markdown = render_markdown(&artifact);
        assert!(markdown.contains("| Fireworks | yes | gbnf | 100 |"));
        assert!(markdown.contains("accepts+obeys"));
    }
}
