use std::sync::{Arc, Mutex, PoisonError};

use grammar_kit_ast::{Grammar, GrammarNode, StopCondition};
use grammar_kit_dialect::{serialize, UnsupportedFeature};

use crate::capabilities::{CapabilityCache, CapabilityResolver};
use crate::error::{classify_http_failure, AdapterError};
use crate::policy::{constraint_routing_defaults, ProviderGrammarPolicy};
use crate::settings::OpenRouterSettings;
use crate::shaper::{shape_chat_request, GenerateOptions, LogProbsMode};
use crate::stream::pipeline::{
    chat_chunks, run_pipeline, CaptureSpec, EventStream, GrammarValidation, PipelineOptions,
    StopSpec,
};
use crate::stream::stop::StreamingRegexStopMatcher;
use crate::transcript::{Role, Transcript};

/// Modality-derived capability flags for a session, resolved once at
/// session build instead of composing behavior at run time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCapabilities {
    /// The model takes or produces audio.
    pub audio: bool,
    /// The model takes image input.
    pub image: bool,
}

/// A grammar-constrained chat model behind an OpenRouter-style endpoint.
#[derive(Debug, Clone)]
pub struct OpenRouterChatModel {
    model_id: String,
    settings: OpenRouterSettings,
    http: reqwest::Client,
    capabilities: Arc<CapabilityCache>,
    policy: Arc<ProviderGrammarPolicy>,
}

impl OpenRouterChatModel {
    /// Creates a model with a fresh capability cache and an empty policy.
    pub fn new(model_id: impl Into<String>, settings: OpenRouterSettings) -> Self {
        Self {
            model_id: model_id.into(),
            settings,
            http: reqwest::Client::new(),
            capabilities: Arc::new(CapabilityCache::new()),
            policy: Arc::new(ProviderGrammarPolicy::default()),
        }
    }

    /// Substitutes the capability cache (shared across models or primed in
    /// tests).
    pub fn with_capability_cache(mut self, cache: Arc<CapabilityCache>) -> Self {
        self.capabilities = cache;
        self
    }

    /// Substitutes the provider grammar policy.
    pub fn with_policy(mut self, policy: Arc<ProviderGrammarPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// The model id this adapter targets.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// A capability resolver over this model's endpoint and credentials.
    pub fn resolver(&self) -> CapabilityResolver {
        CapabilityResolver::new(
            self.http.clone(),
            self.capabilities.clone(),
            &self.settings.base_url,
            self.settings.api_key.as_deref(),
        )
    }

    /// Modality flags for the session: catalog modalities first, model-name
    /// heuristics when the catalog has no answer.
    pub async fn session_capabilities(&self) -> SessionCapabilities {
        let (input, output) = self.resolver().modalities(&self.model_id).await;
        let mut audio = input.contains("audio") || output.contains("audio");
        let mut image = input.contains("image");

        let lowered = self.model_id.to_lowercase();
        if !audio && !image && lowered.contains("audio-preview") {
            audio = true;
        }
        if !audio && !image && (lowered.contains("gpt-4o") || lowered.contains("o1")) {
            image = true;
        }
        SessionCapabilities { audio, image }
    }

    /// Runs one constrained generation over the transcript, returning the
    /// stream of Text/Token/Capture/Usage events.
    ///
    /// `root` may be a rule (its capture, stop, and sampling attributes are
    /// honored here), the unconstrained sentinel, or any grammar node, in
    /// which case the tree is translated to the routing's dialect, sent as
    /// a grammar `response_format`, and the final text re-validated
    /// locally.
    pub async fn generate(
        &self,
        grammar: &Grammar,
        root: &GrammarNode,
        transcript: &Arc<Mutex<Transcript>>,
        options: GenerateOptions,
    ) -> Result<EventStream, AdapterError> {
        {
            let state = transcript.lock().unwrap_or_else(PoisonError::into_inner);
            match state.active_role() {
                Some(Role::Assistant) => {}
                Some(_) => {
                    return Err(AdapterError::misuse(
                        "generation is only available inside an assistant turn",
                    ));
                }
                None => {
                    return Err(AdapterError::misuse(
                        "open an assistant turn on the transcript before generating",
                    ));
                }
            }
        }

        let mut options = options;
        let mut capture: Option<CaptureSpec> = None;
        let mut stop: Option<StopSpec> = None;

        let target = match root {
            GrammarNode::Rule(id) | GrammarNode::RuleRef(id) => {
                let rule = grammar.rule(*id);
                if rule.suffix.is_some() {
                    return Err(AdapterError::misuse(
                        "suffix literals are not supported for streamed generation",
                    ));
                }

                let stop_regex = match &rule.stop {
                    Some(StopCondition::Regex(pattern)) => Some(pattern.clone()),
                    Some(StopCondition::Literal(value)) => {
                        options.stop.push(value.clone());
                        None
                    }
                    None => None,
                };
                if rule.stop_capture.is_some() && stop_regex.is_none() {
                    return Err(AdapterError::misuse(
                        "stop capture requires a regex stop condition",
                    ));
                }

                if let Some(temperature) = rule.temperature {
                    options.temperature = Some(temperature);
                }
                if let Some(max_tokens) = rule.max_tokens {
                    options.max_tokens = Some(max_tokens);
                }
                if let Some(name) = &rule.capture {
                    capture = Some(CaptureSpec {
                        name: name.clone(),
                        list_append: rule.list_append,
                    });
                }
                if let Some(pattern) = stop_regex {
                    stop = Some(StopSpec {
                        matcher: StreamingRegexStopMatcher::new(&pattern)?,
                        stop_capture: rule.stop_capture.clone(),
                    });
                }

                rule.value.clone().ok_or_else(|| {
                    UnsupportedFeature::new(format!("rule '{}' has no definition", rule.name))
                })?
            }
            _ => root.clone(),
        };

        let resolver = self.resolver();
        let base_routing = options
            .routing
            .clone()
            .unwrap_or_default()
            .with_settings_defaults(&self.settings);

        let unconstrained = matches!(target, GrammarNode::Regex(None));
        let (routing, grammar_payload, validation) = if unconstrained {
            (base_routing, None, None)
        } else {
            let routing = constraint_routing_defaults(base_routing, &self.model_id, &self.policy);
            if !resolver
                .supports_grammar_response_format(&self.model_id, &routing, &self.policy)
                .await
            {
                return Err(AdapterError::rejected(format!(
                    "model '{}' does not support grammar response formats for the current \
                     provider routing",
                    self.model_id
                )));
            }

            let dialect = self.policy.grammar_format_for(&routing);
            let rendered = serialize(dialect, grammar, &target)?;
            let validation = GrammarValidation {
                grammar: grammar.clone(),
                root: target.clone(),
                model: self.model_id.clone(),
            };
            (routing, Some(rendered), Some(validation))
        };

        let messages = {
            let state = transcript.lock().unwrap_or_else(PoisonError::into_inner);
            state.request_messages()
        };
        let shaped = shape_chat_request(
            &resolver,
            &self.model_id,
            &messages,
            &options,
            &routing,
            grammar_payload,
            self.settings.reasoning_effort.as_deref(),
            self.settings.include_usage,
        )
        .await?;

        let url = format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );
        let mut request = self
            .http
            .post(&url)
            .header("Content-Type", "application/json");
        for (key, value) in self.settings.request_headers() {
            request = request.header(key, value);
        }
        let response = request.json(&shaped.body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure(
                status.as_u16(),
                &body,
                shaped.grammar_in_play,
            ));
        }

        let pipeline_options = PipelineOptions {
            allow_reasoning_content: shaped.grammar_in_play,
            emit_tokens: shaped.logprobs_mode != LogProbsMode::Disabled,
            capture,
            stop,
            validation,
        };
        Ok(run_pipeline(
            chat_chunks(response.bytes_stream()),
            pipeline_options,
            transcript.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{ModelArchitecture, ModelMetadata};
    use grammar_kit_ast::{literal, regex, select, unconstrained, Rule};

    fn transcript() -> Arc<Mutex<Transcript>> {
        let mut state = Transcript::new();
        state.push(crate::transcript::ChatMessage::user("Q?"));
        state.begin(Role::Assistant);
        Arc::new(Mutex::new(state))
    }

    fn model_with_parameters(parameters: &[&str]) -> OpenRouterChatModel {
        let cache = Arc::new(CapabilityCache::new());
        cache.prime_catalog(
            "https://openrouter.ai/api/v1",
            "test-key",
            vec![ModelMetadata {
                id: "test/model".to_string(),
                canonical_slug: None,
                supported_parameters: Some(
                    parameters.iter().map(|s| s.to_string()).collect(),
                ),
                architecture: None,
            }],
        );
        cache.prime_endpoints("https://openrouter.ai/api/v1", "test/model", vec![]);
        OpenRouterChatModel::new(
            "test/model",
            OpenRouterSettings::new().with_api_key("test-key"),
        )
        .with_capability_cache(cache)
    }

    fn yes_no_rule(grammar: &mut Grammar) -> GrammarNode {
        let id = grammar.add_rule(
            Rule::new("answer", select(vec![literal("YES"), literal("NO")]))
                .with_capture("answer"),
        );
        grammar.node(id)
    }

    #[tokio::test]
    async fn test_generate_requires_open_turn() {
        let model = model_with_parameters(&["response_format"]);
        let grammar = Grammar::new();
        let state = Arc::new(Mutex::new(Transcript::new()));

        let err = model
            .generate(&grammar, &regex("YES|NO"), &state, GenerateOptions::default())
            .await
            .err().unwrap();
        assert!(matches!(err, AdapterError::RequestMisuse { .. }));
    }

    #[tokio::test]
    async fn test_generate_requires_assistant_turn() {
        let model = model_with_parameters(&["response_format"]);
        let grammar = Grammar::new();
        let mut state = Transcript::new();
        state.begin(Role::User);
        let state = Arc::new(Mutex::new(state));

        let err = model
            .generate(&grammar, &regex("YES|NO"), &state, GenerateOptions::default())
            .await
            .err().unwrap();
        assert!(matches!(err, AdapterError::RequestMisuse { .. }));
    }

    #[tokio::test]
    async fn test_suffix_rule_is_rejected() {
        let model = model_with_parameters(&["response_format"]);
        let mut grammar = Grammar::new();
        let id = grammar.add_rule(Rule::new("answer", unconstrained()).with_suffix("!"));
        let root = grammar.node(id);

        let err = model
            .generate(&grammar, &root, &transcript(), GenerateOptions::default())
            .await
            .err().unwrap();
        assert!(err.to_string().contains("suffix"));
    }

    #[tokio::test]
    async fn test_stop_capture_requires_regex_stop() {
        let model = model_with_parameters(&["response_format"]);
        let mut grammar = Grammar::new();
        let id = grammar.add_rule(
            Rule::new("answer", unconstrained())
                .with_stop_literal("END")
                .with_stop_capture("stopped"),
        );
        let root = grammar.node(id);

        let err = model
            .generate(&grammar, &root, &transcript(), GenerateOptions::default())
            .await
            .err().unwrap();
        assert!(err.to_string().contains("stop capture"));
    }

    #[tokio::test]
    async fn test_invalid_stop_regex_is_rejected_before_any_request() {
        let model = model_with_parameters(&["response_format"]);
        let mut grammar = Grammar::new();
        let id = grammar.add_rule(Rule::new("answer", unconstrained()).with_stop_regex("["));
        let root = grammar.node(id);

        let err = model
            .generate(&grammar, &root, &transcript(), GenerateOptions::default())
            .await
            .err().unwrap();
        assert!(err.to_string().contains("invalid stop regex"));
    }

    #[tokio::test]
    async fn test_grammar_gate_rejects_unsupported_model() {
        // Model declares structured_outputs but not response_format.
        let model = model_with_parameters(&["structured_outputs"]);
        let mut grammar = Grammar::new();
        let root = yes_no_rule(&mut grammar);

        let err = model
            .generate(&grammar, &root, &transcript(), GenerateOptions::default())
            .await
            .err().unwrap();
        assert!(matches!(err, AdapterError::ProviderRejected { .. }));
        assert!(err.to_string().contains("grammar response formats"));
    }

    #[tokio::test]
    async fn test_untranslatable_grammar_fails_before_any_request() {
        let model = model_with_parameters(&["response_format"]);
        let grammar = Grammar::new();
        let root = grammar_kit_ast::repeat(regex("[0-9]"), 3, Some(99));

        let err = model
            .generate(&grammar, &root, &transcript(), GenerateOptions::default())
            .await
            .err().unwrap();
        assert!(matches!(err, AdapterError::UnsupportedFeature(_)));
    }

    #[tokio::test]
    async fn test_session_capabilities_from_catalog_modalities() {
        let cache = Arc::new(CapabilityCache::new());
        cache.prime_catalog(
            "https://openrouter.ai/api/v1",
            "test-key",
            vec![ModelMetadata {
                id: "test/model".to_string(),
                canonical_slug: None,
                supported_parameters: None,
                architecture: Some(ModelArchitecture {
                    input_modalities: vec!["text".to_string(), "image".to_string()],
                    output_modalities: vec!["text".to_string()],
                }),
            }],
        );
        let model = OpenRouterChatModel::new(
            "test/model",
            OpenRouterSettings::new().with_api_key("test-key"),
        )
        .with_capability_cache(cache);

        assert_eq!(
            model.session_capabilities().await,
            SessionCapabilities {
                audio: false,
                image: true
            }
        );
    }

    #[tokio::test]
    async fn test_session_capabilities_name_fallback() {
        let cache = Arc::new(CapabilityCache::new());
        cache.prime_catalog("https://openrouter.ai/api/v1", "test-key", vec![]);
        let model = OpenRouterChatModel::new(
            "openai/gpt-4o-audio-preview",
            OpenRouterSettings::new().with_api_key("test-key"),
        )
        .with_capability_cache(cache);

        let caps = model.session_capabilities().await;
        assert!(caps.audio);
        assert!(!caps.image);
    }
}
