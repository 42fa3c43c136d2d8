use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Deserialize;
use serde_json::{json, Value};

use grammar_kit_ast::{CaptureValue, Grammar, GrammarNode};
use grammar_kit_dialect::{lark, regex_fragment, UnsupportedFeature};

use crate::error::{classify_http_failure, looks_like_provider_rejection, AdapterError};
use crate::shaper::GenerateOptions;
use crate::stream::event::{StreamEvent, UsageEvent};
use crate::transcript::{Role, Transcript};

/// Name of the forced custom tool carrying the grammar.
const GRAMMAR_TOOL_NAME: &str = "grammar_output";

/// Default OpenAI API base.
pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Configuration for the Responses custom-tool variant.
#[derive(Debug, Clone)]
pub struct ResponsesSettings {
    /// Base URL for API calls.
    pub base_url: String,

    /// API key for the `Authorization: Bearer` header.
    pub api_key: Option<String>,

    /// Optional custom headers.
    pub headers: Option<HashMap<String, String>>,

    /// Adapter-level default reasoning effort.
    pub reasoning_effort: Option<String>,
}

impl Default for ResponsesSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_API_BASE.to_string(),
            api_key: None,
            headers: None,
            reasoning_effort: None,
        }
    }
}

impl ResponsesSettings {
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

    /// Sets the default reasoning effort.
    pub fn with_reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = Some(effort.into());
        self
    }
}

/// The wire `format` block of the custom tool: a dialect name plus the
/// rendered grammar.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolGrammarFormat {
    /// `"regex"` or `"lark"`.
    pub syntax: &'static str,
    /// The rendered grammar.
    pub definition: String,
}

/// Builds the custom-tool grammar format: bare regexes and selections of
/// literals go out as regex syntax, everything else as the Lark subset.
pub fn tool_grammar_format(
    grammar: &Grammar,
    root: &GrammarNode,
) -> Result<ToolGrammarFormat, UnsupportedFeature> {
    match root {
        GrammarNode::Regex(Some(_)) | GrammarNode::Select(_) => {
            if let Ok(definition) = regex_fragment::serialize(grammar, root) {
                return Ok(ToolGrammarFormat {
                    syntax: "regex",
                    definition,
                });
            }
            Ok(ToolGrammarFormat {
                syntax: "lark",
                definition: lark::serialize(grammar, root)?,
            })
        }
        GrammarNode::Regex(None) => Err(UnsupportedFeature::new(
            "unconstrained generation cannot be expressed as a custom-tool grammar",
        )),
        _ => Ok(ToolGrammarFormat {
            syntax: "lark",
            definition: lark::serialize(grammar, root)?,
        }),
    }
}

#[derive(Debug, Deserialize)]
struct ResponsesReply {
    #[serde(default)]
    output: Vec<ResponsesOutputItem>,
    #[serde(default)]
    usage: Option<ResponsesUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsesOutputItem {
    #[serde(rename = "type", default)]
    item_type: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsesUsage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
    #[serde(default)]
    input_tokens_details: Option<ResponsesTokenDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsesTokenDetails {
    #[serde(default)]
    cached_tokens: Option<u64>,
}

/// Grammar-constrained generation over the `/responses` endpoint: the
/// grammar rides as a forced custom tool, the tool-call input is the
/// generated text, and the text is re-validated locally before captures
/// are surfaced.
#[derive(Debug, Clone)]
pub struct OpenAIResponsesModel {
    model_id: String,
    settings: ResponsesSettings,
    http: reqwest::Client,
}

impl OpenAIResponsesModel {
    /// Creates a model over the Responses endpoint.
    pub fn new(model_id: impl Into<String>, settings: ResponsesSettings) -> Self {
        Self {
            model_id: model_id.into(),
            settings,
            http: reqwest::Client::new(),
        }
    }

    /// The model id this adapter targets.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    fn ensure_generation_scope(transcript: &Transcript) -> Result<(), AdapterError> {
        match transcript.active_role() {
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
        if !transcript.active_content().is_empty() {
            return Err(AdapterError::misuse(
                "the Responses grammar path does not support pre-filled assistant content",
            ));
        }
        Ok(())
    }

    fn build_body(
        &self,
        grammar_format: &ToolGrammarFormat,
        transcript: &Transcript,
        options: &GenerateOptions,
    ) -> Result<Value, AdapterError> {
        if options.top_k.is_some() {
            return Err(AdapterError::misuse(
                "the Responses grammar path does not support top_k sampling",
            ));
        }
        if options.min_p.is_some() {
            return Err(AdapterError::misuse(
                "the Responses grammar path does not support min_p sampling",
            ));
        }
        if options.repetition_penalty.is_some() {
            return Err(AdapterError::misuse(
                "the Responses grammar path does not support repetition_penalty sampling",
            ));
        }

        let input: Vec<Value> = transcript
            .messages()
            .iter()
            .map(|message| {
                json!({
                    "role": message.role,
                    "content": [{ "type": "input_text", "text": message.content }],
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model_id,
            "input": input,
            "tools": [{
                "type": "custom",
                "name": GRAMMAR_TOOL_NAME,
                "description": "Grammar-constrained generation",
                "format": {
                    "type": "grammar",
                    "syntax": grammar_format.syntax,
                    "definition": grammar_format.definition,
                },
            }],
            "tool_choice": { "type": "custom", "name": GRAMMAR_TOOL_NAME },
        });

        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = options.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(max_output_tokens) = options.max_completion_tokens.or(options.max_tokens) {
            body["max_output_tokens"] = json!(max_output_tokens);
        }
        let effort = options
            .reasoning_effort
            .as_deref()
            .or(self.settings.reasoning_effort.as_deref());
        if let Some(effort) = effort {
            body["reasoning"] = json!({ "effort": effort });
        }
        Ok(body)
    }

    fn extract_tool_output(&self, reply: &ResponsesReply) -> Result<String, AdapterError> {
        for item in &reply.output {
            if item.item_type != "custom_tool_call" {
                continue;
            }
            if item.name.as_deref() != Some(GRAMMAR_TOOL_NAME) {
                continue;
            }
            if let Some(input) = &item.input {
                return Ok(input.clone());
            }
        }
        Err(AdapterError::rejected(format!(
            "model '{}' returned no matching custom tool output",
            self.model_id
        )))
    }

    /// Runs one grammar-constrained generation and returns the resulting
    /// events: usage, the generated text, then validated captures.
    pub async fn generate(
        &self,
        grammar: &Grammar,
        root: &GrammarNode,
        transcript: &Arc<Mutex<Transcript>>,
        options: GenerateOptions,
    ) -> Result<Vec<StreamEvent>, AdapterError> {
        let body = {
            let state = transcript.lock().unwrap_or_else(PoisonError::into_inner);
            Self::ensure_generation_scope(&state)?;
            let grammar_format = tool_grammar_format(grammar, root)?;
            self.build_body(&grammar_format, &state, &options)?
        };

        let url = format!("{}/responses", self.settings.base_url.trim_end_matches('/'));
        let mut request = self
            .http
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(api_key) = self.settings.api_key.as_deref() {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }
        if let Some(headers) = &self.settings.headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }

        let started = Instant::now();
        let response = request.json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure(status.as_u16(), &body, true));
        }
        let raw = response.text().await?;
        let reply: ResponsesReply = serde_json::from_str(&raw).map_err(|err| {
            if looks_like_provider_rejection(&raw) {
                AdapterError::rejected(format!(
                    "model '{}' rejected constrained generation",
                    self.model_id
                ))
            } else {
                AdapterError::Json(err)
            }
        })?;

        let total_latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let mut events = Vec::new();
        if let Some(usage) = &reply.usage {
            events.push(StreamEvent::Usage(UsageEvent {
                input_tokens: usage.input_tokens.unwrap_or(0),
                output_tokens: usage.output_tokens.unwrap_or(0),
                cached_input_tokens: usage
                    .input_tokens_details
                    .as_ref()
                    .and_then(|details| details.cached_tokens)
                    .unwrap_or(0),
                ttft_ms: Some(total_latency_ms),
                total_latency_ms: Some(total_latency_ms),
                round_trips: 1,
            }));
        }

        let generated = self.extract_tool_output(&reply)?;
        if !generated.is_empty() {
            let mut state = transcript.lock().unwrap_or_else(PoisonError::into_inner);
            state.apply_text(&generated);
            events.push(StreamEvent::text(generated.clone()));
        }

        let Some(matches) = grammar.match_text(root, &generated) else {
            return Err(AdapterError::validation(format!(
                "provider output for model '{}' failed local grammar validation",
                self.model_id
            )));
        };
        for (name, value) in matches.captures {
            match value {
                CaptureValue::Single(entry) => {
                    events.push(StreamEvent::capture(name, entry.value, entry.log_prob));
                }
                CaptureValue::List(entries) => {
                    for entry in entries {
                        events.push(StreamEvent::capture_append(
                            name.clone(),
                            entry.value,
                            entry.log_prob,
                        ));
                    }
                }
            }
        }
        Ok(events)
    }
}
