use serde_json::{json, Value};
use tracing::debug;

use crate::capabilities::{CapabilityResolver, TOP_LOGPROBS_SAFE_MAX};
use crate::error::AdapterError;
use crate::routing::ProviderRouting;
use crate::transcript::ChatMessage;

/// Caller options for one generate call.
///
/// Anything the current model/routing does not declare support for is
/// stripped or demoted rather than sent blind.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Sampling temperature.
    pub temperature: Option<f64>,

    /// Nucleus sampling.
    pub top_p: Option<f64>,

    /// Top-k sampling.
    pub top_k: Option<u32>,

    /// Minimum-probability sampling.
    pub min_p: Option<f64>,

    /// Repetition penalty.
    pub repetition_penalty: Option<f64>,

    /// Completion token budget.
    pub max_tokens: Option<u32>,

    /// Alternate spelling of the completion token budget; merged into
    /// `max_tokens`, which wins when both are set.
    pub max_completion_tokens: Option<u32>,

    /// Provider-side stop strings.
    pub stop: Vec<String>,

    /// Request token log-probabilities.
    pub logprobs: bool,

    /// How many alternatives to request per token position.
    pub top_logprobs: Option<u32>,

    /// Reasoning effort; overrides the adapter-level default.
    pub reasoning_effort: Option<String>,

    /// Provider routing directive.
    pub routing: Option<ProviderRouting>,

    /// Tool specifications, passed through when the routing supports tools.
    pub tools: Vec<Value>,
}

/// The log-probability request mode after capability demotion.
///
/// Unsupported `top_logprobs` demotes to logprobs-only; unsupported
/// `logprobs` disables both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogProbsMode {
    /// No log-probabilities requested or supported.
    Disabled,
    /// `logprobs` without alternatives.
    LogProbsOnly,
    /// `logprobs` plus a bounded `top_logprobs`.
    WithTopLogProbs(u32),
}

/// A shaped outgoing request.
#[derive(Debug, Clone)]
pub(crate) struct ShapedRequest {
    pub body: Value,
    pub logprobs_mode: LogProbsMode,
    pub grammar_in_play: bool,
}

fn normalized_top_logprobs(value: Option<u32>) -> Option<u32> {
    value
        .filter(|count| *count > 0)
        .map(|count| count.min(TOP_LOGPROBS_SAFE_MAX))
}

/// Resolves the effective log-probability mode for the call.
pub(crate) async fn effective_logprobs_mode(
    resolver: &CapabilityResolver,
    model: &str,
    routing: &ProviderRouting,
    enable_logprobs: bool,
    top_logprobs: Option<u32>,
) -> LogProbsMode {
    if !enable_logprobs {
        return LogProbsMode::Disabled;
    }
    let (supports_logprobs, supports_top_logprobs) =
        resolver.logprobs_capability(model, routing).await;
    if !supports_logprobs {
        return LogProbsMode::Disabled;
    }
    match normalized_top_logprobs(top_logprobs) {
        Some(count) if supports_top_logprobs => LogProbsMode::WithTopLogProbs(count),
        _ => LogProbsMode::LogProbsOnly,
    }
}

/// Composes the outgoing chat-completions body from caller options and
/// capability facts.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn shape_chat_request(
    resolver: &CapabilityResolver,
    model: &str,
    messages: &[ChatMessage],
    options: &GenerateOptions,
    routing: &ProviderRouting,
    grammar: Option<String>,
    default_reasoning_effort: Option<&str>,
    include_usage: bool,
) -> Result<ShapedRequest, AdapterError> {
    let mut body = json!({
        "model": model,
        "messages": messages,
        "stream": true,
    });
    if include_usage {
        body["stream_options"] = json!({ "include_usage": true });
    }

    if let Some(temperature) = options.temperature {
        body["temperature"] = json!(temperature);
    }

    // Optional sampling knobs ride along only when declared supported.
    let sampling: [(&str, Option<Value>); 4] = [
        ("top_p", options.top_p.map(|v| json!(v))),
        ("top_k", options.top_k.map(|v| json!(v))),
        ("min_p", options.min_p.map(|v| json!(v))),
        (
            "repetition_penalty",
            options.repetition_penalty.map(|v| json!(v)),
        ),
    ];
    for (parameter, value) in sampling {
        let Some(value) = value else { continue };
        if resolver.parameter_supported(model, parameter, routing).await {
            body[parameter] = value;
        } else {
            debug!(model = %model, parameter = %parameter, "dropping unsupported sampling parameter");
        }
    }

    if let Some(max_tokens) = options.max_tokens.or(options.max_completion_tokens) {
        body["max_tokens"] = json!(max_tokens);
    }

    if !options.stop.is_empty() {
        if options.stop.len() == 1 {
            body["stop"] = json!(options.stop[0]);
        } else {
            body["stop"] = json!(options.stop);
        }
    }

    let reasoning_effort = options
        .reasoning_effort
        .as_deref()
        .or(default_reasoning_effort)
        .map(str::trim)
        .filter(|effort| !effort.is_empty());
    if let Some(effort) = reasoning_effort {
        if resolver.supports_reasoning(model, routing).await {
            body["reasoning"] = json!({ "effort": effort });
        }
    }

    let logprobs_mode = effective_logprobs_mode(
        resolver,
        model,
        routing,
        options.logprobs,
        options.top_logprobs,
    )
    .await;
    match logprobs_mode {
        LogProbsMode::Disabled => {}
        LogProbsMode::LogProbsOnly => {
            body["logprobs"] = json!(true);
        }
        LogProbsMode::WithTopLogProbs(count) => {
            body["logprobs"] = json!(true);
            body["top_logprobs"] = json!(count);
        }
    }

    if !options.tools.is_empty() {
        if !resolver.supports_tools(model, routing).await {
            return Err(AdapterError::misuse(format!(
                "model '{model}' does not support tool calls for the current provider routing"
            )));
        }
        body["tools"] = json!(options.tools);
    }

    let grammar_in_play = grammar.is_some();
    if let Some(grammar) = grammar {
        body["response_format"] = json!({ "type": "grammar", "grammar": grammar });
    }

    if let Some(provider) = routing.wire_block() {
        body["provider"] = provider;
    }

    Ok(ShapedRequest {
        body,
        logprobs_mode,
        grammar_in_play,
    })
}
