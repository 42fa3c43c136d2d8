use serde::Deserialize;
use serde_json::Value;

/// One streaming chat-completions chunk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChunk {
    /// Per-choice deltas; providers send one choice.
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,

    /// Usage accounting, reported on the terminal chunk.
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

/// One choice inside a chunk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    /// The incremental delta.
    #[serde(default)]
    pub delta: Option<ChunkDelta>,

    /// Set on the last content chunk of the choice.
    #[serde(default)]
    pub finish_reason: Option<String>,

    /// Token-level log-probabilities for this delta.
    #[serde(default)]
    pub logprobs: Option<WireLogProbs>,
}

/// Incremental message delta.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    /// Content text, either a plain string or typed parts.
    #[serde(default)]
    pub content: Option<DeltaContent>,

    /// Reasoning-channel text.
    #[serde(default)]
    pub reasoning_content: Option<String>,

    /// Alternate reasoning field some providers use.
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl ChunkDelta {
    /// Flattens the content field to plain text.
    pub fn content_text(&self) -> Option<String> {
        match &self.content {
            Some(DeltaContent::Text(text)) => Some(text.clone()),
            Some(DeltaContent::Parts(parts)) => {
                let text: String = parts
                    .iter()
                    .filter(|part| part.part_type == "text")
                    .filter_map(|part| part.text.as_deref())
                    .collect();
                (!text.is_empty()).then_some(text)
            }
            None => None,
        }
    }

    /// Reasoning-channel text, whichever field carries it.
    pub fn reasoning_text(&self) -> Option<&str> {
        self.reasoning_content
            .as_deref()
            .or(self.reasoning.as_deref())
    }
}

/// Content delta: a plain string or a list of typed parts.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DeltaContent {
    /// Plain string content.
    Text(String),
    /// Typed content parts.
    Parts(Vec<DeltaPart>),
}

/// One typed content part.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeltaPart {
    /// Part discriminator, e.g. "text".
    #[serde(rename = "type", default)]
    pub part_type: String,

    /// Text payload for text parts.
    #[serde(default)]
    pub text: Option<String>,
}

/// Token log-probabilities for a delta.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireLogProbs {
    /// Per-token records.
    #[serde(default)]
    pub content: Option<Vec<WireTokenLogProb>>,
}

/// One token-level log-probability record, held loosely: providers send
/// numbers, numeric strings, and byte arrays in varying shapes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireTokenLogProb {
    /// Token text.
    #[serde(default)]
    pub token: Option<String>,

    /// Log-probability, number or numeric string.
    #[serde(default)]
    pub logprob: Option<Value>,

    /// Raw token bytes.
    #[serde(default)]
    pub bytes: Option<Value>,

    /// Most-likely alternatives for this position.
    #[serde(default)]
    pub top_logprobs: Option<Vec<WireTopLogProb>>,
}

/// One alternative token at a position.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireTopLogProb {
    /// Token text.
    #[serde(default)]
    pub token: Option<String>,

    /// Log-probability, number or numeric string.
    #[serde(default)]
    pub logprob: Option<Value>,

    /// Raw token bytes.
    #[serde(default)]
    pub bytes: Option<Value>,
}

/// Usage block on the terminal chunk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireUsage {
    /// Prompt tokens billed.
    #[serde(default, alias = "prompt_tokens")]
    pub input_tokens: Option<u64>,

    /// Completion tokens billed.
    #[serde(default, alias = "completion_tokens")]
    pub output_tokens: Option<u64>,

    /// Prompt token cache details.
    #[serde(default, alias = "prompt_tokens_details")]
    pub input_tokens_details: Option<WireTokenDetails>,
}

/// Cached-token details.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireTokenDetails {
    /// Prompt tokens served from cache.
    #[serde(default)]
    pub cached_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_string_content() {
        let chunk: ChatChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":"hello"}}]}"#,
        )
        .unwrap();
        let delta = chunk.choices[0].delta.as_ref().unwrap();
        assert_eq!(delta.content_text().as_deref(), Some("hello"));
    }

    #[test]
    fn test_typed_parts_content() {
        let chunk: ChatChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":[
                {"type":"text","text":"hel"},
                {"type":"image","text":null},
                {"type":"text","text":"lo"}
            ]}}]}"#,
        )
        .unwrap();
        let delta = chunk.choices[0].delta.as_ref().unwrap();
        assert_eq!(delta.content_text().as_deref(), Some("hello"));
    }

    #[test]
    fn test_reasoning_field_fallback() {
        let chunk: ChatChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"reasoning":"YES"}}]}"#).unwrap();
        let delta = chunk.choices[0].delta.as_ref().unwrap();
        assert_eq!(delta.reasoning_text(), Some("YES"));
    }

    #[test]
    fn test_usage_field_aliases() {
        let spec_form: ChatChunk = serde_json::from_str(
            r#"{"choices":[],"usage":{"input_tokens":10,"output_tokens":2,
                "input_tokens_details":{"cached_tokens":4}}}"#,
        )
        .unwrap();
        let usage = spec_form.usage.unwrap();
        assert_eq!(usage.input_tokens, Some(10));
        assert_eq!(
            usage.input_tokens_details.unwrap().cached_tokens,
            Some(4)
        );

        let legacy_form: ChatChunk = serde_json::from_str(
            r#"{"choices":[],"usage":{"prompt_tokens":7,"completion_tokens":1,
                "prompt_tokens_details":{"cached_tokens":0}}}"#,
        )
        .unwrap();
        assert_eq!(legacy_form.usage.unwrap().input_tokens, Some(7));
    }

    #[test]
    fn test_logprob_record_tolerates_mixed_shapes() {
        let chunk: ChatChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":"hi"},"logprobs":{"content":[
                {"token":"hi","logprob":-0.25,"bytes":[104,105],"top_logprobs":[{"token":"ho"}]},
                {"token":"!","logprob":"-1.5"}
            ]}}]}"#,
        )
        .unwrap();
        let records = chunk.choices[0]
            .logprobs
            .as_ref()
            .unwrap()
            .content
            .as_ref()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].token.as_deref(), Some("hi"));
    }
}
