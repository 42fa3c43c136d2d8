use serde_json::Value;

use crate::stream::wire::ChunkChoice;

/// A normalized alternative token.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTopLogProb {
    /// Token text.
    pub token: String,
    /// Log-probability, when the provider sent a usable number.
    pub logprob: Option<f64>,
    /// Raw token bytes, when well-formed.
    pub bytes: Option<Vec<u8>>,
}

/// A normalized token-level log-probability record.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTokenLogProb {
    /// Token text.
    pub token: String,
    /// Log-probability, when the provider sent a usable number.
    pub logprob: Option<f64>,
    /// Raw token bytes, when well-formed.
    pub bytes: Option<Vec<u8>>,
    /// Normalized alternatives.
    pub top_logprobs: Vec<NormalizedTopLogProb>,
}

/// Extracts normalized token log-probabilities from a chunk choice.
///
/// Providers disagree on shapes: log-probs arrive as numbers or numeric
/// strings, byte fields as integer arrays or garbage. Anything unusable
/// normalizes to `None` rather than failing the stream.
pub fn extract_chunk_logprob_tokens(choice: &ChunkChoice) -> Vec<NormalizedTokenLogProb> {
    let Some(content) = choice
        .logprobs
        .as_ref()
        .and_then(|logprobs| logprobs.content.as_ref())
    else {
        return Vec::new();
    };

    content
        .iter()
        .map(|record| NormalizedTokenLogProb {
            token: record.token.clone().unwrap_or_default(),
            logprob: coerce_float(record.logprob.as_ref()),
            bytes: coerce_token_bytes(record.bytes.as_ref()),
            top_logprobs: record
                .top_logprobs
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|top| NormalizedTopLogProb {
                    token: top.token.clone().unwrap_or_default(),
                    logprob: coerce_float(top.logprob.as_ref()),
                    bytes: coerce_token_bytes(top.bytes.as_ref()),
                })
                .collect(),
        })
        .collect()
}

fn coerce_float(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse().ok()
            }
        }
        _ => None,
    }
}

fn coerce_token_bytes(value: Option<&Value>) -> Option<Vec<u8>> {
    match value? {
        Value::Array(items) => {
            let mut bytes = Vec::with_capacity(items.len());
            for item in items {
                let byte = item.as_u64().filter(|byte| *byte <= u64::from(u8::MAX))?;
                bytes.push(byte as u8);
            }
            Some(bytes)
        }
        _ => None,
    }
}

/// Accumulates `(text segment, log-prob)` pairs in stream order and answers
/// capture-level log-probability queries.
#[derive(Debug, Default)]
pub struct CaptureLogProbAccumulator {
    segments: Vec<(String, Option<f64>)>,
}

impl CaptureLogProbAccumulator {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a segment; empty text is dropped.
    pub fn add(&mut self, text: &str, logprob: Option<f64>) {
        if !text.is_empty() {
            self.segments.push((text.to_string(), logprob));
        }
    }

    /// The sum of segment log-probabilities, but only when the recorded
    /// segments, walked in order from a cursor, reproduce `text` exactly.
    /// Any misaligned or unknown segment poisons the result to `None`.
    /// The empty string is exactly 0.0.
    pub fn logprob_for_text(&self, text: &str) -> Option<f64> {
        if text.is_empty() {
            return Some(0.0);
        }
        if self.segments.is_empty() {
            return None;
        }

        let mut cursor = 0usize;
        let mut total = 0.0f64;
        for (segment, logprob) in &self.segments {
            if cursor >= text.len() {
                break;
            }
            if !text[cursor..].starts_with(segment.as_str()) {
                return None;
            }
            cursor += segment.len();
            total += (*logprob)?;
        }
        if cursor != text.len() {
            return None;
        }
        Some(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::wire::ChatChunk;

    #[test]
    fn test_extract_handles_mixed_shapes() {
        let chunk: ChatChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{},"logprobs":{"content":[
                {"token":"hello","logprob":-0.2,"bytes":[104,105],"top_logprobs":null},
                {"token":" world","logprob":"-1.5","bytes":[32,119],
                 "top_logprobs":[{"token":" there"}]}
            ]}}]}"#,
        )
        .unwrap();

        let tokens = extract_chunk_logprob_tokens(&chunk.choices[0]);
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].token, "hello");
        assert_eq!(tokens[0].bytes.as_deref(), Some(&b"hi"[..]));
        assert!(tokens[0].top_logprobs.is_empty());
        assert_eq!(tokens[1].token, " world");
        assert_eq!(tokens[1].logprob, Some(-1.5));
        assert_eq!(tokens[1].top_logprobs.len(), 1);
        assert_eq!(tokens[1].top_logprobs[0].logprob, None);
    }

    #[test]
    fn test_extract_rejects_malformed_bytes() {
        let chunk: ChatChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{},"logprobs":{"content":[
                {"token":"x","logprob":-0.1,"bytes":[104,"bad"]}
            ]}}]}"#,
        )
        .unwrap();
        let tokens = extract_chunk_logprob_tokens(&chunk.choices[0]);
        assert_eq!(tokens[0].bytes, None);
        assert_eq!(tokens[0].logprob, Some(-0.1));
    }

    #[test]
    fn test_accumulator_requires_exact_alignment() {
        let mut acc = CaptureLogProbAccumulator::new();
        acc.add("hello ", Some(-0.3));
        acc.add("world", Some(-0.2));

        let total = acc.logprob_for_text("hello world").unwrap();
        assert!((total - (-0.5)).abs() < 1e-9);
        assert_eq!(acc.logprob_for_text("hello worl"), None);
        assert_eq!(acc.logprob_for_text("hello world!"), None);
    }

    #[test]
    fn test_accumulator_empty_text_is_zero() {
        let acc = CaptureLogProbAccumulator::new();
        assert_eq!(acc.logprob_for_text(""), Some(0.0));
        assert_eq!(acc.logprob_for_text("x"), None);
    }

    #[test]
    fn test_accumulator_unknown_segment_poisons_sum() {
        let mut acc = CaptureLogProbAccumulator::new();
        acc.add("hel", Some(-0.1));
        acc.add("lo", None);
        assert_eq!(acc.logprob_for_text("hello"), None);
    }

    #[test]
    fn test_accumulator_drops_empty_segments() {
        let mut acc = CaptureLogProbAccumulator::new();
        acc.add("", Some(-5.0));
        acc.add("ok", Some(-0.25));
        assert_eq!(acc.logprob_for_text("ok"), Some(-0.25));
    }

    #[test]
    fn test_accumulator_ignores_trailing_segments_beyond_text() {
        let mut acc = CaptureLogProbAccumulator::new();
        acc.add("hello ", Some(-0.3));
        acc.add("STOP", Some(-0.1));
        // Only the prefix that was kept is queried after a stop match.
        assert_eq!(acc.logprob_for_text("hello "), Some(-0.3));
    }
}
