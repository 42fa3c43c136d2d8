/// An event surfaced while a generate call streams.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Generated text released to the caller.
    Text(TextEvent),
    /// A single generated token with its log-probability.
    Token(TokenEvent),
    /// A named capture, with an aggregated log-probability when token
    /// boundaries lined up exactly.
    Capture(CaptureEvent),
    /// Usage accounting, once per round trip.
    Usage(UsageEvent),
}

/// Generated text released to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct TextEvent {
    /// The text.
    pub value: String,
    /// Whether the text was generated (as opposed to echoed template text).
    pub is_generated: bool,
    /// Latency attributed to this text, when measured.
    pub latency_ms: Option<f64>,
}

/// A generated token.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenEvent {
    /// Token text.
    pub value: String,
    /// Raw token bytes, when the provider reports them.
    pub bytes: Option<Vec<u8>>,
    /// Token log-probability.
    pub log_prob: Option<f64>,
}

/// A named capture.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureEvent {
    /// Capture name.
    pub name: String,
    /// Captured text.
    pub value: String,
    /// Sum of the member tokens' log-probabilities, when they align.
    pub log_prob: Option<f64>,
    /// Whether the capture appends to a list.
    pub append: bool,
}

/// Usage accounting for one round trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageEvent {
    /// Prompt tokens billed.
    pub input_tokens: u64,
    /// Completion tokens billed.
    pub output_tokens: u64,
    /// Prompt tokens served from the provider's cache.
    pub cached_input_tokens: u64,
    /// Time to first token, in milliseconds.
    pub ttft_ms: Option<f64>,
    /// Total latency of the round trip, in milliseconds.
    pub total_latency_ms: Option<f64>,
    /// Number of provider round trips this event covers.
    pub round_trips: u32,
}

impl StreamEvent {
    /// A generated-text event.
    pub fn text(value: impl Into<String>) -> Self {
        StreamEvent::Text(TextEvent {
            value: value.into(),
            is_generated: true,
            latency_ms: None,
        })
    }

    /// A token event.
    pub fn token(value: impl Into<String>, bytes: Option<Vec<u8>>, log_prob: Option<f64>) -> Self {
        StreamEvent::Token(TokenEvent {
            value: value.into(),
            bytes,
            log_prob,
        })
    }

    /// A scalar capture event.
    pub fn capture(name: impl Into<String>, value: impl Into<String>, log_prob: Option<f64>) -> Self {
        StreamEvent::Capture(CaptureEvent {
            name: name.into(),
            value: value.into(),
            log_prob,
            append: false,
        })
    }

    /// An append-mode capture event.
    pub fn capture_append(
        name: impl Into<String>,
        value: impl Into<String>,
        log_prob: Option<f64>,
    ) -> Self {
        StreamEvent::Capture(CaptureEvent {
            name: name.into(),
            value: value.into(),
            log_prob,
            append: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        match StreamEvent::text("hello") {
            StreamEvent::Text(text) => {
                assert_eq!(text.value, "hello");
                assert!(text.is_generated);
            }
            other => panic!("expected text event, got {other:?}"),
        }

        match StreamEvent::capture_append("items", "one", Some(-0.5)) {
            StreamEvent::Capture(capture) => {
                assert!(capture.append);
                assert_eq!(capture.log_prob, Some(-0.5));
            }
            other => panic!("expected capture event, got {other:?}"),
        }
    }
}
