/// Stream event types surfaced to the caller.
pub mod event;
/// Token log-probability extraction and capture-level aggregation.
pub mod logprobs;
/// Chunk-to-event pipeline with stop matching and local re-validation.
pub mod pipeline;
/// Client-side streaming regex stop matcher.
pub mod stop;
/// Wire shapes of streaming chunks.
pub mod wire;

pub use event::{CaptureEvent, StreamEvent, TextEvent, TokenEvent, UsageEvent};
pub use logprobs::{extract_chunk_logprob_tokens, CaptureLogProbAccumulator, NormalizedTokenLogProb};
pub use stop::{RegexStopUpdate, StreamingRegexStopMatcher};
