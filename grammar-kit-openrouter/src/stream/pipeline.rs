use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_stream::stream;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use grammar_kit_ast::{CaptureValue, Grammar, GrammarNode};

use crate::error::AdapterError;
use crate::stream::event::{CaptureEvent, StreamEvent, UsageEvent};
use crate::stream::logprobs::{extract_chunk_logprob_tokens, CaptureLogProbAccumulator};
use crate::stream::stop::StreamingRegexStopMatcher;
use crate::stream::wire::{ChatChunk, WireUsage};
use crate::transcript::Transcript;

/// The event stream a generate call returns.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, AdapterError>> + Send>>;

/// Primary capture configuration for a call.
#[derive(Debug, Clone)]
pub(crate) struct CaptureSpec {
    pub name: String,
    pub list_append: bool,
}

/// Client-side stop configuration for a call.
#[derive(Debug)]
pub(crate) struct StopSpec {
    pub matcher: StreamingRegexStopMatcher,
    pub stop_capture: Option<String>,
}

/// Local re-validation configuration for a grammar-constrained call.
#[derive(Debug, Clone)]
pub(crate) struct GrammarValidation {
    pub grammar: Grammar,
    pub root: GrammarNode,
    pub model: String,
}

/// Per-call pipeline configuration.
#[derive(Debug, Default)]
pub(crate) struct PipelineOptions {
    /// Treat reasoning-channel text as generated output. Only set when a
    /// grammar response_format is in the request: some providers return the
    /// constrained text on the reasoning channel.
    pub allow_reasoning_content: bool,
    /// Emit per-token events (logprobs were requested and supported).
    pub emit_tokens: bool,
    /// Primary capture for the generated text.
    pub capture: Option<CaptureSpec>,
    /// Client-side stop regex.
    pub stop: Option<StopSpec>,
    /// Re-validate the final text against the grammar, failing closed.
    pub validation: Option<GrammarValidation>,
}

/// Parses a streaming HTTP body into chat chunks: lines are buffered across
/// byte boundaries, `data: ` frames are JSON-decoded, `[DONE]` terminates,
/// and malformed frames are skipped.
pub(crate) fn chat_chunks(
    byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = Result<ChatChunk, AdapterError>> + Send {
    stream! {
        let mut buffer: Vec<u8> = Vec::new();
        let mut byte_stream = Box::pin(byte_stream);
        'read: while let Some(result) = byte_stream.next().await {
            match result {
                Ok(bytes) => {
                    buffer.extend_from_slice(&bytes);
                    while let Some(pos) = buffer.iter().position(|byte| *byte == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&line);
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if let Some(data) = line.strip_prefix("data: ") {
                            if data == "[DONE]" {
                                break 'read;
                            }
                            if let Ok(chunk) = serde_json::from_str::<ChatChunk>(data) {
                                yield Ok(chunk);
                            }
                        }
                    }
                }
                Err(err) => {
                    yield Err(AdapterError::Transport(err));
                    break;
                }
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn usage_event(usage: &WireUsage, started: Instant, ttft_ms: Option<f64>) -> UsageEvent {
    UsageEvent {
        input_tokens: usage.input_tokens.unwrap_or(0),
        output_tokens: usage.output_tokens.unwrap_or(0),
        cached_input_tokens: usage
            .input_tokens_details
            .as_ref()
            .and_then(|details| details.cached_tokens)
            .unwrap_or(0),
        ttft_ms,
        total_latency_ms: Some(elapsed_ms(started)),
        round_trips: 1,
    }
}

/// Runs the per-call pipeline over a chunk stream.
///
/// All Text/Token events follow stream order; the primary capture comes
/// after the last text; captures derived from local validation come last.
/// Raw text is applied to the transcript as it arrives and rewound past a
/// stop match so stop text never survives in state content.
pub(crate) fn run_pipeline(
    chunks: impl Stream<Item = Result<ChatChunk, AdapterError>> + Send + 'static,
    mut options: PipelineOptions,
    transcript: Arc<Mutex<Transcript>>,
) -> EventStream {
    Box::pin(stream! {
        let started = Instant::now();
        let mut ttft_ms: Option<f64> = None;
        let mut accumulator = CaptureLogProbAccumulator::new();
        let mut generated = String::new();
        let mut matched_stop_text: Option<String> = None;

        let mut chunks = Box::pin(chunks);
        'read: while let Some(next) = chunks.next().await {
            let chunk = match next {
                Ok(chunk) => chunk,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            if let Some(usage) = &chunk.usage {
                yield Ok(StreamEvent::Usage(usage_event(usage, started, ttft_ms)));
            }

            let Some(choice) = chunk.choices.first() else {
                continue;
            };
            let tokens = extract_chunk_logprob_tokens(choice);
            for token in &tokens {
                accumulator.add(&token.token, token.logprob);
            }

            let Some(delta) = &choice.delta else {
                continue;
            };
            let mut incoming = delta.content_text().unwrap_or_default();
            if incoming.is_empty() && options.allow_reasoning_content {
                if let Some(reasoning) = delta.reasoning_text() {
                    incoming.push_str(reasoning);
                }
            }
            if incoming.is_empty() {
                continue;
            }

            if ttft_ms.is_none() {
                ttft_ms = Some(elapsed_ms(started));
            }
            generated.push_str(&incoming);
            {
                let mut transcript = transcript
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                transcript.apply_text(&incoming);
            }

            match options.stop.as_mut() {
                Some(spec) => {
                    let update = spec.matcher.feed(&incoming);
                    if !update.emit_text.is_empty() {
                        yield Ok(StreamEvent::text(update.emit_text.clone()));
                    }
                    if update.matched {
                        matched_stop_text = update.stop_text.clone();
                        if update.rewind_characters > 0 {
                            let mut transcript = transcript
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner);
                            transcript.rewind_text(update.rewind_characters);
                        }
                        // Stop reading; dropping the chunk stream closes the
                        // underlying HTTP body.
                        break 'read;
                    }
                }
                None => {
                    yield Ok(StreamEvent::text(incoming.clone()));
                    if options.emit_tokens {
                        for token in tokens {
                            yield Ok(StreamEvent::token(
                                token.token,
                                token.bytes,
                                token.logprob,
                            ));
                        }
                    }
                }
            }
        }

        let captured_text = match options.stop.as_mut() {
            Some(spec) => {
                if !spec.matcher.matched() {
                    let trailing = spec.matcher.finish();
                    if !trailing.emit_text.is_empty() {
                        yield Ok(StreamEvent::text(trailing.emit_text.clone()));
                    }
                }
                spec.matcher.emitted_text().to_string()
            }
            None => generated.clone(),
        };

        if let Some(capture) = &options.capture {
            let log_prob = accumulator.logprob_for_text(&captured_text);
            yield Ok(StreamEvent::Capture(CaptureEvent {
                name: capture.name.clone(),
                value: captured_text.clone(),
                log_prob,
                append: capture.list_append,
            }));
        }

        if let Some(stop_text) = &matched_stop_text {
            if let Some(name) = options.stop.as_ref().and_then(|spec| spec.stop_capture.clone()) {
                yield Ok(StreamEvent::capture(name, stop_text.clone(), None));
            }
        }

        if let Some(validation) = &options.validation {
            let Some(matches) = validation.grammar.match_text(&validation.root, &captured_text)
            else {
                yield Err(AdapterError::validation(format!(
                    "provider output for model '{}' failed local grammar validation",
                    validation.model
                )));
                return;
            };
            for (name, value) in matches.captures {
                match value {
                    CaptureValue::Single(entry) => {
                        yield Ok(StreamEvent::capture(name, entry.value, entry.log_prob));
                    }
                    CaptureValue::List(entries) => {
                        for entry in entries {
                            yield Ok(StreamEvent::capture_append(
                                name.clone(),
                                entry.value,
                                entry.log_prob,
                            ));
                        }
                    }
                }
            }
        }
    })
}
