//! Grammar-constrained generation adapter for OpenRouter-style
//! chat-completions providers.
//!
//! Providers behind an aggregator share one wire dialect but differ in what
//! they actually accept: grammar response formats, log-probabilities, tool
//! calls, sampling knobs. This crate negotiates those differences per call:
//! it resolves capabilities from cached catalog and endpoint fetches,
//! shapes the outgoing request (dropping or demoting what the routed
//! providers cannot honor), translates the grammar into the dialect the
//! routing prefers, and runs the streaming response through a pipeline that
//! extracts text and token log-probabilities, applies a client-side regex
//! stop matcher, aggregates capture-level log-probabilities, and re-validates
//! the final text against the grammar before any capture is surfaced.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::{Arc, Mutex};
//!
//! use futures_util::StreamExt;
//! use grammar_kit_ast::{regex, Grammar};
//! use grammar_kit_openrouter::{
//!     ChatMessage, GenerateOptions, OpenRouterChatModel, OpenRouterSettings, Role, Transcript,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let model = OpenRouterChatModel::new(
//!     "openai/gpt-4o-mini",
//!     OpenRouterSettings::new().with_api_key("your-api-key"),
//! );
//!
//! let mut transcript = Transcript::new();
//! transcript.push(ChatMessage::user("Is the sky blue? Answer YES or NO."));
//! transcript.begin(Role::Assistant);
//! let transcript = Arc::new(Mutex::new(transcript));
//!
//! let grammar = Grammar::new();
//! let mut events = model
//!     .generate(&grammar, &regex("YES|NO"), &transcript, GenerateOptions::default())
//!     .await?;
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event?);
//! }
//! # Ok(())
//! # }
//! ```

/// Capability resolution over cached catalog and endpoint fetches.
pub mod capabilities;
/// The chat-completions adapter model.
pub mod chat;
/// Error taxonomy and provider-rejection classification.
pub mod error;
/// Offline-built provider grammar policy.
pub mod policy;
/// The OpenAI Responses custom-tool variant.
pub mod responses;
/// Provider routing directives.
pub mod routing;
/// Adapter settings.
pub mod settings;
/// Request shaping from caller options and capability facts.
pub mod shaper;
/// Streaming response pipeline.
pub mod stream;
/// The consumed chat-transcript interface.
pub mod transcript;

pub use capabilities::{
    CapabilityCache, CapabilityResolver, ModelEndpoint, ModelMetadata, TOP_LOGPROBS_SAFE_MAX,
};
pub use chat::{OpenRouterChatModel, SessionCapabilities};
pub use error::{looks_like_provider_rejection, AdapterError, UnsupportedFeature};
pub use policy::{ModelGrammarSummary, ProviderGrammarEntry, ProviderGrammarPolicy};
pub use responses::{OpenAIResponsesModel, ResponsesSettings};
pub use routing::ProviderRouting;
pub use settings::OpenRouterSettings;
pub use shaper::{GenerateOptions, LogProbsMode};
pub use stream::pipeline::EventStream;
pub use stream::{
    CaptureEvent, CaptureLogProbAccumulator, StreamEvent, StreamingRegexStopMatcher, TextEvent,
    TokenEvent, UsageEvent,
};
pub use transcript::{ChatMessage, Role, Transcript};
