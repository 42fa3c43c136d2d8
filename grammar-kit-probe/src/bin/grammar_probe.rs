//! Probes an aggregator's providers for grammar response-format behavior
//! and writes the capability cache artifact the resolver consumes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use grammar_kit_dialect::GrammarDialect;
use grammar_kit_openrouter::{CapabilityCache, CapabilityResolver};
use grammar_kit_probe::{
    build_policy, discover_providers, probe_grammar, probe_provider, render_markdown,
    CapabilityArtifact, ProbeResult,
};

#[derive(Debug, Parser)]
#[command(
    name = "grammar-probe",
    about = "Probe provider grammar behavior across dialects"
)]
struct Args {
    /// Aggregator API base URL.
    #[arg(long, env = "OPENROUTER_BASE_URL", default_value = "https://openrouter.ai/api/v1")]
    api_base: String,

    /// API key.
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Comma-separated models to probe.
    #[arg(long, env = "GRAMMAR_PROBE_MODELS", value_delimiter = ',')]
    models: Vec<String>,

    /// Comma-separated dialects to probe.
    #[arg(long, value_delimiter = ',', default_value = "lark,gbnf")]
    formats: Vec<String>,

    /// Maximum providers per model (0 = no limit).
    #[arg(long, default_value_t = 0)]
    provider_limit: usize,

    /// HTTP timeout per request, in seconds.
    #[arg(long, default_value_t = 20.0)]
    timeout_seconds: f64,

    /// Capability cache JSON output path.
    #[arg(long, default_value = "artifacts/provider-grammar-capabilities.json")]
    output_json: PathBuf,

    /// Markdown summary output path.
    #[arg(long, default_value = "artifacts/provider-grammar-capabilities.md")]
    output_markdown: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    if args.api_key.trim().is_empty() {
        bail!("missing API key: set OPENROUTER_API_KEY or pass --api-key");
    }
    if args.models.is_empty() {
        bail!("missing models: set GRAMMAR_PROBE_MODELS or pass --models");
    }

    let mut dialects = Vec::new();
    for format in &args.formats {
        let dialect = GrammarDialect::parse(format)
            .with_context(|| format!("unsupported grammar format: {format}"))?;
        dialects.push(dialect);
    }
    let grammars: Vec<(GrammarDialect, String)> = dialects
        .iter()
        .map(|dialect| Ok((*dialect, probe_grammar(*dialect)?)))
        .collect::<Result<_>>()?;

    let http = reqwest::Client::new();
    let resolver = CapabilityResolver::new(
        http.clone(),
        Arc::new(CapabilityCache::new()),
        &args.api_base,
        Some(&args.api_key),
    );
    let timeout = Duration::from_secs_f64(args.timeout_seconds);

    let mut results: Vec<ProbeResult> = Vec::new();
    for model in &args.models {
        let mut providers = discover_providers(&resolver, model).await;
        if args.provider_limit > 0 {
            providers.truncate(args.provider_limit);
        }
        if providers.is_empty() {
            info!(model = %model, "no providers found");
            continue;
        }
        for provider in providers {
            for (dialect, grammar) in &grammars {
                let result = probe_provider(
                    &http,
                    resolver.api_base(),
                    &args.api_key,
                    model,
                    &provider,
                    *dialect,
                    grammar,
                    timeout,
                )
                .await;
                info!(
                    provider = %result.provider,
                    format = %result.grammar_format,
                    outcome = %result.outcome.as_str(),
                    status = ?result.status_code,
                    "probe finished"
                );
                results.push(result);
            }
        }
    }

    let artifact = CapabilityArtifact {
        policy: build_policy(
            resolver.api_base(),
            &results,
            chrono::Utc::now().to_rfc3339(),
        ),
        models: args.models.clone(),
        formats: dialects,
        results,
    };

    if let Some(parent) = args.output_json.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if let Some(parent) = args.output_markdown.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut rendered = serde_json::to_string_pretty(&artifact)?;
    rendered.push('\n');
    std::fs::write(&args.output_json, rendered)
        .with_context(|| format!("writing {}", args.output_json.display()))?;
    std::fs::write(&args.output_markdown, render_markdown(&artifact))
        .with_context(|| format!("writing {}", args.output_markdown.display()))?;

    println!("Wrote {}", args.output_json.display());
    println!("Wrote {}", args.output_markdown.display());
    Ok(())
}
