//! Rolls a probe matrix into the provider grammar policy artifact.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use grammar_kit_probe::{build_policy, CapabilityArtifact};

#[derive(Debug, Parser)]
#[command(
    name = "build-policy",
    about = "Build the provider grammar policy from a probe matrix"
)]
struct Args {
    /// Probe matrix JSON path (output of grammar-probe).
    #[arg(long, default_value = "artifacts/provider-grammar-capabilities.json")]
    matrix: PathBuf,

    /// Policy JSON output path.
    #[arg(long, default_value = "artifacts/provider-grammar-policy.json")]
    output: PathBuf,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let raw = std::fs::read_to_string(&args.matrix)
        .with_context(|| format!("reading {}", args.matrix.display()))?;
    let artifact: CapabilityArtifact =
        serde_json::from_str(&raw).with_context(|| "parsing probe matrix")?;

    let policy = build_policy(
        artifact.policy.api_base.as_deref().unwrap_or_default(),
        &artifact.results,
        chrono::Utc::now().to_rfc3339(),
    );

    if let Some(parent) = args.output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    policy
        .save(&args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;
    println!("Wrote {}", args.output.display());
    Ok(())
}
