//! `murmur-probe`: exercise a murmur backend from the command line.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use murmur::classifier::LocalFallback;
use murmur::{MurmurClient, MurmurConfig};
use murmur_intent::IntentClassifier;

/// Probe a murmur classification backend.
#[derive(Parser)]
#[command(name = "murmur-probe", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify an utterance, remote first. Prints the JSON result.
    Classify {
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Run the backend health check.
    Health,

    /// Classify with the embedded classifier only. No network.
    Local {
        #[arg(required = true)]
        text: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => MurmurConfig::from_file(path)?,
        None => {
            let path = MurmurConfig::default_config_path();
            if path.is_file() {
                MurmurConfig::from_file(&path)?
            } else {
                MurmurConfig::default()
            }
        }
    };
    let _log_guard = murmur::diagnostics::init_tracing(&config.logging)?;

    match cli.command {
        Command::Classify { text } => classify(config, &text.join(" ")).await,
        Command::Health => health(config).await,
        Command::Local { text } => local(&text.join(" ")),
    }
}

async fn classify(config: MurmurConfig, text: &str) -> anyhow::Result<()> {
    let client = MurmurClient::from_config(config)?;
    let outcome = client.classifier().classify(text).await;
    client.shutdown().await;

    let result = outcome?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn health(config: MurmurConfig) -> anyhow::Result<()> {
    let client = MurmurClient::from_config(config)?;
    let status = client.classifier().health_check().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    if !status.is_healthy() {
        anyhow::bail!("backend at {} is unhealthy", client.config().server.http_base_url);
    }
    Ok(())
}

fn local(text: &str) -> anyhow::Result<()> {
    let result = LocalFallback::classify(&IntentClassifier::new(), text)?;
    let json = serde_json::json!({
        "category": result.category,
        "intent": result.intent,
        "confidence": result.confidence,
        "parameters": result.parameters,
        "elapsed_ms": result.elapsed.as_secs_f64() * 1000.0,
    });
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
