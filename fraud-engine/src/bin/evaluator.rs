//! Batch evaluator
//!
//! Reads JSON-lines transactions from a file (or stdin) and prints one JSON
//! risk assessment per line. Logs go to stderr.

use anyhow::Context;
use fraud_engine::{EngineConfig, EngineDependencies, FraudEngine, Transaction};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = match std::env::var("FRAUD_CONFIG") {
        Ok(path) => {
            let mut config = EngineConfig::from_file(&path)
                .with_context(|| format!("loading config from {}", path))?;
            config.apply_env()?;
            config
        }
        Err(_) => EngineConfig::from_env()?,
    };

    let deps = EngineDependencies::from_config(&config)?;
    let engine = FraudEngine::new(config, deps)?;

    tracing::info!("Starting fraud evaluator");

    match std::env::args().nth(1).filter(|arg| arg != "-") {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("opening {}", path))?;
            run(&engine, file).await
        }
        None => run(&engine, tokio::io::stdin()).await,
    }
}

async fn run<R: AsyncRead + Unpin>(engine: &FraudEngine, input: R) -> anyhow::Result<()> {
    let mut lines = BufReader::new(input).lines();
    let (mut evaluated, mut blocked, mut rejected_lines) = (0u64, 0u64, 0u64);
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let tx: Transaction = match serde_json::from_str(&line) {
            Ok(tx) => tx,
            Err(e) => {
                tracing::error!(line = line_no, error = %e, "Skipping malformed transaction");
                rejected_lines += 1;
                continue;
            }
        };

        let assessment = engine.evaluate(&tx).await;
        evaluated += 1;
        if assessment.is_fraudulent {
            blocked += 1;
        }
        println!("{}", serde_json::to_string(&assessment)?);
    }

    tracing::info!(evaluated, blocked, rejected_lines, "Evaluation finished");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("FRAUD_LOG_JSON").map_or(false, |v| v == "1");
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
