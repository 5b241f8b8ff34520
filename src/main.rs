//! Card Patrol entrypoint: evaluates transaction identifiers given as arguments, or one
//! per line on stdin, and writes one JSON decision line per identifier to stdout in
//! input order. Evaluations run concurrently on blocking workers.

use card_patrol::{batch::run_batch, config::PatrolConfig, logging::StructuredLogger, Patrol};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

async fn transaction_ids() -> std::io::Result<Vec<String>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        return Ok(args);
    }
    let mut ids = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if !line.is_empty() {
            ids.push(line.to_string());
        }
    }
    Ok(ids)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = PatrolConfig::from_env()?;

    StructuredLogger::init(config.log.json, &config.log.level);

    info!(
        model = %config.model.path.display(),
        threshold = config.policy.threshold,
        workers = config.runtime.workers,
        "card patrol starting"
    );

    let patrol = Arc::new(Patrol::from_config(&config)?);
    let ids = transaction_ids().await?;

    let mut stdout = std::io::stdout();
    let report = run_batch(patrol, ids, config.runtime.workers, &mut stdout).await?;

    if let Some(e) = report.fault {
        error!(error = %e, "configuration fault; decisions withheld");
        return Err(e.into());
    }
    info!(decided = report.decided, failed = report.failed, "card patrol complete");
    Ok(())
}
