//! Batch evaluation: many identifiers through one shared `Patrol`, bounded concurrency,
//! one JSON line per identifier in input order.

use crate::error::PatrolError;
use crate::logging::{DecisionLine, StructuredLogger};
use crate::patrol::Patrol;
use crate::risk::Overrides;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::Semaphore;

pub type BatchError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Default)]
pub struct BatchReport {
    pub decided: usize,
    pub failed: usize,
    /// First configuration fault seen; decisions after it were withheld.
    pub fault: Option<PatrolError>,
}

/// Evaluate `ids` on blocking workers, at most `workers` at a time, writing each
/// outcome to `out` once every earlier identifier has been written.
pub async fn run_batch<W: Write>(
    patrol: Arc<Patrol>,
    ids: Vec<String>,
    workers: usize,
    out: &mut W,
) -> Result<BatchReport, BatchError> {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut handles = Vec::with_capacity(ids.len());
    for id in ids {
        let permit = semaphore.clone().acquire_owned().await?;
        let patrol = patrol.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let result = patrol.assess(&id, &Overrides::none());
            drop(permit);
            (id, result)
        }));
    }

    let mut report = BatchReport::default();
    for handle in handles {
        let (id, result) = handle.await?;
        match &result {
            Ok(decision) => {
                report.decided += 1;
                StructuredLogger::emit_json(&DecisionLine::Decided(decision), &mut *out)?;
            }
            Err(e) => {
                report.failed += 1;
                StructuredLogger::emit_json(&DecisionLine::failed(&id, e), &mut *out)?;
                if e.is_fatal() && report.fault.is_none() {
                    report.fault = Some(e.clone());
                }
            }
        }
    }
    out.flush()?;
    Ok(report)
}
