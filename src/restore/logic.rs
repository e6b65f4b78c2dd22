// restoretool/src/restore/logic.rs
use tracing::{error, info, info_span, warn, Instrument};

use crate::errors::AppError;
use crate::model::{BatchSummary, ProcessingOutcome};
use crate::restore::drive::{DiscoveryQuery, RemoteStore};
use crate::restore::processor::FileProcessor;

/// Lists candidates once, then processes them one at a time in list order.
///
/// Only the listing can fail the batch. Per-file failures are logged and
/// counted, and the next file is attempted regardless.
pub async fn perform_restore_orchestration(
    store: &dyn RemoteStore,
    processor: &FileProcessor,
    query: &DiscoveryQuery,
) -> Result<BatchSummary, AppError> {
    info!(name_marker = %query.name_marker, "checking Google Drive for backup files");
    let files = store.list(query).await.map_err(AppError::Discovery)?;

    let mut summary = BatchSummary {
        listed: files.len(),
        ..BatchSummary::default()
    };
    if files.is_empty() {
        info!("no files found");
        return Ok(summary);
    }
    info!(count = files.len(), "found files to process");

    for file in &files {
        let span = info_span!("file", name = %file.name, id = %file.id);
        let outcome = processor.process(file).instrument(span.clone()).await;
        span.in_scope(|| match &outcome {
            ProcessingOutcome::Processed | ProcessingOutcome::SkippedTooSmall => {
                info!(outcome = outcome.label(), "file done")
            }
            ProcessingOutcome::FailedTransient(err) => {
                warn!(outcome = outcome.label(), %err, "file failed, will retry on next run")
            }
            ProcessingOutcome::FailedPermanent(err) => {
                error!(outcome = outcome.label(), %err, "file failed and was removed")
            }
        });
        summary.record(&outcome);
    }

    info!(
        listed = summary.listed,
        processed = summary.processed,
        skipped_too_small = summary.skipped_too_small,
        failed_transient = summary.failed_transient,
        failed_permanent = summary.failed_permanent,
        "batch finished"
    );
    Ok(summary)
}
