// SPDX-License-Identifier: Apache-2.0

use crate::init::args::UploaderArgs;
use crate::journal::coordinator::{IngestStats, JournalCoordinator};
use crate::journal::cursor::{ResumeCursor, TextFileCursorStore, format_cursor};
use crate::journal::finder::JournalFinder;
use crate::uploader::UploaderBuilder;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{info, warn};

/// Run one complete ingestion pass with the given arguments.
///
/// Cancelling `cancel` stops after uploads already in flight have finished.
pub async fn run_ingest(
    args: UploaderArgs,
    cancel: CancellationToken,
) -> Result<IngestStats, BoxError> {
    let discovery = JournalFinder::new(&args.journal_dir).find_files()?;
    for rejected in &discovery.rejected {
        warn!(error = %rejected, "Ignoring journal file");
    }
    info!(
        dir = %args.journal_dir.display(),
        files = discovery.files.len(),
        rejected = discovery.rejected.len(),
        "Discovered journal files"
    );

    let cursor = ResumeCursor::load(TextFileCursorStore::new(&args.cursor_file))?;
    if let Some(resume_from) = cursor.resume_from() {
        info!(cursor = %format_cursor(resume_from), "Resuming after cursor");
    }

    let uploader = UploaderBuilder::new(&args.commander_name, &args.api_key)
        .with_endpoint(&args.endpoint)
        .with_retry_config(args.retry_config())
        .with_request_timeout(args.request_timeout)
        .with_tls_config(args.tls_config()?)
        .build()?;

    let mut coordinator = JournalCoordinator::new(cursor, uploader, args.coordinator_config());
    let mut stats = coordinator.run(&discovery.files, &cancel).await?;
    stats.discovery_errors = discovery.rejected.len();

    info!(
        files = stats.files,
        lines = stats.lines,
        uploaded = stats.uploaded,
        skipped = stats.skipped,
        parse_errors = stats.parse_errors,
        failed = stats.failed,
        discovery_errors = stats.discovery_errors,
        interrupted = stats.interrupted,
        cursor = coordinator.cursor().last_forwarded().map(format_cursor),
        "Journal ingestion finished"
    );

    Ok(stats)
}
