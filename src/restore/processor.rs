// restoretool/src/restore/processor.rs
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{Builder as TempFileBuilder, TempDir};
use tracing::{error, info, warn};

use crate::archive::{find_backup_file, Extractor};
use crate::config::ProcessingSettings;
use crate::errors::FileError;
use crate::model::{CandidateFile, ProcessingOutcome};
use crate::restore::db_restore::DatabaseRestorer;
use crate::restore::drive::RemoteStore;
use crate::restore::permissions::PermissionGranter;
use crate::restore::tracker::CompletionTracker;

const SCRATCH_PREFIX: &str = "backup-";
const EXTRACT_SUBDIR: &str = "extracted";
const FALLBACK_ARCHIVE_NAME: &str = "download.7z";

/// Why getting from a Drive file to a local `.bak` failed.
enum FetchFailure {
    /// Nothing is known about the archive yet; always retried.
    Download(FileError),
    /// The archive arrived but could not be unpacked; subject to the age check.
    Unpack(FileError),
}

/// Takes one candidate file through download, restore and cleanup.
pub struct FileProcessor {
    store: Arc<dyn RemoteStore>,
    extractor: Arc<dyn Extractor>,
    granter: Arc<dyn PermissionGranter>,
    restorer: DatabaseRestorer,
    tracker: CompletionTracker,
    settings: ProcessingSettings,
    archive_password: String,
    correction_query: String,
}

impl FileProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn RemoteStore>,
        extractor: Arc<dyn Extractor>,
        granter: Arc<dyn PermissionGranter>,
        restorer: DatabaseRestorer,
        tracker: CompletionTracker,
        settings: ProcessingSettings,
        archive_password: impl Into<String>,
        correction_query: impl Into<String>,
    ) -> Self {
        Self {
            store,
            extractor,
            granter,
            restorer,
            tracker,
            settings,
            archive_password: archive_password.into(),
            correction_query: correction_query.into(),
        }
    }

    pub async fn process(&self, file: &CandidateFile) -> ProcessingOutcome {
        info!("starting processing");

        if file.size < self.settings.min_file_size {
            info!(
                size = file.size,
                threshold = self.settings.min_file_size,
                "file is smaller than threshold, deleting from Drive"
            );
            return match self.store.delete(&file.id).await {
                Ok(()) => {
                    info!("small file deleted from Google Drive");
                    ProcessingOutcome::SkippedTooSmall
                }
                Err(err) => ProcessingOutcome::FailedTransient(FileError::DeleteSmall(err)),
            };
        }

        let scratch = match self.scratch_dir() {
            Ok(dir) => dir,
            Err(err) => return ProcessingOutcome::FailedTransient(FileError::Scratch(err)),
        };
        info!(path = %scratch.path().display(), "temporary directory created");

        let outcome = self.run_in(file, scratch.path()).await;

        let scratch_path = scratch.path().to_path_buf();
        if let Err(err) = scratch.close() {
            warn!(path = %scratch_path.display(), %err, "failed to remove temporary directory");
        }
        outcome
    }

    fn scratch_dir(&self) -> std::io::Result<TempDir> {
        let mut builder = TempFileBuilder::new();
        builder.prefix(SCRATCH_PREFIX);
        match &self.settings.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }

    async fn run_in(&self, file: &CandidateFile, scratch: &Path) -> ProcessingOutcome {
        let bak_file = match self.fetch(file, scratch).await {
            Ok(path) => path,
            Err(FetchFailure::Download(err)) => return ProcessingOutcome::FailedTransient(err),
            Err(FetchFailure::Unpack(err)) => return self.abandon_or_defer(file, err).await,
        };

        self.granter.grant(&bak_file).await.log();

        let report = match self.restorer.restore(&bak_file).await {
            Ok(report) => report,
            Err(err) => return ProcessingOutcome::FailedTransient(err.into()),
        };
        info!(
            database = self.restorer.db_name(),
            manifest_entries = report.files.entries.len(),
            data = %report.data_logical,
            log = %report.log_logical,
            data_file = %report.target.data_file,
            log_file = %report.target.log_file,
            multi_user = report.multi_user_restored,
            "database restored"
        );
        if let Err(err) = self.restorer.run_correction_query(&self.correction_query).await {
            return ProcessingOutcome::FailedTransient(err.into());
        }

        match self.finalize(file).await {
            Ok(()) => {
                info!("processing completed");
                ProcessingOutcome::Processed
            }
            Err(err) => ProcessingOutcome::FailedTransient(err),
        }
    }

    async fn fetch(&self, file: &CandidateFile, scratch: &Path) -> Result<PathBuf, FetchFailure> {
        let downloaded = scratch.join(local_archive_name(&file.name));
        info!(path = %downloaded.display(), "downloading file");
        let bytes = self
            .store
            .download(&file.id, &downloaded)
            .await
            .map_err(|err| FetchFailure::Download(FileError::Download(err)))?;
        info!(bytes, "file downloaded successfully");

        let extract_dir = scratch.join(EXTRACT_SUBDIR);
        self.extractor
            .extract(&downloaded, &extract_dir, &self.archive_password)
            .await
            .map_err(|err| FetchFailure::Unpack(err.into()))?;

        let bak_file =
            find_backup_file(&extract_dir).map_err(|err| FetchFailure::Unpack(err.into()))?;
        info!(path = %bak_file.display(), "found .bak file");
        Ok(bak_file)
    }

    /// Old archives that cannot be unpacked are removed and recorded; young
    /// ones may still be uploading and are left for the next run.
    async fn abandon_or_defer(&self, file: &CandidateFile, cause: FileError) -> ProcessingOutcome {
        if !self.is_old_enough(file) {
            info!(
                max_age_secs = self.settings.max_age_for_deletion.as_secs(),
                "file is younger than the deletion age, skipping deletion"
            );
            return ProcessingOutcome::FailedTransient(cause);
        }

        warn!(%cause, "archive is unusable and old enough, removing it");
        match self.finalize(file).await {
            Ok(()) => ProcessingOutcome::FailedPermanent(cause),
            // The source is still on Drive, so the next run sees it again.
            Err(err) => {
                error!(%cause, %err, "failed to clean up unusable archive, will retry on next run");
                ProcessingOutcome::FailedTransient(err)
            }
        }
    }

    fn is_old_enough(&self, file: &CandidateFile) -> bool {
        let Some(created) = file.created_at() else {
            warn!(created_time = %file.created_time, "error parsing created time, proceeding without deletion");
            return false;
        };
        // A creation time in the future is never old enough.
        (Utc::now() - created)
            .to_std()
            .map(|age| age >= self.settings.max_age_for_deletion)
            .unwrap_or(false)
    }

    /// Deletes the source, then records it. The ledger write is best effort.
    async fn finalize(&self, file: &CandidateFile) -> Result<(), FileError> {
        // Resolved first: the fallback lookup needs the file to still exist.
        let key = self.tracker.grouping_key(file).await;

        info!("deleting file from Google Drive");
        self.store.delete(&file.id).await.map_err(FileError::Delete)?;
        info!("file deleted from Google Drive");

        match key {
            Ok(key) => {
                info!(parent = %key, "parent folder name");
                let timestamp = self.tracker.timestamp_text(file);
                if let Err(err) = self.tracker.upsert(&key, &timestamp).await {
                    warn!(%err, "failed to update spreadsheet");
                }
            }
            Err(err) => warn!(%err, "failed to get parent folder name"),
        }
        Ok(())
    }
}

fn local_archive_name(remote_name: &str) -> PathBuf {
    Path::new(remote_name)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(FALLBACK_ARCHIVE_NAME))
}
