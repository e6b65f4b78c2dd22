// restoretool/src/restore/mod.rs
pub(crate) mod db_restore;
pub(crate) mod drive;
mod logic;
pub(crate) mod permissions;
mod processor;
pub(crate) mod tracker;

use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::archive::SevenZipExtractor;
use crate::config::{AppConfig, ToolPaths};
use crate::google::{ServiceAccountAuth, ServiceAccountKey, TokenSource, DRIVE_SCOPE, SHEETS_SCOPE};
use crate::model::BatchSummary;
use db_restore::{DatabaseRestorer, SqlcmdRunner};
use drive::{DiscoveryQuery, DriveClient, RemoteStore};
use processor::FileProcessor;
use tracker::{CompletionTracker, SheetsClient};

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Public entry point for the restore process: one full batch pass.
pub async fn run_restore_flow(config: &AppConfig, tools: &ToolPaths) -> Result<BatchSummary> {
    let http = Client::builder()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    let key = ServiceAccountKey::from_file(&config.service_account_file)
        .await
        .context("Failed to load service account key")?;
    let tokens: Arc<dyn TokenSource> = Arc::new(
        ServiceAccountAuth::new(http.clone(), key, &[DRIVE_SCOPE, SHEETS_SCOPE])
            .context("Failed to prepare service account credentials")?,
    );

    let store: Arc<dyn RemoteStore> = Arc::new(
        DriveClient::new(http.clone(), tokens.clone()).context("Failed to create Drive client")?,
    );
    let ledger = Arc::new(
        SheetsClient::new(http, tokens, config.spreadsheet_id.clone())
            .context("Failed to create Sheets client")?,
    );

    let runner = Arc::new(SqlcmdRunner::new(
        tools.sqlcmd.clone(),
        &config.database,
        config.command_timeout,
    ));
    let processor = FileProcessor::new(
        store.clone(),
        Arc::new(SevenZipExtractor::new(tools.seven_zip.clone(), config.command_timeout)),
        permissions::platform_granter(&config.database.host, config.command_timeout),
        DatabaseRestorer::new(runner, config.database.name.clone()),
        CompletionTracker::new(
            store.clone(),
            ledger,
            config.display_timezone,
            config.ledger_sheet.clone(),
        ),
        config.processing.clone(),
        config.archive_password.clone(),
        config.update_query.clone(),
    );

    let query = DiscoveryQuery::new(config.processing.name_marker.clone());
    let summary = logic::perform_restore_orchestration(store.as_ref(), &processor, &query).await?;
    Ok(summary)
}
