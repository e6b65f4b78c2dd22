// restoretool/src/testing.rs
//! In-memory collaborators shared by the unit tests.
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::archive::Extractor;
use crate::errors::{CommandError, ExtractError, LedgerError, StoreError};
use crate::model::CandidateFile;
use crate::restore::db_restore::DatabaseCommandRunner;
use crate::restore::drive::{DiscoveryQuery, FileMetadata, RemoteStore};
use crate::restore::permissions::{GrantReport, PermissionGranter};
use crate::restore::tracker::Ledger;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    List(String),
    Download(String),
    Delete(String),
    Metadata(String),
    Extract(PathBuf),
    Grant(PathBuf),
    Sql(String, String),
    LedgerRead(String),
    LedgerUpdate(String, String),
    LedgerAppend(Vec<String>),
}

impl Event {
    pub fn is_ledger_write(&self) -> bool {
        matches!(self, Event::LedgerUpdate(..) | Event::LedgerAppend(_))
    }
}

/// Ordered record of every side effect the fakes observed.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Event>>>);

impl Journal {
    pub fn record(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }
}

/// A Drive file named like the real uploads, created `age_minutes` ago.
pub fn candidate(id: &str, size: u64, age_minutes: i64) -> CandidateFile {
    CandidateFile {
        id: id.to_string(),
        name: format!("Susenas2025M_{}.7z", id),
        created_time: (Utc::now() - ChronoDuration::minutes(age_minutes))
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        size,
        parents: vec!["folder-1".to_string()],
    }
}

fn injected_store_error() -> StoreError {
    StoreError::Api {
        status: 500,
        body: "injected failure".to_string(),
    }
}

pub struct FakeStore {
    journal: Journal,
    files: Vec<CandidateFile>,
    metadata: HashMap<String, FileMetadata>,
    content: Vec<u8>,
    fail_list: bool,
    fail_download: bool,
    fail_delete: bool,
}

impl FakeStore {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            files: Vec::new(),
            metadata: HashMap::new(),
            content: b"7z\xbc\xaf\x27\x1c archive bytes".to_vec(),
            fail_list: false,
            fail_download: false,
            fail_delete: false,
        }
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    pub fn with_files(mut self, files: Vec<CandidateFile>) -> Self {
        self.files = files;
        self
    }

    pub fn with_metadata(mut self, id: &str, metadata: FileMetadata) -> Self {
        self.metadata.insert(id.to_string(), metadata);
        self
    }

    pub fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn failing_download(mut self) -> Self {
        self.fail_download = true;
        self
    }

    pub fn failing_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }
}

#[async_trait]
impl RemoteStore for FakeStore {
    async fn list(&self, query: &DiscoveryQuery) -> Result<Vec<CandidateFile>, StoreError> {
        self.journal.record(Event::List(query.to_drive_query()));
        if self.fail_list {
            return Err(injected_store_error());
        }
        Ok(self.files.clone())
    }

    async fn download(&self, file_id: &str, destination: &Path) -> Result<u64, StoreError> {
        self.journal.record(Event::Download(file_id.to_string()));
        if self.fail_download {
            return Err(injected_store_error());
        }
        tokio::fs::write(destination, &self.content).await?;
        Ok(self.content.len() as u64)
    }

    async fn delete(&self, file_id: &str) -> Result<(), StoreError> {
        self.journal.record(Event::Delete(file_id.to_string()));
        if self.fail_delete {
            return Err(injected_store_error());
        }
        Ok(())
    }

    async fn get_metadata(&self, file_id: &str, _fields: &str) -> Result<FileMetadata, StoreError> {
        self.journal.record(Event::Metadata(file_id.to_string()));
        self.metadata.get(file_id).cloned().ok_or_else(|| StoreError::Api {
            status: 404,
            body: format!("File not found: {}", file_id),
        })
    }
}

/// Two-column sheet held in memory. Cell ranges look like `B3` or `'Sheet'!B3`.
pub struct FakeLedger {
    journal: Journal,
    rows: Mutex<Vec<Vec<String>>>,
    fail_reads: AtomicBool,
}

impl FakeLedger {
    pub fn new(journal: &Journal, rows: Vec<Vec<String>>) -> Self {
        Self {
            journal: journal.clone(),
            rows: Mutex::new(rows),
            fail_reads: AtomicBool::new(false),
        }
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.rows.lock().unwrap().clone()
    }

    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, LedgerError> {
        self.journal.record(Event::LedgerRead(range.to_string()));
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LedgerError::Api {
                status: 503,
                body: "injected failure".to_string(),
            });
        }
        Ok(self.rows())
    }

    async fn update_cell(&self, range: &str, value: &str) -> Result<(), LedgerError> {
        self.journal
            .record(Event::LedgerUpdate(range.to_string(), value.to_string()));
        let cell = range.rsplit_once('!').map_or(range, |(_, cell)| cell);
        let row: usize = cell
            .trim_start_matches(|c: char| c.is_ascii_alphabetic())
            .parse()
            .expect("fake ledger only understands single cells");

        let mut rows = self.rows.lock().unwrap();
        if rows.len() < row {
            rows.resize(row, Vec::new());
        }
        let target = &mut rows[row - 1];
        if target.len() < 2 {
            target.resize(2, String::new());
        }
        target[1] = value.to_string();
        Ok(())
    }

    async fn append_row(&self, _range: &str, values: &[String]) -> Result<(), LedgerError> {
        self.journal.record(Event::LedgerAppend(values.to_vec()));
        self.rows.lock().unwrap().push(values.to_vec());
        Ok(())
    }
}

/// Answers sqlcmd calls from substring rules; the first matching rule wins
/// and unmatched statements succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<(String, Result<String, String>)>,
    calls: Mutex<Vec<(String, String)>>,
    journal: Option<Journal>,
}

impl ScriptedRunner {
    pub fn respond(mut self, pattern: &str, response: Result<String, String>) -> Self {
        self.rules.push((pattern.to_string(), response));
        self
    }

    pub fn fail(self, pattern: &str) -> Self {
        self.fail_with(pattern, "Msg 50000, Level 16, State 1: injected failure")
    }

    pub fn fail_with(self, pattern: &str, output: &str) -> Self {
        self.respond(pattern, Err(output.to_string()))
    }

    pub fn with_journal(mut self, journal: &Journal) -> Self {
        self.journal = Some(journal.clone());
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn answer(&self, database: &str, sql: &str) -> Result<String, CommandError> {
        self.calls
            .lock()
            .unwrap()
            .push((database.to_string(), sql.to_string()));
        if let Some(journal) = &self.journal {
            journal.record(Event::Sql(database.to_string(), sql.to_string()));
        }

        let rule = self.rules.iter().find(|(pattern, _)| sql.contains(pattern.as_str()));
        match rule {
            Some((_, Ok(stdout))) => Ok(stdout.clone()),
            Some((_, Err(output))) => Err(CommandError::Failed {
                program: "sqlcmd".to_string(),
                status: "exit status: 1".to_string(),
                output: output.clone(),
            }),
            None => Ok(String::new()),
        }
    }
}

#[async_trait]
impl DatabaseCommandRunner for ScriptedRunner {
    async fn query(&self, database: &str, sql: &str) -> Result<String, CommandError> {
        self.answer(database, sql)
    }

    async fn execute(&self, database: &str, sql: &str) -> Result<String, CommandError> {
        self.answer(database, sql)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ExtractBehavior {
    /// Unpacks a nested `DataLog.bak`.
    WriteBak,
    /// Succeeds but leaves the destination empty.
    WriteNothing,
    /// Fails the way 7-Zip does on a wrong password.
    Fail,
}

pub struct FakeExtractor {
    journal: Journal,
    behavior: ExtractBehavior,
}

impl FakeExtractor {
    pub fn new(journal: &Journal, behavior: ExtractBehavior) -> Self {
        Self {
            journal: journal.clone(),
            behavior,
        }
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(&self, archive_path: &Path, dest_dir: &Path, _password: &str) -> Result<(), ExtractError> {
        self.journal.record(Event::Extract(archive_path.to_path_buf()));
        let prepare = |source| ExtractError::Prepare {
            path: dest_dir.to_path_buf(),
            source,
        };
        match self.behavior {
            ExtractBehavior::WriteBak => {
                let nested = dest_dir.join("export");
                tokio::fs::create_dir_all(&nested).await.map_err(prepare)?;
                tokio::fs::write(nested.join("DataLog.bak"), b"TAPE")
                    .await
                    .map_err(prepare)?;
                Ok(())
            }
            ExtractBehavior::WriteNothing => {
                tokio::fs::create_dir_all(dest_dir).await.map_err(prepare)?;
                Ok(())
            }
            ExtractBehavior::Fail => Err(ExtractError::Command(CommandError::Failed {
                program: "7z".to_string(),
                status: "exit status: 2".to_string(),
                output: "ERROR: Wrong password".to_string(),
            })),
        }
    }
}

pub struct RecordingGranter {
    journal: Journal,
}

impl RecordingGranter {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
        }
    }
}

#[async_trait]
impl PermissionGranter for RecordingGranter {
    async fn grant(&self, backup_file: &Path) -> GrantReport {
        self.journal.record(Event::Grant(backup_file.to_path_buf()));
        GrantReport::default()
    }
}
