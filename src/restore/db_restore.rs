// restoretool/src/restore/db_restore.rs
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::{DatabaseConfig, DbAuth};
use crate::errors::{CommandError, RestoreError};
use crate::utils::run_command;

/// Database that administrative statements run against.
pub const ADMIN_DATABASE: &str = "master";

/// Runs statements against the database engine.
#[async_trait]
pub trait DatabaseCommandRunner: Send + Sync {
    /// Machine-parsed query: no headers, no row counts, `|` between columns.
    /// SQL errors fail the call.
    async fn query(&self, database: &str, sql: &str) -> Result<String, CommandError>;

    /// Statement whose output is only shown to the operator. SQL errors fail the call.
    async fn execute(&self, database: &str, sql: &str) -> Result<String, CommandError>;
}

/// `sqlcmd` against a named host or `host\instance`.
pub struct SqlcmdRunner {
    program: PathBuf,
    host: String,
    auth: DbAuth,
    timeout: Option<Duration>,
}

impl SqlcmdRunner {
    pub fn new(program: PathBuf, database: &DatabaseConfig, timeout: Option<Duration>) -> Self {
        Self {
            program,
            host: database.host.clone(),
            auth: database.auth.clone(),
            timeout,
        }
    }

    fn command(&self, database: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-S").arg(&self.host).arg("-d").arg(database);
        match &self.auth {
            DbAuth::Trusted => {
                cmd.arg("-E");
            }
            DbAuth::SqlLogin { user, password } => {
                // Passing the password through the environment keeps it out of the process list.
                cmd.arg("-U").arg(user).env("SQLCMDPASSWORD", password);
            }
        }
        cmd
    }
}

#[async_trait]
impl DatabaseCommandRunner for SqlcmdRunner {
    async fn query(&self, database: &str, sql: &str) -> Result<String, CommandError> {
        let mut cmd = self.command(database);
        cmd.args(["-b", "-h", "-1", "-W", "-s", "|", "-Q"])
            .arg(format!("SET NOCOUNT ON; {}", sql));
        Ok(run_command(cmd, self.timeout).await?.stdout)
    }

    async fn execute(&self, database: &str, sql: &str) -> Result<String, CommandError> {
        let mut cmd = self.command(database);
        cmd.arg("-b").arg("-Q").arg(sql);
        Ok(run_command(cmd, self.timeout).await?.combined())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Data,
    Log,
}

impl FileKind {
    /// Type codes starting with `L` are log files; everything else is treated as data.
    pub fn from_type_code(code: &str) -> Self {
        if code.trim().to_ascii_uppercase().starts_with('L') {
            FileKind::Log
        } else {
            FileKind::Data
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub logical_name: String,
    pub kind: FileKind,
}

/// Logical files listed inside a backup, in manifest order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupFileSet {
    pub entries: Vec<ManifestEntry>,
}

impl BackupFileSet {
    /// Parses `RESTORE FILELISTONLY` output: one `|`-delimited row per file,
    /// logical name first, type code third. Blank and short rows are skipped.
    pub fn parse(output: &str) -> Self {
        let mut entries = Vec::new();
        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let cols: Vec<&str> = line.split('|').map(str::trim).collect();
            if cols.len() < 3 {
                continue;
            }
            let type_code = cols[2].to_ascii_uppercase();
            if !type_code.starts_with('L') && !type_code.starts_with('D') {
                warn!(
                    logical_name = cols[0],
                    type_code = %type_code,
                    "non data/log file in backup manifest, treating as data"
                );
            }
            entries.push(ManifestEntry {
                logical_name: cols[0].to_string(),
                kind: FileKind::from_type_code(&type_code),
            });
        }
        Self { entries }
    }

    fn last_of(&self, kind: FileKind) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.kind == kind)
            .map(|e| e.logical_name.as_str())
    }

    /// The data logical name; a later data row overrides an earlier one.
    pub fn data_name(&self) -> Option<&str> {
        self.last_of(FileKind::Data)
    }

    pub fn log_name(&self) -> Option<&str> {
        self.last_of(FileKind::Log)
    }
}

/// Where the restored files land on the engine host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreTarget {
    pub data_path: String,
    pub data_file: String,
    pub log_file: String,
}

impl RestoreTarget {
    /// Uses the engine's reported default data directory, or the backup's own
    /// directory when the engine reports nothing or `NULL`.
    pub fn resolve(reported_data_path: Option<&str>, backup_file: &Path, db_name: &str) -> Self {
        let reported = reported_data_path.map(str::trim).unwrap_or_default();
        let data_path = if reported.is_empty() || reported.eq_ignore_ascii_case("NULL") {
            let fallback = backup_file
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .display()
                .to_string();
            info!(data_path = %fallback, "data path empty or NULL, falling back to bak directory");
            fallback
        } else {
            info!(data_path = reported, "data path");
            reported.to_string()
        };

        Self {
            data_file: join_engine_path(&data_path, &format!("{}.mdf", db_name)),
            log_file: join_engine_path(&data_path, &format!("{}_log.ldf", db_name)),
            data_path,
        }
    }
}

// The engine may run on a different OS than this tool, so keep the directory's own separator.
fn join_engine_path(dir: &str, file: &str) -> String {
    if dir.ends_with('\\') || dir.ends_with('/') {
        return format!("{}{}", dir, file);
    }
    let separator = if dir.contains('\\') { '\\' } else { '/' };
    format!("{}{}{}", dir, separator, file)
}

pub fn quote_identifier(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

pub fn quote_literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub files: BackupFileSet,
    pub target: RestoreTarget,
    pub data_logical: String,
    pub log_logical: String,
    pub multi_user_restored: bool,
}

/// Restores one `.bak` file over the configured database.
pub struct DatabaseRestorer {
    runner: Arc<dyn DatabaseCommandRunner>,
    db_name: String,
}

impl DatabaseRestorer {
    pub fn new(runner: Arc<dyn DatabaseCommandRunner>, db_name: impl Into<String>) -> Self {
        Self {
            runner,
            db_name: db_name.into(),
        }
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Full restore with relocation, bracketed by single-user / multi-user mode.
    pub async fn restore(&self, backup_file: &Path) -> Result<RestoreReport, RestoreError> {
        let bak = backup_file.display().to_string();
        let db = quote_identifier(&self.db_name);

        let manifest = self
            .runner
            .query(
                ADMIN_DATABASE,
                &format!("RESTORE FILELISTONLY FROM DISK = {}", quote_literal(&bak)),
            )
            .await
            .map_err(RestoreError::Manifest)?;
        let files = BackupFileSet::parse(&manifest);
        info!(entries = files.entries.len(), "backup manifest read");

        let reported = match self
            .runner
            .query(ADMIN_DATABASE, "SELECT SERVERPROPERTY('InstanceDefaultDataPath')")
            .await
        {
            Ok(out) => Some(out),
            Err(err) => {
                warn!(%err, "failed to get instance data path");
                None
            }
        };
        let target = RestoreTarget::resolve(reported.as_deref(), backup_file, &self.db_name);

        let data_logical = files
            .data_name()
            .map(str::to_string)
            .unwrap_or_else(|| self.db_name.clone());
        let log_logical = files
            .log_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}_log", self.db_name));

        info!("setting database to single user mode");
        let output = self
            .runner
            .execute(
                ADMIN_DATABASE,
                &format!(
                    "IF DB_ID({}) IS NOT NULL ALTER DATABASE {} SET SINGLE_USER WITH ROLLBACK IMMEDIATE;",
                    quote_literal(&self.db_name),
                    db
                ),
            )
            .await
            .map_err(RestoreError::SingleUser)?;
        info!(output = %output.trim(), "database set to single user mode");

        let restore_sql = format!(
            "RESTORE DATABASE {} FROM DISK = {} WITH REPLACE, MOVE {} TO {}, MOVE {} TO {}",
            db,
            quote_literal(&bak),
            quote_literal(&data_logical),
            quote_literal(&target.data_file),
            quote_literal(&log_logical),
            quote_literal(&target.log_file),
        );
        let restored = self.runner.execute(ADMIN_DATABASE, &restore_sql).await;

        // Runs even after a failed restore so the database is not left locked to one session.
        let multi_user_restored = self.set_multi_user().await;

        let output = restored.map_err(RestoreError::Restore)?;
        info!(output = %output.trim(), "database restore completed");

        Ok(RestoreReport {
            files,
            target,
            data_logical,
            log_logical,
            multi_user_restored,
        })
    }

    async fn set_multi_user(&self) -> bool {
        info!("setting database back to multi user mode");
        let sql = format!(
            "IF DB_ID({}) IS NOT NULL ALTER DATABASE {} SET MULTI_USER;",
            quote_literal(&self.db_name),
            quote_identifier(&self.db_name)
        );
        match self.runner.execute(ADMIN_DATABASE, &sql).await {
            Ok(_) => {
                info!("database set back to multi user mode");
                true
            }
            Err(err) => {
                warn!(%err, "failed to set database back to multi user");
                false
            }
        }
    }

    /// Runs the post-restore correction statement inside the restored database.
    pub async fn run_correction_query(&self, sql: &str) -> Result<(), RestoreError> {
        let output = self
            .runner
            .execute(&self.db_name, sql)
            .await
            .map_err(RestoreError::CorrectionQuery)?;
        info!(output = %output.trim(), "correction query completed");
        Ok(())
    }
}
