// restoretool/src/restore/permissions.rs
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

use crate::errors::CommandError;
use crate::utils::run_command;

/// Service identity of the database engine for a `server` or `server\instance` host.
pub fn sql_service_account(db_host: &str) -> String {
    match db_host.split_once('\\') {
        Some((_, instance)) if !instance.is_empty() => format!("NT SERVICE\\MSSQL${}", instance),
        _ => "NT SERVICE\\MSSQLSERVER".to_string(),
    }
}

#[derive(Debug)]
pub struct GrantAttempt {
    pub target: PathBuf,
    pub result: Result<(), CommandError>,
}

/// Outcome of a best-effort grant. Only ever logged.
#[derive(Debug, Default)]
pub struct GrantReport {
    pub account: String,
    pub attempts: Vec<GrantAttempt>,
}

impl GrantReport {
    pub fn log(&self) {
        for attempt in &self.attempts {
            match &attempt.result {
                Ok(()) => info!(account = %self.account, target = %attempt.target.display(), "permission granted"),
                Err(err) => warn!(
                    account = %self.account,
                    target = %attempt.target.display(),
                    %err,
                    "failed to grant permissions"
                ),
            }
        }
    }
}

#[async_trait]
pub trait PermissionGranter: Send + Sync {
    /// Lets the database engine read the backup file and its folder.
    async fn grant(&self, backup_file: &Path) -> GrantReport;
}

/// Extends ACLs with `icacls` on Windows hosts.
pub struct IcaclsGranter {
    program: PathBuf,
    account: String,
    timeout: Option<Duration>,
}

impl IcaclsGranter {
    pub fn new(db_host: &str, timeout: Option<Duration>) -> Self {
        Self {
            program: PathBuf::from("icacls"),
            account: sql_service_account(db_host),
            timeout,
        }
    }

    async fn icacls(&self, target: &Path, recursive: bool) -> Result<(), CommandError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(target)
            .arg("/grant")
            .arg(format!("{}:F", self.account));
        if recursive {
            cmd.arg("/T");
        }
        run_command(cmd, self.timeout).await.map(|_| ())
    }
}

#[async_trait]
impl PermissionGranter for IcaclsGranter {
    async fn grant(&self, backup_file: &Path) -> GrantReport {
        info!("granting permissions to SQL Server service on bak file and folder");
        let mut attempts = vec![GrantAttempt {
            target: backup_file.to_path_buf(),
            result: self.icacls(backup_file, false).await,
        }];
        if let Some(folder) = backup_file.parent() {
            attempts.push(GrantAttempt {
                target: folder.to_path_buf(),
                result: self.icacls(folder, true).await,
            });
        }
        GrantReport {
            account: self.account.clone(),
            attempts,
        }
    }
}

/// For engines that read the scratch tree without ACL changes.
pub struct NoopGranter;

#[async_trait]
impl PermissionGranter for NoopGranter {
    async fn grant(&self, _backup_file: &Path) -> GrantReport {
        GrantReport::default()
    }
}

/// `icacls` on Windows, nothing elsewhere.
pub fn platform_granter(db_host: &str, timeout: Option<Duration>) -> Arc<dyn PermissionGranter> {
    if cfg!(windows) {
        Arc::new(IcaclsGranter::new(db_host, timeout))
    } else {
        Arc::new(NoopGranter)
    }
}
