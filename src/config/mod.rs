// restoretool/src/config/mod.rs
use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::errors::ConfigError;
use crate::utils::{find_executable, redact};

pub const DEFAULT_NAME_MARKER: &str = "Susenas2025M";
pub const DEFAULT_MIN_FILE_SIZE_BYTES: u64 = 10 * 1024;
pub const DEFAULT_MAX_AGE_FOR_DELETION_SECS: u64 = 10 * 60;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 3 * 60 * 60;

const LEDGER_TIMESTAMP_FORMAT: &str = "%-m/%-d/%Y %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbAuth {
    /// Integrated (Windows) authentication, selected when user and password are both empty.
    Trusted,
    SqlLogin { user: String, password: String },
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `server` or `server\instance`.
    pub host: String,
    pub name: String,
    pub auth: DbAuth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayTimezone {
    Local,
    Named(Tz),
}

impl DisplayTimezone {
    /// Unset, `Local`, or an unknown zone name all resolve to the local timezone.
    pub fn resolve(raw: Option<&str>) -> Self {
        let Some(name) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return DisplayTimezone::Local;
        };
        if name.eq_ignore_ascii_case("local") {
            return DisplayTimezone::Local;
        }
        match name.parse::<Tz>() {
            Ok(tz) => DisplayTimezone::Named(tz),
            Err(err) => {
                warn!(timezone = name, %err, "unable to load timezone, using Local");
                DisplayTimezone::Local
            }
        }
    }

    /// Formats as `month/day/year hour:minute:second`, e.g. `3/1/2025 17:00:00`.
    pub fn format(&self, at: DateTime<Utc>) -> String {
        match self {
            DisplayTimezone::Local => at
                .with_timezone(&Local)
                .format(LEDGER_TIMESTAMP_FORMAT)
                .to_string(),
            DisplayTimezone::Named(tz) => at
                .with_timezone(tz)
                .format(LEDGER_TIMESTAMP_FORMAT)
                .to_string(),
        }
    }
}

/// Thresholds and locations the per-file state machine works with.
#[derive(Debug, Clone)]
pub struct ProcessingSettings {
    pub name_marker: String,
    pub min_file_size: u64,
    pub max_age_for_deletion: Duration,
    /// Parent for per-file scratch directories; system temp when `None`.
    pub scratch_root: Option<PathBuf>,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            name_marker: DEFAULT_NAME_MARKER.to_string(),
            min_file_size: DEFAULT_MIN_FILE_SIZE_BYTES,
            max_age_for_deletion: Duration::from_secs(DEFAULT_MAX_AGE_FOR_DELETION_SECS),
            scratch_root: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub archive_password: String,
    pub update_query: String,
    pub service_account_file: PathBuf,
    pub spreadsheet_id: String,
    pub ledger_sheet: Option<String>,
    pub display_timezone: DisplayTimezone,
    pub command_timeout: Option<Duration>,
    pub processing: ProcessingSettings,
}

/// Resolved paths of the external tools the pipeline shells out to.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub seven_zip: PathBuf,
    pub sqlcmd: PathBuf,
}

impl AppConfig {
    /// Loads the env file (if any) into the process environment, then reads the configuration.
    ///
    /// An explicitly given `env_file` must load; the implicit `.env` is optional.
    pub fn from_env(env_file: Option<&Path>) -> Result<Self, ConfigError> {
        match env_file {
            Some(path) => {
                dotenv::from_path(path).map_err(|source| ConfigError::EnvFile {
                    path: path.to_path_buf(),
                    source,
                })?;
                info!(path = %path.display(), "env file loaded");
            }
            None => match dotenv::dotenv() {
                Ok(path) => info!(path = %path.display(), "env file loaded"),
                Err(_) => info!("no .env file found, using process environment"),
            },
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| optional(key).ok_or(ConfigError::Missing(key));

        let user = lookup("DB_USER").unwrap_or_default();
        let password = lookup("DB_PASS").unwrap_or_default();
        let auth = if user.is_empty() && password.is_empty() {
            DbAuth::Trusted
        } else {
            DbAuth::SqlLogin { user, password }
        };

        let database = DatabaseConfig {
            host: required("DB_HOST")?,
            name: required("DB_NAME")?,
            auth,
        };
        let archive_password = required("SEVENZ_PASSWORD")?;
        let update_query = required("UPDATE_QUERY")?;
        let service_account_file = PathBuf::from(required("SERVICE_ACCOUNT_FILE")?);
        let spreadsheet_id = required("SPREADSHEET_ID")?;

        let min_file_size = parse_u64(
            "MIN_FILE_SIZE_BYTES",
            optional("MIN_FILE_SIZE_BYTES"),
            DEFAULT_MIN_FILE_SIZE_BYTES,
        )?;
        let max_age_secs = parse_u64(
            "MAX_AGE_FOR_DELETION_SECS",
            optional("MAX_AGE_FOR_DELETION_SECS"),
            DEFAULT_MAX_AGE_FOR_DELETION_SECS,
        )?;
        let timeout_secs = parse_u64(
            "COMMAND_TIMEOUT_SECS",
            optional("COMMAND_TIMEOUT_SECS"),
            DEFAULT_COMMAND_TIMEOUT_SECS,
        )?;

        Ok(AppConfig {
            database,
            archive_password,
            update_query,
            service_account_file,
            spreadsheet_id,
            ledger_sheet: optional("LEDGER_SHEET"),
            display_timezone: DisplayTimezone::resolve(optional("SPREADSHEET_TIMEZONE").as_deref()),
            command_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            processing: ProcessingSettings {
                name_marker: optional("DRIVE_NAME_MARKER")
                    .unwrap_or_else(|| DEFAULT_NAME_MARKER.to_string()),
                min_file_size,
                max_age_for_deletion: Duration::from_secs(max_age_secs),
                scratch_root: optional("SCRATCH_DIR").map(PathBuf::from),
            },
        })
    }

    /// Checks everything outside the process the run depends on, before any file is touched.
    pub fn check_prerequisites(&self) -> Result<ToolPaths, ConfigError> {
        if !self.service_account_file.is_file() {
            return Err(ConfigError::Invalid {
                key: "SERVICE_ACCOUNT_FILE",
                reason: format!("{} is not a readable file", self.service_account_file.display()),
            });
        }
        if let Some(root) = &self.processing.scratch_root {
            if !root.is_dir() {
                return Err(ConfigError::Invalid {
                    key: "SCRATCH_DIR",
                    reason: format!("{} is not a directory", root.display()),
                });
            }
        }
        Ok(ToolPaths {
            seven_zip: find_executable("7z")?,
            sqlcmd: find_executable("sqlcmd")?,
        })
    }

    pub fn log_summary(&self) {
        let (user, password) = match &self.database.auth {
            DbAuth::Trusted => ("<integrated>".to_string(), String::new()),
            DbAuth::SqlLogin { user, password } => (user.clone(), redact(password)),
        };
        info!(
            db_host = %self.database.host,
            db_user = %user,
            db_pass = %password,
            db_name = %self.database.name,
            sevenz_password = %redact(&self.archive_password),
            service_account_file = %self.service_account_file.display(),
            spreadsheet_id = %self.spreadsheet_id,
            name_marker = %self.processing.name_marker,
            min_file_size = self.processing.min_file_size,
            max_age_secs = self.processing.max_age_for_deletion.as_secs(),
            "configuration loaded"
        );
    }
}

fn parse_u64(key: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e| ConfigError::Invalid {
            key,
            reason: format!("{value:?}: {e}"),
        }),
    }
}
