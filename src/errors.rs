use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Failed to load env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenv::Error,
    },

    #[error("{tool} not found in PATH: {source}")]
    ToolNotFound {
        tool: &'static str,
        #[source]
        source: which::Error,
    },
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Failed to read service account file {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid service account key: {0}")]
    KeyFormat(#[from] serde_json::Error),

    #[error("Failed to sign token assertion: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),

    #[error("Token request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Failures talking to the remote file store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Drive API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid Drive URL: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}\n{output}")]
    Failed {
        program: String,
        status: String,
        output: String,
    },

    #[error("{program} did not finish within {}s and was killed", .after.as_secs())]
    TimedOut { program: String, after: Duration },
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to prepare extraction directory {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive extraction failed: {0}")]
    Command(#[from] CommandError),
}

#[derive(Error, Debug)]
pub enum LocateError {
    #[error("No .bak file found under {0}")]
    NotFound(PathBuf),

    #[error("Failed to walk extracted tree: {0}")]
    Walk(#[from] walkdir::Error),
}

/// One variant per restore step; the variant says which step failed.
#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("RESTORE FILELISTONLY failed: {0}")]
    Manifest(#[source] CommandError),

    #[error("Failed to set database to single user: {0}")]
    SingleUser(#[source] CommandError),

    #[error("Restore failed: {0}")]
    Restore(#[source] CommandError),

    #[error("Correction query failed: {0}")]
    CorrectionQuery(#[source] CommandError),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Failed to resolve parent folder: {0}")]
    ParentLookup(#[source] StoreError),

    #[error("File {0} has no parent folder to key the ledger row")]
    NoGroupingKey(String),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sheets API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid Sheets URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Why a single candidate file could not be processed.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("Failed to delete small file: {0}")]
    DeleteSmall(#[source] StoreError),

    #[error("Failed to create temp dir: {0}")]
    Scratch(#[source] std::io::Error),

    #[error("Failed to download file: {0}")]
    Download(#[source] StoreError),

    #[error("Failed to extract 7z: {0}")]
    Extract(#[from] ExtractError),

    #[error("Failed to find .bak file: {0}")]
    Locate(#[from] LocateError),

    #[error(transparent)]
    Restore(#[from] RestoreError),

    #[error("Failed to delete Drive file: {0}")]
    Delete(#[source] StoreError),
}

/// Process-level failures; everything else is contained per file.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unable to list candidate files: {0}")]
    Discovery(#[source] StoreError),
}
