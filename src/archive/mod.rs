// restoretool/src/archive/mod.rs
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::errors::{ExtractError, LocateError};
use crate::utils::run_command;

pub const BACKUP_FILE_SUFFIX: &str = ".bak";

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Unpacks a password-protected archive into `dest_dir`.
    ///
    /// On failure the contents of `dest_dir` are unspecified.
    async fn extract(&self, archive_path: &Path, dest_dir: &Path, password: &str) -> Result<(), ExtractError>;
}

/// Shells out to the 7-Zip command line tool.
pub struct SevenZipExtractor {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl SevenZipExtractor {
    pub fn new(program: PathBuf, timeout: Option<Duration>) -> Self {
        Self { program, timeout }
    }
}

#[async_trait]
impl Extractor for SevenZipExtractor {
    async fn extract(&self, archive_path: &Path, dest_dir: &Path, password: &str) -> Result<(), ExtractError> {
        if !dest_dir.exists() {
            tokio::fs::create_dir_all(dest_dir)
                .await
                .map_err(|source| ExtractError::Prepare {
                    path: dest_dir.to_path_buf(),
                    source,
                })?;
        }

        info!(
            archive = %archive_path.display(),
            dest = %dest_dir.display(),
            "extracting 7z archive"
        );

        let mut output_flag = std::ffi::OsString::from("-o");
        output_flag.push(dest_dir);

        // -y answers every prompt so a wrong password fails instead of blocking on stdin.
        let mut cmd = Command::new(&self.program);
        cmd.arg("x")
            .arg(format!("-p{}", password))
            .arg(archive_path)
            .arg(output_flag)
            .arg("-y");
        run_command(cmd, self.timeout).await?;

        info!("7z extraction completed");
        Ok(())
    }
}

/// Finds the backup data file anywhere under `root_dir`.
///
/// Entries are visited in file-name order within each directory. If several
/// `.bak` files exist, the last one visited is returned and the others are
/// reported in a warning.
pub fn find_backup_file(root_dir: &Path) -> Result<PathBuf, LocateError> {
    let mut matches = Vec::new();
    for entry in WalkDir::new(root_dir).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry
                .file_name()
                .to_string_lossy()
                .ends_with(BACKUP_FILE_SUFFIX)
        {
            matches.push(entry.into_path());
        }
    }

    let chosen = matches
        .pop()
        .ok_or_else(|| LocateError::NotFound(root_dir.to_path_buf()))?;
    if !matches.is_empty() {
        warn!(
            chosen = %chosen.display(),
            ignored = ?matches,
            "multiple .bak files in archive, using the last in name order"
        );
    }
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn finds_nested_backup_file() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("export").join("2025-03");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("DataLog.bak"), b"backup").unwrap();
        fs::write(dir.path().join("readme.txt"), b"notes").unwrap();

        let found = find_backup_file(dir.path()).unwrap();
        assert_eq!(found, nested.join("DataLog.bak"));
    }

    #[test]
    fn empty_tree_is_not_found() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("DataLog.bak.txt"), b"nope").unwrap();
        assert!(matches!(
            find_backup_file(dir.path()),
            Err(LocateError::NotFound(_))
        ));
    }

    #[test]
    fn multiple_matches_pick_last_in_name_order() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a_first.bak"), b"1").unwrap();
        fs::write(dir.path().join("z_last.bak"), b"2").unwrap();
        fs::write(dir.path().join("m_middle.bak"), b"3").unwrap();

        let found = find_backup_file(dir.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "z_last.bak");
    }

    #[test]
    fn directory_named_like_backup_is_ignored() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("old.bak")).unwrap();
        assert!(find_backup_file(dir.path()).is_err());
    }

    #[test]
    fn missing_root_is_a_walk_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("extracted");
        assert!(matches!(find_backup_file(&missing), Err(LocateError::Walk(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_tool_fails_extraction() {
        let dir = tempdir().unwrap();
        let extractor = SevenZipExtractor::new(PathBuf::from("/nonexistent/7z"), None);
        let err = extractor
            .extract(&dir.path().join("a.7z"), &dir.path().join("out"), "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Command(_)));
        assert!(dir.path().join("out").is_dir());
    }
}
