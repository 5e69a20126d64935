// Per-call scratch directory for intermediate backup files

use crate::{BackupError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// Owns the local temporary files of one backup or restore call
#[derive(Debug)]
pub struct Scratch {
    dir: PathBuf,
    files: Vec<PathBuf>,
}

impl Scratch {
    /// Create `{root}/{uuid}`; concurrent calls never share a directory.
    ///
    /// On unix the directory is owner-only (0700) since it holds plaintext SQL.
    pub async fn create(root: &Path) -> Result<Self> {
        let dir = root.join(Uuid::new_v4().to_string());
        let create_failed =
            |e: std::io::Error| BackupError::Io(format!("Failed to create scratch directory {}: {}", dir.display(), e));

        fs::create_dir_all(root).await.map_err(create_failed)?;
        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        builder.mode(0o700);
        builder.create(&dir).await.map_err(create_failed)?;
        Ok(Self {
            dir,
            files: Vec::new(),
        })
    }

    /// The scratch directory
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Write a file into the scratch directory and track it for cleanup
    pub async fn write(&mut self, name: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.dir.join(name);
        // Tracked before writing so a partial file is still removed
        self.files.push(path.clone());
        fs::write(&path, data)
            .await
            .map_err(|e| BackupError::Io(format!("Failed to write {}: {}", path.display(), e)))?;
        Ok(path)
    }

    /// Remove every tracked file and the directory itself.
    ///
    /// Attempts every removal even after a failure; the first failure is
    /// returned as `Cleanup`.
    pub async fn cleanup(self) -> Result<()> {
        let mut first_error: Option<String> = None;

        for file in &self.files {
            match fs::remove_file(file).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    first_error.get_or_insert_with(|| format!("{}: {}", file.display(), e));
                }
            }
        }

        match fs::remove_dir(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                first_error.get_or_insert_with(|| format!("{}: {}", self.dir.display(), e));
            }
        }

        match first_error {
            Some(message) => Err(BackupError::Cleanup(message)),
            None => Ok(()),
        }
    }
}
