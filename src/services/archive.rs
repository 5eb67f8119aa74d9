use crate::core::ItemId;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Invalid path: {path}")]
    InvalidPath { path: String },
}

/// Read access to the files persisted by the archiver.
///
/// Item paths are relative to the archive root and use `/` separators.
pub trait Archive: Send + Sync {
    fn list_items(&self) -> Result<Vec<String>, ArchiveError>;

    /// `Ok(None)` when the file has been removed since it was listed.
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, ArchiveError>;
}

/// Archive laid out on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsArchive {
    root: PathBuf,
}

impl FsArchive {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, ArchiveError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(ArchiveError::InvalidPath {
                path: path.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    fn relative_key(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    /// True if any archived file belongs to `id`.
    ///
    /// Only the `<container>/<scope>/` directories are listed, never the whole tree.
    pub fn holds(&self, id: ItemId) -> Result<bool, ArchiveError> {
        let containers = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let scope_dir = id.scope_id.to_string();
        let prefix = format!("{}-", id.sequence_id);
        for container in containers {
            let container = container?;
            if !container.file_type()?.is_dir() {
                continue;
            }
            let files = match fs::read_dir(container.path().join(&scope_dir)) {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for file in files {
                let file = file?;
                let name = file.file_name();
                let held = name.to_str().is_some_and(|name| name.starts_with(&prefix));
                if held && file.file_type()?.is_file() {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

impl Archive for FsArchive {
    fn list_items(&self) -> Result<Vec<String>, ArchiveError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut items = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(key) = self.relative_key(entry.path()) {
                items.push(key);
            }
        }
        Ok(items)
    }

    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        let full_path = self.resolve(path)?;
        match fs::read(&full_path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
