use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ItemIdError {
    #[error("Path has no scope directory: {path}")]
    MissingScope { path: String },

    #[error("Path has no file name: {path}")]
    MissingFileName { path: String },

    #[error("Invalid scope id '{value}' in {path}")]
    InvalidScope { path: String, value: String },

    #[error("Invalid sequence id '{value}' in {path}")]
    InvalidSequence { path: String, value: String },
}

/// Identity of an archived item: the scope it was posted in and the
/// sequence (message) id that carried it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId {
    pub scope_id: u64,
    pub sequence_id: u64,
}

impl ItemId {
    pub fn new(scope_id: u64, sequence_id: u64) -> Self {
        Self {
            scope_id,
            sequence_id,
        }
    }

    /// Parse `.../<scope_id>/<sequence_id>-<suffix>.<ext>`.
    ///
    /// Both `/` and `\` are accepted as separators so ledgers written on
    /// either platform load the same way.
    pub fn from_path(path: &str) -> Result<Self, ItemIdError> {
        let mut components = path.rsplit(['/', '\\']).filter(|c| !c.is_empty());

        let file_name = components
            .next()
            .ok_or_else(|| ItemIdError::MissingFileName {
                path: path.to_string(),
            })?;
        let scope = components.next().ok_or_else(|| ItemIdError::MissingScope {
            path: path.to_string(),
        })?;

        let scope_id = scope
            .parse::<u64>()
            .map_err(|_| ItemIdError::InvalidScope {
                path: path.to_string(),
                value: scope.to_string(),
            })?;

        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name);
        let sequence = stem.split('-').next().unwrap_or(stem);
        let sequence_id = sequence
            .parse::<u64>()
            .map_err(|_| ItemIdError::InvalidSequence {
                path: path.to_string(),
                value: sequence.to_string(),
            })?;

        Ok(Self::new(scope_id, sequence_id))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope_id, self.sequence_id)
    }
}

/// Extension check used by both the reconciler and live ingress.
pub fn has_supported_extension(path: &str, supported: &[String]) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            supported.iter().any(|s| s.eq_ignore_ascii_case(&ext))
        })
        .unwrap_or(false)
}
