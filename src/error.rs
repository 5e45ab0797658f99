use std::path::PathBuf;

use polars::prelude::PolarsError;
use thiserror::Error;

/// Structural failures that abort a consolidation run.
///
/// Row-level defects (unparseable dates, blank keys, bad numbers) are never
/// represented here; the caster absorbs them and only reports counts.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("missing required column(s): {}", columns.join(", "))]
    MissingColumn { columns: Vec<String> },

    #[error("row {row} cannot be decoded: {message}")]
    CorruptRow { row: usize, message: String },

    #[error("no input file found in {}", dir.display())]
    NoInputFound { dir: PathBuf },

    #[error("transport error fetching {url}: {message}")]
    Transport { url: String, message: String },

    #[error("storage write failed for {}: {message}", path.display())]
    StorageWrite { path: PathBuf, message: String },

    #[error("storage read failed for {}: {message}", path.display())]
    StorageRead { path: PathBuf, message: String },

    #[error("master {} is locked by another run", path.display())]
    MasterLocked { path: PathBuf },

    #[error("unsupported table format: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Table(#[from] PolarsError),
}

impl LedgerError {
    pub fn storage_write(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        LedgerError::StorageWrite {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn storage_read(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        LedgerError::StorageRead {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_column_lists_every_name() {
        let err = LedgerError::MissingColumn {
            columns: vec!["price".to_string(), "sold_units".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "missing required column(s): price, sold_units"
        );
    }

    #[test]
    fn test_storage_errors_carry_path() {
        let err = LedgerError::storage_write("/tmp/master.csv", "disk full");
        assert!(err.to_string().contains("/tmp/master.csv"));
        assert!(err.to_string().contains("disk full"));
    }
}
