use polars::io::{SerReader, SerWriter};
use polars::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};

/// Tabular file formats, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Parquet,
    Json,
}

impl TableFormat {
    pub fn from_path(path: &Path) -> LedgerResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        match ext.as_deref() {
            Some("csv") => Ok(TableFormat::Csv),
            Some("parquet") => Ok(TableFormat::Parquet),
            Some("json") => Ok(TableFormat::Json),
            _ => Err(LedgerError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            TableFormat::Csv => "csv",
            TableFormat::Parquet => "parquet",
            TableFormat::Json => "json",
        }
    }
}

/// Reads a table. CSV cells are all read as text; typing is the caster's job.
pub fn read_table(path: &Path) -> LedgerResult<DataFrame> {
    let format = TableFormat::from_path(path)?;
    debug!("Reading {:?} table: {}", format, path.display());

    let df = match format {
        TableFormat::Csv => CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .and_then(|reader| reader.finish())
            .map_err(|e| LedgerError::storage_read(path, e))?,
        TableFormat::Parquet => {
            let file = File::open(path).map_err(|e| LedgerError::storage_read(path, e))?;
            ParquetReader::new(file)
                .finish()
                .map_err(|e| LedgerError::storage_read(path, e))?
        }
        TableFormat::Json => {
            let file = File::open(path).map_err(|e| LedgerError::storage_read(path, e))?;
            JsonReader::new(file)
                .finish()
                .map_err(|e| LedgerError::storage_read(path, e))?
        }
    };
    Ok(df)
}

/// Writes `df` to `path` through a temporary sibling and a rename, so a
/// reader sees either the previous file or the complete new one.
pub fn write_table_atomic(df: &mut DataFrame, path: &Path) -> LedgerResult<()> {
    let format = TableFormat::from_path(path)?;
    let temp_path = temp_sibling(path)?;

    let result = write_table(df, &temp_path, format).and_then(|()| {
        fs::rename(&temp_path, path).map_err(|e| LedgerError::storage_write(path, e))
    });
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Copies `src` to `dest` through a temporary sibling of `dest`, so `dest`
/// only ever holds a complete copy.
pub fn copy_file_atomic(src: &Path, dest: &Path) -> LedgerResult<()> {
    let temp_path = temp_sibling(dest)?;

    let result = fs::copy(src, &temp_path)
        .and_then(|_| File::open(&temp_path)?.sync_all())
        .map_err(|e| LedgerError::storage_write(dest, e))
        .and_then(|()| {
            fs::rename(&temp_path, dest).map_err(|e| LedgerError::storage_write(dest, e))
        });
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Hidden, uniquely named path beside `path`; creates the parent directory.
fn temp_sibling(path: &Path) -> LedgerResult<PathBuf> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&parent).map_err(|e| LedgerError::storage_write(&parent, e))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("table");
    Ok(parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4())))
}

fn write_table(df: &mut DataFrame, path: &Path, format: TableFormat) -> LedgerResult<()> {
    let mut file = File::create(path).map_err(|e| LedgerError::storage_write(path, e))?;

    let written = match format {
        TableFormat::Csv => CsvWriter::new(&mut file).include_header(true).finish(df),
        TableFormat::Parquet => ParquetWriter::new(&mut file).finish(df).map(|_| ()),
        TableFormat::Json => JsonWriter::new(&mut file)
            .with_json_format(JsonFormat::Json)
            .finish(df),
    };
    written.map_err(|e| LedgerError::storage_write(path, e))?;

    file.sync_all()
        .map_err(|e| LedgerError::storage_write(path, e))?;
    Ok(())
}
