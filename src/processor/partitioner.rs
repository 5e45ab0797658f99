use polars::prelude::*;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

use crate::error::LedgerResult;
use crate::models::{PRODUCT, UNKNOWN_PRODUCT, text_cells};
use crate::processor::record_caster::normalize_product;
use crate::storage::{TableFormat, write_table_atomic};

const MAX_NAME_LEN: usize = 80;

/// One product's slice of the master.
#[derive(Debug, Clone)]
pub struct ProductPartition {
    pub product: String,
    pub file_name: String,
    pub frame: DataFrame,
}

/// Splits a master table into one file per product.
pub struct Partitioner {
    format: TableFormat,
}

impl Partitioner {
    pub fn new(format: TableFormat) -> Self {
        Self { format }
    }

    /// Groups rows by normalized product, blanks going to `UNKNOWN`.
    /// Rows keep their order within each partition.
    pub fn split(&self, df: &DataFrame) -> LedgerResult<Vec<ProductPartition>> {
        let products: Vec<String> = text_cells(df, PRODUCT)?
            .into_iter()
            .map(|p| normalize_product(p.as_deref()).unwrap_or_else(|| UNKNOWN_PRODUCT.to_string()))
            .collect();

        let mut groups: BTreeMap<String, Vec<IdxSize>> = BTreeMap::new();
        for (row, product) in products.iter().enumerate() {
            groups.entry(product.clone()).or_default().push(row as IdxSize);
        }

        let mut normalized = df.clone();
        normalized.with_column(Series::new(PRODUCT.into(), products))?;

        let mut partitions = Vec::with_capacity(groups.len());
        for (product, rows) in groups {
            let idx = IdxCa::from_vec("idx".into(), rows);
            partitions.push(ProductPartition {
                file_name: format!(
                    "product_{}.{}",
                    sanitize_filename(&product),
                    self.format.extension()
                ),
                frame: normalized.take(&idx)?,
                product,
            });
        }
        Ok(partitions)
    }

    /// Writes every partition into `out_dir`, returning the written paths.
    pub fn write_all(&self, df: &DataFrame, out_dir: &Path) -> LedgerResult<Vec<PathBuf>> {
        let partitions = self.split(df)?;
        info!(
            "Products found: {:?}",
            partitions.iter().map(|p| p.product.as_str()).collect::<Vec<_>>()
        );

        let mut written = Vec::with_capacity(partitions.len());
        for mut partition in partitions {
            let path = out_dir.join(&partition.file_name);
            write_table_atomic(&mut partition.frame, &path)?;
            info!("Saved {} rows in {}", partition.frame.height(), path.display());
            written.push(path);
        }
        Ok(written)
    }
}

/// File-system safe rendition of `text`, never empty, at most 80 chars.
pub fn sanitize_filename(text: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let unsafe_chars =
        UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]").expect("static pattern is valid"));

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return UNKNOWN_PRODUCT.to_string();
    }
    unsafe_chars
        .replace_all(trimmed, "_")
        .chars()
        .take(MAX_NAME_LEN)
        .collect()
}
