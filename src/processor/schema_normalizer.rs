use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::error::{LedgerError, LedgerResult};

/// A canonical column and the source names accepted for it, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalColumn {
    pub name: String,
    pub aliases: Vec<String>,
    pub required: bool,
}

impl CanonicalColumn {
    pub fn new(name: &str, aliases: &[String], required: bool) -> Self {
        Self {
            name: name.trim().to_lowercase(),
            aliases: aliases.iter().map(|a| normalize_header(a)).collect(),
            required,
        }
    }
}

/// Ordered mapping of canonical column name to its aliases.
///
/// Matching is case- and whitespace-insensitive. When several aliases of
/// the same canonical column are present in one table, the alias listed
/// first wins; later aliases are left unmapped and dropped from the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynonymTable {
    columns: Vec<CanonicalColumn>,
}

impl SynonymTable {
    pub fn new(columns: Vec<CanonicalColumn>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[CanonicalColumn] {
        &self.columns
    }

    pub fn canonical_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Resolves each canonical column to the source header it maps from.
    ///
    /// Returns `(canonical, source)` pairs in table order plus the names of
    /// required canonical columns with no matching header. A source header
    /// already claimed by an earlier canonical column is not reused.
    pub fn resolve(&self, headers: &[String]) -> (Vec<(String, String)>, Vec<String>) {
        let mut by_normalized: HashMap<String, &String> = HashMap::new();
        for header in headers {
            by_normalized.entry(normalize_header(header)).or_insert(header);
        }

        let mut claimed: HashSet<&String> = HashSet::new();
        let mut mapping = Vec::new();
        let mut missing = Vec::new();

        for column in &self.columns {
            let found = column.aliases.iter().find_map(|alias| {
                by_normalized
                    .get(alias)
                    .copied()
                    .filter(|source| !claimed.contains(source))
            });

            match found {
                Some(source) => {
                    claimed.insert(source);
                    mapping.push((column.name.clone(), source.clone()));
                }
                None if column.required => missing.push(column.name.clone()),
                None => {}
            }
        }

        (mapping, missing)
    }
}

fn normalize_header(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Renames heterogeneous source headers to the canonical schema.
pub struct SchemaNormalizer {
    table: SynonymTable,
}

impl SchemaNormalizer {
    pub fn new(table: SynonymTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &SynonymTable {
        &self.table
    }

    /// Produces a new frame holding only the canonical columns.
    ///
    /// Fails with `MissingColumn` naming every required column that has no
    /// alias in `df`. The input frame is left untouched.
    pub fn normalize(&self, df: &DataFrame) -> LedgerResult<DataFrame> {
        let headers: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();

        let (mapping, missing) = self.table.resolve(&headers);
        if !missing.is_empty() {
            return Err(LedgerError::MissingColumn { columns: missing });
        }

        let mut columns = Vec::with_capacity(mapping.len());
        for (canonical, source) in &mapping {
            if canonical != source {
                debug!("Mapping column '{}' -> '{}'", source, canonical);
            }
            let series = df
                .column(source)?
                .as_materialized_series()
                .clone()
                .with_name(canonical.as_str().into());
            columns.push(Column::from(series));
        }

        let normalized = DataFrame::new(columns)?;
        info!(
            "Normalized {} source columns to {} canonical columns ({} rows)",
            headers.len(),
            normalized.width(),
            normalized.height()
        );
        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    fn normalizer() -> SchemaNormalizer {
        SchemaNormalizer::new(PipelineConfig::default().synonym_table())
    }

    fn column_names(df: &DataFrame) -> Vec<String> {
        df.get_column_names().iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_localized_headers_map_to_canonical() {
        let df = df!(
            " Fecha " => ["2025-09-01"],
            "PRODUCTO" => ["a"],
            "Precio" => [10.0],
            "ud_vendidas" => [100i64]
        )
        .unwrap();

        let out = normalizer().normalize(&df).unwrap();
        assert_eq!(column_names(&out), vec!["date", "product", "price", "sold_units"]);
        assert_eq!(out.height(), 1);
    }

    #[test]
    fn test_first_listed_alias_wins() {
        let df = df!(
            "fecha" => ["2025-09-02"],
            "Date" => ["2025-09-01"],
            "product" => ["A"],
            "price" => [1.0],
            "quantity" => [2i64]
        )
        .unwrap();

        let out = normalizer().normalize(&df).unwrap();
        let dates = out.column("date").unwrap().str().unwrap().get(0).map(|s| s.to_string());
        assert_eq!(dates.as_deref(), Some("2025-09-01"));
        assert!(out.column("fecha").is_err());
    }

    #[test]
    fn test_missing_columns_are_batched() {
        let df = df!("date" => ["2025-09-01"], "product" => ["A"]).unwrap();

        match normalizer().normalize(&df) {
            Err(LedgerError::MissingColumn { columns }) => {
                assert_eq!(columns, vec!["price", "sold_units"]);
            }
            other => panic!("expected MissingColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_optional_origin_is_kept_when_present() {
        let df = df!(
            "date" => ["2025-09-01"],
            "product" => ["A"],
            "price" => [1.0],
            "uds" => [2i64],
            "Origen" => ["ventas_1"],
            "notes" => ["ignored"]
        )
        .unwrap();

        let out = normalizer().normalize(&df).unwrap();
        assert_eq!(
            column_names(&out),
            vec!["date", "product", "price", "sold_units", "origin"]
        );
        // source frame is unchanged
        assert_eq!(df.width(), 6);
    }

    #[test]
    fn test_resolve_does_not_reuse_a_header() {
        let table = SynonymTable::new(vec![
            CanonicalColumn::new("price", &["cost".to_string()], true),
            CanonicalColumn::new("unit_cost", &["cost".to_string()], true),
        ]);
        let (mapping, missing) = table.resolve(&["Cost".to_string()]);
        assert_eq!(mapping, vec![("price".to_string(), "Cost".to_string())]);
        assert_eq!(missing, vec!["unit_cost"]);
    }
}
