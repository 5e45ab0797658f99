use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::fetch_config::FetchConfig;
use crate::models::{BusinessKey, DATE, PRICE, PRODUCT, SOLD_UNITS};
use crate::processor::{CanonicalColumn, SynonymTable};

/// Full configuration for a consolidation run, loaded from TOML.
///
/// Every section is optional; missing values fall back to the defaults
/// below so an empty file describes the stock layout under `data/`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub input: InputConfig,
    pub schema: SchemaConfig,
    pub validation: ValidationConfig,
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub raw_dir: PathBuf,
    pub master_path: PathBuf,
    pub backup_dir: PathBuf,
    pub partition_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
}

/// How the orchestrator picks its input from the raw directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Newest modification time; ties fall back to name order.
    MostRecent,
    /// First file in name order.
    OldestByName,
    /// Every candidate, combined in name order.
    AllByName,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub selection: SelectionPolicy,
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub key_columns: Vec<String>,
    pub columns: Vec<ColumnSpec>,
}

/// One synonym table entry as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub aliases: Vec<String>,
    #[serde(default = "default_required")]
    pub required: bool,
}

/// Treatment of numeric gaps in non-key columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillPolicy {
    /// Drop any row with a missing or invalid price or unit count.
    Strict,
    /// Keep the row and fill missing numbers with zero.
    Lenient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub fill_policy: FillPolicy,
    pub date_formats: Vec<String>,
}

fn default_required() -> bool {
    true
}

impl PipelineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline config file: {}", path.display()))?;
        let config: PipelineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse pipeline config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when it exists, otherwise the defaults.
    pub fn from_file_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Places every path of the stock layout under `root`.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let mut config = Self::default();
        config.paths = PathsConfig {
            raw_dir: root.join("raw"),
            master_path: root.join("processed").join("master.csv"),
            backup_dir: root.join("processed").join("backups"),
            partition_dir: root.join("processed").join("by_product"),
            log_dir: None,
        };
        config.fetch.urls_file = root.join("raw").join("urls.txt");
        config.fetch.download_dir = root.join("raw").join("downloads");
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema.key_columns.is_empty() {
            return Err(anyhow::anyhow!("schema.key_columns cannot be empty"));
        }

        let mut seen = HashSet::new();
        for column in &self.schema.columns {
            let name = column.name.trim().to_lowercase();
            if name.is_empty() {
                return Err(anyhow::anyhow!("schema column name cannot be empty"));
            }
            if !seen.insert(name.clone()) {
                return Err(anyhow::anyhow!("duplicate schema column '{}'", name));
            }
            if column.aliases.iter().all(|a| a.trim().is_empty()) {
                return Err(anyhow::anyhow!("schema column '{}' has no aliases", name));
            }
        }

        for required in [DATE, PRODUCT, PRICE, SOLD_UNITS] {
            if !seen.contains(required) {
                return Err(anyhow::anyhow!("schema must define column '{}'", required));
            }
        }

        let key = self.business_key()?;
        for key_column in key.columns() {
            if !seen.contains(key_column.name()) {
                return Err(anyhow::anyhow!(
                    "key column '{}' is not part of the schema",
                    key_column.name()
                ));
            }
        }

        if self.input.extensions.is_empty() {
            return Err(anyhow::anyhow!("input.extensions cannot be empty"));
        }

        Ok(())
    }

    pub fn business_key(&self) -> Result<BusinessKey> {
        Ok(BusinessKey::from_names(&self.schema.key_columns)?)
    }

    pub fn synonym_table(&self) -> SynonymTable {
        SynonymTable::new(
            self.schema
                .columns
                .iter()
                .map(|spec| CanonicalColumn::new(&spec.name, &spec.aliases, spec.required))
                .collect(),
        )
    }

    pub fn accepts_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                self.input
                    .extensions
                    .iter()
                    .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            master_path: PathBuf::from("data/processed/master.csv"),
            backup_dir: PathBuf::from("data/processed/backups"),
            partition_dir: PathBuf::from("data/processed/by_product"),
            log_dir: Some(PathBuf::from("logs")),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            selection: SelectionPolicy::MostRecent,
            extensions: vec!["csv".to_string(), "parquet".to_string(), "json".to_string()],
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        let spec = |name: &str, aliases: &[&str], required: bool| ColumnSpec {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            required,
        };

        Self {
            key_columns: BusinessKey::default()
                .columns()
                .iter()
                .map(|k| k.name().to_string())
                .collect(),
            columns: vec![
                spec("date", &["date", "fecha", "trade_date"], true),
                spec("product", &["product", "producto", "article"], true),
                spec("price", &["price", "precio", "cost"], true),
                spec(
                    "sold_units",
                    &[
                        "sold_units",
                        "sold_un",
                        "ud_vendidas",
                        "unidades",
                        "quantity",
                        "cantidad",
                        "uds",
                    ],
                    true,
                ),
                spec("origin", &["origin", "origen", "sheet", "source"], false),
            ],
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            fill_policy: FillPolicy::Lenient,
            date_formats: vec![
                "%Y/%m/%d".to_string(),
                "%d/%m/%Y".to_string(),
                "%d-%m-%Y".to_string(),
                "%Y%m%d".to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.paths.master_path, PathBuf::from("data/processed/master.csv"));
        assert_eq!(config.input.selection, SelectionPolicy::MostRecent);
        assert_eq!(config.validation.fill_policy, FillPolicy::Lenient);
        assert_eq!(config.schema.key_columns, vec!["date", "product"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_date_formats_are_day_first() {
        let formats = ValidationConfig::default().date_formats;
        assert!(formats.iter().any(|f| f == "%d/%m/%Y"));
        assert!(!formats.iter().any(|f| f == "%m/%d/%Y"));

        let parsed = formats
            .iter()
            .find_map(|f| chrono::NaiveDate::parse_from_str("02/09/2025", f).ok());
        assert_eq!(parsed, chrono::NaiveDate::from_ymd_opt(2025, 9, 2));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [paths]
            master_path = "out/ledger.parquet"

            [input]
            selection = "oldest_by_name"

            [validation]
            fill_policy = "strict"
            "#,
        )
        .unwrap();

        assert_eq!(config.paths.master_path, PathBuf::from("out/ledger.parquet"));
        assert_eq!(config.paths.raw_dir, PathBuf::from("data/raw"));
        assert_eq!(config.input.selection, SelectionPolicy::OldestByName);
        assert_eq!(config.validation.fill_policy, FillPolicy::Strict);
        assert_eq!(config.schema.columns.len(), 5);
    }

    #[test]
    fn test_schema_columns_keep_file_order() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [schema]
            key_columns = ["fecha"]

            [[schema.columns]]
            name = "fecha"
            aliases = ["fecha", "date"]

            [[schema.columns]]
            name = "producto"
            aliases = ["producto"]
            required = false
            "#,
        )
        .unwrap();

        assert_eq!(config.schema.columns[0].name, "fecha");
        assert!(config.schema.columns[0].required);
        assert!(!config.schema.columns[1].required);
        // canonical names must be the ledger's own column names
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_schema() {
        let mut config = PipelineConfig::default();
        config.schema.columns.push(ColumnSpec {
            name: "Date".to_string(),
            aliases: vec!["day".to_string()],
            required: true,
        });
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.schema.key_columns.clear();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.schema.columns.retain(|c| c.name != "product");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_accepts_extension() {
        let config = PipelineConfig::default();
        assert!(config.accepts_extension(Path::new("raw/sales_1.CSV")));
        assert!(config.accepts_extension(Path::new("raw/sales.parquet")));
        assert!(!config.accepts_extension(Path::new("raw/sales.xlsx")));
        assert!(!config.accepts_extension(Path::new("raw/README")));
    }

    #[test]
    fn test_rooted_layout() {
        let config = PipelineConfig::rooted_at("/tmp/ledger");
        assert_eq!(config.paths.raw_dir, PathBuf::from("/tmp/ledger/raw"));
        assert_eq!(
            config.paths.backup_dir,
            PathBuf::from("/tmp/ledger/processed/backups")
        );
        assert_eq!(
            config.fetch.urls_file,
            PathBuf::from("/tmp/ledger/raw/urls.txt")
        );
    }
}
