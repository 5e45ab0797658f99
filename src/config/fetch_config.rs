use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings for the download and HTML fetch collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Text file with one URL per line; `#` starts a comment line.
    pub urls_file: PathBuf,
    pub download_dir: PathBuf,
    pub timeout_seconds: u64,
    pub user_agent: String,
    /// CSS selector for the table used by `--scrape`.
    pub table_selector: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            urls_file: PathBuf::from("data/raw/urls.txt"),
            download_dir: PathBuf::from("data/raw/downloads"),
            timeout_seconds: 30,
            user_agent: "sales-ledger/1.0".to_string(),
            table_selector: "table".to_string(),
        }
    }
}
