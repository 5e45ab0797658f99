use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;
use wreq::Client;
use wreq::header::{CONTENT_TYPE, USER_AGENT};
use wreq_util::Emulation;

use crate::config::FetchConfig;
use crate::error::LedgerError;

/// Streams remote tabular files to disk.
pub struct FileDownloader {
    client: Client,
    user_agent: String,
}

impl FileDownloader {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .emulation(Emulation::Firefox136)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(FileDownloader {
            client,
            user_agent: config.user_agent.clone(),
        })
    }

    /// Downloads `url` into `dest`, creating parent directories.
    ///
    /// Content goes to a temporary sibling first, so `dest` only appears
    /// once the whole body has arrived. An unexpected Content-Type is
    /// logged, not rejected.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<PathBuf> {
        info!("Downloading: {}", url);
        let parent = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating download directory {}", parent.display()))?;

        let mut response = self
            .client
            .get(url)
            .header(USER_AGENT, self.user_agent.as_str())
            .send()
            .await
            .map_err(|e| transport(url, e))?;

        if !response.status().is_success() {
            return Err(transport(url, format!("HTTP error: {}", response.status())).into());
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !looks_tabular(&content_type) {
            warn!("Unexpected Content-Type from {}: '{}'", url, content_type);
        }

        let temp_path = parent.join(format!(".{}.download", Uuid::new_v4()));
        let result = async {
            let mut file = fs::File::create(&temp_path)
                .await
                .with_context(|| format!("creating {}", temp_path.display()))?;
            let mut bytes = 0usize;
            while let Some(chunk) = response.chunk().await.map_err(|e| transport(url, e))? {
                bytes += chunk.len();
                file.write_all(&chunk)
                    .await
                    .with_context(|| format!("writing {}", temp_path.display()))?;
            }
            file.flush()
                .await
                .with_context(|| format!("flushing {}", temp_path.display()))?;
            drop(file);

            fs::rename(&temp_path, dest).await.with_context(|| {
                format!("moving {} -> {}", temp_path.display(), dest.display())
            })?;
            Ok::<usize, anyhow::Error>(bytes)
        }
        .await;

        match result {
            Ok(bytes) => {
                info!("File saved in {} ({} bytes)", dest.display(), bytes);
                Ok(dest.to_path_buf())
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(e)
            }
        }
    }
}

fn transport(url: &str, err: impl std::fmt::Display) -> LedgerError {
    LedgerError::Transport {
        url: url.to_string(),
        message: err.to_string(),
    }
}

fn looks_tabular(content_type: &str) -> bool {
    let lower = content_type.to_lowercase();
    lower.contains("text") || lower.contains("csv")
}

/// Reads the URL list: one per line, blank lines and `#` comments skipped.
pub fn read_url_list(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("{} does not exist or is unreadable", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// File name for a downloaded URL: last path segment, `.csv` ensured,
/// unsafe characters replaced, capped at 120 characters.
pub fn filename_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or("");
    let after_scheme = without_query
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(without_query);
    let path = after_scheme.split_once('/').map(|(_, p)| p).unwrap_or("");
    let mut name = path.rsplit('/').next().unwrap_or("").to_string();

    if name.is_empty() {
        name = "file.csv".to_string();
    }
    if !name.to_lowercase().ends_with(".csv") {
        name.push_str(".csv");
    }

    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| if r#"\/:*?"<>|"#.contains(c) { '_' } else { c })
        .take(120)
        .collect();
    if sanitized.is_empty() {
        "file.csv".to_string()
    } else {
        sanitized
    }
}

/// `base` if free, else the first free `<stem>_<n><ext>` beside it.
pub fn unique_path(base: &Path) -> PathBuf {
    if !base.exists() {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .to_string();
    let ext = base
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    let mut n = 1;
    loop {
        let candidate = base.with_file_name(format!("{}_{}{}", stem, n, ext));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
