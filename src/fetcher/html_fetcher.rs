use anyhow::{Result, anyhow};
use scraper::Html;
use std::time::Duration;
use tracing::info;
use wreq::Client;
use wreq::header::USER_AGENT;
use wreq_util::Emulation;

use crate::config::FetchConfig;
use crate::error::LedgerError;

/// Fetches HTML pages for table scraping.
pub struct HtmlFetcher {
    client: Client,
    user_agent: String,
}

impl HtmlFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .emulation(Emulation::Firefox136)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(HtmlFetcher {
            client,
            user_agent: config.user_agent.clone(),
        })
    }

    /// Fetches `url` and parses it into a document.
    pub async fn fetch_document(&self, url: &str) -> Result<Html> {
        let html = self.fetch_page(url).await?;
        Ok(Html::parse_document(&html))
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        info!("HTML: {}", url);

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, self.user_agent.as_str())
            .send()
            .await
            .map_err(|e| transport(url, format!("Network error: {}", e)))?;

        if !response.status().is_success() {
            return Err(transport(url, format!("HTTP error: {}", response.status())).into());
        }

        let html = response
            .text()
            .await
            .map_err(|e| transport(url, format!("Failed to read response text: {}", e)))?;

        if html.is_empty() {
            return Err(anyhow!("Empty HTML response from {}", url));
        }

        info!("Fetched {} characters from {}", html.len(), url);
        Ok(html)
    }
}

fn transport(url: &str, message: String) -> LedgerError {
    LedgerError::Transport {
        url: url.to_string(),
        message,
    }
}
