use anyhow::{Context, Result, anyhow};
use sales_ledger::config::PipelineConfig;
use sales_ledger::fetcher::{FileDownloader, HtmlFetcher, filename_from_url, read_url_list, unique_path};
use sales_ledger::pipeline::Consolidator;
use sales_ledger::processor::{Partitioner, table_to_frame};
use sales_ledger::storage::{MasterStore, TableFormat, write_table_atomic};
use sales_ledger::telemetry;
use std::env;
use tracing::{error, info};

const DEFAULT_CONFIG: &str = "ledger.toml";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args: Vec<String> = env::args().collect();
    let config_path = flag_value(&args, "--config").unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = PipelineConfig::from_file_or_default(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    telemetry::init_logging(config.paths.log_dir.as_deref())?;

    if args.iter().any(|arg| arg == "--download" || arg == "-d") {
        return download(&config).await;
    }
    if let Some(url) = flag_value(&args, "--scrape") {
        return scrape(&config, &url).await;
    }
    if args.iter().any(|arg| arg == "--partition" || arg == "-p") {
        return partition(&config);
    }

    consolidate(config).await
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

async fn consolidate(config: PipelineConfig) -> Result<()> {
    info!("Starting sales ledger consolidation");

    let consolidator = Consolidator::new(config)?;
    let summary = tokio::task::spawn_blocking(move || consolidator.run())
        .await
        .context("Consolidation task panicked")?;

    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.is_success() {
        Ok(())
    } else {
        error!(
            "Consolidation failed: {}",
            summary.error.as_deref().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }
}

fn partition(config: &PipelineConfig) -> Result<()> {
    let store = MasterStore::new(&config.paths.master_path, &config.paths.backup_dir);
    if !store.exists() {
        return Err(anyhow!(
            "No master at {}, run a consolidation first",
            store.master_path().display()
        ));
    }

    let master = store.load()?;
    let format = TableFormat::from_path(store.master_path())?;
    let written = Partitioner::new(format).write_all(&master, &config.paths.partition_dir)?;

    info!(
        "Wrote {} product files to {}",
        written.len(),
        config.paths.partition_dir.display()
    );
    Ok(())
}

async fn download(config: &PipelineConfig) -> Result<()> {
    let urls = read_url_list(&config.fetch.urls_file)?;
    if urls.is_empty() {
        return Err(anyhow!("No URLs listed in {}", config.fetch.urls_file.display()));
    }

    let downloader = FileDownloader::new(&config.fetch)?;
    let mut saved = 0;
    for url in &urls {
        let dest = unique_path(&config.fetch.download_dir.join(filename_from_url(url)));
        match downloader.download(url, &dest).await {
            Ok(path) => {
                info!("✅ {} -> {}", url, path.display());
                saved += 1;
            }
            Err(e) => error!("❌ Failed to download {}: {:#}", url, e),
        }
    }

    info!("Downloaded {}/{} files", saved, urls.len());
    Ok(())
}

async fn scrape(config: &PipelineConfig, url: &str) -> Result<()> {
    let fetcher = HtmlFetcher::new(&config.fetch)?;
    let document = fetcher.fetch_document(url).await?;
    let mut df = table_to_frame(&document, &config.fetch.table_selector)?;

    let name = filename_from_url(url);
    let dest = unique_path(&config.paths.raw_dir.join(name));
    write_table_atomic(&mut df, &dest)?;

    info!("Saved scraped table ({} rows) to {}", df.height(), dest.display());
    Ok(())
}
