use anyhow::Result;
use sales_ledger::config::PipelineConfig;
use sales_ledger::models::{PRODUCT, records_from_frame};
use sales_ledger::storage::MasterStore;
use std::collections::BTreeMap;
use std::env;

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config_path = env::args().nth(1).unwrap_or_else(|| "ledger.toml".to_string());
    let config = PipelineConfig::from_file_or_default(&config_path)?;
    let store = MasterStore::new(&config.paths.master_path, &config.paths.backup_dir);

    println!("=== MASTER: {} ===\n", store.master_path().display());
    if !store.exists() {
        println!("No master persisted yet.");
        return Ok(());
    }

    let df = store.load()?;
    println!("Shape: {:?}", df.shape());
    println!("Columns: {:?}\n", df.get_column_names());
    println!("{}", df.head(Some(10)));

    let records = records_from_frame(&df)?;
    let mut per_product: BTreeMap<&str, (usize, i64)> = BTreeMap::new();
    for record in &records {
        let entry = per_product.entry(record.product.as_str()).or_default();
        entry.0 += 1;
        entry.1 += record.sold_units.unwrap_or(0);
    }

    println!("\nRows per {}:", PRODUCT);
    for (product, (rows, units)) in &per_product {
        println!("   {:<20} {:>6} rows {:>10} units", product, rows, units);
    }

    if let (Some(first), Some(last)) = (records.first(), records.last()) {
        println!("\nDates: {} .. {}", first.date, last.date);
    }
    Ok(())
}
