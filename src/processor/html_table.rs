use anyhow::{Result, anyhow};
use polars::prelude::*;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::{info, warn};

/// Converts the first HTML table matching `selector` into a text-only frame
/// so it can feed the schema normalizer like any file source.
///
/// Falls back to the first `<table>` when the selector matches nothing.
/// The first row provides the headers; shorter rows are padded with nulls
/// and longer rows truncated to the header width.
pub fn table_to_frame(document: &Html, selector: &str) -> Result<DataFrame> {
    let table_selector =
        Selector::parse(selector).map_err(|e| anyhow!("Invalid table selector '{}': {:?}", selector, e))?;
    let any_table = Selector::parse("table").map_err(|e| anyhow!("{:?}", e))?;
    let row_selector = Selector::parse("tr").map_err(|e| anyhow!("{:?}", e))?;
    let cell_selector = Selector::parse("th, td").map_err(|e| anyhow!("{:?}", e))?;

    let table = match document.select(&table_selector).next() {
        Some(table) => table,
        None => {
            warn!("No table matched '{}', using the first table", selector);
            document
                .select(&any_table)
                .next()
                .ok_or_else(|| anyhow!("No table found"))?
        }
    };

    let mut rows = table.select(&row_selector);
    let header_row = rows.next().ok_or_else(|| anyhow!("Table has no rows"))?;
    let headers = unique_headers(cell_texts(header_row, &cell_selector));
    if headers.is_empty() {
        return Err(anyhow!("Table header row has no cells"));
    }

    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
    let mut row_count = 0;
    for row in rows {
        let values = cell_texts(row, &cell_selector);
        if values.is_empty() {
            continue;
        }
        for (i, column) in columns.iter_mut().enumerate() {
            column.push(values.get(i).cloned());
        }
        row_count += 1;
    }

    if row_count == 0 {
        return Err(anyhow!("No valid rows in table"));
    }

    let series: Vec<Column> = headers
        .iter()
        .zip(columns)
        .map(|(name, values)| Column::from(Series::new(name.as_str().into(), values)))
        .collect();
    let df = DataFrame::new(series)?;

    info!("Table with {} rows and {} columns", df.height(), df.width());
    Ok(df)
}

fn cell_texts(row: ElementRef, cell_selector: &Selector) -> Vec<String> {
    row.select(cell_selector)
        .map(|cell| cell.text().collect::<String>().trim().to_string())
        .collect()
}

/// Blank headers become `col_<i>`; repeats get a numeric suffix.
fn unique_headers(raw: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .enumerate()
        .map(|(i, header)| {
            let base = if header.is_empty() {
                format!("col_{}", i)
            } else {
                header
            };
            let mut name = base.clone();
            let mut n = 1;
            while !seen.insert(name.clone()) {
                name = format!("{}_{}", base, n);
                n += 1;
            }
            name
        })
        .collect()
}
