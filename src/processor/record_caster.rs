use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::info;

use crate::config::FillPolicy;
use crate::error::LedgerResult;
use crate::models::{
    DATE, ORIGIN, PRICE, PRODUCT, SOLD_UNITS, SaleRecord, UNKNOWN_PRODUCT, records_to_frame,
    text_cells, whole_number,
};

/// What happens to rows whose product is blank or a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingProduct {
    /// Drop the row; used by merge pipelines where the key must be complete.
    Drop,
    /// Substitute `UNKNOWN`; used by pipelines that partition by product.
    Sentinel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CastStats {
    pub valid_rows: usize,
    pub total_rows: usize,
}

impl CastStats {
    pub fn invalid_rows(&self) -> usize {
        self.total_rows - self.valid_rows
    }
}

/// Coerces canonical columns to their target types and filters bad rows.
///
/// Row-level defects never fail a cast; they only lower `valid_rows`.
pub struct RecordCaster {
    fill_policy: FillPolicy,
    missing_product: MissingProduct,
    date_formats: Vec<String>,
}

impl RecordCaster {
    pub fn new(fill_policy: FillPolicy, missing_product: MissingProduct) -> Self {
        Self {
            fill_policy,
            missing_product,
            date_formats: Vec::new(),
        }
    }

    /// Extra chrono formats tried, in order, after the ISO forms.
    pub fn with_date_formats(mut self, formats: Vec<String>) -> Self {
        self.date_formats = formats;
        self
    }

    pub fn validate_and_cast(&self, df: &DataFrame) -> LedgerResult<(DataFrame, CastStats)> {
        let (records, stats) = self.cast_records(df)?;
        Ok((records_to_frame(&records)?, stats))
    }

    pub fn cast_records(&self, df: &DataFrame) -> LedgerResult<(Vec<SaleRecord>, CastStats)> {
        let dates = text_cells(df, DATE)?;
        let products = text_cells(df, PRODUCT)?;
        let prices = text_cells(df, PRICE)?;
        let units = text_cells(df, SOLD_UNITS)?;
        let origins = if df.column(ORIGIN).is_ok() {
            text_cells(df, ORIGIN)?
        } else {
            vec![None; df.height()]
        };

        let mut records = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let Some(date) = dates[i].as_deref().and_then(|d| self.parse_date(d)) else {
                continue;
            };
            let product = match (normalize_product(products[i].as_deref()), self.missing_product) {
                (Some(product), _) => product,
                (None, MissingProduct::Sentinel) => UNKNOWN_PRODUCT.to_string(),
                (None, MissingProduct::Drop) => continue,
            };

            let price = prices[i].as_deref().and_then(parse_price);
            let sold_units = units[i].as_deref().and_then(parse_units);
            let (price, sold_units) = match self.fill_policy {
                FillPolicy::Strict => match (price, sold_units) {
                    (Some(p), Some(u)) => (Some(p), Some(u)),
                    _ => continue,
                },
                FillPolicy::Lenient => (Some(price.unwrap_or(0.0)), Some(sold_units.unwrap_or(0))),
            };

            records.push(SaleRecord {
                date,
                product,
                price,
                sold_units,
                ingestion_ts: None,
                origin: origins[i]
                    .as_deref()
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string),
            });
        }

        let stats = CastStats {
            valid_rows: records.len(),
            total_rows: df.height(),
        };
        info!("Valid rows: {} / {}", stats.valid_rows, stats.total_rows);
        Ok((records, stats))
    }

    fn parse_date(&self, value: &str) -> Option<NaiveDate> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            return Some(date);
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
            return Some(ts.date_naive());
        }
        for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
                return Some(ts.date());
            }
        }
        self.date_formats
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
    }
}

/// Trimmed, upper-cased product, or `None` for blanks and placeholders.
pub fn normalize_product(value: Option<&str>) -> Option<String> {
    let product = value?.trim().to_uppercase();
    match product.as_str() {
        "" | "NAN" | "NONE" | "NULL" => None,
        _ => Some(product),
    }
}

/// Numeric text with currency signs removed and commas resolved.
///
/// A comma is a thousands separator only in strict `1,234,567[.89]`
/// grouping, and a decimal comma when it is the only separator and is
/// followed by one or two digits (`10,5`). Any other comma makes the value
/// unparseable.
fn clean_number(value: &str) -> Option<String> {
    static GROUPED: OnceLock<Regex> = OnceLock::new();
    static DECIMAL_COMMA: OnceLock<Regex> = OnceLock::new();

    let stripped = value.replace(['$', '€', '£'], "");
    let text = stripped.trim();
    if !text.contains(',') {
        return Some(text.to_string());
    }

    let grouped = GROUPED.get_or_init(|| {
        Regex::new(r"^[+-]?\d{1,3}(,\d{3})+(\.\d+)?$").expect("static pattern is valid")
    });
    let decimal_comma = DECIMAL_COMMA
        .get_or_init(|| Regex::new(r"^[+-]?\d+,\d{1,2}$").expect("static pattern is valid"));

    if grouped.is_match(text) {
        Some(text.replace(',', ""))
    } else if decimal_comma.is_match(text) {
        Some(text.replace(',', "."))
    } else {
        None
    }
}

fn parse_price(value: &str) -> Option<f64> {
    clean_number(value)?
        .parse::<f64>()
        .ok()
        .filter(|p| p.is_finite() && *p >= 0.0)
}

fn parse_units(value: &str) -> Option<i64> {
    clean_number(value)?
        .parse::<f64>()
        .ok()
        .and_then(whole_number)
        .filter(|u| *u >= 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::records_from_frame;

    fn raw_frame() -> DataFrame {
        df!(
            "date" => [Some("2025-09-01"), Some("not a date"), Some("02/09/2025"), None, Some("2025-09-03 10:15:00")],
            "product" => [Some(" a "), Some("B"), Some("nan"), Some("C"), Some("d")],
            "price" => [Some("10.5"), Some("12"), Some("$1,200"), Some("3"), Some("abc")],
            "sold_units" => [Some("100"), Some("80"), Some("7"), Some("1"), Some("4.0")]
        )
        .unwrap()
    }

    fn caster(fill: FillPolicy, missing: MissingProduct) -> RecordCaster {
        RecordCaster::new(fill, missing).with_date_formats(vec!["%d/%m/%Y".to_string()])
    }

    #[test]
    fn test_lenient_drop_policy() {
        let (records, stats) = caster(FillPolicy::Lenient, MissingProduct::Drop)
            .cast_records(&raw_frame())
            .unwrap();

        assert_eq!(stats, CastStats { valid_rows: 2, total_rows: 5 });
        assert_eq!(stats.invalid_rows(), 3);
        assert_eq!(records[0].product, "A");
        assert_eq!(records[0].price, Some(10.5));
        assert_eq!(records[0].sold_units, Some(100));
        // unparseable price is zero-filled
        assert_eq!(records[1].product, "D");
        assert_eq!(records[1].date, NaiveDate::from_ymd_opt(2025, 9, 3).unwrap());
        assert_eq!(records[1].price, Some(0.0));
        assert_eq!(records[1].sold_units, Some(4));
    }

    #[test]
    fn test_sentinel_policy_keeps_blank_products() {
        let (records, stats) = caster(FillPolicy::Lenient, MissingProduct::Sentinel)
            .cast_records(&raw_frame())
            .unwrap();

        assert_eq!(stats.valid_rows, 3);
        let sentinel = records.iter().find(|r| r.product == UNKNOWN_PRODUCT).unwrap();
        assert_eq!(sentinel.date, NaiveDate::from_ymd_opt(2025, 9, 2).unwrap());
        assert_eq!(sentinel.price, Some(1200.0));
    }

    #[test]
    fn test_strict_policy_drops_partial_rows() {
        let (records, stats) = caster(FillPolicy::Strict, MissingProduct::Drop)
            .cast_records(&raw_frame())
            .unwrap();

        assert_eq!(stats.valid_rows, 1);
        assert_eq!(records[0].product, "A");
    }

    #[test]
    fn test_numeric_sources_and_negative_values() {
        let df = df!(
            "date" => ["2025-09-01", "2025-09-01"],
            "product" => ["A", "B"],
            "price" => [-1.0, 9.0],
            "sold_units" => [2.5, 3.0]
        )
        .unwrap();

        let (records, _) = caster(FillPolicy::Strict, MissingProduct::Drop)
            .cast_records(&df)
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].product, "B");
        assert_eq!(records[0].sold_units, Some(3));
    }

    #[test]
    fn test_validate_and_cast_returns_canonical_frame() {
        let (frame, stats) = caster(FillPolicy::Lenient, MissingProduct::Drop)
            .validate_and_cast(&raw_frame())
            .unwrap();
        assert_eq!(frame.height(), stats.valid_rows);
        let records = records_from_frame(&frame).unwrap();
        assert_eq!(records[0].date, NaiveDate::from_ymd_opt(2025, 9, 1).unwrap());
    }

    #[test]
    fn test_comma_in_prices() {
        assert_eq!(parse_price("10,5"), Some(10.5));
        assert_eq!(parse_price("€ 3,25"), Some(3.25));
        assert_eq!(parse_price("$1,200"), Some(1200.0));
        assert_eq!(parse_price("1,234,567.5"), Some(1234567.5));
        // ambiguous or malformed separators are unparseable, never guessed
        assert_eq!(parse_price("1.200,50"), None);
        assert_eq!(parse_price("1,2,3"), None);
        assert_eq!(parse_price("12,5000"), None);
    }

    #[test]
    fn test_decimal_comma_row_is_not_inflated() {
        let df = df!(
            "date" => ["2025-09-01"],
            "product" => ["A"],
            "price" => ["10,5"],
            "sold_units" => ["2"]
        )
        .unwrap();

        let (records, _) = caster(FillPolicy::Strict, MissingProduct::Drop)
            .cast_records(&df)
            .unwrap();
        assert_eq!(records[0].price, Some(10.5));
    }

    #[test]
    fn test_huge_unit_counts_are_invalid() {
        assert_eq!(parse_units("1e30"), None);
        assert_eq!(parse_units("1,000"), Some(1000));
        assert_eq!(parse_units("1,5"), None);

        let df = df!(
            "date" => ["2025-09-01"],
            "product" => ["A"],
            "price" => ["1"],
            "sold_units" => ["1e30"]
        )
        .unwrap();
        let (records, stats) = caster(FillPolicy::Strict, MissingProduct::Drop)
            .cast_records(&df)
            .unwrap();
        assert!(records.is_empty());
        assert_eq!(stats.invalid_rows(), 1);
    }

    #[test]
    fn test_normalize_product_placeholders() {
        assert_eq!(normalize_product(Some(" sku-1 ")), Some("SKU-1".to_string()));
        assert_eq!(normalize_product(Some("None")), None);
        assert_eq!(normalize_product(Some("   ")), None);
        assert_eq!(normalize_product(None), None);
    }
}
