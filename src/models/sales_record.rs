use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

pub const DATE: &str = "date";
pub const PRODUCT: &str = "product";
pub const PRICE: &str = "price";
pub const SOLD_UNITS: &str = "sold_units";
pub const INGESTION_TS: &str = "ingestion_ts";
pub const ORIGIN: &str = "origin";

/// Placeholder for blank product values where a grouping key cannot be null.
pub const UNKNOWN_PRODUCT: &str = "UNKNOWN";

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// One sale observation in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub date: NaiveDate,
    pub product: String,
    pub price: Option<f64>,
    pub sold_units: Option<i64>,
    pub ingestion_ts: Option<DateTime<Utc>>,
    pub origin: Option<String>,
}

/// Columns that may take part in the business key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyColumn {
    Date,
    Product,
    Origin,
}

impl KeyColumn {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            DATE => Some(KeyColumn::Date),
            PRODUCT => Some(KeyColumn::Product),
            ORIGIN => Some(KeyColumn::Origin),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            KeyColumn::Date => DATE,
            KeyColumn::Product => PRODUCT,
            KeyColumn::Origin => ORIGIN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyPart {
    Missing,
    Date(NaiveDate),
    Text(String),
}

pub type RecordKey = Vec<KeyPart>;

/// Ordered column combination that identifies one fact in the master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessKey {
    columns: Vec<KeyColumn>,
}

impl BusinessKey {
    pub fn new(columns: Vec<KeyColumn>) -> LedgerResult<Self> {
        if columns.is_empty() {
            return Err(LedgerError::Config(
                "business key needs at least one column".to_string(),
            ));
        }
        Ok(Self { columns })
    }

    pub fn from_names(names: &[String]) -> LedgerResult<Self> {
        let columns = names
            .iter()
            .map(|name| {
                KeyColumn::from_name(name).ok_or_else(|| {
                    LedgerError::Config(format!("unknown business key column '{}'", name))
                })
            })
            .collect::<LedgerResult<Vec<_>>>()?;
        Self::new(columns)
    }

    pub fn columns(&self) -> &[KeyColumn] {
        &self.columns
    }

    pub fn key_of(&self, record: &SaleRecord) -> RecordKey {
        self.columns
            .iter()
            .map(|column| match column {
                KeyColumn::Date => KeyPart::Date(record.date),
                KeyColumn::Product => KeyPart::Text(record.product.clone()),
                KeyColumn::Origin => match &record.origin {
                    Some(origin) => KeyPart::Text(origin.clone()),
                    None => KeyPart::Missing,
                },
            })
            .collect()
    }
}

impl Default for BusinessKey {
    fn default() -> Self {
        Self {
            columns: vec![KeyColumn::Date, KeyColumn::Product],
        }
    }
}

/// Empty table carrying the persisted canonical schema.
pub fn empty_master_frame() -> LedgerResult<DataFrame> {
    records_to_frame(&[])
}

/// Builds the persisted representation of a record set.
pub fn records_to_frame(records: &[SaleRecord]) -> LedgerResult<DataFrame> {
    let dates: Vec<String> = records
        .iter()
        .map(|r| r.date.format(DATE_FORMAT).to_string())
        .collect();
    let products: Vec<String> = records.iter().map(|r| r.product.clone()).collect();
    let prices: Vec<Option<f64>> = records.iter().map(|r| r.price).collect();
    let units: Vec<Option<i64>> = records.iter().map(|r| r.sold_units).collect();
    let stamps: Vec<Option<String>> = records
        .iter()
        .map(|r| {
            r.ingestion_ts
                .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
        })
        .collect();
    let origins: Vec<Option<String>> = records.iter().map(|r| r.origin.clone()).collect();

    let df = df!(
        DATE => dates,
        PRODUCT => products,
        PRICE => prices,
        SOLD_UNITS => units,
        INGESTION_TS => stamps,
        ORIGIN => origins
    )?;
    Ok(df)
}

/// Reads a canonical table back into records.
///
/// Every column is read through its text form so frames loaded from CSV and
/// Parquet decode the same way. A row that cannot be decoded (no valid ISO
/// date, or a non-empty price or unit count that is not a number) fails
/// with `CorruptRow`; rows are never dropped here.
pub fn records_from_frame(df: &DataFrame) -> LedgerResult<Vec<SaleRecord>> {
    let missing: Vec<String> = [DATE, PRODUCT, PRICE, SOLD_UNITS]
        .iter()
        .filter(|name| df.column(name).is_err())
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(LedgerError::MissingColumn { columns: missing });
    }

    let dates = text_cells(df, DATE)?;
    let products = text_cells(df, PRODUCT)?;
    let prices = text_cells(df, PRICE)?;
    let units = text_cells(df, SOLD_UNITS)?;
    let stamps = optional_text_cells(df, INGESTION_TS)?;
    let origins = optional_text_cells(df, ORIGIN)?;

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let corrupt = |message: String| LedgerError::CorruptRow { row: i + 1, message };

        let date = dates[i]
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d.trim(), DATE_FORMAT).ok())
            .ok_or_else(|| corrupt(format!("invalid {} {:?}", DATE, dates[i])))?;
        let price = match present(&prices[i]) {
            None => None,
            Some(p) => Some(
                p.parse::<f64>()
                    .ok()
                    .filter(|p| p.is_finite())
                    .ok_or_else(|| corrupt(format!("invalid {} '{}'", PRICE, p)))?,
            ),
        };
        let sold_units = match present(&units[i]) {
            None => None,
            Some(u) => Some(
                u.parse::<f64>()
                    .ok()
                    .and_then(whole_number)
                    .ok_or_else(|| corrupt(format!("invalid {} '{}'", SOLD_UNITS, u)))?,
            ),
        };

        records.push(SaleRecord {
            date,
            product: products[i].clone().unwrap_or_default(),
            price,
            sold_units,
            ingestion_ts: stamps[i].as_deref().and_then(parse_timestamp),
            origin: origins[i].clone().filter(|o| !o.is_empty()),
        });
    }
    Ok(records)
}

fn present(cell: &Option<String>) -> Option<&str> {
    cell.as_deref().map(str::trim).filter(|c| !c.is_empty())
}

/// `value` as an `i64` when it is integral and inside the `i64` range.
pub fn whole_number(value: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is already out of range
    let in_range = value >= i64::MIN as f64 && value < i64::MAX as f64;
    (value.is_finite() && value.fract() == 0.0 && in_range).then_some(value as i64)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Cells of a column rendered as text, nulls preserved.
pub fn text_cells(df: &DataFrame, name: &str) -> LedgerResult<Vec<Option<String>>> {
    let column = df.column(name)?.cast(&DataType::String)?;
    let cells = column
        .str()?
        .into_iter()
        .map(|cell| cell.map(|s| s.to_string()))
        .collect();
    Ok(cells)
}

fn optional_text_cells(df: &DataFrame, name: &str) -> LedgerResult<Vec<Option<String>>> {
    if df.column(name).is_ok() {
        text_cells(df, name)
    } else {
        Ok(vec![None; df.height()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(date: &str, product: &str, price: f64) -> SaleRecord {
        SaleRecord {
            date: NaiveDate::parse_from_str(date, DATE_FORMAT).unwrap(),
            product: product.to_string(),
            price: Some(price),
            sold_units: Some(3),
            ingestion_ts: None,
            origin: Some("sales_1".to_string()),
        }
    }

    #[test]
    fn test_frame_round_trip_keeps_values() {
        let mut first = record("2025-09-01", "A", 10.5);
        first.ingestion_ts = parse_timestamp("2025-09-02T08:00:00.000001Z");
        let records = vec![first, record("2025-09-02", "B", 12.0)];

        let df = records_to_frame(&records).unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.width(), 6);

        let back = records_from_frame(&df).unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn test_empty_master_has_canonical_columns() {
        let df = empty_master_frame().unwrap();
        assert_eq!(df.height(), 0);
        let names: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            names,
            vec![DATE, PRODUCT, PRICE, SOLD_UNITS, INGESTION_TS, ORIGIN]
        );
    }

    #[test]
    fn test_records_from_frame_reports_missing_columns() {
        let df = df!(DATE => ["2025-09-01"], PRODUCT => ["A"]).unwrap();
        match records_from_frame(&df) {
            Err(LedgerError::MissingColumn { columns }) => {
                assert_eq!(columns, vec![PRICE.to_string(), SOLD_UNITS.to_string()]);
            }
            other => panic!("expected MissingColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_undecodable_row_is_an_error_not_a_skip() {
        let df = df!(
            DATE => ["2025-09-01", "2025/09/02"],
            PRODUCT => ["KEEP", "OLD"],
            PRICE => ["1.0", "2.0"],
            SOLD_UNITS => ["1", "2"]
        )
        .unwrap();
        match records_from_frame(&df) {
            Err(LedgerError::CorruptRow { row, message }) => {
                assert_eq!(row, 2);
                assert!(message.contains("2025/09/02"));
            }
            other => panic!("expected CorruptRow, got {:?}", other),
        }

        let df = df!(
            DATE => ["2025-09-01"],
            PRODUCT => ["A"],
            PRICE => ["ten"],
            SOLD_UNITS => ["1"]
        )
        .unwrap();
        assert!(matches!(
            records_from_frame(&df),
            Err(LedgerError::CorruptRow { row: 1, .. })
        ));
    }

    #[test]
    fn test_null_numbers_stay_null() {
        let df = df!(
            DATE => ["2025-09-01"],
            PRODUCT => ["A"],
            PRICE => [None::<f64>],
            SOLD_UNITS => [None::<i64>]
        )
        .unwrap();
        let records = records_from_frame(&df).unwrap();
        assert_eq!(records[0].price, None);
        assert_eq!(records[0].sold_units, None);
    }

    #[test]
    fn test_whole_number_rejects_out_of_range() {
        assert_eq!(whole_number(42.0), Some(42));
        assert_eq!(whole_number(2.5), None);
        assert_eq!(whole_number(1e30), None);
        assert_eq!(whole_number(9.223372036854775807e18), None);
        assert_eq!(whole_number(f64::NAN), None);
    }

    #[test]
    fn test_business_key_from_names() {
        let key = BusinessKey::from_names(&["Date".to_string(), "product".to_string()]).unwrap();
        assert_eq!(key, BusinessKey::default());

        assert!(BusinessKey::from_names(&["price".to_string()]).is_err());
        assert!(BusinessKey::from_names(&[]).is_err());
    }

    #[test]
    fn test_key_ordering_follows_date_then_product() {
        let key = BusinessKey::default();
        let early = key.key_of(&record("2025-09-01", "B", 1.0));
        let late = key.key_of(&record("2025-09-02", "A", 1.0));
        assert!(early < late);
    }
}
