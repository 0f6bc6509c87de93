//! スクレイプした文字列を価格レコードに正規化する

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 日付の受理フォーマット（先頭から順に試す）
///
/// 対象サイトはオーストラリアのため `dd/mm/yyyy` を日先として扱う。
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d %b %Y", "%d %B %Y"];

/// 除去する通貨記号・コード（長いものから）
const CURRENCY_MARKERS: &[&str] = &["US$", "A$", "AUD", "USD", "$", "€", "£"];

/// ウォッチリストから取得した未加工の1行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    pub fund: String,
    pub date: String,
    pub price: String,
}

impl RawRow {
    pub fn new(fund: impl Into<String>, date: impl Into<String>, price: impl Into<String>) -> Self {
        Self {
            fund: fund.into(),
            date: date.into(),
            price: price.into(),
        }
    }
}

/// 1ファンド1日分の基準価額
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceRecord {
    pub fund_id: String,
    pub date: NaiveDate,
    pub price: Decimal,
}

impl PriceRecord {
    pub fn new(fund_id: impl Into<String>, date: NaiveDate, price: Decimal) -> Self {
        Self {
            fund_id: fund_id.into(),
            date,
            price,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Fund,
    Date,
    Price,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Fund => "fund",
            Field::Date => "date",
            Field::Price => "price",
        };
        f.write_str(name)
    }
}

/// 解析できなかった行（スキップして件数だけ数える）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed record ({field}={value:?}): {reason}")]
pub struct MalformedRecord {
    pub field: Field,
    pub value: String,
    pub reason: String,
}

impl MalformedRecord {
    pub(crate) fn new(field: Field, value: &str, reason: impl Into<String>) -> Self {
        Self {
            field,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

pub fn parse(raw: &RawRow) -> Result<PriceRecord, MalformedRecord> {
    let fund_id = raw.fund.trim();
    if fund_id.is_empty() {
        return Err(MalformedRecord::new(Field::Fund, &raw.fund, "empty fund identifier"));
    }

    Ok(PriceRecord {
        fund_id: fund_id.to_string(),
        date: parse_date(&raw.date)?,
        price: parse_price(&raw.price)?,
    })
}

/// 行をまとめて解析し、成功分と失敗分に分ける
pub fn parse_batch<'a, I>(rows: I) -> (Vec<PriceRecord>, Vec<MalformedRecord>)
where
    I: IntoIterator<Item = &'a RawRow>,
{
    let mut records = Vec::new();
    let mut failures = Vec::new();
    for row in rows {
        match parse(row) {
            Ok(record) => records.push(record),
            Err(e) => failures.push(e),
        }
    }
    (records, failures)
}

pub fn parse_price(text: &str) -> Result<Decimal, MalformedRecord> {
    let mut cleaned = text.trim().to_string();
    for marker in CURRENCY_MARKERS {
        cleaned = cleaned.replace(marker, "");
    }
    let cleaned: String = cleaned
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return Err(MalformedRecord::new(Field::Price, text, "empty price"));
    }

    let price = Decimal::from_str(&cleaned)
        .map_err(|e| MalformedRecord::new(Field::Price, text, e.to_string()))?;
    if price.is_sign_negative() {
        return Err(MalformedRecord::new(Field::Price, text, "negative price"));
    }
    Ok(price)
}

pub fn parse_date(text: &str) -> Result<NaiveDate, MalformedRecord> {
    let trimmed = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| MalformedRecord::new(Field::Date, text, "unrecognised date format"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromPrimitive;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_dollar_price_with_local_date() {
        let record = parse(&RawRow::new("FundA", "05/06/2024", "$1,234.56")).unwrap();
        assert_eq!(record.fund_id, "FundA");
        assert_eq!(record.price, Decimal::from_str("1234.56").unwrap());
        assert_eq!(record.date, date(2024, 6, 5));
    }

    #[test]
    fn test_parse_na_is_failure() {
        let err = parse(&RawRow::new("FundA", "2024-01-01", "n/a")).unwrap_err();
        assert_eq!(err.field, Field::Price);
        assert_eq!(err.value, "n/a");
    }

    #[test]
    fn test_batch_keeps_going_after_failure() {
        let rows = vec![
            RawRow::new("FundA", "2024-01-01", "n/a"),
            RawRow::new("FundB", "2024-01-01", "1.2345"),
            RawRow::new("FundC", "yesterday", "2.00"),
            RawRow::new("  ", "2024-01-01", "2.00"),
        ];
        let (records, failures) = parse_batch(&rows);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fund_id, "FundB");
        assert_eq!(failures.len(), 3);
        assert_eq!(failures[1].field, Field::Date);
        assert_eq!(failures[2].field, Field::Fund);
    }

    #[test]
    fn test_price_variants() {
        assert_eq!(parse_price(" A$ 2.5010 ").unwrap(), Decimal::from_str("2.5010").unwrap());
        assert_eq!(parse_price("AUD 10,000").unwrap(), Decimal::from_i64(10_000).unwrap());
        assert_eq!(parse_price("£3").unwrap(), Decimal::from_i64(3).unwrap());
        assert!(parse_price("-1.00").is_err());
        assert!(parse_price("$").is_err());
        assert!(parse_price("-").is_err());
        assert!(parse_price("").is_err());
    }

    #[test]
    fn test_price_keeps_scale() {
        assert_eq!(parse_price("101.00").unwrap().to_string(), "101.00");
    }

    #[test]
    fn test_date_variants() {
        assert_eq!(parse_date("2024-01-02").unwrap(), date(2024, 1, 2));
        assert_eq!(parse_date("02-01-2024").unwrap(), date(2024, 1, 2));
        assert_eq!(parse_date("2 Jan 2024").unwrap(), date(2024, 1, 2));
        assert_eq!(parse_date("02 January 2024").unwrap(), date(2024, 1, 2));
        assert!(parse_date("31/02/2024").is_err());
        assert!(parse_date("").is_err());
    }
}
