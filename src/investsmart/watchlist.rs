//! ウォッチリスト表の解釈
//!
//! ブラウザ側のJavaScriptは表のヘッダーとセルを素のままJSONで返す。
//! 列の特定と行の組み立てはこちらで行う。

use serde::Deserialize;
use tracing::warn;

use crate::error::ScraperError;

/// ブラウザで評価して表をJSON文字列として返すスクリプト
pub(crate) const EXTRACT_TABLE_JS: &str = r#"
    (() => {
        const table = document.querySelector("table[data-sortable-name='watchlist']");
        if (!table) {
            return JSON.stringify({ headers: [], rows: [] });
        }
        const headers = Array.from(table.querySelectorAll('thead tr th'))
            .map(th => th.textContent.trim());
        const rows = Array.from(table.querySelectorAll('tbody tr')).map(tr =>
            Array.from(tr.querySelectorAll('td')).map(td => {
                const link = td.querySelector('a');
                return {
                    text: td.textContent.trim(),
                    link_text: link ? link.textContent.trim() : null,
                    href: link ? link.href : null,
                };
            })
        );
        return JSON.stringify({ headers, rows });
    })()
"#;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchlistCell {
    pub text: String,
    #[serde(default)]
    pub link_text: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchlistTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<WatchlistCell>>,
}

/// 表の1行（ファンドIDの解決前）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchlistEntry {
    pub fund_name: String,
    pub detail_url: Option<String>,
    pub price: String,
    pub date: String,
}

struct Columns {
    fund: usize,
    price: usize,
}

fn find_columns(headers: &[String]) -> Result<Columns, ScraperError> {
    let position = |needle: &str| {
        headers
            .iter()
            .position(|h| h.trim().to_lowercase().contains(needle))
    };

    let fund = position("fund");
    let price = position("current unit price");
    match (fund, price) {
        (Some(fund), Some(price)) => Ok(Columns { fund, price }),
        _ => Err(ScraperError::Extraction(format!(
            "required columns not found in watchlist headers {:?}",
            headers
        ))),
    }
}

/// 表から行を取り出す
///
/// 表には基準日の列が無いので、すべての行に取得日 `today` を付ける。
pub fn extract_entries(table: &WatchlistTable, today: &str) -> Result<Vec<WatchlistEntry>, ScraperError> {
    let columns = find_columns(&table.headers)?;

    let mut entries = Vec::new();
    for (index, cells) in table.rows.iter().enumerate() {
        let (Some(fund_cell), Some(price_cell)) = (cells.get(columns.fund), cells.get(columns.price))
        else {
            warn!("Could not parse watchlist row {}: only {} cells", index + 1, cells.len());
            continue;
        };

        let fund_name = fund_cell
            .link_text
            .clone()
            .unwrap_or_else(|| fund_cell.text.clone());
        entries.push(WatchlistEntry {
            fund_name,
            detail_url: fund_cell.href.clone(),
            price: price_cell.text.clone(),
            date: today.to_string(),
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(text: &str) -> WatchlistCell {
        WatchlistCell {
            text: text.to_string(),
            ..Default::default()
        }
    }

    fn fund_cell(name: &str, href: &str) -> WatchlistCell {
        WatchlistCell {
            text: name.to_string(),
            link_text: Some(name.to_string()),
            href: Some(href.to_string()),
        }
    }

    #[test]
    fn test_extract_entries() {
        let json = r#"{
            "headers": ["", "Fund", "Current Unit Price", "1 Month"],
            "rows": [
                [{"text": "x"}, {"text": "Alpha Fund", "link_text": "Alpha Fund", "href": "https://example.com/a"}, {"text": "$1.2345"}, {"text": "1%"}],
                [{"text": "x"}]
            ]
        }"#;
        let table: WatchlistTable = serde_json::from_str(json).unwrap();

        let entries = extract_entries(&table, "2024-01-02").unwrap();
        assert_eq!(
            entries,
            vec![WatchlistEntry {
                fund_name: "Alpha Fund".into(),
                detail_url: Some("https://example.com/a".into()),
                price: "$1.2345".into(),
                date: "2024-01-02".into(),
            }]
        );
    }

    #[test]
    fn test_date_like_columns_ignored() {
        let table = WatchlistTable {
            headers: vec![
                "Fund".into(),
                "Inception Date".into(),
                "Current Unit Price".into(),
                "Last Updated".into(),
            ],
            rows: vec![
                vec![fund_cell("Alpha", "u"), cell("01/07/1998"), cell("1.00"), cell("yesterday")],
                vec![fund_cell("Beta", "v"), cell(""), cell("2.00"), cell("")],
            ],
        };
        let entries = extract_entries(&table, "2024-01-02").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.date == "2024-01-02"));
        assert_eq!(entries[0].price, "1.00");
    }

    #[test]
    fn test_missing_columns_is_error() {
        let table = WatchlistTable {
            headers: vec!["Name".into(), "Price".into()],
            rows: vec![],
        };
        assert!(matches!(
            extract_entries(&table, "2024-01-02"),
            Err(ScraperError::Extraction(_))
        ));
    }
}
