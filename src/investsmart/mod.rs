//! InvestSmart スクレイパーモジュール
//!
//! ウォッチリストの基準価額を取得し、ファンド名をAPIRコードに解決する

mod fund_codes;
mod scraper;
mod watchlist;

pub use fund_codes::{FundCode, FundCodeCache};
pub use scraper::InvestSmartScraper;
pub use watchlist::{extract_entries, WatchlistCell, WatchlistEntry, WatchlistTable};
