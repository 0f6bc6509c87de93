//! ファンド基準価額スクレイパーライブラリ
//!
//! - InvestSmartのウォッチリストから基準価額を取得
//! - CSV履歴（保持日数つき）にマージして保存
//! - 失敗時はメールで通知
//!
//! # 使用例
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fund_price_scraper::{Config, ExportRequest, PriceExportService};
//! use tower::Service;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::load("config.yaml".as_ref()).unwrap();
//!     let mut service = PriceExportService::new();
//!
//!     let result = service.call(ExportRequest::new(Arc::new(config))).await.unwrap();
//!     println!("History: {:?}", result.history_path);
//! }
//! ```
//!
//! # ブラウザなしでの実行
//!
//! `SiteAutomation` を実装した型を `run_export` に渡せば、
//! セッション制御と履歴更新をそのまま使える。

pub mod config;
pub mod cookies;
pub mod error;
pub mod history;
pub mod investsmart;
pub mod logging;
pub mod marker;
pub mod notify;
pub mod parser;
pub mod service;
pub mod session;
pub mod traits;

// 主要な型をリエクスポート
pub use config::Config;
pub use cookies::{CookieCache, StoredCookie};
pub use error::{ConfigError, HistoryError, NotifyError, ScraperError};
pub use history::{HistoryStore, MergeOutcome};
pub use investsmart::InvestSmartScraper;
pub use marker::FailureMarker;
pub use notify::{Notifier, Severity};
pub use parser::{MalformedRecord, PriceRecord, RawRow};
pub use service::{run_export, ExportError, ExportRequest, ExportResult, PriceExportService};
pub use session::{FailureKind, SessionFailure, SessionRunner, SessionState};
pub use traits::{Credentials, SessionCheck, SiteAutomation};
