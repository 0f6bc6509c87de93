use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{Local, NaiveDate};
use thiserror::Error;
use tower::Service;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::cookies::CookieCache;
use crate::error::{HistoryError, ScraperError};
use crate::history::{HistoryStore, MergeOutcome};
use crate::investsmart::{FundCodeCache, InvestSmartScraper};
use crate::session::{FailureKind, SessionFailure, SessionRunner, SessionSettings};
use crate::traits::SiteAutomation;

/// エクスポートリクエスト
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub config: Arc<Config>,
    /// 保持期間の基準日
    pub today: NaiveDate,
}

impl ExportRequest {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            today: Local::now().date_naive(),
        }
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }
}

/// エクスポート結果
#[derive(Debug, Clone)]
pub struct ExportResult {
    pub history_path: PathBuf,
    /// 空のウォッチリストを許容した場合はNone（履歴は変更なし）
    pub outcome: Option<MergeOutcome>,
    pub scraped_rows: usize,
    pub attempts: u32,
    pub restored_session: bool,
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("browser start-up failed: {0}")]
    Browser(#[from] ScraperError),

    #[error("session failed: {0}")]
    Session(#[from] SessionFailure),

    #[error("history update failed: {0}")]
    History(#[from] HistoryError),
}

impl ExportError {
    /// 通知メールの件名
    pub fn subject(&self) -> &'static str {
        match self {
            ExportError::Browser(_) => "Browser start-up failed",
            ExportError::Session(f) => match f.kind {
                FailureKind::LoginTimeout => "Login timed out",
                FailureKind::ScrapeTimeout => "Watchlist timed out",
                FailureKind::EmptyResult => "Watchlist was empty",
                FailureKind::AutomationError => "Browser automation error",
            },
            ExportError::History(_) => "Price history update failed",
        }
    }
}

/// セッション実行 → 解析 → 履歴マージまでの1回分
///
/// ブラウザの起動は呼び出し側で済ませておくこと。終了時に `close` する。
pub async fn run_export<A: SiteAutomation>(
    automation: A,
    config: &Config,
    today: NaiveDate,
) -> Result<ExportResult, ExportError> {
    let history = HistoryStore::new(config.history_path(), config.files.days_to_save);
    // ログイン前に履歴ファイルが読めることを確認
    let existing = history.load()?;
    debug!("{} records in history before scrape", existing.records.len());

    let mut runner = SessionRunner::new(automation, SessionSettings::from_config(&config.site));
    if let Some(path) = config.cookie_path() {
        runner = runner.with_cookie_cache(CookieCache::new(path));
    }

    let session = runner.run().await;
    if let Err(e) = runner.automation_mut().close().await {
        debug!("Failed to close automation session: {}", e);
    }

    let session = match session {
        Ok(session) => session,
        Err(failure)
            if failure.kind == FailureKind::EmptyResult && !config.site.empty_result_is_failure =>
        {
            warn!("Watchlist was empty, price history left unchanged");
            return Ok(ExportResult {
                history_path: history.path().to_path_buf(),
                outcome: None,
                scraped_rows: 0,
                attempts: failure.attempts,
                restored_session: failure.restored,
            });
        }
        Err(failure) => return Err(failure.into()),
    };

    let outcome = history.update(&session.rows, today)?;

    Ok(ExportResult {
        history_path: history.path().to_path_buf(),
        outcome: Some(outcome),
        scraped_rows: session.rows.len(),
        attempts: session.attempts,
        restored_session: session.restored,
    })
}

/// tower::Serviceを実装したエクスポートサービス
#[derive(Debug, Clone, Default)]
pub struct PriceExportService {}

impl PriceExportService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Service<ExportRequest> for PriceExportService {
    type Response = ExportResult;
    type Error = ExportError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ExportRequest) -> Self::Future {
        info!(
            "Export request received: watchlist={}",
            req.config.site.watchlist_url
        );

        Box::pin(async move {
            let fund_codes = FundCodeCache::load(req.config.fund_code_cache_path());
            let mut scraper = InvestSmartScraper::new(req.config.site.clone(), fund_codes);
            scraper.initialize().await?;

            let result = run_export(scraper, &req.config, req.today).await?;

            info!(
                "Export completed: path={:?}, scraped={}, attempts={}",
                result.history_path, result.scraped_rows, result.attempts
            );
            Ok(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_request_today() {
        let config = Arc::new(Config::default());
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let req = ExportRequest::new(config).with_today(day);
        assert_eq!(req.today, day);
    }

    #[test]
    fn test_error_subjects() {
        let failure = SessionFailure {
            kind: FailureKind::LoginTimeout,
            attempts: 2,
            detail: "My Account not shown".into(),
            restored: false,
        };
        assert_eq!(ExportError::from(failure).subject(), "Login timed out");
        assert_eq!(
            ExportError::from(HistoryError::NoValidRecords { skipped: 3 }).subject(),
            "Price history update failed"
        );
    }
}
