//! run_export の結合テスト
//!
//! ブラウザの代わりに応答を決め打ちした SiteAutomation を使い、
//! セッション → 解析 → CSV履歴の更新までを実ファイルで確認する。

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use fund_price_scraper::{
    run_export, Config, Credentials, ExportError, FailureKind, HistoryError, RawRow,
    ScraperError, SessionCheck, SiteAutomation, StoredCookie,
};
use tempfile::TempDir;

/// 毎回同じ結果を返す偽サイト
struct ScriptedSite {
    scrape: fn() -> Result<Vec<RawRow>, ScraperError>,
    logins: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedSite {
    fn new(scrape: fn() -> Result<Vec<RawRow>, ScraperError>) -> Self {
        Self {
            scrape,
            logins: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl SiteAutomation for ScriptedSite {
    async fn restore_session(
        &mut self,
        _cookies: &[StoredCookie],
        _timeout: Duration,
    ) -> Result<SessionCheck, ScraperError> {
        Ok(SessionCheck::Rejected)
    }

    async fn attempt_login(
        &mut self,
        _credentials: &Credentials,
        _timeout: Duration,
    ) -> Result<(), ScraperError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn attempt_scrape(&mut self, _timeout: Duration) -> Result<Vec<RawRow>, ScraperError> {
        (self.scrape)()
    }

    async fn export_cookies(&mut self) -> Result<Vec<StoredCookie>, ScraperError> {
        Ok(vec![StoredCookie::new("sid", "abc", ".investsmart.com.au", "/")])
    }

    async fn close(&mut self) -> Result<(), ScraperError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn workspace() -> (TempDir, Config) {
    let dir = TempDir::new().unwrap();
    let yaml = r#"
Site:
  Username: someone@example.com
  Password: hunter2
  MaxAttempts: 1
  RetryBackoff: 0
Files:
  OutputCSV: prices.csv
  DaysToSave: 90
"#;
    let config = Config::from_yaml(yaml).unwrap().with_base_dir(dir.path());
    config.validate().unwrap();
    (dir, config)
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

const EXISTING: &str = "Date,FundIdentifier,Price\n2024-01-01,FundA,100.00\n";

#[tokio::test]
async fn test_end_to_end_merge() {
    let (dir, config) = workspace();
    let csv = dir.path().join("prices.csv");
    std::fs::write(&csv, EXISTING).unwrap();

    let site = ScriptedSite::new(|| {
        Ok(vec![
            RawRow::new("FundA", "01/01/2024", "$101.00"),
            RawRow::new("FundA", "2024-01-02", "102.00"),
            RawRow::new("FundB", "2024-01-02", "n/a"),
        ])
    });
    let closed = site.closed.clone();

    let result = run_export(site, &config, today()).await.unwrap();
    let outcome = result.outcome.unwrap();
    assert_eq!(outcome.total, 2);
    assert_eq!(outcome.skipped_new, 1);
    assert_eq!(result.scraped_rows, 3);
    assert_eq!(closed.load(Ordering::SeqCst), 1);

    assert_eq!(
        read(&csv),
        "Date,FundIdentifier,Price\n2024-01-01,FundA,101.00\n2024-01-02,FundA,102.00\n"
    );
    // ログイン後のCookieが保存される
    assert!(dir.path().join("cookies.json").exists());
}

#[tokio::test]
async fn test_empty_watchlist_is_tolerated_by_default() {
    let (dir, config) = workspace();
    let csv = dir.path().join("prices.csv");
    std::fs::write(&csv, EXISTING).unwrap();

    let result = run_export(ScriptedSite::new(|| Ok(Vec::new())), &config, today())
        .await
        .unwrap();
    assert!(result.outcome.is_none());
    assert_eq!(read(&csv), EXISTING);
}

#[tokio::test]
async fn test_empty_watchlist_can_be_fatal() {
    let (_dir, mut config) = workspace();
    config.site.empty_result_is_failure = true;

    let err = run_export(ScriptedSite::new(|| Ok(Vec::new())), &config, today())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExportError::Session(ref f) if f.kind == FailureKind::EmptyResult
    ));
}

#[tokio::test]
async fn test_session_failure_leaves_history_untouched() {
    let (dir, config) = workspace();
    let csv = dir.path().join("prices.csv");
    std::fs::write(&csv, EXISTING).unwrap();

    let site = ScriptedSite::new(|| Err(ScraperError::JavaScript("table script failed".into())));
    let err = run_export(site, &config, today()).await.unwrap_err();
    assert!(matches!(
        err,
        ExportError::Session(ref f) if f.kind == FailureKind::AutomationError
    ));
    assert_eq!(read(&csv), EXISTING);
}

#[tokio::test]
async fn test_all_rows_malformed_keeps_prior_file() {
    let (dir, config) = workspace();
    let csv = dir.path().join("prices.csv");
    std::fs::write(&csv, EXISTING).unwrap();

    let site = ScriptedSite::new(|| Ok(vec![RawRow::new("FundA", "2024-01-02", "n/a")]));
    let err = run_export(site, &config, today()).await.unwrap_err();
    assert!(matches!(
        err,
        ExportError::History(HistoryError::NoValidRecords { skipped: 1 })
    ));
    assert_eq!(read(&csv), EXISTING);
}

#[tokio::test]
async fn test_foreign_history_file_aborts_before_login() {
    let (dir, config) = workspace();
    std::fs::write(
        dir.path().join("prices.csv"),
        "Symbol,Date,Name,Currency,Price\n",
    )
    .unwrap();

    let site = ScriptedSite::new(|| Ok(vec![RawRow::new("FundA", "2024-01-02", "1.00")]));
    let logins = site.logins.clone();

    let err = run_export(site, &config, today()).await.unwrap_err();
    assert!(matches!(
        err,
        ExportError::History(HistoryError::HeaderMismatch { .. })
    ));
    assert_eq!(logins.load(Ordering::SeqCst), 0);
}
