//! InvestSmart スクレイパー実装
//!
//! ログイン（またはCookie復元）してウォッチリストの基準価額を取得する

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Local;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, TimeSinceEpoch};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tempfile::TempDir;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::SiteConfig;
use crate::cookies::StoredCookie;
use crate::error::ScraperError;
use crate::parser::RawRow;
use crate::traits::{Credentials, SessionCheck, SiteAutomation};

use super::fund_codes::FundCodeCache;
use super::watchlist::{extract_entries, WatchlistEntry, WatchlistTable, EXTRACT_TABLE_JS};

/// ログイン後のページにだけ表示される「My Account」
const LOGIN_INDICATOR_JS: &str = r#"
    Array.from(document.querySelectorAll('span'))
        .some(s => s.textContent.trim() === 'My Account')
"#;
const EMAIL_FIELD: &str = "input[name='Email']";
const PASSWORD_FIELD: &str = "input[name='Password']";
const LOGIN_BUTTON: &str = "#loginBtn";
const WATCHLIST_TABLE: &str = "table[data-sortable-name='watchlist']";
const DETAIL_TABLE: &str = "table.table-performance";
const APIR_CODE_JS: &str = r#"
    (() => {
        const label = document.querySelector("label[for='Fund_APIRCode']");
        const row = label ? label.closest('tr') : null;
        const cells = row ? row.querySelectorAll('td') : [];
        return cells.length >= 2 ? cells[1].textContent.trim() : '';
    })()
"#;

/// ログインページのパス（リダイレクト判定用）
const LOGIN_PATH: &str = "/identity/logon";
/// 提携サイトへ飛ばされることがある
const PARTNER_REDIRECT: &str = "https://www.fundlater.com.au/";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

const POLL_INTERVAL_MS: u64 = 500;
const DETAIL_PAGE_WAIT_SECS: u64 = 10;

pub struct InvestSmartScraper {
    config: SiteConfig,
    fund_codes: FundCodeCache,
    browser: Option<Browser>,
    page: Option<Arc<Page>>,
    /// Chromeのユーザーデータ。`close` で削除される
    profile: Option<TempDir>,
}

impl InvestSmartScraper {
    pub fn new(config: SiteConfig, fund_codes: FundCodeCache) -> Self {
        Self {
            config,
            fund_codes,
            browser: None,
            page: None,
            profile: None,
        }
    }

    /// ブラウザを初期化
    pub async fn initialize(&mut self) -> Result<(), ScraperError> {
        info!("Initializing browser...");

        // 実行ごとに使い捨てのユーザーデータディレクトリ
        let profile = tempfile::Builder::new()
            .prefix("fund-price-scraper-")
            .tempdir()?;

        let mut builder = BrowserConfig::builder()
            .user_data_dir(profile.path())
            .window_size(1280, 1024)
            .no_sandbox()
            .request_timeout(Duration::from_secs(60))
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg(format!("--user-agent={}", USER_AGENT));

        // Chrome パスは環境変数で上書き可能
        if let Ok(path) = std::env::var("CHROME_PATH") {
            builder = builder.chrome_executable(path);
        }

        if !self.config.headless_mode {
            builder = builder.with_head();
        }

        let browser_config = builder
            .build()
            .map_err(|e| ScraperError::BrowserInit(format!("invalid browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

        // ブラウザイベントハンドラをバックグラウンドで実行
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("Browser event: {:?}", event);
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

        self.browser = Some(browser);
        self.page = Some(Arc::new(page));
        self.profile = Some(profile);

        info!("Browser initialized");
        Ok(())
    }

    fn get_page(&self) -> Result<Arc<Page>, ScraperError> {
        self.page
            .clone()
            .ok_or_else(|| ScraperError::BrowserInit("browser not initialised".into()))
    }

    async fn goto(page: &Page, url: &str) -> Result<(), ScraperError> {
        page.goto(url)
            .await
            .map_err(|e| ScraperError::Navigation(format!("{}: {}", url, e)))?;
        Ok(())
    }

    async fn current_url(page: &Page) -> Result<String, ScraperError> {
        let url = page
            .evaluate("window.location.href")
            .await
            .map_err(|e| ScraperError::JavaScript(e.to_string()))?;
        Ok(url.into_value::<String>().unwrap_or_default())
    }

    async fn eval_bool(page: &Page, script: &str) -> Result<bool, ScraperError> {
        let result = page
            .evaluate(script)
            .await
            .map_err(|e| ScraperError::JavaScript(e.to_string()))?;
        Ok(result.into_value::<bool>().unwrap_or(false))
    }

    /// 条件式がtrueになるまでポーリング
    async fn wait_until(
        page: &Page,
        condition: &str,
        timeout: Duration,
        what: &str,
    ) -> Result<(), ScraperError> {
        let start = Instant::now();
        loop {
            match Self::eval_bool(page, condition).await {
                Ok(true) => {
                    debug!("{} ready after {:?}", what, start.elapsed());
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => debug!("Wait check for {} failed: {}", what, e),
            }

            if start.elapsed() >= timeout {
                return Err(ScraperError::Timeout(format!(
                    "{} not shown within {}s",
                    what,
                    timeout.as_secs()
                )));
            }
            sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
    }

    async fn wait_for_selector(
        page: &Page,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), ScraperError> {
        let condition = format!(
            "document.querySelector({}) !== null",
            serde_json::to_string(selector)?
        );
        Self::wait_until(page, &condition, timeout, selector).await
    }

    /// デバッグスクリーンショット
    async fn debug_screenshot(&self, page: &Page, label: &str) {
        if !self.config.debug_screenshots {
            return;
        }
        if let Ok(screenshot) = page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
        {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&screenshot);
            debug!("{} screenshot: data:image/png;base64,{}", label, encoded);
        }
    }

    /// ファンド名からAPIRコードを解決（キャッシュ → 詳細ページ）
    async fn resolve_fund_code(&mut self, entry: &WatchlistEntry) -> Option<String> {
        if let Some(code) = self.fund_codes.get(&entry.fund_name) {
            return Some(code.to_string());
        }

        let url = entry.detail_url.as_deref()?;
        let browser = self.browser.as_ref()?;
        debug!("Opening detail page for {}: {}", entry.fund_name, url);

        let page = match browser.new_page(url).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Could not open detail page for {}: {}", entry.fund_name, e);
                return None;
            }
        };

        let wait = Duration::from_secs(DETAIL_PAGE_WAIT_SECS);
        let code = match Self::wait_for_selector(&page, DETAIL_TABLE, wait).await {
            Ok(()) => page
                .evaluate(APIR_CODE_JS)
                .await
                .ok()
                .and_then(|v| v.into_value::<String>().ok())
                .filter(|c| !c.is_empty()),
            Err(e) => {
                warn!("Detail page for {} did not load: {}", entry.fund_name, e);
                None
            }
        };

        if let Err(e) = page.close().await {
            debug!("Failed to close detail page: {}", e);
        }

        let code = code?;
        if let Err(e) = self.fund_codes.insert(&entry.fund_name, &code) {
            warn!("Could not update fund code cache: {}", e);
        }
        Some(code)
    }
}

/// 保存形式からCDPのCookieへ。期限なしはセッションCookieになる。
fn cookie_param(cookie: &StoredCookie) -> Result<CookieParam, String> {
    let mut builder = CookieParam::builder()
        .name(&cookie.name)
        .value(&cookie.value)
        .domain(&cookie.domain)
        .path(&cookie.path)
        .secure(cookie.secure)
        .http_only(cookie.http_only);
    if let Some(expires) = cookie.expires {
        builder = builder.expires(TimeSinceEpoch::new(expires));
    }
    builder.build()
}

#[async_trait]
impl SiteAutomation for InvestSmartScraper {
    async fn restore_session(
        &mut self,
        cookies: &[StoredCookie],
        timeout: Duration,
    ) -> Result<SessionCheck, ScraperError> {
        let page = self.get_page()?;

        // Cookieのドメインを確定させるため一度開く
        Self::goto(&page, &self.config.watchlist_url).await?;

        for cookie in cookies {
            match cookie_param(cookie) {
                Ok(param) => {
                    if let Err(e) = page.set_cookie(param).await {
                        debug!("Failed to set cookie {}: {}", cookie.name, e);
                    }
                }
                Err(e) => debug!("Invalid cookie {}: {}", cookie.name, e),
            }
        }

        Self::goto(&page, &self.config.watchlist_url).await?;

        let url = Self::current_url(&page).await?;
        if url.contains(LOGIN_PATH) {
            debug!("Redirected to login page: {}", url);
            return Ok(SessionCheck::Rejected);
        }

        match Self::wait_until(&page, LOGIN_INDICATOR_JS, timeout, "My Account").await {
            Ok(()) => Ok(SessionCheck::Valid),
            Err(e) if e.is_timeout() => Ok(SessionCheck::Rejected),
            Err(e) => Err(e),
        }
    }

    async fn attempt_login(
        &mut self,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<(), ScraperError> {
        let page = self.get_page()?;
        info!("Loading login page {}", self.config.login_url);
        Self::goto(&page, &self.config.login_url).await?;
        sleep(Duration::from_secs(2)).await;

        if let Err(e) = Self::wait_for_selector(&page, EMAIL_FIELD, timeout).await {
            if !e.is_timeout() {
                return Err(e);
            }
            // ログインフォームが出ない場合は既にログイン済みの可能性
            let short = self.config.short_wait();
            return match Self::wait_until(&page, LOGIN_INDICATOR_JS, short, "My Account").await {
                Ok(()) => {
                    info!("Already logged in, skipping login form");
                    Ok(())
                }
                Err(_) => {
                    self.debug_screenshot(&page, "Login form").await;
                    Err(e)
                }
            };
        }

        page.find_element(EMAIL_FIELD)
            .await
            .map_err(|e| ScraperError::ElementNotFound(format!("email field: {}", e)))?
            .click()
            .await
            .map_err(|e| ScraperError::Login(format!("clicking email field: {}", e)))?
            .type_str(&credentials.username)
            .await
            .map_err(|e| ScraperError::Login(format!("typing email: {}", e)))?;
        debug!("Username entered");

        let password = page
            .find_element(PASSWORD_FIELD)
            .await
            .map_err(|e| ScraperError::ElementNotFound(format!("password field: {}", e)))?;
        password
            .click()
            .await
            .map_err(|e| ScraperError::Login(format!("clicking password field: {}", e)))?
            .type_str(&credentials.password)
            .await
            .map_err(|e| ScraperError::Login(format!("typing password: {}", e)))?;
        debug!("Password entered");

        // まずEnterで送信し、フォームが残っていればボタンをクリック
        if let Err(e) = password.press_key("Enter").await {
            debug!("Submitting with Enter failed: {}", e);
        }
        sleep(self.config.short_wait()).await;

        let form_check = format!(
            "document.querySelector({}) !== null",
            serde_json::to_string(EMAIL_FIELD)?
        );
        let form_still_shown = Self::eval_bool(&page, &form_check).await.unwrap_or(false);
        if form_still_shown {
            debug!("Login form still present, clicking login button");
            page.find_element(LOGIN_BUTTON)
                .await
                .map_err(|e| ScraperError::ElementNotFound(format!("login button: {}", e)))?
                .click()
                .await
                .map_err(|e| ScraperError::Login(format!("clicking login button: {}", e)))?;
        }

        if let Err(e) = Self::wait_until(&page, LOGIN_INDICATOR_JS, timeout, "My Account").await {
            self.debug_screenshot(&page, "Post-login").await;
            return Err(e);
        }

        info!("Login completed");
        Ok(())
    }

    async fn attempt_scrape(&mut self, timeout: Duration) -> Result<Vec<RawRow>, ScraperError> {
        let page = self.get_page()?;
        info!("Loading watchlist {}", self.config.watchlist_url);
        Self::goto(&page, &self.config.watchlist_url).await?;

        let url = Self::current_url(&page).await?;
        if url.starts_with(PARTNER_REDIRECT) {
            info!("Redirected to {}, loading watchlist again", url);
            Self::goto(&page, &self.config.watchlist_url).await?;
        }

        if let Err(e) = Self::wait_for_selector(&page, WATCHLIST_TABLE, timeout).await {
            self.debug_screenshot(&page, "Watchlist").await;
            return Err(e);
        }
        sleep(Duration::from_secs(1)).await;

        let json = page
            .evaluate(EXTRACT_TABLE_JS)
            .await
            .map_err(|e| ScraperError::JavaScript(e.to_string()))?
            .into_value::<String>()
            .map_err(|e| ScraperError::Extraction(e.to_string()))?;
        let table: WatchlistTable = serde_json::from_str(&json)?;

        let today = Local::now().format("%Y-%m-%d").to_string();
        let entries = extract_entries(&table, &today)?;
        info!("Found {} funds in watchlist", entries.len());

        let mut rows = Vec::with_capacity(entries.len());
        for entry in entries {
            let fund = match self.resolve_fund_code(&entry).await {
                Some(code) => code,
                None => {
                    warn!("No APIR code found for {}, using fund name", entry.fund_name);
                    entry.fund_name.clone()
                }
            };
            debug!("{} ({}) = {} on {}", entry.fund_name, fund, entry.price, entry.date);
            rows.push(RawRow::new(fund, entry.date, entry.price));
        }

        Ok(rows)
    }

    async fn export_cookies(&mut self) -> Result<Vec<StoredCookie>, ScraperError> {
        let page = self.get_page()?;
        let cookies = page
            .get_cookies()
            .await
            .map_err(|e| ScraperError::Session(e.to_string()))?;

        Ok(cookies
            .into_iter()
            .map(|c| StoredCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
                expires: (c.expires > 0.0).then_some(c.expires),
            })
            .collect())
    }

    async fn close(&mut self) -> Result<(), ScraperError> {
        info!("Closing browser...");

        self.page = None;
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                debug!("Failed to close browser: {}", e);
            }
            if let Err(e) = browser.wait().await {
                debug!("Failed to wait for browser exit: {}", e);
            }
        }
        if let Some(profile) = self.profile.take() {
            let path = profile.path().to_path_buf();
            if let Err(e) = profile.close() {
                warn!("Could not remove browser profile {}: {}", path.display(), e);
            }
        }

        info!("Browser closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scraper_new() {
        let dir = tempfile::tempdir().unwrap();
        let codes = FundCodeCache::load(dir.path().join("codes.json"));
        let scraper = InvestSmartScraper::new(SiteConfig::default(), codes);
        assert!(scraper.browser.is_none());
        assert!(scraper.page.is_none());
        assert!(scraper.get_page().is_err());
    }

    #[test]
    fn test_cookie_param_keeps_expiry() {
        let mut cookie = StoredCookie::new("sid", "abc", ".investsmart.com.au", "/");
        let session = cookie_param(&cookie).unwrap();
        assert!(session.expires.is_none());

        cookie.expires = Some(1_893_456_000.0);
        let persistent = cookie_param(&cookie).unwrap();
        assert_eq!(persistent.expires, Some(TimeSinceEpoch::new(1_893_456_000.0)));
        assert_eq!(persistent.domain.as_deref(), Some(".investsmart.com.au"));
    }

    #[tokio::test]
    async fn test_close_removes_browser_profile() {
        let dir = tempfile::tempdir().unwrap();
        let mut scraper = InvestSmartScraper::new(
            SiteConfig::default(),
            FundCodeCache::load(dir.path().join("codes.json")),
        );
        let profile = tempfile::Builder::new()
            .prefix("fund-price-scraper-")
            .tempdir()
            .unwrap();
        let profile_path = profile.path().to_path_buf();
        std::fs::write(profile_path.join("Local State"), "{}").unwrap();
        scraper.profile = Some(profile);

        scraper.close().await.unwrap();
        assert!(!profile_path.exists());
        assert!(scraper.profile.is_none());
    }

    #[tokio::test]
    async fn test_cached_fund_code_skips_browser() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codes.json");
        let mut codes = FundCodeCache::load(&path);
        codes.insert("Alpha Fund", "ALP0001AU").unwrap();

        let mut scraper = InvestSmartScraper::new(SiteConfig::default(), codes);
        let entry = WatchlistEntry {
            fund_name: "Alpha Fund".into(),
            detail_url: Some("https://example.com/alpha".into()),
            price: "1.00".into(),
            date: "2024-01-02".into(),
        };
        assert_eq!(scraper.resolve_fund_code(&entry).await.as_deref(), Some("ALP0001AU"));

        // キャッシュに無く、ブラウザも無ければ解決できない
        let unknown = WatchlistEntry {
            fund_name: "Beta Fund".into(),
            ..entry
        };
        assert_eq!(scraper.resolve_fund_code(&unknown).await, None);
    }

    #[tokio::test]
    #[ignore] // 実環境テスト用: INVESTSMART_USERNAME / INVESTSMART_PASSWORD を設定して --ignored で実行
    async fn test_investsmart_scraper() {
        let username = std::env::var("INVESTSMART_USERNAME").expect("INVESTSMART_USERNAME not set");
        let password = std::env::var("INVESTSMART_PASSWORD").expect("INVESTSMART_PASSWORD not set");

        let dir = tempfile::tempdir().unwrap();
        let config = SiteConfig::default().with_credentials(&username, &password);
        let long_wait = config.long_wait();
        let short_wait = config.short_wait();
        let mut scraper =
            InvestSmartScraper::new(config, FundCodeCache::load(dir.path().join("codes.json")));

        scraper.initialize().await.expect("Failed to initialize browser");
        scraper
            .attempt_login(&Credentials::new(username, password), long_wait)
            .await
            .expect("Login failed");
        let rows = scraper.attempt_scrape(short_wait).await.expect("Scrape failed");
        println!("Rows: {:?}", rows);
        scraper.close().await.unwrap();
    }
}
