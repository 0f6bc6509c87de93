//! ログイン・スクレイプのセッション状態機械
//!
//! ```text
//! Init ─(Cookie復元OK)──────────────┐
//!   └─> LoggingIn ─> Authenticated <┘─> Scraping ─> Success
//!            │                              │
//!            └──────> Failed(kind) <────────┘
//! ```
//!
//! 失敗時は同じブラウザセッションのまま全体を `max_attempts` 回まで再試行する。
//! `EmptyResult` は再試行しない。

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::SiteConfig;
use crate::cookies::CookieCache;
use crate::error::ScraperError;
use crate::parser::RawRow;
use crate::traits::{Credentials, SessionCheck, SiteAutomation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    LoginTimeout,
    ScrapeTimeout,
    EmptyResult,
    AutomationError,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, FailureKind::EmptyResult)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::LoginTimeout => "login timeout",
            FailureKind::ScrapeTimeout => "scrape timeout",
            FailureKind::EmptyResult => "empty result",
            FailureKind::AutomationError => "automation error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    LoggingIn,
    Authenticated,
    Scraping,
    Success,
    Failed(FailureKind),
}

/// セッション失敗の分類と詳細（通知本文にも使う）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} after {attempts} attempt(s): {detail}")]
pub struct SessionFailure {
    pub kind: FailureKind,
    pub attempts: u32,
    pub detail: String,
    /// 最後の試行で保存済みCookieによりログインを省略したか
    pub restored: bool,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub credentials: Credentials,
    pub long_wait: Duration,
    pub short_wait: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl SessionSettings {
    pub fn from_config(site: &SiteConfig) -> Self {
        Self {
            credentials: Credentials::new(&site.username, &site.password),
            long_wait: site.long_wait(),
            short_wait: site.short_wait(),
            max_attempts: site.max_attempts,
            backoff: site.backoff(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub rows: Vec<RawRow>,
    pub attempts: u32,
    /// 保存済みCookieでログインを省略したか
    pub restored: bool,
}

pub struct SessionRunner<A> {
    automation: A,
    settings: SessionSettings,
    cookies: Option<CookieCache>,
    states: Vec<SessionState>,
    restored: bool,
}

impl<A: SiteAutomation> SessionRunner<A> {
    pub fn new(automation: A, settings: SessionSettings) -> Self {
        Self {
            automation,
            settings,
            cookies: None,
            states: Vec::new(),
            restored: false,
        }
    }

    pub fn with_cookie_cache(mut self, cache: CookieCache) -> Self {
        self.cookies = Some(cache);
        self
    }

    /// 通過した状態の履歴（全試行分）
    pub fn states(&self) -> &[SessionState] {
        &self.states
    }

    pub fn state(&self) -> SessionState {
        self.states.last().copied().unwrap_or(SessionState::Init)
    }

    pub fn automation(&self) -> &A {
        &self.automation
    }

    pub fn automation_mut(&mut self) -> &mut A {
        &mut self.automation
    }

    pub async fn run(&mut self) -> Result<SessionOutcome, SessionFailure> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.run_once().await {
                Ok((rows, restored)) => {
                    info!("Scraped {} rows on attempt {}", rows.len(), attempt);
                    return Ok(SessionOutcome {
                        rows,
                        attempts: attempt,
                        restored,
                    });
                }
                Err((kind, detail)) if kind.is_retryable() && attempt < max_attempts => {
                    let backoff = self.settings.backoff * 2u32.pow(attempt - 1);
                    warn!(
                        "Attempt {}/{} failed ({}), retrying in {:?}: {}",
                        attempt, max_attempts, kind, backoff, detail
                    );
                    sleep(backoff).await;
                }
                Err((kind, detail)) => {
                    return Err(SessionFailure {
                        kind,
                        attempts: attempt,
                        detail,
                        restored: self.restored,
                    });
                }
            }
        }
    }

    async fn run_once(&mut self) -> Result<(Vec<RawRow>, bool), (FailureKind, String)> {
        self.transition(SessionState::Init);

        let restored = self.try_restore().await;
        self.restored = restored;
        if !restored {
            self.transition(SessionState::LoggingIn);
            let credentials = self.settings.credentials.clone();
            if let Err(e) = self
                .automation
                .attempt_login(&credentials, self.settings.long_wait)
                .await
            {
                return Err(self.fail(e, FailureKind::LoginTimeout).await);
            }
            info!("Logged in as {}", credentials.username);
            self.save_cookies().await;
        }
        self.transition(SessionState::Authenticated);

        self.transition(SessionState::Scraping);
        let rows = match self.automation.attempt_scrape(self.settings.short_wait).await {
            Ok(rows) => rows,
            Err(e) if e.is_timeout() => {
                warn!("Watchlist did not load ({}), retrying navigation once", e);
                match self.automation.attempt_scrape(self.settings.short_wait).await {
                    Ok(rows) => rows,
                    Err(e) => return Err(self.fail(e, FailureKind::ScrapeTimeout).await),
                }
            }
            Err(e) => return Err(self.fail(e, FailureKind::ScrapeTimeout).await),
        };

        if rows.is_empty() {
            warn!("Watchlist table contained no rows");
            self.transition(SessionState::Failed(FailureKind::EmptyResult));
            return Err((
                FailureKind::EmptyResult,
                "watchlist returned no rows".to_string(),
            ));
        }

        self.transition(SessionState::Success);
        Ok((rows, restored))
    }

    /// 保存済みCookieでの復元を試す。失敗時はキャッシュを消してログインへ。
    async fn try_restore(&mut self) -> bool {
        let Some(cache) = self.cookies.clone() else {
            return false;
        };

        let cookies = match cache.load() {
            Ok(cookies) if !cookies.is_empty() => cookies,
            Ok(_) => {
                debug!("No cached cookies, proceeding with login");
                return false;
            }
            Err(e) => {
                warn!("Could not read cookie cache {}: {}", cache.path().display(), e);
                return false;
            }
        };

        let check = self
            .automation
            .restore_session(&cookies, self.settings.long_wait)
            .await;
        match check {
            Ok(SessionCheck::Valid) => {
                info!("Login skipped by applying cached cookies");
                return true;
            }
            Ok(SessionCheck::Rejected) => {
                info!("Cached cookies were rejected, proceeding to login");
            }
            Err(e) => {
                warn!("Session restore failed, proceeding to login: {}", e);
            }
        }

        if let Err(e) = cache.delete() {
            warn!("Could not delete cookie cache: {}", e);
        }
        false
    }

    async fn save_cookies(&mut self) {
        let Some(cache) = self.cookies.clone() else {
            return;
        };
        match self.automation.export_cookies().await {
            Ok(cookies) => {
                if let Err(e) = cache.save(&cookies) {
                    warn!("Could not save cookies: {}", e);
                }
            }
            Err(e) => warn!("Could not read browser cookies: {}", e),
        }
    }

    /// エラーを分類して `Failed` へ遷移する
    async fn fail(&mut self, error: ScraperError, timeout_kind: FailureKind) -> (FailureKind, String) {
        let kind = if error.is_timeout() {
            timeout_kind
        } else {
            FailureKind::AutomationError
        };

        if kind == FailureKind::AutomationError {
            // 調査用に現在のCookieを残す
            self.save_cookies().await;
        }

        error!("Session failed ({}): {}", kind, error);
        self.transition(SessionState::Failed(kind));
        (kind, error.to_string())
    }

    fn transition(&mut self, state: SessionState) {
        debug!("Session state: {:?} -> {:?}", self.state(), state);
        self.states.push(state);
    }
}
