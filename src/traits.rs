use std::time::Duration;

use async_trait::async_trait;

use crate::cookies::StoredCookie;
use crate::error::ScraperError;
use crate::parser::RawRow;

/// ログイン情報
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// 保存済みCookieでのセッション復元結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCheck {
    /// ログイン済みページに到達した
    Valid,
    /// ログインページへリダイレクトされた
    Rejected,
}

/// 対象サイトのブラウザ操作
///
/// 待機のタイムアウトは `ScraperError::Timeout` で返すこと。
/// それ以外のエラーは自動化エラーとして扱われる。
#[async_trait]
pub trait SiteAutomation: Send {
    /// 保存済みCookieを適用してログイン済みか確認
    async fn restore_session(
        &mut self,
        cookies: &[StoredCookie],
        timeout: Duration,
    ) -> Result<SessionCheck, ScraperError>;

    /// ID/パスワードでログイン（ランディング表示まで待機）
    async fn attempt_login(
        &mut self,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<(), ScraperError>;

    /// ウォッチリストを開いて行を取得
    async fn attempt_scrape(&mut self, timeout: Duration) -> Result<Vec<RawRow>, ScraperError>;

    /// 現在のCookieを取得
    async fn export_cookies(&mut self) -> Result<Vec<StoredCookie>, ScraperError>;

    /// リソース解放
    async fn close(&mut self) -> Result<(), ScraperError>;
}
