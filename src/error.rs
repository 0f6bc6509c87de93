use std::path::PathBuf;

use thiserror::Error;

/// ブラウザ自動化レイヤーのエラー
#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("browser initialisation failed: {0}")]
    BrowserInit(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("login failed: {0}")]
    Login(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("JavaScript evaluation failed: {0}")]
    JavaScript(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("file I/O error: {0}")]
    FileIO(#[from] std::io::Error),
}

impl ScraperError {
    /// ページ待機のタイムアウトかどうか
    pub fn is_timeout(&self) -> bool {
        matches!(self, ScraperError::Timeout(_))
    }
}

/// CSV履歴ファイルのエラー
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("history file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("unexpected header in history file {path:?} (found {found:?})")]
    HeaderMismatch { path: PathBuf, found: Vec<String> },

    #[error("no valid new records ({skipped} rows skipped)")]
    NoValidRecords { skipped: usize },

    #[error("could not replace history file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// 通知送信のエラー（ログのみ、終了コードには影響しない）
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("could not build email: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("SMTP send failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("notification task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// 設定ファイルのエラー
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0:?}")]
    NotFound(PathBuf),

    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config value {section}.{key}: {message}")]
    Invalid {
        section: &'static str,
        key: &'static str,
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(section: &'static str, key: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            section,
            key,
            message: message.into(),
        }
    }
}
