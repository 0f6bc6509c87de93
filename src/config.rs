//! YAML設定ファイル
//!
//! 旧スクリプトの `config.yaml` と同じキー名（PascalCase）を読み込む。
//! 読み込み後に `validate` を通したものだけをコアに渡す。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::logging::Verbosity;

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

const DEFAULT_LOGIN_URL: &str = "https://www.investsmart.com.au/identity/logon";
const DEFAULT_WATCHLIST_URL: &str =
    "https://www.investsmart.com.au/portfolio-manager/watchlist/funds/850523?PortfolioID=184911";

/// サイト接続・セッション設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SiteConfig {
    pub headless_mode: bool,
    #[serde(rename = "LoginURL")]
    pub login_url: String,
    #[serde(rename = "WatchlistURL")]
    pub watchlist_url: String,
    /// ログイン・セッション復元の待機（秒）
    pub long_page_load: u64,
    /// ウォッチリスト表示の待機（秒）
    pub short_page_load: u64,
    pub username: String,
    pub password: String,
    /// セッション全体の最大試行回数
    pub max_attempts: u32,
    /// 再試行間の初期バックオフ（秒）
    pub retry_backoff: u64,
    /// 空のウォッチリストを失敗として扱うか
    pub empty_result_is_failure: bool,
    /// タイムアウト時にスクリーンショットをdebugログへ出力
    pub debug_screenshots: bool,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            headless_mode: true,
            login_url: DEFAULT_LOGIN_URL.to_string(),
            watchlist_url: DEFAULT_WATCHLIST_URL.to_string(),
            long_page_load: 30,
            short_page_load: 10,
            username: String::new(),
            password: String::new(),
            max_attempts: 2,
            retry_backoff: 5,
            empty_result_is_failure: false,
            debug_screenshots: false,
        }
    }
}

impl SiteConfig {
    pub fn long_wait(&self) -> Duration {
        Duration::from_secs(self.long_page_load)
    }

    pub fn short_wait(&self) -> Duration {
        Duration::from_secs(self.short_page_load)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff)
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless_mode = headless;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }
}

/// ファイル・ログ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FilesConfig {
    #[serde(rename = "OutputCSV")]
    pub output_csv: PathBuf,
    /// 保持日数（0 = 無制限）
    pub days_to_save: u32,
    pub logfile_name: Option<PathBuf>,
    /// ログファイルの最大行数（0 = 無制限）
    pub logfile_max_lines: usize,
    pub logfile_verbosity: Verbosity,
    pub console_verbosity: Verbosity,
    /// セッションCookieのキャッシュ（None = 毎回ログイン）
    pub cookie_file: Option<PathBuf>,
    pub fund_code_cache: PathBuf,
    pub failure_marker: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            output_csv: PathBuf::from("price_data.csv"),
            days_to_save: 30,
            logfile_name: Some(PathBuf::from("fund_price_scraper.log")),
            logfile_max_lines: 500,
            logfile_verbosity: Verbosity::Detailed,
            console_verbosity: Verbosity::Summary,
            cookie_file: Some(PathBuf::from("cookies.json")),
            fund_code_cache: PathBuf::from("fund_code_cache.json"),
            failure_marker: PathBuf::from("last_failure.txt"),
        }
    }
}

/// メール通知設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EmailConfig {
    pub enable_email: bool,
    pub send_emails_to: Option<String>,
    #[serde(rename = "SMTPServer")]
    pub smtp_server: Option<String>,
    #[serde(rename = "SMTPPort")]
    pub smtp_port: Option<u16>,
    #[serde(rename = "SMTPUsername")]
    pub smtp_username: Option<String>,
    #[serde(rename = "SMTPPassword")]
    pub smtp_password: Option<String>,
    pub subject_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    #[serde(default, alias = "InvestSmart")]
    pub site: SiteConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub email: EmailConfig,
    /// 相対パスの基準ディレクトリ（設定ファイルの場所）
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Config {
    /// 設定ファイルを読み込んで検証する
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&text)?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.validate()?;

        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// YAML文字列を解析する（検証は行わない）
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// 相対パスを設定ファイルのディレクトリ基準で解決する
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn history_path(&self) -> PathBuf {
        self.resolve_path(&self.files.output_csv)
    }

    pub fn cookie_path(&self) -> Option<PathBuf> {
        self.files.cookie_file.as_deref().map(|p| self.resolve_path(p))
    }

    pub fn fund_code_cache_path(&self) -> PathBuf {
        self.resolve_path(&self.files.fund_code_cache)
    }

    pub fn failure_marker_path(&self) -> PathBuf {
        self.resolve_path(&self.files.failure_marker)
    }

    pub fn logfile_path(&self) -> Option<PathBuf> {
        self.files.logfile_name.as_deref().map(|p| self.resolve_path(p))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let site = &self.site;
        require_value("Site", "LoginURL", &site.login_url)?;
        require_value("Site", "WatchlistURL", &site.watchlist_url)?;
        require_value("Site", "Username", &site.username)?;
        require_value("Site", "Password", &site.password)?;

        if site.long_page_load == 0 {
            return Err(ConfigError::invalid("Site", "LongPageLoad", "must be greater than 0"));
        }
        if site.short_page_load == 0 {
            return Err(ConfigError::invalid("Site", "ShortPageLoad", "must be greater than 0"));
        }
        if !(1..=10).contains(&site.max_attempts) {
            return Err(ConfigError::invalid("Site", "MaxAttempts", "must be between 1 and 10"));
        }

        let files = &self.files;
        if files.output_csv.as_os_str().is_empty() {
            return Err(ConfigError::invalid("Files", "OutputCSV", "is required"));
        }
        if files.days_to_save > 365 {
            return Err(ConfigError::invalid("Files", "DaysToSave", "must be between 0 and 365"));
        }
        if files.logfile_max_lines > 100_000 {
            return Err(ConfigError::invalid(
                "Files",
                "LogfileMaxLines",
                "must be between 0 and 100000",
            ));
        }
        if files.console_verbosity == Verbosity::None {
            return Err(ConfigError::invalid(
                "Files",
                "ConsoleVerbosity",
                "\"none\" is only allowed for the log file",
            ));
        }

        let email = &self.email;
        if let Some(port) = email.smtp_port {
            if !(25..=1000).contains(&port) {
                return Err(ConfigError::invalid("Email", "SMTPPort", "must be between 25 and 1000"));
            }
        }
        if email.enable_email {
            require_option("Email", "SendEmailsTo", &email.send_emails_to)?;
            require_option("Email", "SMTPServer", &email.smtp_server)?;
            require_option("Email", "SMTPUsername", &email.smtp_username)?;
            require_option("Email", "SMTPPassword", &email.smtp_password)?;
        }

        Ok(())
    }

    /// プレースホルダー入りのテンプレート設定
    pub fn template() -> Self {
        let mut config = Self::default();
        config.site.username = "<Your InvestSmart Username>".to_string();
        config.site.password = "<Your InvestSmart Password>".to_string();
        config.email.send_emails_to = Some("<Your email address here>".to_string());
        config.email.smtp_username = Some("<Your SMTP username here>".to_string());
        config.email.smtp_password = Some("<Your SMTP password here>".to_string());
        config
    }

    /// テンプレートを書き出す（既存ファイルは上書きしない）
    pub fn write_template(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Err(ConfigError::invalid(
                "Config",
                "Path",
                format!("{} already exists", path.display()),
            ));
        }
        let yaml = serde_yaml::to_string(&Self::template())?;
        std::fs::write(path, yaml)?;
        Ok(())
    }
}

fn is_placeholder(value: &str) -> bool {
    let value = value.trim();
    value.starts_with('<') && value.ends_with('>')
}

fn require_value(section: &'static str, key: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::invalid(section, key, "is required"));
    }
    if is_placeholder(value) {
        return Err(ConfigError::invalid(section, key, "still contains the template placeholder"));
    }
    Ok(())
}

fn require_option(
    section: &'static str,
    key: &'static str,
    value: &Option<String>,
) -> Result<(), ConfigError> {
    match value {
        Some(v) => require_value(section, key, v),
        None => Err(ConfigError::invalid(section, key, "is required when EnableEmail is true")),
    }
}
