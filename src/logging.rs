//! ログ出力（コンソール + ファイル）
//!
//! 旧スクリプトの冗長度名を tracing のレベルに対応付ける:
//!
//! | 設定値    | レベル |
//! |-----------|--------|
//! | error     | ERROR  |
//! | warning   | WARN   |
//! | summary   | INFO   |
//! | detailed  | DEBUG  |
//! | debug/all | TRACE  |
//! | none      | (出力なし、ファイルのみ) |

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    None,
    Error,
    Warning,
    Summary,
    Detailed,
    Debug,
    All,
}

impl Verbosity {
    pub fn level_filter(self) -> LevelFilter {
        match self {
            Verbosity::None => LevelFilter::OFF,
            Verbosity::Error => LevelFilter::ERROR,
            Verbosity::Warning => LevelFilter::WARN,
            Verbosity::Summary => LevelFilter::INFO,
            Verbosity::Detailed => LevelFilter::DEBUG,
            Verbosity::Debug | Verbosity::All => LevelFilter::TRACE,
        }
    }
}

/// ログ出力設定
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub console: Verbosity,
    pub file: Option<PathBuf>,
    pub file_verbosity: Verbosity,
    pub max_lines: usize,
}

impl LogSettings {
    pub fn from_config(config: &crate::Config) -> Self {
        Self {
            console: config.files.console_verbosity,
            file: config.logfile_path(),
            file_verbosity: config.files.logfile_verbosity,
            max_lines: config.files.logfile_max_lines,
        }
    }
}

/// ログファイルを末尾 `max_lines` 行に切り詰める（0 = 無制限）
pub fn truncate_log(path: &Path, max_lines: usize) -> std::io::Result<()> {
    if max_lines == 0 || !path.exists() {
        return Ok(());
    }

    let lines = BufReader::new(File::open(path)?)
        .lines()
        .collect::<std::io::Result<Vec<_>>>()?;
    if lines.len() <= max_lines {
        return Ok(());
    }

    let mut file = File::create(path)?;
    for line in &lines[lines.len() - max_lines..] {
        writeln!(file, "{}", line)?;
    }
    Ok(())
}

/// グローバルsubscriberを初期化する（プロセスで一度だけ）
pub fn init(settings: &LogSettings) -> anyhow::Result<()> {
    let console_filter = EnvFilter::builder()
        .with_default_directive(settings.console.level_filter().into())
        .from_env_lossy();
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    let file_layer = match &settings.file {
        Some(path) if settings.file_verbosity != Verbosity::None => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            truncate_log(path, settings.max_lines)?;
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false)
                    .with_filter(settings.file_verbosity.level_filter()),
            )
        }
        _ => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()?;
    Ok(())
}
