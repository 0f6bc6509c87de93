//! 前回失敗の記録
//!
//! 失敗した実行はマーカーファイルを残す。次に成功した実行がそれを見つけたら
//! 復旧通知を送り、マーカーを消す。

use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;

#[derive(Debug, Clone)]
pub struct FailureMarker {
    path: PathBuf,
}

impl FailureMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, detail: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        std::fs::write(&self.path, format!("{} {}\n", stamp, detail))
    }

    /// 前回の失敗内容を取り出してマーカーを消す
    pub fn take(&self) -> io::Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => {
                std::fs::remove_file(&self.path)?;
                Ok(Some(text.trim_end().to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_then_take() {
        let dir = tempfile::tempdir().unwrap();
        let marker = FailureMarker::new(dir.path().join("state/last_failure.txt"));
        assert_eq!(marker.take().unwrap(), None);

        marker.record("login timeout after 2 attempt(s)").unwrap();
        let previous = marker.take().unwrap().unwrap();
        assert!(previous.ends_with("login timeout after 2 attempt(s)"));
        assert!(!marker.path().exists());
        assert_eq!(marker.take().unwrap(), None);
    }
}
