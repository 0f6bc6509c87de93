//! セッションCookieのキャッシュ（JSON）

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ScraperError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    /// UNIX秒。セッションCookieはNone
    #[serde(default)]
    pub expires: Option<f64>,
}

impl StoredCookie {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: path.into(),
            secure: false,
            http_only: false,
            expires: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CookieCache {
    path: PathBuf,
}

impl CookieCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 保存済みCookieを読む。ファイルが無ければ空。
    pub fn load(&self) -> Result<Vec<StoredCookie>, ScraperError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(std::fs::File::open(&self.path)?);
        let cookies: Vec<StoredCookie> = serde_json::from_reader(reader)?;
        debug!("Loaded {} cookies from {}", cookies.len(), self.path.display());
        Ok(cookies)
    }

    pub fn save(&self, cookies: &[StoredCookie]) -> Result<(), ScraperError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(std::fs::File::create(&self.path)?);
        serde_json::to_writer_pretty(writer, cookies)?;
        debug!("Saved {} cookies to {}", cookies.len(), self.path.display());
        Ok(())
    }

    pub fn delete(&self) -> Result<(), ScraperError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CookieCache::new(dir.path().join("cookies.json"));
        assert!(cache.load().unwrap().is_empty());

        let mut cookie = StoredCookie::new("sid", "abc", ".investsmart.com.au", "/");
        cookie.secure = true;
        cache.save(&[cookie.clone()]).unwrap();
        assert_eq!(cache.load().unwrap(), vec![cookie]);

        cache.delete().unwrap();
        assert!(!cache.path().exists());
        // 2回目の削除もエラーにしない
        cache.delete().unwrap();
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            CookieCache::new(&path).load(),
            Err(ScraperError::Json(_))
        ));
    }
}
