//! ファンド名 → APIRコードのキャッシュ
//!
//! 詳細ページを開くのは高くつくので、一度見つけたコードはJSONに残す。

use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ScraperError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundCode {
    pub fund_name: String,
    pub fund_code: String,
}

#[derive(Debug, Clone)]
pub struct FundCodeCache {
    path: PathBuf,
    entries: Vec<FundCode>,
}

impl FundCodeCache {
    /// キャッシュを読む。無い・壊れている場合は空から始める。
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::File::open(&path) {
            Ok(file) => serde_json::from_reader(BufReader::new(file)).unwrap_or_else(|e| {
                warn!("Ignoring unreadable fund code cache {}: {}", path.display(), e);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        debug!("Fund code cache has {} entries", entries.len());
        Self { path, entries }
    }

    pub fn get(&self, fund_name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.fund_name == fund_name && !e.fund_code.is_empty())
            .map(|e| e.fund_code.as_str())
    }

    /// 追加して即保存する
    pub fn insert(&mut self, fund_name: &str, fund_code: &str) -> Result<(), ScraperError> {
        match self.entries.iter_mut().find(|e| e.fund_name == fund_name) {
            Some(entry) => entry.fund_code = fund_code.to_string(),
            None => self.entries.push(FundCode {
                fund_name: fund_name.to_string(),
                fund_code: fund_code.to_string(),
            }),
        }
        self.save()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn save(&self) -> Result<(), ScraperError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(std::fs::File::create(&self.path)?);
        serde_json::to_writer_pretty(writer, &self.entries)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fund_code_cache.json");

        let mut cache = FundCodeCache::load(&path);
        assert!(cache.is_empty());
        cache.insert("Vanguard Index Fund", "VAN0002AU").unwrap();
        cache.insert("Vanguard Index Fund", "VAN0003AU").unwrap();
        assert_eq!(cache.len(), 1);

        let reloaded = FundCodeCache::load(&path);
        assert_eq!(reloaded.get("Vanguard Index Fund"), Some("VAN0003AU"));
        assert_eq!(reloaded.get("Other"), None);
    }

    #[test]
    fn test_corrupt_cache_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fund_code_cache.json");
        std::fs::write(&path, "[{").unwrap();
        assert!(FundCodeCache::load(&path).is_empty());
    }
}
