//! CSV価格履歴
//!
//! ファイルは `Date,FundIdentifier,Price` の3列で、日付昇順・ファンドID順に並ぶ。
//! 書き込みは同じディレクトリの一時ファイルに書いてからリネームする。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Days, NaiveDate};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::HistoryError;
use crate::parser::{self, Field, MalformedRecord, PriceRecord, RawRow};

pub const HEADER: [&str; 3] = ["Date", "FundIdentifier", "Price"];
const DATE_FORMAT: &str = "%Y-%m-%d";

/// 既存レコードと新規レコードをマージする
///
/// 同じ (ファンドID, 日付) は新規側が優先。`retention_days > 0` のとき
/// `today - retention_days` より古い日付は落とす（境界日は残す）。
/// 基準日が日付の表現範囲を下回る場合は何も落とさない。
pub fn merge(
    existing: Vec<PriceRecord>,
    new: Vec<PriceRecord>,
    retention_days: u32,
    today: NaiveDate,
) -> Vec<PriceRecord> {
    merge_counted(existing, new, retention_days, today).0
}

/// `merge` と同じ。保持期間外で落とした件数も返す。
fn merge_counted(
    existing: Vec<PriceRecord>,
    new: Vec<PriceRecord>,
    retention_days: u32,
    today: NaiveDate,
) -> (Vec<PriceRecord>, usize) {
    let cutoff = match retention_days {
        0 => None,
        n => today.checked_sub_days(Days::new(u64::from(n))),
    };

    let mut trimmed = 0;
    let mut merged: BTreeMap<(NaiveDate, String), PriceRecord> = BTreeMap::new();
    for record in existing.into_iter().chain(new) {
        if cutoff.is_some_and(|c| record.date < c) {
            trimmed += 1;
            continue;
        }
        merged.insert((record.date, record.fund_id.clone()), record);
    }
    (merged.into_values().collect(), trimmed)
}

/// 読み込んだ履歴（不正行は件数のみ）
#[derive(Debug, Default)]
pub struct LoadedHistory {
    pub records: Vec<PriceRecord>,
    pub skipped: Vec<MalformedRecord>,
}

/// 1回の更新結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// 書き込み後の総レコード数
    pub total: usize,
    /// 受理した新規レコード数
    pub accepted: usize,
    /// スキップした新規行
    pub skipped_new: usize,
    /// 既存ファイル内でスキップした行
    pub skipped_existing: usize,
    /// 保持期間外として落とした行
    pub trimmed: usize,
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    retention_days: u32,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, retention_days: u32) -> Self {
        Self {
            path: path.into(),
            retention_days,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 履歴ファイルを読む。存在しなければ空の履歴。
    pub fn load(&self) -> Result<LoadedHistory, HistoryError> {
        if !self.path.exists() {
            debug!("History file {} not found, starting empty", self.path.display());
            return Ok(LoadedHistory::default());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)?;

        let headers = reader.headers()?.clone();
        if !headers.is_empty() && headers.iter().ne(HEADER.iter().copied()) {
            return Err(HistoryError::HeaderMismatch {
                path: self.path.clone(),
                found: headers.iter().map(str::to_string).collect(),
            });
        }

        let mut loaded = LoadedHistory::default();
        for result in reader.byte_records() {
            let row = match csv::StringRecord::from_byte_record(result?) {
                Ok(row) => row,
                Err(e) => {
                    let skipped = non_utf8_row(e);
                    warn!("Skipping malformed history row in {}: {}", self.path.display(), skipped);
                    loaded.skipped.push(skipped);
                    continue;
                }
            };
            if row.iter().all(str::is_empty) {
                continue;
            }
            let raw = RawRow::new(
                row.get(1).unwrap_or_default(),
                row.get(0).unwrap_or_default(),
                row.get(2).unwrap_or_default(),
            );
            match parser::parse(&raw) {
                Ok(record) => loaded.records.push(record),
                Err(e) => {
                    warn!("Skipping malformed history row in {}: {}", self.path.display(), e);
                    loaded.skipped.push(e);
                }
            }
        }

        debug!(
            "Loaded {} history records from {}",
            loaded.records.len(),
            self.path.display()
        );
        Ok(loaded)
    }

    /// 一時ファイルに書いてから置き換える
    pub fn save(&self, records: &[PriceRecord]) -> Result<(), HistoryError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
            writer.write_record(HEADER)?;
            for record in records {
                writer.write_record([
                    record.date.format(DATE_FORMAT).to_string(),
                    record.fund_id.clone(),
                    record.price.to_string(),
                ])?;
            }
            writer.flush()?;
        }
        tmp.as_file_mut().sync_all()?;
        tmp.persist(&self.path)?;

        debug!("Wrote {} records to {}", records.len(), self.path.display());
        Ok(())
    }

    /// 新規行を検証・マージして書き戻す
    ///
    /// 新規行がすべて不正なら既存ファイルには触れない。
    pub fn update(&self, new_rows: &[RawRow], today: NaiveDate) -> Result<MergeOutcome, HistoryError> {
        let (new_records, failures) = parser::parse_batch(new_rows);
        for failure in &failures {
            warn!("Skipping malformed scraped row: {}", failure);
        }
        if new_records.is_empty() && !new_rows.is_empty() {
            return Err(HistoryError::NoValidRecords {
                skipped: failures.len(),
            });
        }

        let existing = self.load()?;
        let skipped_existing = existing.skipped.len();
        let accepted = new_records.len();
        let (merged, trimmed) =
            merge_counted(existing.records, new_records, self.retention_days, today);

        let outcome = MergeOutcome {
            total: merged.len(),
            accepted,
            skipped_new: failures.len(),
            skipped_existing,
            trimmed,
        };

        self.save(&merged)?;
        info!(
            "History updated: {} records ({} new, {} skipped)",
            outcome.total, outcome.accepted, outcome.skipped_new
        );
        Ok(outcome)
    }
}

fn non_utf8_row(e: csv::FromUtf8Error) -> MalformedRecord {
    let index = e.utf8_error().field();
    let field = match index {
        0 => Field::Date,
        1 => Field::Fund,
        _ => Field::Price,
    };
    let record = e.into_byte_record();
    let value = String::from_utf8_lossy(record.get(index).unwrap_or_default()).into_owned();
    MalformedRecord::new(field, &value, "not valid UTF-8")
}
