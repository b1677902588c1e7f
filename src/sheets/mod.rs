//! Best-effort spreadsheet mirror of the expense store.
//!
//! The store stays the source of truth. Callers log mirror failures and move
//! on; nothing here is ever allowed to undo a store mutation.

pub mod auth;
pub mod client;
pub mod layout;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard};
use tracing::info;

use crate::config::SheetsConfig;
use crate::store::Expense;
use auth::{ServiceAccountKey, TokenProvider};
use client::{Dimension, SheetsClient};

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("credentials error: {0}")]
    Credentials(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("rate limited by the spreadsheet backend")]
    RateLimited,
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Replication target for stored expenses.
pub trait Mirror: Send + Sync {
    /// Write the record into its month block, overwriting a row that already
    /// carries the same identity.
    fn upsert(&self, expense: &Expense) -> impl Future<Output = Result<(), MirrorError>> + Send;

    /// Blank the rows of `ids` in the worksheet of `year`.
    fn delete(&self, ids: &[i64], year: i32) -> impl Future<Output = Result<(), MirrorError>> + Send;
}

/// `None` is the disabled mirror.
impl<M: Mirror> Mirror for Option<M> {
    async fn upsert(&self, expense: &Expense) -> Result<(), MirrorError> {
        match self {
            Some(mirror) => mirror.upsert(expense).await,
            None => Ok(()),
        }
    }

    async fn delete(&self, ids: &[i64], year: i32) -> Result<(), MirrorError> {
        match self {
            Some(mirror) => mirror.delete(ids, year).await,
            None => Ok(()),
        }
    }
}

/// One write lock per year worksheet. Row allocation reads the block and then
/// writes the next free row, so writers of the same worksheet must not
/// interleave.
#[derive(Default)]
struct WorksheetLocks {
    locks: Mutex<HashMap<i32, Arc<Mutex<()>>>>,
}

impl WorksheetLocks {
    async fn lock(&self, year: i32) -> OwnedMutexGuard<()> {
        let lock = self.locks.lock().await.entry(year).or_default().clone();
        lock.lock_owned().await
    }
}

/// Google Sheets mirror: one spreadsheet, one worksheet per year.
pub struct SheetMirror {
    client: SheetsClient,
    sheet_name: String,
    configured_id: Option<String>,
    share_with: Vec<String>,
    spreadsheet_id: OnceCell<String>,
    /// Worksheet titles known to exist.
    worksheets: Mutex<HashSet<String>>,
    writes: WorksheetLocks,
}

impl SheetMirror {
    pub fn new(config: &SheetsConfig) -> Result<Self, MirrorError> {
        let key = ServiceAccountKey::load(&config.credentials_path)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let tokens = TokenProvider::new(key, http.clone())?;
        Ok(Self {
            client: SheetsClient::new(http, tokens, Duration::from_secs(config.retry_delay_secs)),
            sheet_name: config.sheet_name.clone(),
            configured_id: config.spreadsheet_id.clone(),
            share_with: config.share_with.clone(),
            spreadsheet_id: OnceCell::new(),
            worksheets: Mutex::new(HashSet::new()),
            writes: WorksheetLocks::default(),
        })
    }

    /// Resolve the spreadsheet once: configured id, lookup by name, or
    /// create and share it.
    async fn spreadsheet(&self) -> Result<&str, MirrorError> {
        let id = self
            .spreadsheet_id
            .get_or_try_init(|| async {
                if let Some(id) = &self.configured_id {
                    return Ok(id.clone());
                }
                if let Some(id) = self.client.find_spreadsheet(&self.sheet_name).await? {
                    info!("📄 Using spreadsheet '{}' ({})", self.sheet_name, id);
                    return Ok(id);
                }
                let id = self.client.create_spreadsheet(&self.sheet_name).await?;
                info!("📄 Created spreadsheet '{}' ({})", self.sheet_name, id);
                for email in &self.share_with {
                    self.client.share(&id, email).await?;
                    info!("Shared spreadsheet with {}", email);
                }
                Ok::<_, MirrorError>(id)
            })
            .await?;
        Ok(id.as_str())
    }

    /// Whether the worksheet of `year` exists, refreshing the known titles
    /// from the backend on a miss.
    async fn has_worksheet(&self, spreadsheet_id: &str, year: i32) -> Result<bool, MirrorError> {
        let title = layout::worksheet_name(year);
        let mut known = self.worksheets.lock().await;
        if known.contains(&title) {
            return Ok(true);
        }
        known.extend(self.client.worksheet_titles(spreadsheet_id).await?);
        Ok(known.contains(&title))
    }

    async fn ensure_worksheet(&self, spreadsheet_id: &str, year: i32) -> Result<(), MirrorError> {
        if self.has_worksheet(spreadsheet_id, year).await? {
            return Ok(());
        }
        let title = layout::worksheet_name(year);
        self.client
            .add_worksheet(spreadsheet_id, &title, layout::SHEET_COLUMNS)
            .await?;
        let header_range = format!("'{}'!A1:{}2", title, layout::column_letter(layout::SHEET_COLUMNS));
        let headers = layout::header_rows()
            .into_iter()
            .map(|row| row.into_iter().map(serde_json::Value::String).collect())
            .collect();
        self.client
            .update_values(spreadsheet_id, &header_range, headers)
            .await?;
        self.worksheets.lock().await.insert(title.clone());
        info!("📄 Created worksheet {}", title);
        Ok(())
    }
}

impl Mirror for SheetMirror {
    async fn upsert(&self, expense: &Expense) -> Result<(), MirrorError> {
        let spreadsheet_id = self.spreadsheet().await?;
        let year = expense.year();
        let month = expense.month();
        // Held until the row is written: worksheet creation included.
        let _write = self.writes.lock(year).await;
        self.ensure_worksheet(spreadsheet_id, year).await?;

        // Id and date columns of the block, read together.
        let key_range = format!(
            "'{}'!{}:{}",
            layout::worksheet_name(year),
            layout::column_letter(layout::id_column(month)),
            layout::column_letter(layout::date_column(month))
        );
        let columns = self
            .client
            .get_values(spreadsheet_id, &key_range, Dimension::Columns)
            .await?;
        let ids = columns.first().map(Vec::as_slice).unwrap_or_default();
        let dates = columns.get(1).map(Vec::as_slice).unwrap_or_default();

        let row = layout::find_in_id_column(ids, expense.id)
            .unwrap_or_else(|| layout::next_empty_row(dates));

        self.client
            .update_values(
                spreadsheet_id,
                &layout::row_range(year, month, row),
                vec![layout::row_values(expense)],
            )
            .await?;
        info!("📄 Mirrored expense {} to {}!row {}", expense.id, year, row);
        Ok(())
    }

    async fn delete(&self, ids: &[i64], year: i32) -> Result<(), MirrorError> {
        if ids.is_empty() {
            return Ok(());
        }
        let spreadsheet_id = self.spreadsheet().await?;
        let _write = self.writes.lock(year).await;
        if !self.has_worksheet(spreadsheet_id, year).await? {
            return Ok(());
        }

        let rows = self
            .client
            .get_values(spreadsheet_id, &layout::data_range(year), Dimension::Rows)
            .await?;
        let ranges: Vec<String> = layout::locate_rows(&rows, ids)
            .into_iter()
            .map(|(month, row)| layout::row_range(year, month, row))
            .collect();
        if ranges.is_empty() {
            return Ok(());
        }

        self.client.batch_clear(spreadsheet_id, &ranges).await?;
        info!("📄 Blanked {} mirrored row(s) in {}", ranges.len(), year);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Read the next free row, yield, then claim it: the shape of an upsert.
    async fn claim_row(locks: &WorksheetLocks, rows: &Mutex<Vec<i64>>, year: i32, id: i64) -> usize {
        let _write = locks.lock(year).await;
        let next = rows.lock().await.len();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut rows = rows.lock().await;
        rows.insert(next, id);
        next
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_writers_get_distinct_rows() {
        let locks = Arc::new(WorksheetLocks::default());
        let rows = Arc::new(Mutex::new(vec![1, 2, 3, 4]));

        let handles: Vec<_> = (5..=8)
            .map(|id| {
                let locks = locks.clone();
                let rows = rows.clone();
                tokio::spawn(async move { claim_row(&locks, &rows, 2024, id).await })
            })
            .collect();

        let mut claimed = Vec::new();
        for handle in handles {
            claimed.push(handle.await.unwrap());
        }
        claimed.sort_unstable();
        assert_eq!(claimed, vec![4, 5, 6, 7]);

        let mut ids = rows.lock().await.clone();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn test_other_years_are_not_blocked() {
        let locks = WorksheetLocks::default();
        let _held = locks.lock(2024).await;
        let other = tokio::time::timeout(Duration::from_millis(200), locks.lock(2025)).await;
        assert!(other.is_ok());
        let same = tokio::time::timeout(Duration::from_millis(50), locks.lock(2024)).await;
        assert!(same.is_err());
    }
}
