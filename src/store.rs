//! Persistent SQLite store for expense records.

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Characters of the description shown in listings and reports.
pub const DESCRIPTION_PREVIEW_CHARS: usize = 15;

/// Errors surfaced by the store. Every one of them is fatal for the
/// operation that produced it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create database directory '{path}': {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// A persisted expense.
#[derive(Debug, Clone, PartialEq)]
pub struct Expense {
    pub id: i64,
    /// Calendar day as YYYYMMDD.
    pub date: i64,
    pub user: String,
    pub expense_type: String,
    pub description: String,
    pub amount: f64,
}

impl Expense {
    pub fn year(&self) -> i32 {
        (self.date / 10_000) as i32
    }

    /// Month of the year, 1-based.
    pub fn month(&self) -> u32 {
        ((self.date / 100) % 100) as u32
    }

    /// Year and month as YYYYMM.
    pub fn year_month(&self) -> i64 {
        self.date / 100
    }

    /// Description cut to the display width. The stored value is untouched.
    pub fn short_description(&self) -> String {
        self.description.chars().take(DESCRIPTION_PREVIEW_CHARS).collect()
    }
}

/// An expense that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExpense {
    pub date: i64,
    pub user: String,
    pub expense_type: String,
    pub description: String,
    pub amount: f64,
}

impl NewExpense {
    pub fn into_expense(self, id: i64) -> Expense {
        Expense {
            id,
            date: self.date,
            user: self.user,
            expense_type: self.expense_type,
            description: self.description,
            amount: self.amount,
        }
    }
}

/// Expense table behind a single connection. The mutex makes the store the
/// single writer, whatever the number of sessions calling into it.
pub struct ExpenseStore {
    conn: Mutex<Connection>,
}

impl ExpenseStore {
    /// Create a new in-memory store.
    pub fn in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open the store at `path`, creating the parent directory and the table
    /// when they do not exist yet.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.init_schema()?;
        info!("Opened expense store at {:?} ({} records)", path, store.count()?);
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave SQLite half-written,
        // so a poisoned guard is still usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS expenses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date INTEGER NOT NULL,
                user TEXT NOT NULL,
                expense_type TEXT NOT NULL,
                expense_description TEXT NOT NULL,
                expense_amount REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_expenses_date ON expenses(date);
        "#,
        )?;
        Ok(())
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM expenses", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Insert a record and return its identity.
    pub fn insert(&self, expense: &NewExpense) -> Result<i64, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO expenses (date, user, expense_type, expense_description, expense_amount)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                expense.date,
                expense.user,
                expense.expense_type,
                expense.description,
                expense.amount
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!("INSERT id={}", id);
        Ok(id)
    }

    /// Delete one record. Returns `false` when no record had that identity.
    pub fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let affected = self
            .conn()
            .execute("DELETE FROM expenses WHERE id = ?1", params![id])?;
        debug!("DELETE id={} affected={}", id, affected);
        Ok(affected > 0)
    }

    /// Delete every identity in one transaction. Returns the identities that
    /// did not exist, in input order.
    pub fn delete_many(&self, ids: &[i64]) -> Result<Vec<i64>, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut not_found = Vec::new();
        {
            let mut stmt = tx.prepare("DELETE FROM expenses WHERE id = ?1")?;
            for &id in ids {
                if stmt.execute(params![id])? == 0 {
                    not_found.push(id);
                }
            }
        }
        tx.commit()?;
        info!(
            "🗑️ Deleted {} of {} expense(s)",
            ids.len() - not_found.len(),
            ids.len()
        );
        Ok(not_found)
    }

    /// Most recent records first. A `limit` of zero returns every record.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<Expense>, StoreError> {
        let conn = self.conn();
        // SQLite treats a negative LIMIT as "no limit".
        let limit = if limit == 0 { -1 } else { limit as i64 };
        let mut stmt = conn.prepare(
            "SELECT id, date, user, expense_type, expense_description, expense_amount
             FROM expenses ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_expense)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Fetch the records matching `ids`, newest first. Unknown identities are
    /// skipped.
    pub fn get_many(&self, ids: &[i64]) -> Result<Vec<Expense>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, date, user, expense_type, expense_description, expense_amount
             FROM expenses WHERE id IN ({placeholders}) ORDER BY id DESC"
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), row_to_expense)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Fetch one record.
    pub fn get(&self, id: i64) -> Result<Option<Expense>, StoreError> {
        Ok(self
            .conn()
            .query_row(
                "SELECT id, date, user, expense_type, expense_description, expense_amount
                 FROM expenses WHERE id = ?1",
                params![id],
                row_to_expense,
            )
            .optional()?)
    }
}

fn row_to_expense(row: &rusqlite::Row<'_>) -> rusqlite::Result<Expense> {
    Ok(Expense {
        id: row.get(0)?,
        date: row.get(1)?,
        user: row.get(2)?,
        expense_type: row.get(3)?,
        description: row.get(4)?,
        amount: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_expense(date: i64, expense_type: &str, description: &str, amount: f64) -> NewExpense {
        NewExpense {
            date,
            user: "A".to_string(),
            expense_type: expense_type.to_string(),
            description: description.to_string(),
            amount,
        }
    }

    #[test]
    fn test_insert_ids_strictly_increase() {
        let store = ExpenseStore::in_memory().unwrap();
        let mut last = 0;
        for i in 0..10 {
            let id = store
                .insert(&new_expense(20240101 + i, "FOOD", "STORE", 1.0))
                .unwrap();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn test_ids_not_reused_after_delete() {
        let store = ExpenseStore::in_memory().unwrap();
        let a = store.insert(&new_expense(20240101, "FOOD", "A", 1.0)).unwrap();
        let b = store.insert(&new_expense(20240101, "FOOD", "B", 1.0)).unwrap();
        assert!(store.delete(b).unwrap());
        let c = store.insert(&new_expense(20240101, "FOOD", "C", 1.0)).unwrap();
        assert!(c > b);
        assert!(c > a);
    }

    #[test]
    fn test_list_recent_newest_first() {
        let store = ExpenseStore::in_memory().unwrap();
        let first = store
            .insert(&new_expense(20240101, "FOOD", "STORE", 12.50))
            .unwrap();
        let second = store
            .insert(&new_expense(20240102, "FOOD", "STORE", 7.0))
            .unwrap();

        let recent = store.list_recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, second);
        assert_eq!(recent[1].id, first);
        assert_eq!(recent[1].amount, 12.50);
    }

    #[test]
    fn test_list_recent_zero_returns_all() {
        let store = ExpenseStore::in_memory().unwrap();
        for i in 0..7 {
            store.insert(&new_expense(20240101, "FOOD", "X", i as f64)).unwrap();
        }
        store.delete(3).unwrap();

        let all = store.list_recent(0).unwrap();
        assert_eq!(all.len(), 6);
        assert!(all.windows(2).all(|w| w[0].id > w[1].id));
        assert!(all.iter().all(|e| e.id != 3));
        assert_eq!(store.list_recent(5).unwrap().len(), 5);
    }

    #[test]
    fn test_delete_removes_only_target() {
        let store = ExpenseStore::in_memory().unwrap();
        let a = store.insert(&new_expense(20240101, "FOOD", "A", 1.0)).unwrap();
        let b = store.insert(&new_expense(20240101, "FOOD", "B", 2.0)).unwrap();

        assert!(store.delete(a).unwrap());
        assert!(store.get(a).unwrap().is_none());
        assert_eq!(store.get(b).unwrap().unwrap().description, "B");
        assert!(!store.delete(a).unwrap());
    }

    #[test]
    fn test_delete_many_reports_not_found() {
        let store = ExpenseStore::in_memory().unwrap();
        for _ in 0..3 {
            store.insert(&new_expense(20240101, "FOOD", "A", 1.0)).unwrap();
        }

        let not_found = store.delete_many(&[3, 7]).unwrap();
        assert_eq!(not_found, vec![7]);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_text_with_quotes_is_stored_verbatim() {
        let store = ExpenseStore::in_memory().unwrap();
        let description = "O'REILLY'); DROP TABLE expenses; --";
        let id = store
            .insert(&new_expense(20240101, "BOOKS \"NEW\"", description, 3.0))
            .unwrap();

        let stored = store.get(id).unwrap().unwrap();
        assert_eq!(stored.description, description);
        assert_eq!(stored.expense_type, "BOOKS \"NEW\"");
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_get_many_skips_unknown() {
        let store = ExpenseStore::in_memory().unwrap();
        store.insert(&new_expense(20230105, "FOOD", "A", 1.0)).unwrap();
        store.insert(&new_expense(20240105, "FOOD", "B", 1.0)).unwrap();

        let found = store.get_many(&[1, 2, 99]).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].year(), 2024);
        assert_eq!(found[1].year(), 2023);
        assert!(store.get_many(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("expenses.db");
        {
            let store = ExpenseStore::open(&path).unwrap();
            store.insert(&new_expense(20240101, "FOOD", "A", 1.0)).unwrap();
        }
        let reopened = ExpenseStore::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }

    #[test]
    fn test_short_description_does_not_alter_stored_value() {
        let expense = new_expense(20240315, "FOOD", "SUPERMERCADO CENTRAL", 1.0).into_expense(1);
        assert_eq!(expense.short_description(), "SUPERMERCADO CE");
        assert_eq!(expense.description, "SUPERMERCADO CENTRAL");
        assert_eq!(expense.month(), 3);
        assert_eq!(expense.year(), 2024);
        assert_eq!(expense.year_month(), 202403);
    }
}
