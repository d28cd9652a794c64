use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;
use log::debug;
use ndarray::Array2;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use crate::drivers::source::{quote_identifier, QueryPlan, SignalStore, Window, ROW_ID_COLUMN};
use crate::drivers::MonitorError;
const BUSY_TIMEOUT: Duration = Duration::from_secs(2);
/// Upper bound on rows reserved up front; larger windows grow as rows arrive.
const PREALLOCATED_ROWS: usize = 4096;
/// Rows kept per in-memory table before the oldest are evicted.
pub const DEFAULT_MEMORY_RETENTION: usize = 48_000;
/// Write side of a signal table, used by the synthetic feed.
pub trait SampleSink: Send + Sync {
    /// Creates the table if needed.
    fn prepare(&self, table: &str, channels: &[String]) -> Result<(), MonitorError>;
    /// Highest row id stored so far, 0 for an empty table.
    fn latest_row_id(&self, table: &str) -> Result<i64, MonitorError>;
    fn write_rows(
        &self,
        table: &str,
        channels: &[String],
        subject_id: &str,
        condition_id: &str,
        rows: &[(i64, Vec<f64>)],
    ) -> Result<(), MonitorError>;
}
/// SQLite-backed signal table. One connection, statements serialised by a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}
impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MonitorError> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        debug!("opened signal store {}", path.as_ref().display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
    pub fn create_table(&self, table: &str, channels: &[String]) -> Result<(), MonitorError> {
        let mut columns = vec![
            format!("{} INTEGER PRIMARY KEY", quote_identifier(ROW_ID_COLUMN)),
            "subject_id TEXT NOT NULL".to_owned(),
            "condition TEXT NOT NULL".to_owned(),
        ];
        columns.extend(channels.iter().map(|c| format!("{} REAL", quote_identifier(c))));
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_identifier(table),
            columns.join(", ")
        );
        self.lock().execute_batch(&sql)?;
        Ok(())
    }
    /// Appends `(row_id, values)` rows in one transaction.
    pub fn insert_rows(
        &self,
        table: &str,
        channels: &[String],
        subject_id: &str,
        condition_id: &str,
        rows: &[(i64, Vec<f64>)],
    ) -> Result<(), MonitorError> {
        let mut names = vec![
            quote_identifier(ROW_ID_COLUMN),
            "subject_id".to_owned(),
            "condition".to_owned(),
        ];
        names.extend(channels.iter().map(|c| quote_identifier(c)));
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_identifier(table),
            names.join(", "),
            placeholders.join(", ")
        );
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            for (row_id, values) in rows {
                if values.len() != channels.len() {
                    return Err(MonitorError::ChannelMismatch {
                        expected: channels.len(),
                        actual: values.len(),
                    });
                }
                let mut bound = vec![
                    Value::Integer(*row_id),
                    Value::Text(subject_id.to_owned()),
                    Value::Text(condition_id.to_owned()),
                ];
                bound.extend(values.iter().map(|v| Value::Real(*v)));
                stmt.execute(params_from_iter(bound))?;
            }
        }
        tx.commit()?;
        Ok(())
    }
    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
impl SignalStore for SqliteStore {
    fn fetch_latest(&self, plan: &QueryPlan, limit: usize) -> Result<Window, MonitorError> {
        let width = plan.channels.len();
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&plan.sql)?;
        let bound_limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = stmt.query(params![plan.subject_id, plan.condition_id, bound_limit])?;
        let reserved = limit.min(PREALLOCATED_ROWS);
        let mut row_ids = Vec::with_capacity(reserved);
        let mut values = Vec::with_capacity(reserved * width);
        while let Some(row) = rows.next()? {
            row_ids.push(row.get::<_, i64>(0)?);
            for col in 0..width {
                values.push(row.get::<_, f64>(col + 1)?);
            }
        }
        let samples = Array2::from_shape_vec((row_ids.len(), width), values)
            .map_err(|e| MonitorError::DataSource(e.to_string()))?;
        Ok(Window {
            channel_labels: plan.channels.clone(),
            row_ids,
            samples,
        })
    }
}
impl SampleSink for SqliteStore {
    fn prepare(&self, table: &str, channels: &[String]) -> Result<(), MonitorError> {
        self.create_table(table, channels)
    }
    fn latest_row_id(&self, table: &str) -> Result<i64, MonitorError> {
        let sql = format!(
            "SELECT COALESCE(MAX({}), 0) FROM {}",
            quote_identifier(ROW_ID_COLUMN),
            quote_identifier(table)
        );
        let latest = self.lock().query_row(&sql, [], |row| row.get::<_, i64>(0))?;
        Ok(latest)
    }
    fn write_rows(
        &self,
        table: &str,
        channels: &[String],
        subject_id: &str,
        condition_id: &str,
        rows: &[(i64, Vec<f64>)],
    ) -> Result<(), MonitorError> {
        self.insert_rows(table, channels, subject_id, condition_id, rows)
    }
}
#[derive(Clone, Debug)]
struct MemoryRow {
    row_id: i64,
    subject_id: String,
    condition_id: String,
    values: Vec<f64>,
}
#[derive(Default, Debug)]
struct MemoryTable {
    channels: Vec<String>,
    rows: VecDeque<MemoryRow>, // ascending row id
}
/// In-process store with the same query semantics, for simulation and tests.
///
/// Each table keeps at most `retention` rows; the oldest are evicted first.
pub struct MemoryStore {
    tables: RwLock<HashMap<String, MemoryTable>>,
    offline: AtomicBool,
    retention: usize,
}
impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_MEMORY_RETENTION)
    }
}
impl MemoryStore {
    pub fn with_retention(rows: usize) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
            retention: rows.max(1),
        }
    }
    pub fn create_table(&self, table: &str, channels: Vec<String>) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.entry(table.to_owned()).or_insert_with(|| MemoryTable {
            channels,
            rows: VecDeque::new(),
        });
    }
    pub fn append(
        &self,
        table: &str,
        subject_id: &str,
        condition_id: &str,
        row_id: i64,
        values: Vec<f64>,
    ) -> Result<(), MonitorError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| MonitorError::DataSource(format!("no such table: {table}")))?;
        if values.len() != entry.channels.len() {
            return Err(MonitorError::ChannelMismatch {
                expected: entry.channels.len(),
                actual: values.len(),
            });
        }
        let out_of_order = entry.rows.back().is_some_and(|last| last.row_id > row_id);
        entry.rows.push_back(MemoryRow {
            row_id,
            subject_id: subject_id.to_owned(),
            condition_id: condition_id.to_owned(),
            values,
        });
        if out_of_order {
            entry.rows.make_contiguous().sort_by_key(|r| r.row_id);
        }
        while entry.rows.len() > self.retention {
            entry.rows.pop_front();
        }
        Ok(())
    }
    /// Simulates an unreachable store; every fetch fails while set.
    #[cfg(test)]
    pub fn set_offline(&self, offline: bool) {
        if offline {
            debug!("memory store switched offline");
        }
        self.offline.store(offline, Ordering::SeqCst);
    }
}
impl SampleSink for MemoryStore {
    fn prepare(&self, table: &str, channels: &[String]) -> Result<(), MonitorError> {
        self.create_table(table, channels.to_vec());
        Ok(())
    }
    fn latest_row_id(&self, table: &str) -> Result<i64, MonitorError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .get(table)
            .and_then(|t| t.rows.back())
            .map_or(0, |row| row.row_id))
    }
    fn write_rows(
        &self,
        table: &str,
        _channels: &[String],
        subject_id: &str,
        condition_id: &str,
        rows: &[(i64, Vec<f64>)],
    ) -> Result<(), MonitorError> {
        for (row_id, values) in rows {
            self.append(table, subject_id, condition_id, *row_id, values.clone())?;
        }
        Ok(())
    }
}
impl SignalStore for MemoryStore {
    fn fetch_latest(&self, plan: &QueryPlan, limit: usize) -> Result<Window, MonitorError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(MonitorError::DataSource("store is unreachable".into()));
        }
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let table = tables
            .get(&plan.table)
            .ok_or_else(|| MonitorError::DataSource(format!("no such table: {}", plan.table)))?;
        let columns = plan
            .channels
            .iter()
            .map(|name| {
                table
                    .channels
                    .iter()
                    .position(|c| c == name)
                    .ok_or_else(|| MonitorError::DataSource(format!("no such column: {name}")))
            })
            .collect::<Result<Vec<usize>, MonitorError>>()?;
        let mut row_ids = Vec::new();
        let mut values = Vec::new();
        for row in table
            .rows
            .iter()
            .rev()
            .filter(|r| r.subject_id == plan.subject_id && r.condition_id == plan.condition_id)
            .take(limit)
        {
            row_ids.push(row.row_id);
            values.extend(columns.iter().map(|&c| row.values[c]));
        }
        let samples = Array2::from_shape_vec((row_ids.len(), columns.len()), values)
            .map_err(|e| MonitorError::DataSource(e.to_string()))?;
        Ok(Window {
            channel_labels: plan.channels.clone(),
            row_ids,
            samples,
        })
    }
}
