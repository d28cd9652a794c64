use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use log::{info, trace};
use ndarray::{s, Array2, ArrayView1};
use crate::drivers::MonitorError;
/// Name of the monotonic row identifier column that precedes every channel.
pub const ROW_ID_COLUMN: &str = "index";
/// Most recent rows for one subject/condition, as returned by the store.
#[derive(Clone, Debug)]
pub struct Window {
    pub channel_labels: Vec<String>,
    pub row_ids: Vec<i64>,
    pub samples: Array2<f64>, // rows x channels
}
impl Window {
    pub fn empty(channel_labels: Vec<String>) -> Self {
        let width = channel_labels.len();
        Self {
            channel_labels,
            row_ids: Vec::new(),
            samples: Array2::zeros((0, width)),
        }
    }
    pub fn len(&self) -> usize {
        self.row_ids.len()
    }
    pub fn is_empty(&self) -> bool {
        self.row_ids.is_empty()
    }
    pub fn channel_index(&self, label: &str) -> Option<usize> {
        self.channel_labels.iter().position(|c| c == label)
    }
    pub fn channel(&self, label: &str) -> Result<ArrayView1<'_, f64>, MonitorError> {
        let idx = self
            .channel_index(label)
            .ok_or_else(|| MonitorError::UnknownChannel(label.to_owned()))?;
        Ok(self.samples.column(idx))
    }
    /// True when rows run oldest to newest.
    pub fn is_chronological(&self) -> bool {
        self.row_ids.windows(2).all(|w| w[0] <= w[1])
    }
    /// Re-orders a newest-first window into ascending time.
    pub fn chronological(mut self) -> Self {
        if self.is_chronological() {
            return self;
        }
        self.row_ids.reverse();
        self.samples = self.samples.slice(s![..;-1, ..]).to_owned();
        self
    }
    /// Channels x samples layout expected by feature reducers.
    pub fn by_channel(&self) -> Array2<f64> {
        self.samples.t().to_owned()
    }
    pub(crate) fn truncate(&mut self, rows: usize) {
        if self.row_ids.len() > rows {
            self.row_ids.truncate(rows);
            self.samples = self.samples.slice(s![..rows, ..]).to_owned();
        }
    }
}
/// Prepared "latest N rows" request; the limit is bound at execution time.
#[derive(Clone, Debug)]
pub struct QueryPlan {
    pub table: String,
    pub channels: Vec<String>,
    pub subject_id: String,
    pub condition_id: String,
    pub sql: String,
}
impl QueryPlan {
    pub fn new(
        table: &str,
        channels: &[String],
        subject_id: &str,
        condition_id: &str,
    ) -> Result<Self, MonitorError> {
        if table.trim().is_empty() {
            return Err(MonitorError::Configuration("table name is empty".into()));
        }
        if channels.is_empty() {
            return Err(MonitorError::Configuration(
                "channel set must not be empty".into(),
            ));
        }
        if let Some(reserved) = channels.iter().find(|c| c.as_str() == ROW_ID_COLUMN) {
            return Err(MonitorError::Configuration(format!(
                "`{reserved}` is reserved for the row identifier"
            )));
        }
        let columns: Vec<String> = std::iter::once(ROW_ID_COLUMN)
            .chain(channels.iter().map(String::as_str))
            .map(quote_identifier)
            .collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE subject_id = ?1 AND condition = ?2 ORDER BY {} DESC LIMIT ?3",
            columns.join(", "),
            quote_identifier(table),
            quote_identifier(ROW_ID_COLUMN),
        );
        Ok(Self {
            table: table.to_owned(),
            channels: channels.to_vec(),
            subject_id: subject_id.to_owned(),
            condition_id: condition_id.to_owned(),
            sql,
        })
    }
}
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
/// Anything that can answer a prepared latest-window request.
///
/// Rows come back newest first, at most `limit` of them.
pub trait SignalStore: Send + Sync {
    fn fetch_latest(&self, plan: &QueryPlan, limit: usize) -> Result<Window, MonitorError>;
}
/// Live "most recent N samples" feed for one subject/condition.
pub struct WindowSource {
    store: Arc<dyn SignalStore>,
    plan: QueryPlan,
    window_length: AtomicUsize,
}
impl WindowSource {
    pub fn new(
        store: Arc<dyn SignalStore>,
        table: &str,
        channels: Vec<String>,
        subject_id: &str,
        condition_id: &str,
        window_length: usize,
    ) -> Result<Self, MonitorError> {
        let plan = QueryPlan::new(table, &channels, subject_id, condition_id)?;
        info!(
            "window source on `{table}` ready: {} channels, subject {subject_id}, condition {condition_id}, {window_length} samples",
            channels.len()
        );
        Ok(Self {
            store,
            plan,
            window_length: AtomicUsize::new(window_length),
        })
    }
    pub fn channels(&self) -> &[String] {
        &self.plan.channels
    }
    /// Runs the prepared query with the window length in effect right now.
    pub fn fetch(&self) -> Result<Window, MonitorError> {
        let limit = self.window_length.load(Ordering::Acquire);
        if limit == 0 {
            return Ok(Window::empty(self.plan.channels.clone()));
        }
        let mut window = self.store.fetch_latest(&self.plan, limit)?;
        window.truncate(limit);
        trace!("fetched {} of {limit} rows from `{}`", window.len(), self.plan.table);
        Ok(window)
    }
    /// Takes effect on the next fetch. Bounds are left to the caller.
    pub fn set_window_length(&self, length: usize) {
        self.window_length.store(length, Ordering::Release);
    }
    pub fn window_length(&self) -> usize {
        self.window_length.load(Ordering::Acquire)
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::store::MemoryStore;
    use std::thread;
    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }
    fn store_with_rows(count: i64) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::default());
        store.create_table("emg", labels(&["c1", "c2"]));
        for idx in 1..=count {
            store
                .append("emg", "s01", "1", idx, vec![idx as f64, -(idx as f64)])
                .unwrap();
        }
        store
    }
    #[test]
    fn fetch_returns_latest_rows_newest_first() {
        let store = store_with_rows(5);
        let source = WindowSource::new(store, "emg", labels(&["c1", "c2"]), "s01", "1", 3).unwrap();
        let window = source.fetch().unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(window.row_ids, vec![5, 4, 3]);
        assert_eq!(window.channel("c1").unwrap().to_vec(), vec![5.0, 4.0, 3.0]);
        assert_eq!(window.channel("c2").unwrap()[0], -5.0);
    }
    #[test]
    fn window_length_change_applies_to_next_fetch() {
        let store = store_with_rows(10);
        let source = WindowSource::new(store, "emg", labels(&["c1", "c2"]), "s01", "1", 2).unwrap();
        for length in [1, 4, 7, 20, 3] {
            source.set_window_length(length);
            let window = source.fetch().unwrap();
            assert!(window.len() <= source.window_length());
            assert_eq!(window.len(), length.min(10));
        }
    }
    #[test]
    fn concurrent_fetches_see_a_length_that_was_set() {
        let store = store_with_rows(50);
        let source = Arc::new(
            WindowSource::new(store, "emg", labels(&["c1", "c2"]), "s01", "1", 40).unwrap(),
        );
        let lengths = [40usize, 3, 25, 7, 12];
        let writer = {
            let source = Arc::clone(&source);
            thread::spawn(move || {
                for _ in 0..200 {
                    for &length in &lengths {
                        source.set_window_length(length);
                    }
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let source = Arc::clone(&source);
                thread::spawn(move || {
                    (0..200)
                        .map(|_| source.fetch().map(|w| w.len()))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        writer.join().unwrap();
        for reader in readers {
            for fetched in reader.join().unwrap() {
                let len = fetched.unwrap();
                assert!(lengths.contains(&len), "window of {len} rows");
            }
        }
        // last write wins for the next fetch
        source.set_window_length(5);
        assert_eq!(source.fetch().unwrap().row_ids, vec![50, 49, 48, 47, 46]);
    }
    #[test]
    fn zero_length_window_is_empty() {
        let store = store_with_rows(3);
        let source = WindowSource::new(store, "emg", labels(&["c1", "c2"]), "s01", "1", 0).unwrap();
        let window = source.fetch().unwrap();
        assert!(window.is_empty());
        assert_eq!(window.samples.dim(), (0, 2));
    }
    #[test]
    fn short_stream_yields_partial_window() {
        let store = store_with_rows(2);
        let source = WindowSource::new(store, "emg", labels(&["c1", "c2"]), "s01", "1", 50).unwrap();
        assert_eq!(source.fetch().unwrap().len(), 2);
    }
    #[test]
    fn rejects_empty_channel_set() {
        let store = store_with_rows(1);
        let err = WindowSource::new(store, "emg", Vec::new(), "s01", "1", 5)
            .err()
            .unwrap();
        assert!(matches!(err, MonitorError::Configuration(_)));
    }
    #[test]
    fn query_plan_binds_limit_at_call_time() {
        let plan = QueryPlan::new("emg", &labels(&["c1", "c2"]), "s", "c").unwrap();
        assert_eq!(
            plan.sql,
            "SELECT \"index\", \"c1\", \"c2\" FROM \"emg\" WHERE subject_id = ?1 AND condition = ?2 ORDER BY \"index\" DESC LIMIT ?3"
        );
    }
    #[test]
    fn chronological_reverses_newest_first_rows() {
        let store = store_with_rows(4);
        let source = WindowSource::new(store, "emg", labels(&["c1", "c2"]), "s01", "1", 3).unwrap();
        let window = source.fetch().unwrap().chronological();
        assert_eq!(window.row_ids, vec![2, 3, 4]);
        assert_eq!(window.channel("c1").unwrap().to_vec(), vec![2.0, 3.0, 4.0]);
        assert_eq!(window.by_channel().shape(), &[2, 3]);
    }
}
