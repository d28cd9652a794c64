// src/simulator.rs
//! Synthetic EMG writer for running the monitor without a recording rig.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use log::{info, warn};
use rand::Rng;
use crate::drivers::{MonitorError, SampleSink};

const WRITE_PERIOD: Duration = Duration::from_millis(10);
const BURST_AMPLITUDE: f64 = 400.0;

/// Per-channel sinusoids plus noise, with occasional bursts on a random channel.
pub fn synthetic_row(phase: f64, channels: usize, burst: Option<usize>, rng: &mut impl Rng) -> Vec<f64> {
    (0..channels)
        .map(|i| {
            let base = (phase * (i as f64 * 0.1 + 1.0)).sin() * 20.0;
            let noise = rng.gen_range(-5.0..5.0);
            let burst = if burst == Some(i) { BURST_AMPLITUDE * phase.sin().abs() } else { 0.0 };
            base + noise + burst
        })
        .collect()
}

pub struct SyntheticFeed {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SyntheticFeed {
    /// Appends rows to `table` at `sample_rate_hz` until stopped, continuing
    /// after the highest row id already stored.
    pub fn spawn(
        sink: Arc<dyn SampleSink>,
        table: String,
        channels: Vec<String>,
        subject: String,
        condition: String,
        sample_rate_hz: f64,
    ) -> Result<Self, MonitorError> {
        if sample_rate_hz <= 0.0 || !sample_rate_hz.is_finite() {
            return Err(MonitorError::Configuration(
                "sample rate must be greater than zero".into(),
            ));
        }
        if channels.is_empty() {
            return Err(MonitorError::Configuration(
                "synthetic feed needs at least one channel".into(),
            ));
        }
        sink.prepare(&table, &channels)?;
        let first_row = sink.latest_row_id(&table)?;
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let worker = thread::Builder::new()
            .name("synthetic-feed".into())
            .spawn(move || {
                let mut rng = rand::thread_rng();
                let started = Instant::now();
                let mut written: i64 = 0;
                let mut burst: Option<usize> = None;
                let mut batch = Vec::new();
                while flag.load(Ordering::Relaxed) {
                    let due = (started.elapsed().as_secs_f64() * sample_rate_hz) as i64;
                    if rng.gen_bool(0.02) {
                        burst = if burst.is_some() { None } else { Some(rng.gen_range(0..channels.len())) };
                    }
                    batch.clear();
                    while written < due {
                        written += 1;
                        let phase = written as f64 / sample_rate_hz * 2.0 * std::f64::consts::PI;
                        let values = synthetic_row(phase, channels.len(), burst, &mut rng);
                        batch.push((first_row + written, values));
                    }
                    if !batch.is_empty() {
                        if let Err(err) = sink.write_rows(&table, &channels, &subject, &condition, &batch) {
                            warn!("synthetic feed stopped: {err}");
                            return;
                        }
                    }
                    thread::sleep(WRITE_PERIOD);
                }
            })?;
        info!("synthetic feed running at {sample_rate_hz} Hz from row {}", first_row + 1);
        Ok(Self {
            running,
            worker: Some(worker),
        })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("synthetic feed thread panicked");
            }
        }
    }
}

impl Drop for SyntheticFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::source::QueryPlan;
    use crate::drivers::{MemoryStore, SignalStore, SqliteStore};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn burst_channel_stands_out() {
        let mut rng = StdRng::seed_from_u64(7);
        let row = synthetic_row(std::f64::consts::FRAC_PI_2, 4, Some(2), &mut rng);
        assert_eq!(row.len(), 4);
        assert!(row[2] > 300.0);
        assert!(row[0].abs() < 30.0);
    }

    #[test]
    fn feed_appends_rows_until_stopped() {
        let store = Arc::new(MemoryStore::default());
        let channels = vec!["c1".to_string(), "c2".to_string()];
        let mut feed = SyntheticFeed::spawn(
            store.clone(),
            "emg".into(),
            channels.clone(),
            "s".into(),
            "c".into(),
            1000.0,
        )
        .unwrap();
        thread::sleep(Duration::from_millis(60));
        feed.stop();
        let written = store.latest_row_id("emg").unwrap();
        assert!(written > 0);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(store.latest_row_id("emg").unwrap(), written);
        let plan = QueryPlan::new("emg", &channels, "s", "c").unwrap();
        let window = store.fetch_latest(&plan, 5).unwrap();
        assert_eq!(window.row_ids[0], written);
    }

    #[test]
    fn feed_resumes_after_rows_already_in_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("sim.db")).unwrap());
        let channels = vec!["c1".to_string()];
        store.prepare("emg", &channels).unwrap();
        store
            .write_rows("emg", &channels, "s", "c", &[(500, vec![0.0])])
            .unwrap();
        let mut feed = SyntheticFeed::spawn(
            store.clone(),
            "emg".into(),
            channels.clone(),
            "s".into(),
            "c".into(),
            1000.0,
        )
        .unwrap();
        thread::sleep(Duration::from_millis(60));
        feed.stop();
        let plan = QueryPlan::new("emg", &channels, "s", "c").unwrap();
        let window = store.fetch_latest(&plan, 1_000).unwrap();
        assert!(window.len() > 1);
        assert_eq!(*window.row_ids.last().unwrap(), 500);
        assert_eq!(window.row_ids[window.len() - 2], 501);
    }
}
