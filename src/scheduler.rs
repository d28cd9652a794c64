// src/scheduler.rs
//! Per-consumer periodic driver.
//!
//! Each scheduler owns one worker thread. Ticks never overlap: a tick that
//! runs past the next deadline causes the missed deadlines to be skipped, not
//! queued. A failing tick is logged and counted as dropped; the next tick runs
//! as usual. A tick that overruns its interval by `overrun_factor` is counted
//! as dropped too, but whatever it published stays published.
//!
//! An interval change applies from the next deadline, including a change made
//! while a tick is running.
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use log::{debug, error, info, warn};
use crate::drivers::MonitorError;

pub const JITTER_WINDOW: usize = 100;
pub const DEFAULT_OVERRUN_FACTOR: u32 = 10;

pub type TickFn = Box<dyn FnMut() -> Result<(), MonitorError> + Send>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SchedulerDiagnostics {
    pub interval: Duration,
    pub ticks: u64,
    /// Failed ticks plus ticks that overran.
    pub dropped_ticks: u64,
    pub skipped_ticks: u64,
    pub mean_interval: Duration,
    /// 0.0 while the smoothed interval is still zero.
    pub update_rate_hz: f64,
}

struct Control {
    running: bool,
    interval: Duration,
}

struct TickStats {
    last_tick: Instant,
    jitter: VecDeque<Duration>,
    ticks: u64,
    dropped: u64,
    skipped: u64,
}

impl TickStats {
    fn new(interval: Duration) -> Self {
        Self {
            last_tick: Instant::now(),
            jitter: VecDeque::from(vec![interval; JITTER_WINDOW]),
            ticks: 0,
            dropped: 0,
            skipped: 0,
        }
    }

    fn record(&mut self, now: Instant) {
        self.jitter.pop_front();
        self.jitter.push_back(now.saturating_duration_since(self.last_tick));
        self.last_tick = now;
        self.ticks += 1;
    }

    fn mean_interval(&self) -> Duration {
        let total: Duration = self.jitter.iter().sum();
        total / self.jitter.len() as u32
    }
}

struct Shared {
    control: Mutex<Control>,
    wake: Condvar,
    stats: Mutex<TickStats>,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self) -> MutexGuard<'_, TickStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct UpdateScheduler {
    name: String,
    shared: Arc<Shared>,
    overrun_factor: u32,
    on_tick: Option<TickFn>,
    worker: Option<JoinHandle<TickFn>>,
}

impl UpdateScheduler {
    /// `interval_ms == 0` ticks as fast as the worker can loop.
    pub fn new(name: impl Into<String>, interval_ms: u64, on_tick: TickFn) -> Self {
        let interval = Duration::from_millis(interval_ms);
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                control: Mutex::new(Control {
                    running: false,
                    interval,
                }),
                wake: Condvar::new(),
                stats: Mutex::new(TickStats::new(interval)),
            }),
            overrun_factor: DEFAULT_OVERRUN_FACTOR,
            on_tick: Some(on_tick),
            worker: None,
        }
    }

    /// A tick lasting longer than `factor` intervals counts as dropped.
    pub fn with_overrun_factor(mut self, factor: u32) -> Self {
        self.overrun_factor = factor.max(1);
        self
    }

    /// Also restarts a scheduler that was stopped from inside its own tick.
    pub fn start(&mut self) {
        if let Some(handle) = self.worker.take() {
            if self.shared.control().running {
                self.worker = Some(handle);
                return;
            }
            if handle.thread().id() == thread::current().id() {
                // stopped and restarted within the same tick: keep looping
                self.shared.control().running = true;
                self.worker = Some(handle);
                return;
            }
            self.reclaim(handle);
        }
        let Some(on_tick) = self.on_tick.take() else {
            error!("{}: tick callback was lost, scheduler cannot start", self.name);
            return;
        };
        self.shared.control().running = true;
        let shared = Arc::clone(&self.shared);
        let name = self.name.clone();
        let overrun_factor = self.overrun_factor;
        let spawned = thread::Builder::new()
            .name(format!("tick-{name}"))
            .spawn(move || run_worker(name, shared, overrun_factor, on_tick));
        match spawned {
            Ok(handle) => {
                info!("{}: scheduler started", self.name);
                self.worker = Some(handle);
            }
            Err(err) => {
                self.shared.control().running = false;
                error!("{}: failed to spawn worker: {err}", self.name);
            }
        }
    }

    /// Returns once the worker has exited; no tick runs after this.
    pub fn stop(&mut self) {
        {
            let mut control = self.shared.control();
            control.running = false;
        }
        self.shared.wake.notify_all();
        if let Some(handle) = self.worker.take() {
            if handle.thread().id() == thread::current().id() {
                // called from inside a tick; the loop exits once it returns and
                // the next start() joins it
                debug!("{}: stop requested from the tick itself", self.name);
                self.worker = Some(handle);
                return;
            }
            self.reclaim(handle);
            info!("{}: scheduler stopped", self.name);
        }
    }

    fn reclaim(&mut self, handle: JoinHandle<TickFn>) {
        match handle.join() {
            Ok(on_tick) => self.on_tick = Some(on_tick),
            Err(_) => error!("{}: tick callback panicked", self.name),
        }
    }

    /// Used from the next scheduled tick on.
    pub fn set_interval(&self, interval_ms: u64) {
        self.shared.control().interval = Duration::from_millis(interval_ms);
        self.shared.wake.notify_all();
        info!("{}: update interval set to {interval_ms} ms", self.name);
    }

    pub fn diagnostics(&self) -> SchedulerDiagnostics {
        let interval = self.shared.control().interval;
        let stats = self.shared.stats();
        let mean_interval = stats.mean_interval();
        let update_rate_hz = if mean_interval.is_zero() {
            0.0
        } else {
            1.0 / mean_interval.as_secs_f64()
        };
        SchedulerDiagnostics {
            interval,
            ticks: stats.ticks,
            dropped_ticks: stats.dropped,
            skipped_ticks: stats.skipped,
            mean_interval,
            update_rate_hz,
        }
    }
}

impl Drop for UpdateScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(name: String, shared: Arc<Shared>, overrun_factor: u32, mut on_tick: TickFn) -> TickFn {
    let mut next_due = Instant::now();
    let mut last_started: Option<Instant> = None;
    // interval `next_due` was computed from
    let mut scheduled = shared.control().interval;
    loop {
        let interval = {
            let mut control = shared.control();
            loop {
                if !control.running {
                    return on_tick;
                }
                if control.interval != scheduled {
                    scheduled = control.interval;
                    next_due = last_started.map_or_else(Instant::now, |t| t + scheduled);
                }
                let now = Instant::now();
                if now >= next_due {
                    break;
                }
                control = shared
                    .wake
                    .wait_timeout(control, next_due - now)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|poisoned| poisoned.into_inner().0);
            }
            control.interval
        };

        let started = Instant::now();
        let mean = {
            let mut stats = shared.stats();
            stats.record(started);
            stats.mean_interval()
        };
        debug!("{name}: smoothed update interval {:.2} ms", mean.as_secs_f64() * 1000.0);

        let result = on_tick();
        let elapsed = started.elapsed();
        let overran = !interval.is_zero() && elapsed > interval * overrun_factor;
        match result {
            Err(err) => {
                shared.stats().dropped += 1;
                warn!("{name}: tick dropped: {err}");
            }
            Ok(()) if overran => {
                shared.stats().dropped += 1;
                warn!(
                    "{name}: tick dropped, took {} ms against a {} ms interval",
                    elapsed.as_millis(),
                    interval.as_millis()
                );
            }
            Ok(()) => {}
        }

        last_started = Some(started);
        scheduled = shared.control().interval;
        if scheduled.is_zero() {
            next_due = Instant::now();
            thread::yield_now();
            continue;
        }
        next_due = started + scheduled;
        let now = Instant::now();
        if now >= next_due {
            let behind = (now - next_due).as_nanos() / scheduled.as_nanos();
            let missed = u32::try_from(behind + 1).unwrap_or(u32::MAX);
            shared.stats().skipped += u64::from(missed);
            next_due += scheduled * missed;
        }
    }
}
