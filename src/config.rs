// src/config.rs
//! Connection and window parameters, persisted as JSON between runs.
use std::fs;
use std::path::Path;
use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use crate::drivers::{Kernel, MonitorError, DEFAULT_FEATURE, DEFAULT_MEMORY_RETENTION, DEFAULT_SCROLL_DEPTH};
use crate::scheduler::DEFAULT_OVERRUN_FACTOR;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// SQLite database holding the signal table.
    pub database: String,
    pub table: String,
    pub channel_prefix: String,
    pub channel_count: usize,
    /// Explicit channel names; overrides prefix/count when non-empty.
    pub channels: Vec<String>,
    pub subject: String,
    pub condition: String,
    pub sample_rate_hz: f64,
    pub window_length: usize,
    pub interval_ms: u64,
    pub feature: String,
    pub scroll_depth: usize,
    pub placement: Option<String>,
    /// Heatmap gap-fill weights, row by row; the 4-neighbour stencil when unset.
    pub kernel: Option<Vec<Vec<f64>>>,
    pub heat_color: String,
    /// Rows kept per table by the simulated in-memory store.
    pub memory_retention: usize,
    /// Ticks slower than this many intervals count as dropped.
    pub overrun_factor: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            database: "emg.db".to_owned(),
            table: "emg".to_owned(),
            channel_prefix: "ch".to_owned(),
            channel_count: 64,
            channels: Vec::new(),
            subject: "1".to_owned(),
            condition: "1".to_owned(),
            sample_rate_hz: 2400.0,
            window_length: 240,
            interval_ms: 0,
            feature: DEFAULT_FEATURE.to_owned(),
            scroll_depth: DEFAULT_SCROLL_DEPTH,
            placement: None,
            kernel: None,
            heat_color: "yellow".to_owned(),
            memory_retention: DEFAULT_MEMORY_RETENTION,
            overrun_factor: DEFAULT_OVERRUN_FACTOR,
        }
    }
}

impl MonitorConfig {
    /// Missing file means first run: defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("{} not found, using default parameters", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading parameters from {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// `prefix1..prefixN` unless channels are listed explicitly.
    pub fn channel_names(&self) -> Vec<String> {
        if !self.channels.is_empty() {
            return self.channels.clone();
        }
        (1..=self.channel_count)
            .map(|i| format!("{}{}", self.channel_prefix, i))
            .collect()
    }

    pub fn kernel(&self) -> Result<Kernel, MonitorError> {
        match &self.kernel {
            Some(rows) => Kernel::from_rows(rows),
            None => Ok(Kernel::four_neighbor()),
        }
    }

    pub fn window_length_ms(&self) -> f64 {
        self.window_length as f64 * 1000.0 / self.sample_rate_hz
    }
}

/// Window length in samples for a duration picked in milliseconds.
pub fn window_samples_for_ms(ms: u64, sample_rate_hz: f64) -> usize {
    (ms as f64 * sample_rate_hz / 1000.0) as usize + 1
}
