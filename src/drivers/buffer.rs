use std::collections::VecDeque;
use std::time::Duration;
use crate::drivers::MonitorError;
/// Default history depth of the scrolling line plot.
pub const DEFAULT_SCROLL_DEPTH: usize = 1500;
/// Fixed-depth history of per-channel feature values, newest first.
///
/// Timestamps are relative to the most recent push (always 0.0 at index 0)
/// and go negative towards the oldest entry.
#[derive(Clone, Debug)]
pub struct ScrollingSeriesBuffer {
    per_channel: Vec<VecDeque<f64>>, // channel -> values
    times: VecDeque<f64>,            // seconds relative to newest
    channel_labels: Vec<String>,
}
impl ScrollingSeriesBuffer {
    pub fn new(channel_labels: Vec<String>, depth: usize) -> Result<Self, MonitorError> {
        if depth == 0 {
            return Err(MonitorError::Configuration(
                "scroll depth must be at least one sample".into(),
            ));
        }
        if channel_labels.is_empty() {
            return Err(MonitorError::Configuration(
                "scrolling buffer needs at least one channel".into(),
            ));
        }
        let per_channel = channel_labels
            .iter()
            .map(|_| VecDeque::from(vec![0.0; depth]))
            .collect();
        Ok(Self {
            per_channel,
            times: VecDeque::from(vec![0.0; depth]),
            channel_labels,
        })
    }
    /// Shifts history by one and re-bases every stored time on the new sample.
    pub fn push(&mut self, values: &[f64], elapsed: Duration) -> Result<(), MonitorError> {
        if values.len() != self.per_channel.len() {
            return Err(MonitorError::ChannelMismatch {
                expected: self.per_channel.len(),
                actual: values.len(),
            });
        }
        for (history, &value) in self.per_channel.iter_mut().zip(values) {
            history.pop_back();
            history.push_front(value);
        }
        let tau = elapsed.as_secs_f64();
        for t in self.times.iter_mut() {
            *t -= tau;
        }
        self.times.pop_back();
        self.times.push_front(0.0);
        Ok(())
    }
    /// `(time, value)` pairs for one channel, newest (time 0) first.
    pub fn series_for(&self, channel: &str) -> Result<Vec<(f64, f64)>, MonitorError> {
        let idx = self
            .channel_labels
            .iter()
            .position(|c| c == channel)
            .ok_or_else(|| MonitorError::UnknownChannel(channel.to_owned()))?;
        Ok(self
            .times
            .iter()
            .copied()
            .zip(self.per_channel[idx].iter().copied())
            .collect())
    }
}
