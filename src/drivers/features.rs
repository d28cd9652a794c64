//! Per-channel scalar reductions over a window.
//!
//! The monitor only depends on [`FeatureReducer`]; [`StandardFeatures`] is the
//! built-in table of time-domain EMG features used when nothing else is plugged in.
use std::collections::BTreeMap;
use ndarray::{ArrayView1, ArrayView2, Axis};
use once_cell::sync::Lazy;
use crate::drivers::MonitorError;
pub const DEFAULT_FEATURE: &str = "MAV";
/// Reduces a channels x samples matrix to one value per channel.
pub trait FeatureReducer: Send + Sync {
    fn reduce(&self, window: ArrayView2<'_, f64>, feature: &str) -> Result<Vec<f64>, MonitorError>;
    fn feature_names(&self) -> Vec<String>;
    fn supports(&self, feature: &str) -> bool {
        self.feature_names().iter().any(|f| f == feature)
    }
}
type Reduction = fn(ArrayView1<f64>) -> f64;
static FEATURES: Lazy<BTreeMap<&'static str, Reduction>> = Lazy::new(|| {
    let mut table: BTreeMap<&'static str, Reduction> = BTreeMap::new();
    table.insert("MAV", mean_absolute_value);
    table.insert("RMS", root_mean_square);
    table.insert("VAR", variance);
    table.insert("WL", waveform_length);
    table.insert("ZC", zero_crossings);
    table.insert("LOGP", log_power);
    table
});
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardFeatures;
impl FeatureReducer for StandardFeatures {
    fn reduce(&self, window: ArrayView2<'_, f64>, feature: &str) -> Result<Vec<f64>, MonitorError> {
        let reduction = FEATURES
            .get(feature)
            .ok_or_else(|| MonitorError::UnknownFeature(feature.to_owned()))?;
        Ok(window.axis_iter(Axis(0)).map(|channel| reduction(channel)).collect())
    }
    fn feature_names(&self) -> Vec<String> {
        FEATURES.keys().map(|k| k.to_string()).collect()
    }
}
fn mean_absolute_value(data: ArrayView1<'_, f64>) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().map(|v| v.abs()).sum::<f64>() / data.len() as f64
}
fn root_mean_square(data: ArrayView1<'_, f64>) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    (data.iter().map(|v| v * v).sum::<f64>() / data.len() as f64).sqrt()
}
// Population variance, same normalisation as the impedance estimate.
fn variance(data: ArrayView1<'_, f64>) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mean = data.sum() / data.len() as f64;
    data.iter()
        .map(|v| {
            let delta = v - mean;
            delta * delta
        })
        .sum::<f64>()
        / data.len() as f64
}
fn waveform_length(data: ArrayView1<'_, f64>) -> f64 {
    data.iter()
        .zip(data.iter().skip(1))
        .map(|(a, b)| (b - a).abs())
        .sum()
}
fn zero_crossings(data: ArrayView1<'_, f64>) -> f64 {
    data.iter()
        .zip(data.iter().skip(1))
        .filter(|(a, b)| (**a >= 0.0) != (**b >= 0.0))
        .count() as f64
}
fn log_power(data: ArrayView1<'_, f64>) -> f64 {
    // 1e-6 keeps silent channels finite
    (variance(data) + 1e-6).ln()
}
