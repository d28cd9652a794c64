use rustfft::{num_complex::Complex64, FftPlanner};
use crate::drivers::{MonitorError, Window};
/// Magnitude spectrum of one channel, non-negative frequencies only.
#[derive(Clone, Debug)]
pub struct FrequencySpectrum {
    pub sample_rate_hz: f64,
    pub channel_label: String,
    pub frequencies_hz: Vec<f64>,
    pub magnitudes: Vec<f64>,
}
impl FrequencySpectrum {
    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }
    /// Bin with the largest magnitude, skipping DC.
    pub fn peak(&self) -> Option<(f64, f64)> {
        self.frequencies_hz
            .iter()
            .copied()
            .zip(self.magnitudes.iter().copied())
            .skip(1)
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}
/// Stateless spectrum of the raw samples of a single channel.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpectralView;
impl SpectralView {
    /// Unnormalised |X[k]| for k in 0..N/2, over the window in chronological order.
    pub fn spectrum(
        window: &Window,
        channel: &str,
        sample_rate_hz: f64,
    ) -> Result<FrequencySpectrum, MonitorError> {
        if sample_rate_hz <= 0.0 || !sample_rate_hz.is_finite() {
            return Err(MonitorError::Configuration(
                "sample rate must be greater than zero".into(),
            ));
        }
        let samples = window.channel(channel)?;
        let n = samples.len();
        let chronological = window.is_chronological();
        let mut buffer: Vec<Complex64> = if chronological {
            samples.iter().map(|&v| Complex64::new(v, 0.0)).collect()
        } else {
            samples.iter().rev().map(|&v| Complex64::new(v, 0.0)).collect()
        };
        let half = n / 2;
        if n > 0 {
            let mut planner = FftPlanner::<f64>::new();
            let fft = planner.plan_fft_forward(n);
            fft.process(&mut buffer);
        }
        let frequencies_hz = (0..half)
            .map(|k| k as f64 * sample_rate_hz / n as f64)
            .collect();
        let magnitudes = buffer.iter().take(half).map(|c| c.norm()).collect();
        Ok(FrequencySpectrum {
            sample_rate_hz,
            channel_label: channel.to_owned(),
            frequencies_hz,
            magnitudes,
        })
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    fn sine_window(n: usize, fs: f64, freq: f64) -> Window {
        let values: Vec<f64> = (0..n)
            .flat_map(|i| {
                let t = i as f64 / fs;
                [(2.0 * std::f64::consts::PI * freq * t).sin(), 1.0]
            })
            .collect();
        Window {
            channel_labels: vec!["c1".into(), "dc".into()],
            row_ids: (0..n as i64).collect(),
            samples: Array2::from_shape_vec((n, 2), values).unwrap(),
        }
    }
    #[test]
    fn spectrum_has_half_length_and_finds_the_tone() {
        let window = sine_window(64, 64.0, 8.0);
        let spectrum = SpectralView::spectrum(&window, "c1", 64.0).unwrap();
        assert_eq!(spectrum.len(), 32);
        assert_eq!(spectrum.frequencies_hz[1], 1.0);
        let (freq, mag) = spectrum.peak().unwrap();
        assert_eq!(freq, 8.0);
        assert!((mag - 32.0).abs() < 1e-6);
    }
    #[test]
    fn constant_channel_is_all_dc() {
        let window = sine_window(16, 100.0, 5.0);
        let spectrum = SpectralView::spectrum(&window, "dc", 100.0).unwrap();
        assert!((spectrum.magnitudes[0] - 16.0).abs() < 1e-9);
        assert!(spectrum.magnitudes[1..].iter().all(|m| m.abs() < 1e-9));
    }
    #[test]
    fn odd_and_empty_windows() {
        let window = sine_window(5, 10.0, 1.0);
        assert_eq!(SpectralView::spectrum(&window, "c1", 10.0).unwrap().len(), 2);
        let empty = Window::empty(vec!["c1".into()]);
        assert!(SpectralView::spectrum(&empty, "c1", 10.0).unwrap().is_empty());
    }
    #[test]
    fn unknown_channel_fails() {
        let window = sine_window(8, 10.0, 1.0);
        assert!(matches!(
            SpectralView::spectrum(&window, "c7", 10.0),
            Err(MonitorError::UnknownChannel(_))
        ));
    }
}
