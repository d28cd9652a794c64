// src/consumers.rs
//! The four live feeds. Each one pulls a window per tick, derives its own
//! view and replaces its published state in one step, so a failed tick leaves
//! the previous view untouched.
use std::sync::Arc;
use std::time::Instant;
use log::{debug, info, warn};
use ndarray::Array2;
use crate::drivers::{
    render_heatmap_png, FeatureReducer, FrequencySpectrum, Kernel, MonitorError, PlacementMatrix,
    PlotStyle, ScrollingSeriesBuffer, SpatialReconstructor, SpectralView, WindowSource,
};
use crate::recorder::FrameRecorder;
use crate::types::{ConsumerCommand, ConsumerKind};

/// Latest published state of a consumer, ready for a renderer.
#[derive(Clone, Debug)]
pub enum ConsumerView {
    Heatmap(Array2<f64>),
    Lineplot { channel: String, series: Vec<(f64, f64)> },
    Raw { channel: String, series: Vec<(f64, f64)> },
    Spectrum(FrequencySpectrum),
}

pub trait Consumer: Send {
    fn kind(&self) -> ConsumerKind;
    /// One fetch-transform-publish cycle.
    fn refresh(&mut self) -> Result<(), MonitorError>;
    /// Applies a control event. Interval changes are handled by the scheduler.
    fn apply(&mut self, command: &ConsumerCommand) -> Result<(), MonitorError>;
    fn view(&self) -> Option<ConsumerView>;
}

#[derive(Clone, Debug)]
pub struct ConsumerSettings {
    pub feature: String,
    pub sample_rate_hz: f64,
    pub scroll_depth: usize,
    pub channel: Option<String>,
    pub style: PlotStyle,
    /// Gap-fill kernel for the heatmap.
    pub kernel: Kernel,
}

/// Builds a consumer of the given kind over a shared window source.
pub fn build_consumer(
    kind: ConsumerKind,
    source: Arc<WindowSource>,
    reducer: Arc<dyn FeatureReducer>,
    settings: &ConsumerSettings,
    placement: Option<PlacementMatrix>,
) -> Result<Box<dyn Consumer>, MonitorError> {
    let consumer: Box<dyn Consumer> = match kind {
        ConsumerKind::Heatmap => {
            let placement = placement.ok_or_else(|| {
                MonitorError::Configuration("heatmap needs a placement matrix".into())
            })?;
            Box::new(HeatmapConsumer::new(
                source,
                reducer,
                &settings.feature,
                SpatialReconstructor::new(placement, settings.kernel.clone()),
                settings.style.clone(),
            )?)
        }
        ConsumerKind::Lineplot => Box::new(LineplotConsumer::new(
            source,
            reducer,
            &settings.feature,
            settings.channel.clone(),
            settings.scroll_depth,
        )?),
        ConsumerKind::LineplotRaw => Box::new(RawLineplotConsumer::new(
            source,
            settings.channel.clone(),
            settings.sample_rate_hz,
        )?),
        ConsumerKind::Spectrum => Box::new(SpectrumConsumer::new(
            source,
            settings.channel.clone(),
            settings.sample_rate_hz,
        )?),
    };
    Ok(consumer)
}

fn checked_feature(reducer: &dyn FeatureReducer, feature: &str) -> Result<String, MonitorError> {
    if reducer.supports(feature) {
        Ok(feature.to_owned())
    } else {
        Err(MonitorError::UnknownFeature(feature.to_owned()))
    }
}

fn checked_channel(source: &WindowSource, channel: Option<String>) -> Result<String, MonitorError> {
    match channel {
        Some(name) if source.channels().contains(&name) => Ok(name),
        Some(name) => Err(MonitorError::UnknownChannel(name)),
        // defaults to the first signal channel
        None => source
            .channels()
            .first()
            .cloned()
            .ok_or_else(|| MonitorError::Configuration("source has no channels".into())),
    }
}

fn ignored(kind: ConsumerKind, command: &ConsumerCommand) -> Result<(), MonitorError> {
    debug!("{kind}: ignoring {command:?}");
    Ok(())
}

pub struct HeatmapConsumer {
    source: Arc<WindowSource>,
    reducer: Arc<dyn FeatureReducer>,
    feature: String,
    reconstructor: SpatialReconstructor,
    grid: Array2<f64>,
    recorder: FrameRecorder,
    style: PlotStyle,
}

impl HeatmapConsumer {
    pub fn new(
        source: Arc<WindowSource>,
        reducer: Arc<dyn FeatureReducer>,
        feature: &str,
        reconstructor: SpatialReconstructor,
        style: PlotStyle,
    ) -> Result<Self, MonitorError> {
        let feature = checked_feature(reducer.as_ref(), feature)?;
        reconstructor
            .placement()
            .check_highest(source.channels().len())?;
        let grid = Array2::zeros((
            reconstructor.placement().rows(),
            reconstructor.placement().cols(),
        ));
        Ok(Self {
            source,
            reducer,
            feature,
            reconstructor,
            grid,
            recorder: FrameRecorder::new(),
            style,
        })
    }
}

impl Consumer for HeatmapConsumer {
    fn kind(&self) -> ConsumerKind {
        ConsumerKind::Heatmap
    }

    fn refresh(&mut self) -> Result<(), MonitorError> {
        let window = self.source.fetch()?;
        let features = if window.is_empty() {
            Vec::new()
        } else {
            self.reducer.reduce(window.by_channel().view(), &self.feature)?
        };
        self.grid = self.reconstructor.reconstruct(&features)?;
        if self.recorder.is_recording() {
            let frame = render_heatmap_png(&self.grid, &self.style)
                .and_then(|png| self.recorder.write_frame(&png));
            if let Err(err) = frame {
                warn!("heatmap: frame not recorded: {err}");
            }
        }
        Ok(())
    }

    fn apply(&mut self, command: &ConsumerCommand) -> Result<(), MonitorError> {
        match command {
            ConsumerCommand::SetWindowLength(length) => {
                self.source.set_window_length(*length);
                info!("heatmap: window length set to {length} samples");
            }
            ConsumerCommand::SetFeature(name) => {
                self.feature = checked_feature(self.reducer.as_ref(), name)?;
                info!("heatmap: feature set to {name}");
            }
            ConsumerCommand::LoadPlacement(path) => {
                let channels = self.source.channels().len();
                self.reconstructor.load_placement(path, channels)?;
            }
            ConsumerCommand::StartRecording(dir) => self.recorder.start(dir)?,
            ConsumerCommand::StopRecording => {
                self.recorder.stop();
            }
            ConsumerCommand::CancelRecording => {
                let removed = self.recorder.cancel()?;
                info!("heatmap: recording cancelled, {removed} frames removed");
            }
            other => return ignored(self.kind(), other),
        }
        Ok(())
    }

    fn view(&self) -> Option<ConsumerView> {
        Some(ConsumerView::Heatmap(self.grid.clone()))
    }
}

pub struct LineplotConsumer {
    source: Arc<WindowSource>,
    reducer: Arc<dyn FeatureReducer>,
    feature: String,
    channel: String,
    buffer: ScrollingSeriesBuffer,
    last_push: Instant,
}

impl LineplotConsumer {
    pub fn new(
        source: Arc<WindowSource>,
        reducer: Arc<dyn FeatureReducer>,
        feature: &str,
        channel: Option<String>,
        depth: usize,
    ) -> Result<Self, MonitorError> {
        let feature = checked_feature(reducer.as_ref(), feature)?;
        let channel = checked_channel(&source, channel)?;
        let buffer = ScrollingSeriesBuffer::new(source.channels().to_vec(), depth)?;
        Ok(Self {
            source,
            reducer,
            feature,
            channel,
            buffer,
            last_push: Instant::now(),
        })
    }
}

impl Consumer for LineplotConsumer {
    fn kind(&self) -> ConsumerKind {
        ConsumerKind::Lineplot
    }

    fn refresh(&mut self) -> Result<(), MonitorError> {
        let window = self.source.fetch()?;
        let features = self
            .reducer
            .reduce(window.by_channel().view(), &self.feature)?;
        let now = Instant::now();
        self.buffer
            .push(&features, now.saturating_duration_since(self.last_push))?;
        self.last_push = now;
        Ok(())
    }

    fn apply(&mut self, command: &ConsumerCommand) -> Result<(), MonitorError> {
        match command {
            ConsumerCommand::SetWindowLength(length) => {
                self.source.set_window_length(*length);
                info!("lineplot: window length set to {length} samples");
            }
            ConsumerCommand::SetFeature(name) => {
                self.feature = checked_feature(self.reducer.as_ref(), name)?;
                info!("lineplot: feature set to {name}");
            }
            ConsumerCommand::SelectChannel(name) => {
                self.channel = checked_channel(&self.source, Some(name.clone()))?;
            }
            other => return ignored(self.kind(), other),
        }
        Ok(())
    }

    fn view(&self) -> Option<ConsumerView> {
        let series = self.buffer.series_for(&self.channel).ok()?;
        Some(ConsumerView::Lineplot {
            channel: self.channel.clone(),
            series,
        })
    }
}

pub struct RawLineplotConsumer {
    source: Arc<WindowSource>,
    channel: String,
    sample_rate_hz: f64,
    series: Vec<(f64, f64)>,
}

impl RawLineplotConsumer {
    pub fn new(
        source: Arc<WindowSource>,
        channel: Option<String>,
        sample_rate_hz: f64,
    ) -> Result<Self, MonitorError> {
        if sample_rate_hz <= 0.0 || !sample_rate_hz.is_finite() {
            return Err(MonitorError::Configuration(
                "sample rate must be greater than zero".into(),
            ));
        }
        let channel = checked_channel(&source, channel)?;
        Ok(Self {
            source,
            channel,
            sample_rate_hz,
            series: Vec::new(),
        })
    }
}

impl Consumer for RawLineplotConsumer {
    fn kind(&self) -> ConsumerKind {
        ConsumerKind::LineplotRaw
    }

    fn refresh(&mut self) -> Result<(), MonitorError> {
        let window = self.source.fetch()?.chronological();
        let dt = 1.0 / self.sample_rate_hz;
        self.series = window
            .channel(&self.channel)?
            .iter()
            .enumerate()
            .map(|(i, &v)| (i as f64 * dt, v))
            .collect();
        Ok(())
    }

    fn apply(&mut self, command: &ConsumerCommand) -> Result<(), MonitorError> {
        match command {
            ConsumerCommand::SetWindowLength(length) => {
                self.source.set_window_length(*length);
                info!("raw lineplot: window length set to {length} samples");
            }
            ConsumerCommand::SelectChannel(name) => {
                self.channel = checked_channel(&self.source, Some(name.clone()))?;
            }
            other => return ignored(self.kind(), other),
        }
        Ok(())
    }

    fn view(&self) -> Option<ConsumerView> {
        Some(ConsumerView::Raw {
            channel: self.channel.clone(),
            series: self.series.clone(),
        })
    }
}

pub struct SpectrumConsumer {
    source: Arc<WindowSource>,
    channel: String,
    sample_rate_hz: f64,
    spectrum: Option<FrequencySpectrum>,
}

impl SpectrumConsumer {
    pub fn new(
        source: Arc<WindowSource>,
        channel: Option<String>,
        sample_rate_hz: f64,
    ) -> Result<Self, MonitorError> {
        if sample_rate_hz <= 0.0 || !sample_rate_hz.is_finite() {
            return Err(MonitorError::Configuration(
                "sample rate must be greater than zero".into(),
            ));
        }
        let channel = checked_channel(&source, channel)?;
        Ok(Self {
            source,
            channel,
            sample_rate_hz,
            spectrum: None,
        })
    }
}

impl Consumer for SpectrumConsumer {
    fn kind(&self) -> ConsumerKind {
        ConsumerKind::Spectrum
    }

    fn refresh(&mut self) -> Result<(), MonitorError> {
        let window = self.source.fetch()?;
        let spectrum = SpectralView::spectrum(&window, &self.channel, self.sample_rate_hz)?;
        self.spectrum = Some(spectrum);
        Ok(())
    }

    fn apply(&mut self, command: &ConsumerCommand) -> Result<(), MonitorError> {
        match command {
            ConsumerCommand::SetWindowLength(length) => {
                self.source.set_window_length(*length);
                info!("spectrum: window length set to {length} samples");
            }
            ConsumerCommand::SelectChannel(name) => {
                self.channel = checked_channel(&self.source, Some(name.clone()))?;
            }
            other => return ignored(self.kind(), other),
        }
        Ok(())
    }

    fn view(&self) -> Option<ConsumerView> {
        self.spectrum.clone().map(ConsumerView::Spectrum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{MemoryStore, StandardFeatures};

    fn labels() -> Vec<String> {
        vec!["c1".into(), "c2".into()]
    }

    fn source(rows: i64) -> (Arc<MemoryStore>, Arc<WindowSource>) {
        let store = Arc::new(MemoryStore::default());
        store.create_table("emg", labels());
        for idx in 1..=rows {
            store
                .append("emg", "s01", "1", idx, vec![idx as f64, -2.0 * idx as f64])
                .unwrap();
        }
        let source = WindowSource::new(store.clone(), "emg", labels(), "s01", "1", 4).unwrap();
        (store, Arc::new(source))
    }

    fn placement() -> PlacementMatrix {
        PlacementMatrix::from_rows(vec![vec![1, 0], vec![0, 2]], 2).unwrap()
    }

    fn heatmap(source: Arc<WindowSource>) -> HeatmapConsumer {
        HeatmapConsumer::new(
            source,
            Arc::new(StandardFeatures),
            "MAV",
            SpatialReconstructor::new(placement(), Kernel::default()),
            PlotStyle {
                width: 64,
                height: 64,
                labels: false,
                ..PlotStyle::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn heatmap_places_mean_absolute_values() {
        let (_, source) = source(6);
        let mut consumer = heatmap(source);
        consumer.refresh().unwrap();
        // rows 3..=6: c1 mean 4.5, |c2| mean 9
        assert_eq!(consumer.grid[[0, 0]], 4.5);
        assert_eq!(consumer.grid[[1, 1]], 9.0);
        assert_eq!(consumer.grid[[0, 1]], (4.5 * 2.0 + 9.0 * 2.0) / 4.0);
    }

    #[test]
    fn heatmap_without_data_shows_zero_grid() {
        let (_, source) = source(0);
        let mut consumer = heatmap(source);
        consumer.refresh().unwrap();
        assert!(consumer.grid.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn failed_fetch_keeps_previous_grid() {
        let (store, source) = source(6);
        let mut consumer = heatmap(source);
        consumer.refresh().unwrap();
        let before = consumer.grid.clone();
        store.set_offline(true);
        assert!(matches!(consumer.refresh(), Err(MonitorError::DataSource(_))));
        assert_eq!(consumer.grid, before);
    }

    #[test]
    fn heatmap_rejects_unknown_feature_and_keeps_current() {
        let (_, source) = source(3);
        let mut consumer = heatmap(source);
        let err = consumer
            .apply(&ConsumerCommand::SetFeature("NOPE".into()))
            .unwrap_err();
        assert!(matches!(err, MonitorError::UnknownFeature(_)));
        assert_eq!(consumer.feature, "MAV");
        consumer.apply(&ConsumerCommand::SetFeature("RMS".into())).unwrap();
        assert_eq!(consumer.feature, "RMS");
    }

    #[test]
    fn heatmap_records_frames_while_recording() {
        let dir = tempfile::tempdir().unwrap();
        let (_, source) = source(4);
        let mut consumer = heatmap(source);
        consumer
            .apply(&ConsumerCommand::StartRecording(dir.path().to_path_buf()))
            .unwrap();
        consumer.refresh().unwrap();
        consumer.refresh().unwrap();
        consumer.apply(&ConsumerCommand::StopRecording).unwrap();
        consumer.refresh().unwrap();
        assert!(dir.path().join("img1.png").exists());
        assert!(!dir.path().join("img2.png").exists());
    }

    #[test]
    fn cancelled_recording_leaves_no_frames() {
        let dir = tempfile::tempdir().unwrap();
        let take = dir.path().join("take");
        let (_, source) = source(4);
        let mut consumer = heatmap(source);
        consumer
            .apply(&ConsumerCommand::StartRecording(take.clone()))
            .unwrap();
        consumer.refresh().unwrap();
        consumer.refresh().unwrap();
        assert!(take.join("img1.png").exists());
        consumer.apply(&ConsumerCommand::CancelRecording).unwrap();
        assert!(!take.join("img0.png").exists());
        assert!(!take.join("img1.png").exists());
        consumer.refresh().unwrap();
        assert!(!take.join("img0.png").exists());
    }

    #[test]
    fn configured_kernel_reaches_the_heatmap() {
        let (_, source) = source(6);
        let settings = ConsumerSettings {
            feature: "MAV".into(),
            sample_rate_hz: 100.0,
            scroll_depth: 10,
            channel: None,
            style: PlotStyle::default(),
            kernel: Kernel::from_rows(&[vec![0.0, 0.0, 1.0]]).unwrap(),
        };
        let mut consumer = build_consumer(
            ConsumerKind::Heatmap,
            source,
            Arc::new(StandardFeatures),
            &settings,
            Some(placement()),
        )
        .unwrap();
        consumer.refresh().unwrap();
        let Some(ConsumerView::Heatmap(grid)) = consumer.view() else {
            panic!("expected a heatmap view");
        };
        // each gap copies its left neighbour, wrapping around the row
        assert_eq!(grid[[0, 1]], 4.5);
        assert_eq!(grid[[1, 0]], 9.0);
    }

    #[test]
    fn lineplot_scrolls_feature_history() {
        let (store, source) = source(4);
        let mut consumer =
            LineplotConsumer::new(source, Arc::new(StandardFeatures), "MAV", None, 5).unwrap();
        consumer.refresh().unwrap();
        store.append("emg", "s01", "1", 5, vec![5.0, -10.0]).unwrap();
        consumer.refresh().unwrap();
        let Some(ConsumerView::Lineplot { channel, series }) = consumer.view() else {
            panic!("expected a lineplot view");
        };
        assert_eq!(channel, "c1");
        assert_eq!(series.len(), 5);
        assert_eq!(series[0], (0.0, 3.5));
        assert_eq!(series[1].1, 2.5);
        assert!(series[1].0 <= 0.0);
    }

    #[test]
    fn window_length_command_is_shared_through_the_source() {
        let (_, source) = source(10);
        let mut raw = RawLineplotConsumer::new(source.clone(), Some("c2".into()), 1000.0).unwrap();
        raw.apply(&ConsumerCommand::SetWindowLength(3)).unwrap();
        assert_eq!(source.window_length(), 3);
        raw.refresh().unwrap();
        let Some(ConsumerView::Raw { series, .. }) = raw.view() else {
            panic!("expected a raw view");
        };
        assert_eq!(series, vec![(0.0, -16.0), (0.001, -18.0), (0.002, -20.0)]);
    }

    #[test]
    fn channel_selection_is_validated() {
        let (_, source) = source(8);
        let mut spectrum = SpectrumConsumer::new(source, None, 100.0).unwrap();
        assert!(matches!(
            spectrum.apply(&ConsumerCommand::SelectChannel("c9".into())),
            Err(MonitorError::UnknownChannel(_))
        ));
        spectrum
            .apply(&ConsumerCommand::SelectChannel("c2".into()))
            .unwrap();
        spectrum.refresh().unwrap();
        let Some(ConsumerView::Spectrum(view)) = spectrum.view() else {
            panic!("expected a spectrum view");
        };
        assert_eq!(view.channel_label, "c2");
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn heatmap_needs_placement() {
        let (_, source) = source(1);
        let settings = ConsumerSettings {
            feature: "MAV".into(),
            sample_rate_hz: 100.0,
            scroll_depth: 10,
            channel: None,
            style: PlotStyle::default(),
            kernel: Kernel::default(),
        };
        let result = build_consumer(
            ConsumerKind::Heatmap,
            source,
            Arc::new(StandardFeatures),
            &settings,
            None,
        );
        assert!(matches!(result, Err(MonitorError::Configuration(_))));
    }
}
