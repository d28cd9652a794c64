// src/drivers/mod.rs
pub mod buffer;
pub mod error;
pub mod features;
pub mod fft;
pub mod heatmap;
pub mod plot;
pub mod source;
pub mod store;
pub use buffer::{ScrollingSeriesBuffer, DEFAULT_SCROLL_DEPTH};
pub use error::MonitorError;
pub use features::{FeatureReducer, StandardFeatures, DEFAULT_FEATURE};
pub use fft::{FrequencySpectrum, SpectralView};
pub use heatmap::{Kernel, PlacementMatrix, SpatialReconstructor};
pub use plot::{named_color, render_heatmap_png, render_series_png, render_spectrum_png, PlotStyle};
pub use source::{SignalStore, Window, WindowSource};
pub use store::{MemoryStore, SampleSink, SqliteStore, DEFAULT_MEMORY_RETENTION};
