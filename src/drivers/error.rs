use thiserror::Error;
use crate::types::ConsumerKind;
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("data source failure: {0}")]
    DataSource(String),
    #[error("unknown feature `{0}`")]
    UnknownFeature(String),
    #[error("invalid placement matrix: {0}")]
    InvalidFormat(String),
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("unknown channel `{0}`")]
    UnknownChannel(String),
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("{0} consumer is already running")]
    ConsumerActive(ConsumerKind),
    #[error("no {0} consumer is running")]
    ConsumerMissing(ConsumerKind),
    #[error("failed to render plot: {0}")]
    Plot(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
impl MonitorError {
    /// Transient failures are absorbed by the scheduler; everything else is structural.
    pub fn is_transient(&self) -> bool {
        matches!(self, MonitorError::DataSource(_))
    }
}
impl From<rusqlite::Error> for MonitorError {
    fn from(value: rusqlite::Error) -> Self {
        MonitorError::DataSource(value.to_string())
    }
}
impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for MonitorError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        MonitorError::Plot(format!("{value:?}"))
    }
}
impl From<image::ImageError> for MonitorError {
    fn from(value: image::ImageError) -> Self {
        MonitorError::Plot(value.to_string())
    }
}
