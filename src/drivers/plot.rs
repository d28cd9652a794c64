use std::io::Cursor;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use ndarray::Array2;
use plotters::prelude::LineSeries;
use plotters::prelude::*;
use crate::drivers::error::MonitorError;
use crate::drivers::fft::FrequencySpectrum;
#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    pub line: RGBColor,
    /// Top of the black-to-color heatmap ramp.
    pub heat: RGBColor,
    /// Captions and axis labels; needs a system font.
    pub labels: bool,
}
impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 900,
            height: 400,
            background: RGBColor(10, 10, 10),
            line: CYAN,
            heat: YELLOW,
            labels: true,
        }
    }
}
/// Colors offered for the heatmap ramp.
pub fn named_color(name: &str) -> Option<RGBColor> {
    let color = match name.to_ascii_lowercase().as_str() {
        "yellow" => YELLOW,
        "white" => WHITE,
        "green" => GREEN,
        "blue" => BLUE,
        "red" => RED,
        "orange" => RGBColor(255, 165, 0),
        "violet" => RGBColor(238, 130, 238),
        "snow" => RGBColor(255, 250, 250),
        "lightyellow" => RGBColor(255, 255, 224),
        _ => return None,
    };
    Some(color)
}
fn ramp(top: RGBColor, t: f64) -> RGBColor {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let scale = |c: u8| (c as f64 * t).round() as u8;
    RGBColor(scale(top.0), scale(top.1), scale(top.2))
}
/// Row 0 of the grid is drawn at the top.
pub fn render_heatmap_png(grid: &Array2<f64>, style: &PlotStyle) -> Result<Vec<u8>, MonitorError> {
    let (rows, cols) = grid.dim();
    if rows == 0 || cols == 0 {
        return Err(MonitorError::Plot("heatmap grid has no cells".into()));
    }
    let (lo, hi) = grid
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let span = if (hi - lo).abs() < f64::EPSILON { 1.0 } else { hi - lo };
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let mut builder = ChartBuilder::on(&root);
        builder.margin(10);
        if style.labels {
            builder.caption("EMG Heatmap", ("sans-serif", 20).into_font().color(&WHITE));
        }
        let mut chart = builder.build_cartesian_2d(0f64..cols as f64, 0f64..rows as f64)?;
        chart.draw_series(grid.indexed_iter().map(|((r, c), &v)| {
            let y = (rows - 1 - r) as f64;
            let color = ramp(style.heat, (v - lo) / span);
            Rectangle::new([(c as f64, y), (c as f64 + 1.0, y + 1.0)], color.filled())
        }))?;
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}
/// Time/value pairs, e.g. a scrolling feature series or a raw window.
pub fn render_series_png(
    title: &str,
    series: &[(f64, f64)],
    style: &PlotStyle,
) -> Result<Vec<u8>, MonitorError> {
    if series.is_empty() {
        return Err(MonitorError::Plot("series has no points".into()));
    }
    let (x_min, x_max) = series
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), &(x, _)| (lo.min(x), hi.max(x)));
    let (y_min, y_max) = series
        .iter()
        .fold((0.0f64, 0.0f64), |(lo, hi), &(_, y)| (lo.min(y), hi.max(y)));
    let x_bounds = if (x_max - x_min).abs() < f64::EPSILON {
        (x_min - 1.0, x_max + 1.0)
    } else {
        (x_min, x_max)
    };
    let y_bounds = if (y_max - y_min).abs() < f64::EPSILON {
        (-1.0, 1.0)
    } else {
        (y_min, y_max)
    };
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let mut builder = ChartBuilder::on(&root);
        builder.margin(10);
        if style.labels {
            builder
                .caption(title, ("sans-serif", 20).into_font().color(&WHITE))
                .set_label_area_size(LabelAreaPosition::Left, 45)
                .set_label_area_size(LabelAreaPosition::Bottom, 40);
        }
        let mut chart =
            builder.build_cartesian_2d(x_bounds.0..x_bounds.1, y_bounds.0..y_bounds.1)?;
        if style.labels {
            chart
                .configure_mesh()
                .x_desc("Time [s]")
                .light_line_style(&WHITE.mix(0.1))
                .draw()?;
        }
        chart.draw_series(LineSeries::new(series.iter().copied(), &style.line))?;
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}
pub fn render_spectrum_png(
    spectrum: &FrequencySpectrum,
    style: &PlotStyle,
) -> Result<Vec<u8>, MonitorError> {
    if spectrum.is_empty() {
        return Err(MonitorError::Plot("spectrum has no magnitudes".into()));
    }
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let mut builder = ChartBuilder::on(&root);
        builder.margin(10);
        if style.labels {
            builder
                .caption(
                    format!("FFT Magnitude ({})", spectrum.channel_label),
                    ("sans-serif", 20).into_font().color(&WHITE),
                )
                .set_label_area_size(LabelAreaPosition::Left, 45)
                .set_label_area_size(LabelAreaPosition::Bottom, 40);
        }
        let x_max = spectrum.frequencies_hz.last().copied().unwrap_or(0.0).max(1e-3);
        let y_max = spectrum
            .magnitudes
            .iter()
            .copied()
            .fold(0.0f64, f64::max)
            .max(1e-3);
        let mut chart = builder.build_cartesian_2d(0f64..x_max, 0f64..y_max)?;
        if style.labels {
            chart
                .configure_mesh()
                .x_desc("Frequency [Hz]")
                .light_line_style(&WHITE.mix(0.1))
                .draw()?;
        }
        let series = spectrum
            .frequencies_hz
            .iter()
            .copied()
            .zip(spectrum.magnitudes.iter().copied());
        chart.draw_series(LineSeries::new(series, &style.line))?;
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}
fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, MonitorError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| MonitorError::Plot("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}
