// src/main.rs
mod config;
mod consumers;
mod drivers;
mod engine;
mod recorder;
mod scheduler;
mod simulator;
mod types;
use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use crate::config::{window_samples_for_ms, MonitorConfig};
use crate::consumers::{build_consumer, ConsumerSettings, ConsumerView};
use crate::drivers::{
    named_color, render_heatmap_png, render_series_png, render_spectrum_png, MemoryStore,
    PlacementMatrix, PlotStyle, SampleSink, SignalStore, SqliteStore, StandardFeatures,
    WindowSource,
};
use crate::engine::ConsumerRegistry;
use crate::simulator::SyntheticFeed;
use crate::types::{parse_control_line, ConsumerCommand, ConsumerKind};

#[derive(Parser, Debug)]
#[command(name = "emg-monitor", about = "Real-time monitor for multi-channel EMG tables")]
struct Cli {
    /// Parameter file, rewritten before the stream is created.
    #[arg(long, default_value = "monitor.json")]
    config: PathBuf,
    /// Feed an in-memory table with synthetic EMG instead of opening the database.
    #[arg(long)]
    simulate: bool,
    /// With --simulate, write the synthetic rows into the configured database.
    #[arg(long, requires = "simulate")]
    persist: bool,
    /// heatmap, lineplot, raw or spectrum; repeat for several views.
    #[arg(long = "plot", value_parser = parse_kind, default_value = "heatmap")]
    plots: Vec<ConsumerKind>,
    /// How long to run before shutting down.
    #[arg(long, default_value_t = 10)]
    seconds: u64,
    /// Window length in milliseconds (converted with the sample rate).
    #[arg(long)]
    window_ms: Option<u64>,
    /// Update interval in milliseconds; 0 updates as fast as possible.
    #[arg(long)]
    interval_ms: Option<u64>,
    #[arg(long)]
    feature: Option<String>,
    #[arg(long)]
    channel: Option<String>,
    /// Heatmap ramp color (yellow, white, green, blue, red, orange, violet, snow, lightyellow).
    #[arg(long)]
    color: Option<String>,
    /// Record heatmap frames into this directory.
    #[arg(long)]
    record: Option<PathBuf>,
    /// Write the last view of every consumer as PNG into this directory.
    #[arg(long)]
    export: Option<PathBuf>,
    /// Write the placement matrix in use to this file.
    #[arg(long)]
    save_placement: Option<PathBuf>,
    /// Ignore control lines on stdin.
    #[arg(long)]
    no_stdin: bool,
}

fn parse_kind(name: &str) -> Result<ConsumerKind, String> {
    ConsumerKind::parse(name).ok_or_else(|| format!("unknown plot type `{name}`"))
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = MonitorConfig::load(&cli.config)?;
    if let Some(ms) = cli.window_ms {
        config.window_length = window_samples_for_ms(ms, config.sample_rate_hz);
    }
    if let Some(interval) = cli.interval_ms {
        config.interval_ms = interval;
    }
    if let Some(feature) = &cli.feature {
        config.feature = feature.clone();
    }
    if let Some(color) = &cli.color {
        config.heat_color = color.clone();
    }
    config.save(&cli.config)?;
    info!(
        "window {} samples ({:.1} ms at {} Hz), feature {}",
        config.window_length,
        config.window_length_ms(),
        config.sample_rate_hz,
        config.feature
    );

    let channels = config.channel_names();
    let mut feed = None;
    let store: Arc<dyn SignalStore> = if cli.simulate {
        let (store, sink): (Arc<dyn SignalStore>, Arc<dyn SampleSink>) = if cli.persist {
            let sqlite = Arc::new(open_database(&config)?);
            (sqlite.clone(), sqlite)
        } else {
            let memory = Arc::new(MemoryStore::with_retention(config.memory_retention));
            (memory.clone(), memory)
        };
        feed = Some(SyntheticFeed::spawn(
            sink,
            config.table.clone(),
            channels.clone(),
            config.subject.clone(),
            config.condition.clone(),
            config.sample_rate_hz,
        )?);
        store
    } else {
        Arc::new(open_database(&config)?)
    };
    let source = Arc::new(WindowSource::new(
        store,
        &config.table,
        channels.clone(),
        &config.subject,
        &config.condition,
        config.window_length,
    )?);

    let mut style = PlotStyle::default();
    match named_color(&config.heat_color) {
        Some(color) => style.heat = color,
        None => warn!("unknown heatmap color `{}`, keeping yellow", config.heat_color),
    }
    let settings = ConsumerSettings {
        feature: config.feature.clone(),
        sample_rate_hz: config.sample_rate_hz,
        scroll_depth: config.scroll_depth,
        channel: cli.channel.clone(),
        style: style.clone(),
        kernel: config.kernel().context("reading the heatmap kernel")?,
    };

    let mut registry = ConsumerRegistry::new().with_overrun_factor(config.overrun_factor);
    for &kind in &cli.plots {
        if registry.is_active(kind) {
            continue;
        }
        let placement = if kind == ConsumerKind::Heatmap {
            let placement = load_placement(&config, channels.len())?;
            if let Some(path) = &cli.save_placement {
                placement
                    .save(path)
                    .with_context(|| format!("saving placement matrix {}", path.display()))?;
                info!("placement matrix written to {}", path.display());
            }
            Some(placement)
        } else {
            None
        };
        let consumer = build_consumer(
            kind,
            Arc::clone(&source),
            Arc::new(StandardFeatures),
            &settings,
            placement,
        )?;
        registry.create(consumer, config.interval_ms)?;
    }
    if let Some(dir) = &cli.record {
        registry.dispatch(ConsumerKind::Heatmap, ConsumerCommand::StartRecording(dir.clone()))?;
    }

    let mut control = if cli.no_stdin { None } else { Some(spawn_stdin_reader()) };
    let deadline = Instant::now() + Duration::from_secs(cli.seconds);
    let mut next_report = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        let wait = next_report.min(deadline).saturating_duration_since(Instant::now());
        match control.as_ref().map(|lines| lines.recv_timeout(wait)) {
            Some(Ok(line)) => apply_control_line(&mut registry, &line),
            Some(Err(RecvTimeoutError::Disconnected)) => control = None,
            Some(Err(RecvTimeoutError::Timeout)) => {}
            None => thread::sleep(wait),
        }
        if Instant::now() < next_report {
            continue;
        }
        next_report += Duration::from_secs(1);
        for kind in registry.active_kinds() {
            let diagnostics = registry.diagnostics(kind)?;
            info!(
                "{kind}: every {} ms, {} ticks, {} dropped, {} skipped, {:.1} updates/s",
                diagnostics.interval.as_millis(),
                diagnostics.ticks,
                diagnostics.dropped_ticks,
                diagnostics.skipped_ticks,
                diagnostics.update_rate_hz
            );
        }
    }

    if cli.record.is_some() {
        registry.dispatch(ConsumerKind::Heatmap, ConsumerCommand::StopRecording)?;
    }
    if let Some(dir) = &cli.export {
        export_views(&registry, dir, &style)?;
    }
    registry.shutdown();
    if let Some(mut feed) = feed {
        feed.stop();
    }
    Ok(())
}

fn open_database(config: &MonitorConfig) -> Result<SqliteStore> {
    SqliteStore::open(&config.database).with_context(|| format!("connecting to {}", config.database))
}

/// Forwards stdin lines to the control loop.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn apply_control_line(registry: &mut ConsumerRegistry, line: &str) {
    match parse_control_line(line) {
        Ok((kind, command)) => {
            if let Err(err) = registry.dispatch(kind, command) {
                warn!("`{}` failed: {err}", line.trim());
            }
        }
        Err(err) => warn!("{err}"),
    }
}

fn load_placement(config: &MonitorConfig, channel_count: usize) -> Result<PlacementMatrix> {
    match &config.placement {
        Some(path) => {
            let placement = PlacementMatrix::load(path, channel_count)
                .with_context(|| format!("loading placement matrix {path}"))?;
            if placement.placed_count() < channel_count {
                warn!(
                    "{path} places {} of {channel_count} channels",
                    placement.placed_count()
                );
            }
            Ok(placement)
        }
        None => {
            let columns = (channel_count as f64).sqrt().ceil().max(1.0) as usize;
            info!("no placement file configured, laying {channel_count} channels out {columns} wide");
            Ok(PlacementMatrix::row_major(channel_count, columns)?)
        }
    }
}

fn export_views(registry: &ConsumerRegistry, dir: &Path, style: &PlotStyle) -> Result<()> {
    fs::create_dir_all(dir)?;
    for kind in registry.active_kinds() {
        let Some(view) = registry.view(kind)? else {
            continue;
        };
        let (name, png) = match view {
            ConsumerView::Heatmap(grid) => ("heatmap", render_heatmap_png(&grid, style)),
            ConsumerView::Lineplot { channel, series } => (
                "lineplot",
                render_series_png(&format!("EMG Lineplot ({channel})"), &series, style),
            ),
            ConsumerView::Raw { channel, series } => (
                "raw",
                render_series_png(&format!("EMG Raw ({channel})"), &series, style),
            ),
            ConsumerView::Spectrum(spectrum) => {
                if let Some((freq, magnitude)) = spectrum.peak() {
                    info!("{}: spectral peak {freq:.1} Hz ({magnitude:.1})", spectrum.channel_label);
                }
                ("spectrum", render_spectrum_png(&spectrum, style))
            }
        };
        let png = png.with_context(|| format!("rendering {kind}"))?;
        let path = dir.join(format!("{name}.png"));
        fs::write(&path, png).with_context(|| format!("writing {}", path.display()))?;
        info!("exported {}", path.display());
    }
    Ok(())
}
