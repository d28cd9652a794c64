// src/types.rs
use std::fmt;
use std::path::PathBuf;
use crate::drivers::MonitorError;

// One live instance per kind, tracked by the consumer registry.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, PartialOrd, Ord)]
pub enum ConsumerKind {
    Heatmap,
    Lineplot,
    LineplotRaw,
    Spectrum,
}

impl ConsumerKind {
    pub const ALL: [ConsumerKind; 4] = [
        ConsumerKind::Heatmap,
        ConsumerKind::Lineplot,
        ConsumerKind::LineplotRaw,
        ConsumerKind::Spectrum,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "heatmap" => Some(ConsumerKind::Heatmap),
            "lineplot" => Some(ConsumerKind::Lineplot),
            "raw" | "lineplot_raw" => Some(ConsumerKind::LineplotRaw),
            "spectrum" | "fourier" | "fourier_raw" => Some(ConsumerKind::Spectrum),
            _ => None,
        }
    }
}

impl fmt::Display for ConsumerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumerKind::Heatmap => "heatmap",
            ConsumerKind::Lineplot => "lineplot",
            ConsumerKind::LineplotRaw => "raw lineplot",
            ConsumerKind::Spectrum => "spectrum",
        };
        f.write_str(name)
    }
}

// Control events coming from whatever front end drives the monitor.
#[derive(Clone, Debug, PartialEq)]
pub enum ConsumerCommand {
    SetWindowLength(usize),
    SetInterval(u64),
    SetFeature(String),
    SelectChannel(String),
    LoadPlacement(PathBuf),
    StartRecording(PathBuf),
    StopRecording,
    /// Stops recording and deletes the frames of the current take.
    CancelRecording,
}

impl ConsumerCommand {
    /// Commands after which the consumer recomputes right away instead of waiting for a tick.
    pub fn forces_refresh(&self) -> bool {
        matches!(
            self,
            ConsumerCommand::SetWindowLength(_)
                | ConsumerCommand::SetInterval(_)
                | ConsumerCommand::SetFeature(_)
                | ConsumerCommand::SelectChannel(_)
                | ConsumerCommand::LoadPlacement(_)
        )
    }
}

/// Parses a control line such as `heatmap window 480` or `spectrum channel ch3`.
///
/// Verbs: `window <samples>`, `interval <ms>`, `feature <name>`, `channel <name>`,
/// `placement <path>`, `record <dir>`, `stop`, `cancel`.
pub fn parse_control_line(line: &str) -> Result<(ConsumerKind, ConsumerCommand), MonitorError> {
    let mut words = line.split_whitespace();
    let (Some(plot), Some(verb)) = (words.next(), words.next()) else {
        return Err(MonitorError::Configuration(format!(
            "expected `<plot> <command> [value]`, got `{}`",
            line.trim()
        )));
    };
    let kind = ConsumerKind::parse(plot)
        .ok_or_else(|| MonitorError::Configuration(format!("unknown plot type `{plot}`")))?;
    let rest: Vec<&str> = words.collect();
    let value = rest.join(" ");
    let needs_value = |what: &str| {
        if value.is_empty() {
            Err(MonitorError::Configuration(format!("`{verb}` needs {what}")))
        } else {
            Ok(value.clone())
        }
    };
    let number = |what: &str| -> Result<u64, MonitorError> {
        needs_value(what)?
            .parse::<u64>()
            .map_err(|_| MonitorError::Configuration(format!("`{value}` is not {what}")))
    };
    let command = match verb.to_ascii_lowercase().as_str() {
        "window" => ConsumerCommand::SetWindowLength(number("a sample count")? as usize),
        "interval" => ConsumerCommand::SetInterval(number("a millisecond count")?),
        "feature" => ConsumerCommand::SetFeature(needs_value("a feature name")?),
        "channel" => ConsumerCommand::SelectChannel(needs_value("a channel name")?),
        "placement" => ConsumerCommand::LoadPlacement(PathBuf::from(needs_value("a file")?)),
        "record" => ConsumerCommand::StartRecording(PathBuf::from(needs_value("a directory")?)),
        "stop" => ConsumerCommand::StopRecording,
        "cancel" => ConsumerCommand::CancelRecording,
        other => {
            return Err(MonitorError::Configuration(format!("unknown command `{other}`")));
        }
    };
    Ok((kind, command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plot_names_from_the_cli() {
        assert_eq!(ConsumerKind::parse("Heatmap"), Some(ConsumerKind::Heatmap));
        assert_eq!(ConsumerKind::parse("raw"), Some(ConsumerKind::LineplotRaw));
        assert_eq!(ConsumerKind::parse("fourier"), Some(ConsumerKind::Spectrum));
        assert_eq!(ConsumerKind::parse("scatter"), None);
    }

    #[test]
    fn only_parameter_changes_force_refresh() {
        assert!(ConsumerCommand::SetWindowLength(10).forces_refresh());
        assert!(ConsumerCommand::SelectChannel("c1".into()).forces_refresh());
        assert!(!ConsumerCommand::StopRecording.forces_refresh());
        assert!(!ConsumerCommand::CancelRecording.forces_refresh());
    }

    #[test]
    fn control_lines_map_to_commands() {
        assert_eq!(
            parse_control_line("heatmap window 480").unwrap(),
            (ConsumerKind::Heatmap, ConsumerCommand::SetWindowLength(480))
        );
        assert_eq!(
            parse_control_line("  spectrum   channel ch3 ").unwrap(),
            (ConsumerKind::Spectrum, ConsumerCommand::SelectChannel("ch3".into()))
        );
        assert_eq!(
            parse_control_line("raw interval 50").unwrap(),
            (ConsumerKind::LineplotRaw, ConsumerCommand::SetInterval(50))
        );
        assert_eq!(
            parse_control_line("heatmap record takes/run 1").unwrap(),
            (ConsumerKind::Heatmap, ConsumerCommand::StartRecording(PathBuf::from("takes/run 1")))
        );
        assert_eq!(
            parse_control_line("heatmap CANCEL").unwrap(),
            (ConsumerKind::Heatmap, ConsumerCommand::CancelRecording)
        );
    }

    #[test]
    fn malformed_control_lines_are_rejected() {
        for line in ["", "heatmap", "scatter stop", "heatmap window", "heatmap window -3", "lineplot zoom 2"] {
            assert!(
                matches!(parse_control_line(line), Err(MonitorError::Configuration(_))),
                "{line:?} should be rejected"
            );
        }
    }
}
