//! User controls: one command per line on the CLI.
//!
//! ```text
//! start | begin
//! stop
//! threshold 0.6 | threshold 60%
//! mode client | mode server
//! snapshot [path]
//! status
//! quit
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};

use crate::config::DetectorSettings;
use crate::detect::{self, BackendMode};
use crate::filter::check_threshold;
use crate::session::Session;

pub const DEFAULT_SNAPSHOT_PATH: &str = "snapshot.png";

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Threshold(f32),
    Mode(BackendMode),
    Snapshot(Option<PathBuf>),
    Status,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts
            .next()
            .ok_or_else(|| anyhow!("empty command"))?
            .to_ascii_lowercase();
        let arg = parts.next();
        if parts.next().is_some() {
            return Err(anyhow!("too many arguments for '{}'", verb));
        }
        let command = match (verb.as_str(), arg) {
            ("start" | "begin", None) => Command::Start,
            ("stop", None) => Command::Stop,
            ("threshold" | "t", Some(value)) => Command::Threshold(parse_threshold(value)?),
            ("mode", Some(mode)) => Command::Mode(mode.parse()?),
            ("snapshot", path) => Command::Snapshot(path.map(PathBuf::from)),
            ("status", None) => Command::Status,
            ("help" | "?", None) => Command::Help,
            ("quit" | "exit" | "q", None) => Command::Quit,
            ("threshold" | "t" | "mode", None) => {
                return Err(anyhow!("'{}' needs a value", verb));
            }
            (other, _) => return Err(anyhow!("unknown command '{}'; try 'help'", other)),
        };
        Ok(command)
    }
}

/// Parse `0.6`, `60%` or `60` into a fraction quantised to whole percent.
pub fn parse_threshold(value: &str) -> Result<f32> {
    let value = value.trim();
    let (number, percent) = match value.strip_suffix('%') {
        Some(number) => (number, true),
        None => (value, false),
    };
    let parsed: f32 = number
        .trim()
        .parse()
        .with_context(|| format!("'{}' is not a threshold", value))?;
    let fraction = if percent || parsed > 1.0 {
        parsed / 100.0
    } else {
        parsed
    };
    let quantised = (fraction * 100.0).round() / 100.0;
    Ok(check_threshold(quantised)?)
}

/// Result of running a command.
#[derive(Debug, PartialEq)]
pub enum Reply {
    Message(String),
    Quit,
}

/// Run `command` against the session. Mode switches load a new backend
/// with `detector` and the chosen mode.
pub fn execute(
    session: &mut Session,
    detector: &DetectorSettings,
    command: Command,
) -> Result<Reply> {
    let message = match command {
        Command::Start => {
            session.start()?;
            let status = session.status();
            match status.advisory {
                Some(advisory) => format!("Camera on. {}", advisory),
                None => "Camera on.".to_string(),
            }
        }
        Command::Stop => {
            session.stop();
            "Camera off.".to_string()
        }
        Command::Threshold(threshold) => {
            session.set_threshold(threshold)?;
            format!("Confidence threshold {}%", (threshold * 100.0).round() as u32)
        }
        Command::Mode(mode) => {
            let settings = DetectorSettings {
                mode,
                ..detector.clone()
            };
            session.set_backend(detect::load_backend(&settings));
            format!("Backend mode: {}", mode)
        }
        Command::Snapshot(path) => {
            let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_PATH));
            let png = session.snapshot_png()?;
            std::fs::write(&path, png)
                .with_context(|| format!("write snapshot {}", path.display()))?;
            format!("Snapshot saved to {}", path.display())
        }
        Command::Status => {
            let status = session.status();
            let mut lines = vec![status.summary_line()];
            lines.extend(session.visible_detections().iter().map(|det| det.label()));
            if let Some(advisory) = status.advisory {
                lines.push(advisory);
            }
            lines.join("\n")
        }
        Command::Help => {
            "commands: start, stop, threshold <0..1|N%>, mode client|server, snapshot [path], status, quit"
                .to_string()
        }
        Command::Quit => return Ok(Reply::Quit),
    };
    Ok(Reply::Message(message))
}
