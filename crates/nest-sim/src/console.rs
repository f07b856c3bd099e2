//! ---
//! nest_section: "11-simulation-test-harness"
//! nest_subsection: "module"
//! nest_type: "source"
//! nest_scope: "code"
//! nest_description: "Line-oriented operator console command loop."
//! nest_version: "v0.0.0-prealpha"
//! nest_owner: "tbd"
//! ---
//! Operator console. Reads one command per line until `quit`, `exit` or end
//! of input. Rejected vehicle commands are reported to the operator and do
//! not end the session; only console I/O failures do.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use nest_core::{CommandLoop, CommandLoopContext, VehicleCommand, VisionDetector, WorkerMonitor};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const DEFAULT_TAKEOFF_HEIGHT_M: f64 = 0.5;
pub const WAYPOINTS_FILE: &str = "waypoints.jsonl";
const PROMPT: &str = "nest> ";

const HELP: &str = "\
commands:
  help                 show this list
  status               vehicle, swarm and detector state
  takeoff [height_m]   take off (default 0.5 m)
  land                 land
  hover                hold position
  goto <x> <y> <z>     fly to a position in metres
  markers              list markers seen by the detector
  go-marker <id>       fly above a detected marker (--control)
  waypoint             record the current position (--waypoints)
  quit | exit          end the session";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Help,
    Status,
    Takeoff(Option<f64>),
    Land,
    Hover,
    GoTo([f64; 3]),
    Markers,
    GoMarker(u32),
    Waypoint,
    Quit,
}

fn parse_number<T: FromStr>(token: Option<&str>, what: &str) -> Result<T, String> {
    let token = token.ok_or_else(|| format!("missing {what}"))?;
    token
        .parse()
        .map_err(|_| format!("invalid {what}: {token}"))
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = line.split_whitespace();
        let verb = tokens.next().ok_or_else(|| "empty command".to_owned())?;
        let command = match verb.to_lowercase().as_str() {
            "help" | "?" => ConsoleCommand::Help,
            "status" => ConsoleCommand::Status,
            "takeoff" => match tokens.next() {
                Some(height) => ConsoleCommand::Takeoff(Some(parse_number(Some(height), "height")?)),
                None => ConsoleCommand::Takeoff(None),
            },
            "land" => ConsoleCommand::Land,
            "hover" => ConsoleCommand::Hover,
            "goto" => ConsoleCommand::GoTo([
                parse_number(tokens.next(), "x")?,
                parse_number(tokens.next(), "y")?,
                parse_number(tokens.next(), "z")?,
            ]),
            "markers" => ConsoleCommand::Markers,
            "go-marker" => ConsoleCommand::GoMarker(parse_number(tokens.next(), "marker id")?),
            "waypoint" => ConsoleCommand::Waypoint,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => return Err(format!("unknown command: {other} (try `help`)")),
        };
        if let Some(extra) = tokens.next() {
            return Err(format!("unexpected argument: {extra}"));
        }
        Ok(command)
    }
}

/// One line of `waypoints.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaypointRecord {
    pub recorded_at: DateTime<Utc>,
    pub source: String,
    pub position_m: [f64; 3],
}

/// Append `record` as one JSON line, creating the file and its directory.
pub fn append_waypoint(path: &Path, record: &WaypointRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("unable to create {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("unable to open {}", path.display()))?;
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    file.write_all(&line)
        .with_context(|| format!("unable to append to {}", path.display()))?;
    Ok(())
}

/// Blocking console loop over any line source and sink.
pub struct ConsoleLoop<R, W> {
    input: R,
    output: W,
    context: CommandLoopContext,
    detector: Option<(Arc<dyn VisionDetector>, WorkerMonitor)>,
    waypoints_path: PathBuf,
}

impl<R: BufRead, W: Write> ConsoleLoop<R, W> {
    pub fn new(context: CommandLoopContext, input: R, output: W, waypoints_path: PathBuf) -> Self {
        Self {
            input,
            output,
            context,
            detector: None,
            waypoints_path,
        }
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    fn say(&mut self, message: impl AsRef<str>) -> Result<()> {
        writeln!(self.output, "{}", message.as_ref()).context("console output failed")
    }

    fn dispatch(&self, command: VehicleCommand) -> Result<()> {
        match &self.context.swarm {
            Some(swarm) => swarm.broadcast(&command),
            None => self.context.link.send(&command),
        }
    }

    fn send(&mut self, command: VehicleCommand) -> Result<()> {
        match self.dispatch(command) {
            Ok(()) => self.say("ok"),
            Err(err) => {
                warn!(?command, error = %err, "vehicle command rejected");
                self.say(format!("command failed: {err:#}"))
            }
        }
    }

    /// Returns `false` once the operator asked to leave.
    fn execute(&mut self, command: ConsoleCommand) -> Result<bool> {
        debug!(?command, "console command");
        match command {
            ConsoleCommand::Help => self.say(HELP)?,
            ConsoleCommand::Status => self.status()?,
            ConsoleCommand::Takeoff(height) => self.send(VehicleCommand::Takeoff {
                height_m: height.unwrap_or(DEFAULT_TAKEOFF_HEIGHT_M),
            })?,
            ConsoleCommand::Land => self.send(VehicleCommand::Land)?,
            ConsoleCommand::Hover => self.send(VehicleCommand::Hover)?,
            ConsoleCommand::GoTo([x_m, y_m, z_m]) => {
                self.send(VehicleCommand::GoTo { x_m, y_m, z_m })?
            }
            ConsoleCommand::Markers => self.markers()?,
            ConsoleCommand::GoMarker(id) => self.go_marker(id)?,
            ConsoleCommand::Waypoint => self.waypoint()?,
            ConsoleCommand::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn status(&mut self) -> Result<()> {
        let vehicle = match self.context.telemetry.latest() {
            Some(frame) => format!(
                "{}: pos=({:.2}, {:.2}, {:.2}) m battery={:.2} V flying={}",
                frame.source,
                frame.position_m[0],
                frame.position_m[1],
                frame.position_m[2],
                frame.battery_v,
                frame.flying
            ),
            None => format!("{}: no telemetry", self.context.link.target()),
        };
        self.say(vehicle)?;
        if let Some(swarm) = &self.context.swarm {
            let line = format!("swarm channels: {}", swarm.channels().join(","));
            self.say(line)?;
        }
        let vision = match &self.detector {
            Some((_, worker)) if worker.is_alive() => "vision: running",
            Some(_) => "vision: stopped",
            None => "vision: disabled",
        };
        self.say(vision)
    }

    fn markers(&mut self) -> Result<()> {
        let Some((detector, worker)) = &self.detector else {
            return self.say("vision is disabled");
        };
        if !worker.is_alive() {
            return self.say("vision detector is not running");
        }
        let detections = detector.detections();
        if detections.is_empty() {
            return self.say("no markers in view");
        }
        for detection in detections {
            self.say(format!(
                "marker {} at ({:.2}, {:.2}, {:.2}) m",
                detection.marker_id,
                detection.position_m[0],
                detection.position_m[1],
                detection.position_m[2]
            ))?;
        }
        Ok(())
    }

    fn go_marker(&mut self, id: u32) -> Result<()> {
        if !self.context.control {
            return self.say("go-marker requires vision control (--control)");
        }
        let Some((detector, _)) = &self.detector else {
            return self.say("vision is disabled");
        };
        let Some(marker) = detector
            .detections()
            .into_iter()
            .find(|detection| detection.marker_id == id)
        else {
            return self.say(format!("marker {id} not in view"));
        };
        info!(marker = id, "flying to marker");
        self.send(VehicleCommand::GoTo {
            x_m: marker.position_m[0],
            y_m: marker.position_m[1],
            z_m: DEFAULT_TAKEOFF_HEIGHT_M,
        })
    }

    fn waypoint(&mut self) -> Result<()> {
        if !self.context.waypoints {
            return self.say("waypoint recording is disabled (--waypoints)");
        }
        let Some(frame) = self.context.telemetry.latest() else {
            return self.say("no telemetry available");
        };
        let record = WaypointRecord {
            recorded_at: frame.timestamp,
            source: frame.source,
            position_m: frame.position_m,
        };
        match append_waypoint(&self.waypoints_path, &record) {
            Ok(()) => {
                info!(path = %self.waypoints_path.display(), "waypoint recorded");
                self.say("waypoint recorded")
            }
            Err(err) => {
                warn!(error = %err, "waypoint not recorded");
                self.say(format!("waypoint not recorded: {err:#}"))
            }
        }
    }
}

impl<R: BufRead, W: Write> CommandLoop for ConsoleLoop<R, W> {
    fn attach_detector(&mut self, detector: Arc<dyn VisionDetector>, worker: WorkerMonitor) {
        self.detector = Some((detector, worker));
    }

    fn run(&mut self) -> Result<()> {
        self.say("type `help` for commands")?;
        let mut line = String::new();
        loop {
            write!(self.output, "{PROMPT}").context("console output failed")?;
            self.output.flush().context("console output failed")?;
            line.clear();
            let read = self
                .input
                .read_line(&mut line)
                .context("unable to read operator input")?;
            if read == 0 {
                info!("console input closed");
                return Ok(());
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match trimmed.parse::<ConsoleCommand>() {
                Ok(command) => {
                    if !self.execute(command)? {
                        info!("operator ended session");
                        return Ok(());
                    }
                }
                Err(message) => self.say(message)?,
            }
        }
    }
}
