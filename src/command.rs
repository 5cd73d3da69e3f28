use crate::{PrintwatchError, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// One-shot printer operation outside the acquisition loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Upload a `.gcode` or `.ufp` job file and start printing it.
    SubmitJob(PathBuf),
    Pause,
    Abort,
    /// Resume a paused job.
    Resume,
    /// Hotend target temperature [C].
    HotendTemperature(f64),
    /// Build plate target temperature [C].
    BedTemperature(f64),
    /// LED brightness [%].
    Brightness(u8),
    /// Maximum XY head speed [mm/s].
    MaxSpeed(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Put,
    Post,
}

impl Command {
    /// Build a job submission, rejecting anything but `.gcode` / `.ufp`.
    pub fn submit_job(path: impl AsRef<Path>) -> Result<Command> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("gcode") | Some("ufp") => Ok(Command::SubmitJob(path.to_path_buf())),
            _ => Err(PrintwatchError::InvalidConfig(format!(
                "job file must end in .gcode or .ufp: {}",
                path.display()
            ))),
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Command::SubmitJob(_) => Method::Post,
            _ => Method::Put,
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            Command::SubmitJob(_) => "print_job",
            Command::Pause | Command::Abort | Command::Resume => "print_job/state",
            Command::HotendTemperature(_) => "printer/heads/0/extruders/0/hotend/temperature/target",
            Command::BedTemperature(_) => "printer/bed/temperature",
            Command::Brightness(_) => "printer/led/brightness",
            Command::MaxSpeed(_) => "printer/heads/0/max_speed",
        }
    }

    /// JSON body for PUT commands. Job submission carries a file instead.
    pub fn payload(&self) -> Option<Value> {
        match self {
            Command::SubmitJob(_) => None,
            Command::Pause => Some(json!({"target": "pause"})),
            Command::Abort => Some(json!({"target": "abort"})),
            Command::Resume => Some(json!({"target": "print"})),
            Command::HotendTemperature(t) | Command::BedTemperature(t) => Some(json!(t)),
            Command::Brightness(b) => Some(json!(b)),
            Command::MaxSpeed(s) => Some(json!({"x": s, "y": s})),
        }
    }

    /// Job name sent alongside an uploaded file.
    pub fn job_name(&self) -> Option<String> {
        match self {
            Command::SubmitJob(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            _ => None,
        }
    }
}

/// Executes commands against the printer. Fire-and-forget from the
/// acquisition side: nothing here touches the sample buffer.
pub trait DeviceCommand {
    fn send(&mut self, command: &Command) -> Result<()>;
}
