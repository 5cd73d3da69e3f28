use crate::{PrintwatchError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

// -- Reserved series --
pub const TIME_SERIES: &str = "time";

// -- Printer API endpoints (relative to the API base) --
pub const ENDPOINT_JOB_STATE: &str = "print_job/state";
pub const ENDPOINT_HEAD_POSITION: &str = "printer/heads/0/position";
pub const ENDPOINT_HOTEND_TEMPERATURE: &str = "printer/heads/0/extruders/0/hotend/temperature";
pub const ENDPOINT_BED_TEMPERATURE: &str = "printer/bed/temperature";
pub const ENDPOINT_VERIFY: &str = "auth/verify";

/// One value to pull out of a target's response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchItem {
    /// Series name; unique across the whole watchlist.
    pub name: String,
    /// Field of the response object to extract. `None` keeps the raw response.
    #[serde(default)]
    pub key: Option<String>,
}

/// One endpoint polled once per tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchTarget {
    #[serde(alias = "url")]
    pub endpoint: String,
    pub items: Vec<WatchItem>,
}

/// Ordered, validated set of watch targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<WatchTarget>", into = "Vec<WatchTarget>")]
pub struct WatchSpec {
    targets: Vec<WatchTarget>,
}

impl WatchSpec {
    /// Validate and wrap a list of targets.
    ///
    /// Rejects duplicate item names, the reserved `time` name and targets
    /// without items.
    pub fn new(targets: Vec<WatchTarget>) -> Result<Self> {
        let mut seen = HashSet::new();
        for target in &targets {
            if target.items.is_empty() {
                return Err(PrintwatchError::EmptyTarget(target.endpoint.clone()));
            }
            for item in &target.items {
                if item.name == TIME_SERIES {
                    return Err(PrintwatchError::ReservedName);
                }
                if !seen.insert(item.name.as_str()) {
                    return Err(PrintwatchError::DuplicateName(item.name.clone()));
                }
            }
        }
        Ok(Self { targets })
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn targets(&self) -> &[WatchTarget] {
        &self.targets
    }

    /// Item names in declaration order (without `time`).
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.targets
            .iter()
            .flat_map(|t| t.items.iter().map(|i| i.name.as_str()))
    }

    /// Job state, head z-position, hotend and bed temperatures.
    pub fn printer_default() -> Self {
        let item = |name: &str, key: Option<&str>| WatchItem {
            name: name.to_string(),
            key: key.map(str::to_string),
        };
        Self {
            targets: vec![
                WatchTarget {
                    endpoint: ENDPOINT_JOB_STATE.to_string(),
                    items: vec![item("state", None)],
                },
                WatchTarget {
                    endpoint: ENDPOINT_HEAD_POSITION.to_string(),
                    items: vec![item("x", Some("x")), item("y", Some("y")), item("z", Some("z"))],
                },
                WatchTarget {
                    endpoint: ENDPOINT_HOTEND_TEMPERATURE.to_string(),
                    items: vec![
                        item("hotendtemp_current", Some("current")),
                        item("hotendtemp_target", Some("target")),
                    ],
                },
                WatchTarget {
                    endpoint: ENDPOINT_BED_TEMPERATURE.to_string(),
                    items: vec![
                        item("bedtemp_current", Some("current")),
                        item("bedtemp_target", Some("target")),
                    ],
                },
            ],
        }
    }
}

impl TryFrom<Vec<WatchTarget>> for WatchSpec {
    type Error = PrintwatchError;

    fn try_from(targets: Vec<WatchTarget>) -> Result<Self> {
        WatchSpec::new(targets)
    }
}

impl From<WatchSpec> for Vec<WatchTarget> {
    fn from(spec: WatchSpec) -> Self {
        spec.targets
    }
}

/// Pull the item value out of a target response.
///
/// A missing response (the printer answered with an error status) or a
/// missing key yields `Null`.
pub fn extract<'a>(response: Option<&'a Value>, key: Option<&str>) -> &'a Value {
    const NULL: &Value = &Value::Null;
    match (response, key) {
        (None, _) => NULL,
        (Some(value), None) => value,
        (Some(value), Some(key)) => value.get(key).unwrap_or(NULL),
    }
}
