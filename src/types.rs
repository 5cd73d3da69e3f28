use serde_json::Value;
use std::fmt;

/// A single scalar sample held in a series.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Reading {
    /// Numeric view of the reading. Text that parses as a number counts.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Reading::Int(i) => Some(*i as f64),
            Reading::Float(f) => Some(*f),
            Reading::Text(s) => s.trim().parse().ok(),
            Reading::Null | Reading::Bool(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reading::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&Value> for Reading {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Reading::Null,
            Value::Bool(b) => Reading::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Reading::Int(i),
                None => n.as_f64().map(Reading::Float).unwrap_or(Reading::Null),
            },
            Value::String(s) => Reading::Text(s.clone()),
            // Nested structures are kept verbatim as compact JSON.
            other => Reading::Text(other.to_string()),
        }
    }
}

impl From<f64> for Reading {
    fn from(value: f64) -> Self {
        Reading::Float(value)
    }
}

impl From<i64> for Reading {
    fn from(value: i64) -> Self {
        Reading::Int(value)
    }
}

impl From<&str> for Reading {
    fn from(value: &str) -> Self {
        Reading::Text(value.to_string())
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Null => Ok(()),
            Reading::Bool(b) => write!(f, "{}", b),
            Reading::Int(i) => write!(f, "{}", i),
            Reading::Float(x) => write!(f, "{}", x),
            Reading::Text(s) => f.write_str(s),
        }
    }
}

/// Buffer write policy for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// Every tick adds a sample; history accumulates toward a flush.
    Append,
    /// Every tick overwrites the previous sample; nothing is recorded.
    Replace,
}

/// Print job state as reported by the printer's `print_job/state` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintJobState {
    /// No job loaded (reported as `none`).
    NoJob,
    PrePrint,
    Printing,
    Pausing,
    Paused,
    Resuming,
    PostPrint,
    WaitCleanup,
    WaitUserAction,
    /// The state endpoint gave no value (error status or null). Not `none`.
    Unknown,
    Other(String),
}

impl PrintJobState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "none" => PrintJobState::NoJob,
            "pre_print" => PrintJobState::PrePrint,
            "printing" => PrintJobState::Printing,
            "pausing" => PrintJobState::Pausing,
            "paused" => PrintJobState::Paused,
            "resuming" => PrintJobState::Resuming,
            "post_print" => PrintJobState::PostPrint,
            "wait_cleanup" => PrintJobState::WaitCleanup,
            "wait_user_action" => PrintJobState::WaitUserAction,
            other => PrintJobState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PrintJobState::NoJob => "none",
            PrintJobState::PrePrint => "pre_print",
            PrintJobState::Printing => "printing",
            PrintJobState::Pausing => "pausing",
            PrintJobState::Paused => "paused",
            PrintJobState::Resuming => "resuming",
            PrintJobState::PostPrint => "post_print",
            PrintJobState::WaitCleanup => "wait_cleanup",
            PrintJobState::WaitUserAction => "wait_user_action",
            PrintJobState::Unknown => "unknown",
            PrintJobState::Other(s) => s,
        }
    }
}

impl From<&Reading> for PrintJobState {
    fn from(reading: &Reading) -> Self {
        match reading {
            Reading::Null => PrintJobState::Unknown,
            Reading::Text(s) => PrintJobState::parse(s),
            other => PrintJobState::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reading_from_json() {
        assert_eq!(Reading::from(&json!(200)), Reading::Int(200));
        assert_eq!(Reading::from(&json!(0.2)), Reading::Float(0.2));
        assert_eq!(Reading::from(&json!("printing")), Reading::Text("printing".into()));
        assert_eq!(Reading::from(&json!(null)), Reading::Null);
        assert_eq!(
            Reading::from(&json!({"x": 1})),
            Reading::Text("{\"x\":1}".into())
        );
    }

    #[test]
    fn test_reading_display() {
        assert_eq!(Reading::Int(205).to_string(), "205");
        assert_eq!(Reading::Float(0.4).to_string(), "0.4");
        assert_eq!(Reading::Null.to_string(), "");
    }

    #[test]
    fn test_job_state_round_trip_names() {
        for raw in ["none", "pre_print", "printing", "paused", "wait_cleanup"] {
            assert_eq!(PrintJobState::parse(raw).as_str(), raw);
        }
    }

    #[test]
    fn test_missing_job_state_is_not_none() {
        assert_eq!(PrintJobState::from(&Reading::Null), PrintJobState::Unknown);
        assert_eq!(
            PrintJobState::from(&Reading::from("none")),
            PrintJobState::NoJob
        );
    }
}
