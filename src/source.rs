use crate::watchlist::ENDPOINT_VERIFY;
use crate::{PrintwatchError, Result};
use serde_json::Value;

/// Transport to the printer's status endpoints.
///
/// `fetch` is a single synchronous request. An error status from the printer
/// is not a failure: it is reported as `Ok(None)` and stored as null
/// readings. Only transport-level failures (unreachable host, rejected
/// credentials) are returned as `Err`, and those end the acquisition tick.
pub trait ValueSource: Send {
    fn fetch(&mut self, endpoint: &str) -> Result<Option<Value>>;
}

impl<S: ValueSource + ?Sized> ValueSource for Box<S> {
    fn fetch(&mut self, endpoint: &str) -> Result<Option<Value>> {
        (**self).fetch(endpoint)
    }
}

/// Check that the printer accepts our credentials.
///
/// The verify endpoint answers `{"message": "ok"}` when access is granted.
pub fn verify_connection<S: ValueSource + ?Sized>(source: &mut S) -> Result<()> {
    let response = source.fetch(ENDPOINT_VERIFY)?;
    let granted = response
        .as_ref()
        .and_then(|r| r.get("message"))
        .and_then(Value::as_str)
        == Some("ok");

    if granted {
        log::info!("Access permitted");
        Ok(())
    } else {
        log::warn!("Access denied");
        Err(PrintwatchError::ConnectionRefused)
    }
}

pub mod mock {
    //! Scripted value source for tests and demos.

    use super::ValueSource;
    use crate::{PrintwatchError, Result};
    use serde_json::Value;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    enum Step {
        Value(Option<Value>),
        Fail(String),
    }

    #[derive(Debug, Default)]
    struct Script {
        steps: VecDeque<Step>,
        last: Option<Step>,
    }

    /// Replays a per-endpoint sequence of responses.
    ///
    /// Each fetch consumes the next scripted response for that endpoint; once
    /// the script runs dry the last response repeats. Unknown endpoints
    /// answer `None`. Clones share the same scripts, so a test can keep a
    /// handle and push more responses while a session owns another.
    #[derive(Debug, Clone, Default)]
    pub struct ScriptedSource {
        scripts: Arc<Mutex<HashMap<String, Script>>>,
        fetches: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedSource {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue responses for `endpoint` (builder style).
        pub fn with(self, endpoint: &str, values: impl IntoIterator<Item = Value>) -> Self {
            self.push(endpoint, values);
            self
        }

        pub fn push(&self, endpoint: &str, values: impl IntoIterator<Item = Value>) {
            self.push_steps(endpoint, values.into_iter().map(|v| Step::Value(Some(v))));
        }

        /// Queue an error-status response (fetch returns `Ok(None)`).
        pub fn push_missing(&self, endpoint: &str) {
            self.push_steps(endpoint, std::iter::once(Step::Value(None)));
        }

        /// Queue a transport failure.
        pub fn push_failure(&self, endpoint: &str, reason: &str) {
            self.push_steps(endpoint, std::iter::once(Step::Fail(reason.to_string())));
        }

        /// Endpoints fetched so far, in order.
        pub fn fetches(&self) -> Vec<String> {
            self.fetches.lock().map(|f| f.clone()).unwrap_or_default()
        }

        fn push_steps(&self, endpoint: &str, steps: impl IntoIterator<Item = Step>) {
            if let Ok(mut scripts) = self.scripts.lock() {
                scripts
                    .entry(endpoint.to_string())
                    .or_default()
                    .steps
                    .extend(steps);
            }
        }
    }

    impl ValueSource for ScriptedSource {
        fn fetch(&mut self, endpoint: &str) -> Result<Option<Value>> {
            if let Ok(mut fetches) = self.fetches.lock() {
                fetches.push(endpoint.to_string());
            }

            let step = {
                let mut scripts = self
                    .scripts
                    .lock()
                    .map_err(|_| PrintwatchError::fetch(endpoint, "script lock poisoned"))?;
                match scripts.get_mut(endpoint) {
                    Some(script) => match script.steps.pop_front() {
                        Some(step) => {
                            script.last = Some(step.clone());
                            Some(step)
                        }
                        None => script.last.clone(),
                    },
                    None => None,
                }
            };

            match step {
                Some(Step::Value(value)) => Ok(value),
                Some(Step::Fail(reason)) => Err(PrintwatchError::fetch(endpoint, reason)),
                None => Ok(None),
            }
        }
    }
}
