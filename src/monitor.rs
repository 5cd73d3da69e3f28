use crate::acquisition::{AcquisitionSession, LatestReader};
use crate::config::{AcquisitionConfig, MonitorConfig};
use crate::sink::BatchSink;
use crate::source::ValueSource;
use crate::types::{PrintJobState, Reading};
use crate::watchlist::WatchSpec;
use crate::{PrintwatchError, Result};

/// Absorbs float error in `z / pitch` so 0.6 mm at 0.2 mm pitch is layer 3.
const LAYER_ROUNDING: f64 = 1e-9;

/// Index of the layer the head is on.
pub fn layer_index(height: f64, layer_pitch: f64) -> u32 {
    (height / layer_pitch + LAYER_ROUNDING).floor().max(0.0) as u32
}

/// Progress of [`Monitor::wait_print_start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrintStartPhase {
    #[default]
    Idle,
    /// Printer is heating and leveling (`pre_print`).
    Preparing,
    /// Terminal.
    Printing,
}

/// `Idle -> Preparing -> Printing`.
///
/// A job state of `none` while preparing means active leveling failed and
/// the job was dropped. A [`PrintJobState::Unknown`] state (no value from
/// the printer) never moves the tracker.
#[derive(Debug, Clone, Default)]
pub struct PrintStartTracker {
    phase: PrintStartPhase,
}

impl PrintStartTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> PrintStartPhase {
        self.phase
    }

    pub fn observe(&mut self, state: &PrintJobState) -> Result<PrintStartPhase> {
        match (self.phase, state) {
            (PrintStartPhase::Printing, _) => {}
            (PrintStartPhase::Preparing, PrintJobState::NoJob) => {
                return Err(PrintwatchError::PrepareFailed);
            }
            (_, PrintJobState::Printing) => self.phase = PrintStartPhase::Printing,
            (PrintStartPhase::Idle, PrintJobState::PrePrint) => {
                self.phase = PrintStartPhase::Preparing;
                log::debug!("Printer is preparing");
            }
            _ => {}
        }
        Ok(self.phase)
    }
}

/// Emits a running layer index whenever the height moves by more than
/// `epsilon` from the last observed height.
#[derive(Debug, Clone)]
pub struct LayerEdgeDetector {
    previous: f64,
    epsilon: f64,
    next_index: usize,
}

impl LayerEdgeDetector {
    pub fn new(initial_height: f64, epsilon: f64) -> Self {
        Self {
            previous: initial_height,
            epsilon,
            next_index: 0,
        }
    }

    pub fn observe(&mut self, height: f64) -> Option<usize> {
        let changed = (height - self.previous).abs() > self.epsilon;
        self.previous = height;
        if changed {
            let index = self.next_index;
            self.next_index += 1;
            Some(index)
        } else {
            None
        }
    }

    pub fn previous_height(&self) -> f64 {
        self.previous
    }
}

/// Print-progress waits on top of an acquisition session.
///
/// Every wait reads fresh samples through the monitor's own reader. Once a
/// print is underway, any job state other than `printing` fails the wait
/// with [`PrintwatchError::NotPrinting`].
pub struct Monitor {
    session: AcquisitionSession,
    reader: LatestReader,
    config: MonitorConfig,
    previous_height: f64,
}

enum Tracked {
    Height,
    Temperature,
}

impl Monitor {
    pub fn new(session: AcquisitionSession, config: MonitorConfig) -> Result<Monitor> {
        config.validate()?;
        let reader = session.reader().with_timeout(config.read_timeout);
        Ok(Monitor {
            session,
            reader,
            config,
            previous_height: 0.0,
        })
    }

    /// Start an acquisition session and wrap it.
    pub fn start<S, K>(
        spec: &WatchSpec,
        acquisition: &AcquisitionConfig,
        config: MonitorConfig,
        source: S,
        sink: K,
    ) -> Result<Monitor>
    where
        S: ValueSource + 'static,
        K: BatchSink + 'static,
    {
        let session = AcquisitionSession::start(spec, acquisition, source, sink)?;
        Self::new(session, config)
    }

    pub fn session(&self) -> &AcquisitionSession {
        &self.session
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Independent reader for other consumers.
    pub fn reader(&self) -> LatestReader {
        self.session.reader().with_timeout(self.config.read_timeout)
    }

    pub fn start_recording(&self) {
        self.session.start_recording();
    }

    pub fn stop_recording(&self) {
        self.session.stop_recording();
    }

    /// Last height seen by a layer wait.
    pub fn previous_height(&self) -> f64 {
        self.previous_height
    }

    /// End the session (see [`AcquisitionSession::stop`]).
    pub fn stop(self) -> Result<()> {
        self.session.stop()
    }

    /// Current job state from a fresh sample.
    pub fn job_state(&mut self) -> Result<PrintJobState> {
        let state = self.reader.read_one(&self.config.status_series)?;
        Ok(PrintJobState::from(&state))
    }

    /// Block until the job is printing, then wait out the settle delay.
    pub fn wait_print_start(&mut self) -> Result<()> {
        log::info!("Waiting for printing to start...");
        let mut tracker = PrintStartTracker::new();
        loop {
            let state = self.job_state()?;
            if tracker.observe(&state)? == PrintStartPhase::Printing {
                break;
            }
        }
        std::thread::sleep(self.config.settle_delay);
        log::info!("Started");
        Ok(())
    }

    /// Block until the hotend is within the configured tolerance of `target`.
    /// Returns the temperature that satisfied the wait.
    pub fn wait_temperature(&mut self, target: f64) -> Result<f64> {
        self.wait_temperature_within(target, self.config.temperature_tolerance)
    }

    pub fn wait_temperature_within(&mut self, target: f64, tolerance: f64) -> Result<f64> {
        log::info!("Waiting for hotend temperature to reach {}", target);
        loop {
            let reading = self.read_while_printing(Tracked::Temperature)?;
            if let Some(current) = reading.as_f64() {
                if (current - target).abs() < tolerance {
                    log::info!("Temperature reached");
                    return Ok(current);
                }
            }
        }
    }

    /// Block until the head reaches `target_layer` at the configured pitch.
    pub fn wait_layer(&mut self, target_layer: u32) -> Result<f64> {
        self.wait_height(target_layer, self.config.layer_pitch)
    }

    /// Block until `floor(z / layer_pitch) >= target_layer`. Returns the
    /// height that satisfied the wait.
    pub fn wait_height(&mut self, target_layer: u32, layer_pitch: f64) -> Result<f64> {
        if !(layer_pitch > 0.0) {
            return Err(PrintwatchError::InvalidConfig(
                "layer_pitch must be positive".into(),
            ));
        }
        log::info!("Waiting for layer to reach {}", target_layer);
        loop {
            let reading = self.read_while_printing(Tracked::Height)?;
            if let Some(height) = reading.as_f64() {
                if layer_index(height, layer_pitch) >= target_layer {
                    log::info!("Layer reached");
                    return Ok(height);
                }
            }
        }
    }

    /// Layer indices `0, 1, 2, ...`, one each time a new layer starts.
    ///
    /// Stops after `max_count` layers when given. The sequence cannot be
    /// restarted; call again for a new one, which counts from 0 and starts
    /// from the last height this monitor observed. An error ends it.
    pub fn layers(&mut self, max_count: Option<usize>) -> LayerEdges<'_> {
        log::info!("Counting layers: {:?}", max_count);
        let detector = LayerEdgeDetector::new(self.previous_height, self.config.height_epsilon);
        LayerEdges {
            monitor: self,
            detector,
            max_count,
            emitted: 0,
            done: false,
        }
    }

    fn read_while_printing(&mut self, tracked: Tracked) -> Result<Reading> {
        let name = match tracked {
            Tracked::Height => &self.config.height_series,
            Tracked::Temperature => &self.config.temperature_series,
        };
        let (state, value) = self.reader.read_pair(&self.config.status_series, name)?;
        match PrintJobState::from(&state) {
            PrintJobState::Printing => Ok(value),
            other => Err(PrintwatchError::NotPrinting(other.as_str().to_string())),
        }
    }
}

/// Iterator returned by [`Monitor::layers`].
pub struct LayerEdges<'a> {
    monitor: &'a mut Monitor,
    detector: LayerEdgeDetector,
    max_count: Option<usize>,
    emitted: usize,
    done: bool,
}

impl Iterator for LayerEdges<'_> {
    type Item = Result<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.max_count.is_some_and(|max| self.emitted >= max) {
            return None;
        }

        loop {
            let reading = match self.monitor.read_while_printing(Tracked::Height) {
                Ok(reading) => reading,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            let Some(height) = reading.as_f64() else {
                continue;
            };

            let edge = self.detector.observe(height);
            self.monitor.previous_height = height;
            if let Some(index) = edge {
                self.emitted += 1;
                log::info!("Layer: {}", index);
                return Some(Ok(index));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::source::mock::ScriptedSource;
    use serde_json::{json, Value};
    use std::time::Duration;

    const STATE: &str = "print_job/state";
    const POSITION: &str = "printer/heads/0/position";
    const HOTEND: &str = "printer/heads/0/extruders/0/hotend/temperature";

    fn spec() -> WatchSpec {
        WatchSpec::from_json_str(
            r#"[
                {"endpoint": "print_job/state", "items": [{"name": "state", "key": null}]},
                {"endpoint": "printer/heads/0/position", "items": [{"name": "z", "key": "z"}]},
                {"endpoint": "printer/heads/0/extruders/0/hotend/temperature",
                 "items": [{"name": "hotendtemp_current", "key": "current"}]}
            ]"#,
        )
        .unwrap()
    }

    fn repeated(value: Value, times: usize) -> impl Iterator<Item = Value> {
        std::iter::repeat(value).take(times)
    }

    fn monitor(source: ScriptedSource) -> Monitor {
        let acquisition = AcquisitionConfig {
            interval: Duration::from_millis(2),
            ..Default::default()
        };
        let config = MonitorConfig {
            settle_delay: Duration::ZERO,
            ..Default::default()
        };
        Monitor::start(&spec(), &acquisition, config, source, MemorySink::new()).unwrap()
    }

    #[test]
    fn test_tracker_happy_path() {
        let mut tracker = PrintStartTracker::new();
        let phases: Vec<_> = ["none", "pre_print", "pre_print", "printing"]
            .iter()
            .map(|s| tracker.observe(&PrintJobState::parse(s)).unwrap())
            .collect();
        assert_eq!(
            phases,
            vec![
                PrintStartPhase::Idle,
                PrintStartPhase::Preparing,
                PrintStartPhase::Preparing,
                PrintStartPhase::Printing
            ]
        );
    }

    #[test]
    fn test_tracker_leveling_failure() {
        let mut tracker = PrintStartTracker::new();
        tracker.observe(&PrintJobState::parse("none")).unwrap();
        tracker.observe(&PrintJobState::parse("pre_print")).unwrap();
        assert!(matches!(
            tracker.observe(&PrintJobState::NoJob),
            Err(PrintwatchError::PrepareFailed)
        ));
    }

    #[test]
    fn test_tracker_ignores_missing_state() {
        let mut tracker = PrintStartTracker::new();
        tracker.observe(&PrintJobState::PrePrint).unwrap();
        assert_eq!(
            tracker.observe(&PrintJobState::from(&Reading::Null)).unwrap(),
            PrintStartPhase::Preparing
        );
        assert_eq!(
            tracker.observe(&PrintJobState::Printing).unwrap(),
            PrintStartPhase::Printing
        );
    }

    #[test]
    fn test_tracker_printing_is_terminal() {
        let mut tracker = PrintStartTracker::new();
        assert_eq!(
            tracker.observe(&PrintJobState::Printing).unwrap(),
            PrintStartPhase::Printing
        );
        assert_eq!(
            tracker.observe(&PrintJobState::NoJob).unwrap(),
            PrintStartPhase::Printing
        );
    }

    #[test]
    fn test_edge_detector_ignores_repeats() {
        let mut detector = LayerEdgeDetector::new(0.0, 1e-4);
        let edges: Vec<_> = [0.0, 0.0, 0.2, 0.2, 0.4]
            .into_iter()
            .filter_map(|z| detector.observe(z))
            .collect();
        assert_eq!(edges, vec![0, 1]);
        assert_eq!(detector.previous_height(), 0.4);

        // Jitter below epsilon is not a new layer.
        assert_eq!(detector.observe(0.40005), None);
    }

    #[test]
    fn test_layer_index() {
        assert_eq!(layer_index(0.0, 0.2), 0);
        assert_eq!(layer_index(0.19, 0.2), 0);
        assert_eq!(layer_index(0.6, 0.2), 3);
        assert_eq!(layer_index(1.0, 0.2), 5);
        assert_eq!(layer_index(-0.1, 0.2), 0);
    }

    #[test]
    fn test_wait_print_start() {
        let source = ScriptedSource::new()
            .with(STATE, repeated(json!("none"), 5))
            .with(STATE, repeated(json!("pre_print"), 30))
            .with(STATE, [json!("printing")]);
        let mut monitor = monitor(source);
        monitor.wait_print_start().unwrap();
        assert_eq!(monitor.job_state().unwrap(), PrintJobState::Printing);
        monitor.stop().unwrap();
    }

    #[test]
    fn test_wait_print_start_survives_missing_state() {
        let source = ScriptedSource::new().with(STATE, repeated(json!("pre_print"), 30));
        source.push_missing(STATE);
        source.push_missing(STATE);
        source.push(STATE, [json!("printing")]);
        let mut monitor = monitor(source);
        monitor.wait_print_start().unwrap();
        monitor.stop().unwrap();
    }

    #[test]
    fn test_wait_print_start_leveling_failed() {
        let source = ScriptedSource::new()
            .with(STATE, repeated(json!("pre_print"), 30))
            .with(STATE, [json!("none")]);
        let mut monitor = monitor(source);
        assert!(matches!(
            monitor.wait_print_start(),
            Err(PrintwatchError::PrepareFailed)
        ));
        monitor.stop().unwrap();
    }

    #[test]
    fn test_wait_temperature_converges() {
        let source = ScriptedSource::new()
            .with(STATE, [json!("printing")])
            .with(
                HOTEND,
                [195, 198, 199].into_iter().map(|t| json!({"current": t})),
            );
        let mut monitor = monitor(source);
        let reached = monitor.wait_temperature_within(200.0, 2.0).unwrap();
        assert_eq!(reached, 199.0);
        monitor.stop().unwrap();
    }

    #[test]
    fn test_wait_temperature_fails_when_paused() {
        let source = ScriptedSource::new()
            .with(STATE, [json!("printing"), json!("printing"), json!("paused")])
            .with(HOTEND, [195, 198].into_iter().map(|t| json!({"current": t})));
        let mut monitor = monitor(source);
        let err = monitor.wait_temperature(200.0).unwrap_err();
        assert!(matches!(err, PrintwatchError::NotPrinting(state) if state == "paused"));
        monitor.stop().unwrap();
    }

    #[test]
    fn test_wait_layer() {
        let source = ScriptedSource::new()
            .with(STATE, [json!("printing")])
            .with(
                POSITION,
                [0.0, 0.2, 0.4, 0.6].into_iter().map(|z| json!({"x": 10.0, "z": z})),
            );
        let mut monitor = monitor(source);
        let height = monitor.wait_layer(3).unwrap();
        assert_eq!(height, 0.6);
        monitor.stop().unwrap();
    }

    #[test]
    fn test_layers_until_print_ends() {
        let heights = repeated(json!({"z": 0.0}), 10)
            .chain(repeated(json!({"z": 0.2}), 10))
            .chain(repeated(json!({"z": 0.4}), 10));
        let source = ScriptedSource::new()
            .with(STATE, repeated(json!("printing"), 40))
            .with(STATE, [json!("post_print")])
            .with(POSITION, heights);
        let mut monitor = monitor(source);

        let results: Vec<_> = monitor.layers(None).collect();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap(), &0);
        assert_eq!(results[1].as_ref().unwrap(), &1);
        assert!(matches!(results[2], Err(PrintwatchError::NotPrinting(_))));
        assert_eq!(monitor.previous_height(), 0.4);
        monitor.stop().unwrap();
    }

    #[test]
    fn test_layers_stop_at_max_count() {
        let heights = repeated(json!({"z": 0.2}), 10).chain(repeated(json!({"z": 0.4}), 10));
        let source = ScriptedSource::new()
            .with(STATE, [json!("printing")])
            .with(POSITION, heights);
        let mut monitor = monitor(source);

        let layers: Vec<usize> = monitor.layers(Some(1)).map(|r| r.unwrap()).collect();
        assert_eq!(layers, vec![0]);
        monitor.stop().unwrap();
    }

    #[test]
    fn test_missing_series_is_not_watched() {
        let spec = WatchSpec::from_json_str(
            r#"[{"endpoint": "print_job/state", "items": [{"name": "state", "key": null}]}]"#,
        )
        .unwrap();
        let source = ScriptedSource::new().with(STATE, [json!("printing")]);
        let acquisition = AcquisitionConfig {
            interval: Duration::from_millis(2),
            ..Default::default()
        };
        let mut monitor =
            Monitor::start(&spec, &acquisition, MonitorConfig::default(), source, MemorySink::new())
                .unwrap();
        assert!(matches!(
            monitor.wait_layer(1),
            Err(PrintwatchError::NotWatched(name)) if name == "z"
        ));
        monitor.stop().unwrap();
    }
}
