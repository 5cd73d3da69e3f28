//! Drive a simulated printer through a print: wait for the print to start,
//! record telemetry, step the hotend temperature and count layers.
//!
//! Usage: cargo run --example simulated_print
//! Telemetry lands in ./record/sensor_record.csv (see PRINTWATCH_SAVE_DIR).

use printwatch::{
    AcquisitionConfig, Command, CsvSink, DeviceCommand, Monitor, MonitorConfig, ValueSource,
    WatchSpec,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const PREPARE: Duration = Duration::from_millis(800);
const LAYER_TIME: Duration = Duration::from_millis(700);

struct PrinterModel {
    job_started: Option<Instant>,
    paused: bool,
    hotend_current: f64,
    hotend_target: f64,
    bed_target: f64,
}

impl PrinterModel {
    fn job_state(&self) -> &'static str {
        match self.job_started {
            None => "none",
            Some(_) if self.paused => "paused",
            Some(t) if t.elapsed() < PREPARE => "pre_print",
            Some(_) => "printing",
        }
    }

    fn z(&self) -> f64 {
        match self.job_started {
            Some(t) if t.elapsed() > PREPARE => {
                let layers = (t.elapsed() - PREPARE).as_millis() / LAYER_TIME.as_millis();
                0.2 * (layers + 1) as f64
            }
            _ => 0.0,
        }
    }
}

/// Cheap stand-in for the HTTP client: one model, two capabilities.
#[derive(Clone)]
struct SimulatedPrinter(Arc<Mutex<PrinterModel>>);

impl ValueSource for SimulatedPrinter {
    fn fetch(&mut self, endpoint: &str) -> printwatch::Result<Option<Value>> {
        let mut printer = self
            .0
            .lock()
            .map_err(|_| printwatch::PrintwatchError::fetch(endpoint, "simulator poisoned"))?;
        // Heat toward the target on every poll.
        printer.hotend_current += (printer.hotend_target - printer.hotend_current) * 0.3;

        let value = match endpoint {
            "auth/verify" => json!({"message": "ok"}),
            "print_job/state" => json!(printer.job_state()),
            "printer/heads/0/position" => json!({"x": 100.0, "y": 100.0, "z": printer.z()}),
            "printer/heads/0/extruders/0/hotend/temperature" => {
                json!({"current": printer.hotend_current, "target": printer.hotend_target})
            }
            "printer/bed/temperature" => json!({"current": printer.bed_target, "target": printer.bed_target}),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}

impl DeviceCommand for SimulatedPrinter {
    fn send(&mut self, command: &Command) -> printwatch::Result<()> {
        let mut printer = self
            .0
            .lock()
            .map_err(|_| printwatch::PrintwatchError::fetch(command.endpoint(), "simulator poisoned"))?;
        match command {
            Command::SubmitJob(_) => printer.job_started = Some(Instant::now()),
            Command::Pause => printer.paused = true,
            Command::Resume => printer.paused = false,
            Command::Abort => printer.job_started = None,
            Command::HotendTemperature(t) => printer.hotend_target = *t,
            Command::BedTemperature(t) => printer.bed_target = *t,
            Command::Brightness(_) | Command::MaxSpeed(_) => {}
        }
        log::info!("{:?} -> {} {:?}", command.method(), command.endpoint(), command.payload());
        Ok(())
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> printwatch::Result<()> {
    let mut printer = SimulatedPrinter(Arc::new(Mutex::new(PrinterModel {
        job_started: None,
        paused: false,
        hotend_current: 25.0,
        hotend_target: 200.0,
        bed_target: 60.0,
    })));
    printwatch::verify_connection(&mut printer)?;

    let acquisition = AcquisitionConfig {
        interval: Duration::from_millis(100),
        ..AcquisitionConfig::from_env()
    };
    let config = MonitorConfig {
        settle_delay: Duration::from_millis(500),
        read_timeout: Some(Duration::from_secs(5)),
        ..MonitorConfig::from_env()
    };
    let sink = CsvSink::new(&acquisition.save_dir, &acquisition.file_name);
    let spec = WatchSpec::printer_default();
    let mut monitor = Monitor::start(&spec, &acquisition, config, printer.clone(), sink)?;

    printer.send(&Command::submit_job("cube.ufp")?)?;
    monitor.wait_print_start()?;
    monitor.start_recording();

    for (i, target) in [205.0, 195.0, 215.0].into_iter().enumerate() {
        printer.send(&Command::HotendTemperature(target))?;
        let reached = monitor.wait_temperature(target)?;
        println!("{}:\t{} [C] (read {:.1})", i, target, reached);
    }

    for layer in monitor.layers(Some(5)) {
        println!("layer {}", layer?);
    }
    monitor.wait_layer(8)?;
    println!("reached layer 8");

    monitor.stop()
}
