//! Record a few seconds of telemetry from a scripted printer to CSV.
//!
//! Usage: cargo run --example record [watchlist.json]
//! Without a watchlist file the default printer watchlist is used.

use printwatch::source::mock::ScriptedSource;
use printwatch::{AcquisitionConfig, AcquisitionSession, WatchSpec};
use serde_json::json;
use std::time::Duration;

fn main() {
    env_logger::init();

    let spec = match std::env::args().nth(1) {
        Some(path) => match WatchSpec::from_json_file(&path) {
            Ok(spec) => spec,
            Err(e) => {
                eprintln!("Failed to load watchlist {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => WatchSpec::printer_default(),
    };

    let source = ScriptedSource::new()
        .with("print_job/state", [json!("printing")])
        .with(
            "printer/heads/0/position",
            (0..100).map(|i| json!({"x": 100.0, "y": 100.0, "z": 0.2 * (i / 10) as f64})),
        )
        .with(
            "printer/heads/0/extruders/0/hotend/temperature",
            (0..100).map(|i| json!({"current": 195.0 + (i % 7) as f64 * 0.5, "target": 200.0})),
        )
        .with(
            "printer/bed/temperature",
            [json!({"current": 60.0, "target": 60.0})],
        );

    let config = AcquisitionConfig {
        interval: Duration::from_millis(200),
        record_from_start: true,
        ..AcquisitionConfig::from_env()
    };

    let session = match AcquisitionSession::start_csv(&spec, &config, source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to start acquisition: {}", e);
            std::process::exit(1);
        }
    };

    std::thread::sleep(Duration::from_secs(3));
    println!("{} ticks acquired", session.ticks());

    match session.stop() {
        Ok(()) => println!(
            "Wrote {}",
            config.save_dir.join(&config.file_name).display()
        ),
        Err(e) => {
            eprintln!("Acquisition failed: {}", e);
            std::process::exit(1);
        }
    }
}
