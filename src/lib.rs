//! # printwatch - telemetry acquisition for networked 3D printers
//!
//! Polls a printer's status endpoints on a fixed interval and provides:
//! - An in-memory sample buffer per watched quantity, flushed to CSV in batches
//! - Blocking "freshest value" reads for any number of consumers
//! - Print-progress waits: print start, hotend temperature, layer height, layer changes
//!
//! The HTTP transport is not part of this crate; anything implementing
//! [`ValueSource`] can feed the loop.
//!
//! ## Quick Start
//! ```no_run
//! use printwatch::{AcquisitionConfig, Monitor, MonitorConfig, WatchSpec};
//! # fn source() -> printwatch::source::mock::ScriptedSource { unimplemented!() }
//!
//! let spec = WatchSpec::printer_default();
//! let acquisition = AcquisitionConfig::from_env();
//! let sink = printwatch::CsvSink::new(&acquisition.save_dir, &acquisition.file_name);
//! let mut monitor = Monitor::start(&spec, &acquisition, MonitorConfig::from_env(), source(), sink)?;
//!
//! monitor.wait_print_start()?;
//! monitor.start_recording();
//! for layer in monitor.layers(Some(10)) {
//!     println!("layer {}", layer?);
//! }
//! monitor.stop()?;
//! # Ok::<(), printwatch::PrintwatchError>(())
//! ```

pub mod error;
pub mod types;
pub mod watchlist;
pub mod source;
pub mod command;
pub mod buffer;
pub mod sink;
pub mod config;
pub mod acquisition;
pub mod monitor;

pub use error::PrintwatchError;
pub use types::*;
pub use watchlist::{WatchItem, WatchSpec, WatchTarget};
pub use source::{verify_connection, ValueSource};
pub use command::{Command, DeviceCommand};
pub use buffer::{Batch, SampleBuffer};
pub use sink::{BatchSink, CsvSink, MemorySink};
pub use config::{AcquisitionConfig, FailurePolicy, MonitorConfig};
pub use acquisition::{AcquisitionSession, LatestReader};
pub use monitor::{LayerEdgeDetector, LayerEdges, Monitor, PrintStartPhase, PrintStartTracker};

/// Result type alias for printwatch operations.
pub type Result<T> = std::result::Result<T, PrintwatchError>;
