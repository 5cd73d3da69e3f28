use crate::buffer::{Batch, SampleBuffer};
use crate::config::{AcquisitionConfig, FailurePolicy};
use crate::sink::{BatchSink, CsvSink};
use crate::source::ValueSource;
use crate::types::{AcquisitionMode, Reading};
use crate::watchlist::WatchSpec;
use crate::{PrintwatchError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Buffer state published by the loop, guarded as one unit so a reader never
/// sees a half-written tick.
struct Published {
    buffer: SampleBuffer,
    /// Completed ticks so far.
    generation: u64,
    running: bool,
}

struct Shared {
    state: Mutex<Published>,
    fresh: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Published> {
        // Buffer writes cannot panic halfway, so a poisoned lock still
        // guards consistent data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_stopped(&self) {
        self.lock().running = false;
        self.fresh.notify_all();
    }
}

/// What the loop thread hands back when it exits.
struct LoopExit {
    sink: Box<dyn BatchSink>,
    result: Result<()>,
    recorded: bool,
}

/// A running acquisition loop.
///
/// A background thread fetches every watch target once per interval and
/// publishes the readings into the sample buffer. While recording, samples
/// accumulate and are flushed to the sink in batches; otherwise only the
/// freshest sample is kept.
///
/// Stopping (or dropping) the session ends the loop after its current tick,
/// joins the thread and then exports every row still buffered.
pub struct AcquisitionSession {
    shared: Arc<Shared>,
    recording: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<LoopExit>>,
    read_timeout: Option<Duration>,
}

impl AcquisitionSession {
    /// Start the acquisition thread.
    pub fn start<S, K>(
        spec: &WatchSpec,
        config: &AcquisitionConfig,
        source: S,
        sink: K,
    ) -> Result<AcquisitionSession>
    where
        S: ValueSource + 'static,
        K: BatchSink + 'static,
    {
        config.validate()?;

        let shared = Arc::new(Shared {
            state: Mutex::new(Published {
                buffer: SampleBuffer::new(spec)?,
                generation: 0,
                running: true,
            }),
            fresh: Condvar::new(),
        });
        let recording = Arc::new(AtomicBool::new(config.record_from_start));
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);

        let worker = AcquisitionLoop {
            spec: spec.clone(),
            interval: config.interval,
            push_lines: config.push_lines,
            policy: config.failure_policy,
            source: Box::new(source),
            sink: Box::new(sink),
            shared: shared.clone(),
            recording: recording.clone(),
            stop_rx,
            recorded: false,
        };

        let thread = std::thread::Builder::new()
            .name("printwatch-acquisition".into())
            .spawn(move || worker.run())?;

        log::info!("Entered acquisition loop");
        Ok(AcquisitionSession {
            shared,
            recording,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
            read_timeout: None,
        })
    }

    /// Start with a CSV sink at `config.save_dir / config.file_name`.
    pub fn start_csv<S>(spec: &WatchSpec, config: &AcquisitionConfig, source: S) -> Result<AcquisitionSession>
    where
        S: ValueSource + 'static,
    {
        let sink = CsvSink::new(&config.save_dir, &config.file_name);
        Self::start(spec, config, source, sink)
    }

    /// Default timeout applied to readers handed out afterwards.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// New reader. Its first read returns as soon as any tick has completed.
    pub fn reader(&self) -> LatestReader {
        LatestReader {
            shared: self.shared.clone(),
            seen: 0,
            timeout: self.read_timeout,
        }
    }

    /// Switch to append mode: samples accumulate and get exported.
    pub fn start_recording(&self) {
        self.recording.store(true, Ordering::Release);
        log::info!("Started sensor history output");
    }

    /// Switch to replace mode: only the freshest sample is kept.
    pub fn stop_recording(&self) {
        self.recording.store(false, Ordering::Release);
        log::info!("Stopped sensor history output");
    }

    pub fn mode(&self) -> AcquisitionMode {
        mode_of(&self.recording)
    }

    /// Check if the loop is still ticking.
    pub fn is_active(&self) -> bool {
        self.shared.lock().running
    }

    /// Rows currently held in memory.
    pub fn buffered_rows(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    /// Completed ticks so far.
    pub fn ticks(&self) -> u64 {
        self.shared.lock().generation
    }

    /// Stop the loop, wait for it, and flush what is still buffered.
    ///
    /// Returns the error that ended the loop early, if any, otherwise the
    /// result of the final export.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let thread = match self.thread.take() {
            Some(thread) => thread,
            None => return Ok(()),
        };

        log::info!("Exiting acquisition loop...");
        // Disconnecting the stop channel wakes the loop out of its pacing wait.
        drop(self.stop_tx.take());
        let joined = thread.join();
        self.shared.mark_stopped();

        let LoopExit {
            mut sink,
            result,
            recorded,
        } = joined.map_err(|_| PrintwatchError::StreamStopped)?;

        let flushed = if recorded {
            let batch = self.shared.lock().buffer.pop_batch(usize::MAX);
            sink.export(&batch).and_then(|_| sink.finish())
        } else {
            sink.finish()
        };

        log::info!("Exited acquisition loop");
        result.and(flushed)
    }
}

impl Drop for AcquisitionSession {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Acquisition session ended with error: {}", e);
        }
    }
}

fn mode_of(recording: &AtomicBool) -> AcquisitionMode {
    if recording.load(Ordering::Acquire) {
        AcquisitionMode::Append
    } else {
        AcquisitionMode::Replace
    }
}

/// Wall-clock time of day with microseconds, as stored in the `time` series.
fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S%.6f").to_string()
}

/// State owned by the acquisition thread.
struct AcquisitionLoop {
    spec: WatchSpec,
    interval: Duration,
    push_lines: usize,
    policy: FailurePolicy,
    source: Box<dyn ValueSource>,
    sink: Box<dyn BatchSink>,
    shared: Arc<Shared>,
    recording: Arc<AtomicBool>,
    stop_rx: Receiver<()>,
    /// Whether any tick ran in append mode.
    recorded: bool,
}

/// Marks the loop stopped when dropped, so readers wake even if a source or
/// sink panics on the loop thread.
struct StopOnDrop(Arc<Shared>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.mark_stopped();
    }
}

impl AcquisitionLoop {
    fn run(mut self) -> LoopExit {
        let _stop = StopOnDrop(self.shared.clone());
        let result = self.run_ticks();
        if let Err(e) = &result {
            log::warn!("Acquisition loop aborted: {}", e);
        }
        LoopExit {
            sink: self.sink,
            result,
            recorded: self.recorded,
        }
    }

    fn run_ticks(&mut self) -> Result<()> {
        loop {
            let started = Instant::now();
            self.tick()?;
            let elapsed = started.elapsed();
            log::debug!("Acquisition time: {:.3} s", elapsed.as_secs_f64());

            // Rest for what is left of the interval; a slow tick gets no rest.
            match self.stop_rx.recv_timeout(self.interval.saturating_sub(elapsed)) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }
    }

    fn tick(&mut self) -> Result<()> {
        let time = Reading::Text(timestamp());
        let responses = match self.fetch_all() {
            Ok(responses) => responses,
            Err(e) => match self.policy {
                FailurePolicy::Abort => return Err(e),
                FailurePolicy::SkipTick => {
                    log::warn!("Skipping tick: {}", e);
                    return Ok(());
                }
            },
        };

        let mode = mode_of(&self.recording);
        if mode == AcquisitionMode::Append {
            self.recorded = true;
        }
        if let Some(batch) = self.publish(time, &responses, mode) {
            if let Err(e) = self.sink.export(&batch) {
                // Keep the rows for the final flush.
                self.shared.lock().buffer.restore_batch(batch);
                return Err(e);
            }
        }
        Ok(())
    }

    /// One request per target, in order. The source is a single connection.
    fn fetch_all(&mut self) -> Result<Vec<Option<Value>>> {
        let mut responses = Vec::with_capacity(self.spec.targets().len());
        for target in self.spec.targets() {
            responses.push(self.source.fetch(&target.endpoint)?);
        }
        Ok(responses)
    }

    /// Write the tick and wake readers. Returns the batch due for export.
    fn publish(&self, time: Reading, responses: &[Option<Value>], mode: AcquisitionMode) -> Option<Batch> {
        let batch = {
            let mut state = self.shared.lock();
            state.buffer.write_tick(time, responses, mode);
            state.generation += 1;

            // Keep the freshest row buffered for readers.
            if mode == AcquisitionMode::Append && state.buffer.len() >= self.push_lines {
                Some(state.buffer.pop_batch(self.push_lines - 1))
            } else {
                None
            }
        };
        self.shared.fresh.notify_all();
        batch
    }
}

/// Blocking access to the freshest readings.
///
/// Every read waits for a tick this reader has not seen yet, then returns
/// the latest sample of the requested series. Each reader tracks its own
/// position, so concurrent readers do not steal ticks from one another.
/// Cloned readers start from the same position.
#[derive(Clone)]
pub struct LatestReader {
    shared: Arc<Shared>,
    seen: u64,
    timeout: Option<Duration>,
}

impl LatestReader {
    /// Bound every wait to `timeout`; `None` waits as long as the loop runs.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Wait for fresh data and return the latest value of each name.
    pub fn read<S: AsRef<str>>(&mut self, names: &[S]) -> Result<Vec<Reading>> {
        log::trace!(
            "Fetching sensor values: {:?}",
            names.iter().map(|n| n.as_ref()).collect::<Vec<&str>>()
        );
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.lock();

        for name in names {
            if state.buffer.series(name.as_ref()).is_none() {
                return Err(PrintwatchError::NotWatched(name.as_ref().to_string()));
            }
        }

        while state.generation <= self.seen {
            if !state.running {
                return Err(PrintwatchError::StreamStopped);
            }
            state = match deadline {
                None => self
                    .shared
                    .fresh
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(PrintwatchError::Timeout);
                    }
                    self.shared
                        .fresh
                        .wait_timeout(state, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|e| e.into_inner().0)
                }
            };
        }

        let values = state.buffer.latest(names)?;
        self.seen = state.generation;
        Ok(values)
    }

    pub fn read_one(&mut self, name: &str) -> Result<Reading> {
        let mut values = self.read(&[name])?;
        values
            .pop()
            .ok_or_else(|| PrintwatchError::NotWatched(name.to_string()))
    }

    pub fn read_pair(&mut self, first: &str, second: &str) -> Result<(Reading, Reading)> {
        let mut values = self.read(&[first, second])?.into_iter();
        match (values.next(), values.next()) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(PrintwatchError::NotWatched(format!("{}, {}", first, second))),
        }
    }

    /// Latest values without waiting or consuming freshness.
    pub fn peek<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Reading>> {
        self.shared.lock().buffer.latest(names)
    }
}
