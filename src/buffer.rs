use crate::types::{AcquisitionMode, Reading};
use crate::watchlist::{self, WatchSpec, TIME_SERIES};
use crate::{PrintwatchError, Result};
use serde_json::Value;
use std::collections::HashMap;

/// Column slot and extraction key for one watch item.
#[derive(Debug, Clone)]
struct Slot {
    column: usize,
    key: Option<String>,
}

/// Named time series, one per watch item plus `time` in column 0.
///
/// Every series has the same length after each tick. Append mode adds a
/// sample to every series; replace mode overwrites the last sample of every
/// series (and appends when a series is still empty, so the first reading is
/// never dropped).
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    columns: Vec<String>,
    series: Vec<Vec<Reading>>,
    index: HashMap<String, usize>,
    /// Per target, the slots its response feeds.
    slots: Vec<Vec<Slot>>,
}

impl SampleBuffer {
    /// Create one empty series per watch item, plus `time`.
    pub fn new(spec: &WatchSpec) -> Result<Self> {
        let mut columns = vec![TIME_SERIES.to_string()];
        let mut index = HashMap::new();
        index.insert(TIME_SERIES.to_string(), 0);

        let mut slots = Vec::with_capacity(spec.targets().len());
        for target in spec.targets() {
            let mut target_slots = Vec::with_capacity(target.items.len());
            for item in &target.items {
                let column = columns.len();
                if index.insert(item.name.clone(), column).is_some() {
                    return Err(PrintwatchError::DuplicateName(item.name.clone()));
                }
                columns.push(item.name.clone());
                target_slots.push(Slot {
                    column,
                    key: item.key.clone(),
                });
            }
            slots.push(target_slots);
        }

        let series = vec![Vec::new(); columns.len()];
        log::debug!("Initialized sample buffer with {} series", columns.len());
        Ok(Self {
            columns,
            series,
            index,
            slots,
        })
    }

    /// Write one tick.
    ///
    /// `responses` holds one entry per watch target in declaration order;
    /// `None` (or a missing trailing entry) means the target gave no value and
    /// its items are stored as null.
    pub fn write_tick(&mut self, time: Reading, responses: &[Option<Value>], mode: AcquisitionMode) {
        Self::write(&mut self.series[0], time, mode);
        for (target, slots) in self.slots.iter().enumerate() {
            let response = responses.get(target).and_then(Option::as_ref);
            for slot in slots {
                let value = watchlist::extract(response, slot.key.as_deref());
                Self::write(&mut self.series[slot.column], Reading::from(value), mode);
            }
        }
    }

    fn write(series: &mut Vec<Reading>, reading: Reading, mode: AcquisitionMode) {
        if mode == AcquisitionMode::Replace {
            if let Some(last) = series.last_mut() {
                *last = reading;
                return;
            }
        }
        series.push(reading);
    }

    /// Remove and return the oldest `n` samples of every series.
    ///
    /// Returns fewer rows when fewer are buffered.
    pub fn pop_batch(&mut self, n: usize) -> Batch {
        let n = n.min(self.len());
        let series = self
            .series
            .iter_mut()
            .map(|s| s.drain(..n).collect())
            .collect();
        Batch {
            columns: self.columns.clone(),
            series,
        }
    }

    /// Put a batch taken by [`pop_batch`](Self::pop_batch) back in front of
    /// the buffered samples.
    pub fn restore_batch(&mut self, batch: Batch) {
        for (series, mut restored) in self.series.iter_mut().zip(batch.series) {
            restored.append(series);
            *series = restored;
        }
    }

    /// Last sample of each named series, in the order asked.
    ///
    /// A series that has not been written yet reads as `Null`.
    pub fn latest<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Reading>> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                let column = self
                    .index
                    .get(name)
                    .ok_or_else(|| PrintwatchError::NotWatched(name.to_string()))?;
                Ok(self.series[*column].last().cloned().unwrap_or(Reading::Null))
            })
            .collect()
    }

    /// Full history of one series.
    pub fn series(&self, name: &str) -> Option<&[Reading]> {
        self.index.get(name).map(|&c| self.series[c].as_slice())
    }

    /// Column names, `time` first then declaration order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of buffered samples (rows).
    pub fn len(&self) -> usize {
        self.series[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Rows drained from the buffer for export. Columnar.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    columns: Vec<String>,
    series: Vec<Vec<Reading>>,
}

impl Batch {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.series.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn series(&self, name: &str) -> Option<&[Reading]> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| self.series[i].as_slice())
    }

    /// Row-major view.
    pub fn rows(&self) -> impl Iterator<Item = Vec<&Reading>> + '_ {
        (0..self.len()).map(move |row| self.series.iter().map(|s| &s[row]).collect())
    }
}
