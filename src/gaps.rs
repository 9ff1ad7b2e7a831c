//! Map of data-record gaps on discontinuous recordings.
//!
//! Gaps are keyed by *cache time* (the gap-free clock): an entry's
//! `data_time` is the end of contiguous data immediately preceding the
//! interruption. Conversions between the two clocks walk the sorted
//! entries; see [`crate::time`] for the domain newtypes.

use crate::error::{EdfError, Result};
use crate::record::GapEntry;
use crate::time::{nearly_equal, CacheTime, RecordingTime};
use crate::types::DataGap;

#[derive(Debug, Clone)]
pub struct GapModel {
    /// Sorted by `data_time`, deduplicated
    entries: Vec<GapEntry>,

    /// Length of recorded data in seconds (cache-time extent)
    data_length: f64,

    /// Recording length override set after the discontinuous probe
    recording_length_hint: Option<f64>,
}

impl GapModel {
    pub fn new(data_length: f64) -> Self {
        Self { entries: Vec::new(), data_length, recording_length_hint: None }
    }

    /// Insert a gap, keeping entries sorted. Re-adding a gap at an
    /// already known `data_time` is a no-op, so re-decoding a record
    /// span never duplicates entries.
    pub fn add_gap(&mut self, entry: GapEntry) {
        match self.entries.iter().position(|e| e.data_time >= entry.data_time) {
            Some(i) if nearly_equal(self.entries[i].data_time, entry.data_time) => {}
            Some(i) => self.entries.insert(i, entry),
            None => self.entries.push(entry),
        }
    }

    pub fn add_gaps(&mut self, entries: &[GapEntry]) {
        for entry in entries {
            self.add_gap(*entry);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_gap_time(&self) -> f64 {
        self.entries.iter().map(|e| e.duration).sum()
    }

    pub fn data_length(&self) -> f64 {
        self.data_length
    }

    /// Total recording span: data plus gaps, unless the probe found a
    /// later last-record start.
    pub fn recording_length(&self) -> f64 {
        let derived = self.data_length + self.total_gap_time();
        match self.recording_length_hint {
            Some(hint) => hint.max(derived),
            None => derived,
        }
    }

    pub fn set_recording_length_hint(&mut self, length: f64) {
        self.recording_length_hint = Some(length);
    }

    /// Total gap time at or before cache time `t`. This is the prior
    /// gap a record decoder needs for expected-start computation.
    pub fn gap_time_before_cache(&self, t: f64) -> f64 {
        self.entries
            .iter()
            .filter(|e| e.data_time < t || nearly_equal(e.data_time, t))
            .map(|e| e.duration)
            .sum()
    }

    /// Sum of gap durations for gaps that begin inside the
    /// recording-time window `[start, end)`.
    pub fn gap_time_between(&self, start: f64, end: f64) -> f64 {
        let mut total = 0.0;
        let mut cum = 0.0;
        for e in &self.entries {
            let gap_start = e.data_time + cum;
            if gap_start >= end {
                break;
            }
            if gap_start >= start {
                total += e.duration;
            }
            cum += e.duration;
        }
        total
    }

    /// Convert recording time to cache time. A point strictly inside a
    /// gap maps to the gap's position on the cache clock.
    pub fn rec_to_cache(&self, t: RecordingTime) -> Result<CacheTime> {
        let t = t.seconds();
        let max = self.recording_length();
        if t < 0.0 || t > max {
            return Err(EdfError::OutOfRange { start: t, end: t, max });
        }

        let mut cum = 0.0;
        for e in &self.entries {
            let gap_start = e.data_time + cum;
            if t >= gap_start + e.duration {
                cum += e.duration;
            } else if t > gap_start {
                return Ok(CacheTime(e.data_time));
            } else {
                break;
            }
        }
        Ok(CacheTime(t - cum))
    }

    /// Convert cache time to recording time by adding every gap that
    /// precedes it on the cache clock.
    pub fn cache_to_rec(&self, t: CacheTime) -> Result<RecordingTime> {
        let t = t.seconds();
        if t < 0.0 || t > self.data_length {
            return Err(EdfError::OutOfRange { start: t, end: t, max: self.data_length });
        }

        let mut cum = 0.0;
        for e in &self.entries {
            if e.data_time < t {
                cum += e.duration;
            } else {
                break;
            }
        }
        Ok(RecordingTime(t + cum))
    }

    /// Gaps overlapping the recording-time window, clipped to it.
    pub fn gaps_in_range(&self, start: f64, end: f64) -> Vec<DataGap> {
        let mut out = Vec::new();
        let mut cum = 0.0;
        for e in &self.entries {
            let gap_start = e.data_time + cum;
            cum += e.duration;
            let gap_end = gap_start + e.duration;
            if gap_start < end && gap_end > start {
                let clipped_start = gap_start.max(start);
                out.push(DataGap {
                    start: clipped_start,
                    duration: gap_end.min(end) - clipped_start,
                });
            }
            if gap_start >= end {
                break;
            }
        }
        out
    }

    /// Every gap, in recording time.
    pub fn all_gaps(&self) -> Vec<DataGap> {
        let mut out = Vec::new();
        let mut cum = 0.0;
        for e in &self.entries {
            out.push(DataGap { start: e.data_time + cum, duration: e.duration });
            cum += e.duration;
        }
        out
    }

    pub fn entries(&self) -> &[GapEntry] {
        &self.entries
    }
}
