//! Per-channel sample cache indexed by cache time.
//!
//! Buffers hold physical samples over the gap-free clock, so a span is
//! always contiguous regardless of recording interruptions. Positions
//! are kept as sample indices (`round(t * sampling_rate)`) internally;
//! float time only appears at the API boundary.

use crate::error::{EdfError, Result};
use crate::time::{CacheTime, TimeRange};
use crate::types::RecordingHeader;

/// Channel geometry handed to a sink at init time.
#[derive(Debug, Clone, Copy)]
pub struct SinkChannel {
    pub sampling_rate: f64,
    pub capacity_samples: usize,
}

/// Optional zero-copy transport for cached samples.
///
/// The engine is the only writer; the host-side consumer reads through
/// its own handle. A writer publishes `set_updated_range` only after
/// the samples of an insert are fully written, so a reader never
/// observes a partially written region. The sink may be process-local
/// or shared memory; the cache does not assume ownership semantics
/// beyond these calls.
pub trait SignalSink: Send {
    fn init(&mut self, channels: &[SinkChannel]) -> Result<()>;

    fn write_range(&mut self, channel: usize, start: CacheTime, samples: &[f64]) -> Result<()>;

    fn read_range(&self, channel: usize, range: TimeRange) -> Result<Vec<f64>>;

    fn set_updated_range(&mut self, channel: usize, range: TimeRange) -> Result<()>;
}

/// One cached span: samples starting at a sample index.
#[derive(Debug, Clone)]
struct Span {
    start_idx: usize,
    samples: Vec<f64>,
}

impl Span {
    fn end_idx(&self) -> usize {
        self.start_idx + self.samples.len()
    }
}

#[derive(Debug, Clone)]
struct ChannelCache {
    sampling_rate: f64,
    /// Sorted, non-overlapping, non-adjacent
    spans: Vec<Span>,
}

impl ChannelCache {
    fn insert(&mut self, start_idx: usize, data: Vec<f64>) {
        if data.is_empty() {
            return;
        }
        let end_idx = start_idx + data.len();

        // 收集与新区间重叠或相邻的span，合并成一个
        let mut merged_start = start_idx;
        let mut merged_end = end_idx;
        let mut keep_before = Vec::new();
        let mut keep_after = Vec::new();
        let mut absorbed = Vec::new();

        for span in self.spans.drain(..) {
            if span.end_idx() < start_idx {
                keep_before.push(span);
            } else if span.start_idx > end_idx {
                keep_after.push(span);
            } else {
                merged_start = merged_start.min(span.start_idx);
                merged_end = merged_end.max(span.end_idx());
                absorbed.push(span);
            }
        }

        let mut merged = vec![0.0; merged_end - merged_start];
        for span in &absorbed {
            let at = span.start_idx - merged_start;
            merged[at..at + span.samples.len()].copy_from_slice(&span.samples);
        }
        // 新数据覆盖旧数据
        merged[start_idx - merged_start..end_idx - merged_start].copy_from_slice(&data);

        keep_before.push(Span { start_idx: merged_start, samples: merged });
        keep_before.extend(keep_after);
        self.spans = keep_before;
    }

    /// Copy cached samples overlapping `[start_idx, start_idx + out.len())`
    /// into `out`; untouched positions keep their current value.
    fn read(&self, start_idx: usize, out: &mut [f64]) -> usize {
        let end_idx = start_idx + out.len();
        let mut copied = 0;
        for span in &self.spans {
            if span.end_idx() <= start_idx || span.start_idx >= end_idx {
                continue;
            }
            let from = span.start_idx.max(start_idx);
            let to = span.end_idx().min(end_idx);
            let src = &span.samples[from - span.start_idx..to - span.start_idx];
            out[from - start_idx..to - start_idx].copy_from_slice(src);
            copied += to - from;
        }
        copied
    }

    /// Overall bounds, holes included
    fn covered_idx(&self) -> Option<(usize, usize)> {
        let first = self.spans.first()?;
        let last = self.spans.last()?;
        Some((first.start_idx, last.end_idx()))
    }

    /// The first contiguous span. A later disjoint span does not count
    /// as coverage until the hole before it fills.
    fn contiguous_idx(&self) -> Option<(usize, usize)> {
        let first = self.spans.first()?;
        Some((first.start_idx, first.end_idx()))
    }
}

/// The engine-owned sample cache.
pub struct SignalCache {
    channels: Vec<ChannelCache>,
    sink: Option<Box<dyn SignalSink>>,
}

impl SignalCache {
    /// Build an empty cache sized from the header. Annotation channels
    /// get a sampling rate of 0 and never hold samples.
    pub fn new(header: &RecordingHeader) -> Self {
        let channels = (0..header.signal_count())
            .map(|i| ChannelCache {
                sampling_rate: header.sampling_rate(i),
                spans: Vec::new(),
            })
            .collect();

        Self { channels, sink: None }
    }

    pub fn sampling_rate(&self, channel: usize) -> f64 {
        self.channels[channel].sampling_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Attach a sink and initialise it with channel geometry sized for
    /// `data_length` seconds of recording.
    pub fn attach_sink(&mut self, mut sink: Box<dyn SignalSink>, data_length: f64) -> Result<()> {
        let geometry: Vec<SinkChannel> = self
            .channels
            .iter()
            .map(|c| SinkChannel {
                sampling_rate: c.sampling_rate,
                capacity_samples: (data_length * c.sampling_rate).round() as usize,
            })
            .collect();
        sink.init(&geometry)?;
        self.sink = Some(sink);
        Ok(())
    }

    /// Insert one decoded span for every channel, starting at `start`
    /// on the cache clock. `samples[c]` is empty for annotation
    /// channels. Overlapping inserts overwrite.
    pub fn insert(&mut self, start: CacheTime, samples: &[Vec<f64>]) -> Result<()> {
        if samples.len() != self.channels.len() {
            return Err(EdfError::InvalidSignalIndex(samples.len()));
        }

        for (c, data) in samples.iter().enumerate() {
            let channel = &mut self.channels[c];
            if channel.sampling_rate <= 0.0 || data.is_empty() {
                continue;
            }
            let sr = channel.sampling_rate;
            let start_idx = (start.seconds() * sr).round() as usize;
            channel.insert(start_idx, data.clone());
            let covered = channel
                .contiguous_idx()
                .map(|(lo, hi)| TimeRange::new(lo as f64 / sr, hi as f64 / sr));

            if let Some(sink) = self.sink.as_mut() {
                sink.write_range(c, start, data)?;
                if let Some(range) = covered {
                    // 样本写完后才发布范围，读者不会看到写到一半的区域
                    sink.set_updated_range(c, range)?;
                }
            }
        }
        Ok(())
    }

    /// Samples for `range ∩ cached`, per channel. Uncached positions
    /// inside the intersection read as 0.
    pub fn as_part(&self, range: TimeRange) -> Vec<Vec<f64>> {
        self.channels
            .iter()
            .map(|channel| {
                if channel.sampling_rate <= 0.0 {
                    return Vec::new();
                }
                let covered = match channel.covered_idx() {
                    Some(c) => c,
                    None => return Vec::new(),
                };
                let want_lo = (range.start * channel.sampling_rate).round() as usize;
                let want_hi = (range.end * channel.sampling_rate).round() as usize;
                let lo = want_lo.max(covered.0);
                let hi = want_hi.min(covered.1);
                if hi <= lo {
                    return Vec::new();
                }
                let mut out = vec![0.0; hi - lo];
                channel.read(lo, &mut out);
                out
            })
            .collect()
    }

    /// Copy cached samples for `channel` into `out`, starting at
    /// `start` on the cache clock. Positions with no cached data are
    /// left untouched. Returns the number of samples copied.
    pub fn read(&self, channel: usize, start: CacheTime, out: &mut [f64]) -> usize {
        let c = &self.channels[channel];
        if c.sampling_rate <= 0.0 {
            return 0;
        }
        let start_idx = (start.seconds() * c.sampling_rate).round() as usize;
        c.read(start_idx, out)
    }

    /// Intersection of per-channel covered ranges on the cache clock:
    /// `max` of span starts to `min` of span ends, annotation channels
    /// excluded. Only each channel's first contiguous span counts, so
    /// the range never spans a hole. `None` until every signal channel
    /// holds samples.
    pub fn updated_range(&self) -> Option<TimeRange> {
        let mut start: f64 = 0.0;
        let mut end = f64::INFINITY;
        let mut any = false;

        for channel in &self.channels {
            if channel.sampling_rate <= 0.0 {
                continue;
            }
            let (lo, hi) = channel.contiguous_idx()?;
            start = start.max(lo as f64 / channel.sampling_rate);
            end = end.min(hi as f64 / channel.sampling_rate);
            any = true;
        }

        if !any || end < start {
            return None;
        }
        Some(TimeRange::new(start, end))
    }

    /// Drop every buffer; the sink, if any, is released with them.
    pub fn clear(&mut self) {
        for channel in &mut self.channels {
            channel.spans.clear();
        }
        self.sink = None;
    }
}

/// Process-local reference sink, also used by tests.
pub struct MemorySink {
    channels: Vec<MemorySinkChannel>,
}

struct MemorySinkChannel {
    sampling_rate: f64,
    samples: Vec<f64>,
    updated: Option<TimeRange>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self { channels: Vec::new() }
    }

    pub fn updated_range(&self, channel: usize) -> Option<TimeRange> {
        self.channels.get(channel).and_then(|c| c.updated)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalSink for MemorySink {
    fn init(&mut self, channels: &[SinkChannel]) -> Result<()> {
        self.channels = channels
            .iter()
            .map(|c| MemorySinkChannel {
                sampling_rate: c.sampling_rate,
                samples: vec![0.0; c.capacity_samples],
                updated: None,
            })
            .collect();
        Ok(())
    }

    fn write_range(&mut self, channel: usize, start: CacheTime, samples: &[f64]) -> Result<()> {
        let c = self
            .channels
            .get_mut(channel)
            .ok_or(EdfError::InvalidSignalIndex(channel))?;
        let start_idx = (start.seconds() * c.sampling_rate).round() as usize;
        let end_idx = (start_idx + samples.len()).min(c.samples.len());
        if end_idx > start_idx {
            c.samples[start_idx..end_idx].copy_from_slice(&samples[..end_idx - start_idx]);
        }
        Ok(())
    }

    fn read_range(&self, channel: usize, range: TimeRange) -> Result<Vec<f64>> {
        let c = self
            .channels
            .get(channel)
            .ok_or(EdfError::InvalidSignalIndex(channel))?;
        let lo = (range.start * c.sampling_rate).round() as usize;
        let hi = ((range.end * c.sampling_rate).round() as usize).min(c.samples.len());
        Ok(c.samples[lo.min(hi)..hi].to_vec())
    }

    fn set_updated_range(&mut self, channel: usize, range: TimeRange) -> Result<()> {
        let c = self
            .channels
            .get_mut(channel)
            .ok_or(EdfError::InvalidSignalIndex(channel))?;
        c.updated = Some(range);
        Ok(())
    }
}
