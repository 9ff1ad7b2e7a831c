//! The cache engine: one owning task that plans and executes
//! progressive loads, coordinates awaiters, and reports progress.
//!
//! All mutable state lives inside the engine; external callers talk to
//! it exclusively through [`EngineRequest`] messages with `oneshot`
//! responders, so no locking crosses the boundary. The request loop is
//! biased: queued requests are serviced before the next sweep chunk,
//! which gives the cooperative interleaving a viewer needs while a
//! whole-recording load runs in the background.

use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cache::{SignalCache, SignalSink};
use crate::error::{EdfError, Result};
use crate::gaps::GapModel;
use crate::record::RecordDecoder;
use crate::source::ByteSource;
use crate::tal::parse_tal_record;
use crate::time::{CacheTime, RecordingTime, TimeRange};
use crate::types::{Annotation, DataGap, RecordingHeader, Study};

/// Cooperative pause between sweep chunks, so queued requests are
/// serviced while a whole-recording load runs.
const CHUNK_YIELD_MS: u64 = 10;

/// Engine configuration, updatable at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Target bytes per chunk during a sweep; the chunk record count is
    /// `max(1, data_chunk_size / record_byte_size)`
    #[serde(default = "default_data_chunk_size")]
    pub data_chunk_size: usize,

    /// Ceiling on total cached sample bytes. The whole-recording sweep
    /// is only taken when the widened recording fits under it.
    #[serde(default = "default_max_load_cache_size")]
    pub max_load_cache_size: usize,

    /// Deadline for suspended get-signals callers, in milliseconds
    #[serde(default = "default_await_signals_ms")]
    pub await_signals_ms: u64,
}

fn default_data_chunk_size() -> usize {
    10 * 1024 * 1024
}

fn default_max_load_cache_size() -> usize {
    512 * 1024 * 1024
}

fn default_await_signals_ms() -> u64 {
    5000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            data_chunk_size: default_data_chunk_size(),
            max_load_cache_size: default_max_load_cache_size(),
            await_signals_ms: default_await_signals_ms(),
        }
    }
}

/// Which channels a get-signals request wants. An `include` list wins
/// over `exclude`; with neither, every signal channel is returned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelFilter {
    pub include: Option<Vec<usize>>,
    pub exclude: Option<Vec<usize>>,
}

impl ChannelFilter {
    pub fn allows(&self, channel: usize) -> bool {
        if let Some(include) = &self.include {
            return include.contains(&channel);
        }
        if let Some(exclude) = &self.exclude {
            return !exclude.contains(&channel);
        }
        true
    }
}

/// Samples for one channel of a get-signals response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSlice {
    pub channel: usize,
    pub label: String,
    pub sampling_rate: f64,
    pub samples: Vec<f64>,
}

/// Response to a get-signals request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalData {
    pub range: TimeRange,
    pub signals: Vec<SignalSlice>,
    pub annotations: Vec<Annotation>,
    pub gaps: Vec<DataGap>,
}

/// One progress event from a running sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheProgress {
    /// Annotations discovered in the chunk just inserted
    pub annotations: Vec<Annotation>,

    /// The full gap set known so far
    pub gaps: Vec<DataGap>,

    /// Contiguously cached range, in recording time
    pub range: TimeRange,

    /// Record-overlap warnings from the chunk, rendered for the host;
    /// damping keeps a run of identically shifted records to one entry
    pub warnings: Vec<String>,
}

/// Requests addressed to the engine task.
pub enum EngineRequest {
    SetupCache {
        sink: Option<Box<dyn SignalSink>>,
        respond: oneshot::Sender<Result<()>>,
    },
    GetSignals {
        range: TimeRange,
        filter: Option<ChannelFilter>,
        respond: oneshot::Sender<Result<SignalData>>,
    },
    GetAnnotations {
        range: TimeRange,
        respond: oneshot::Sender<Result<Vec<Annotation>>>,
    },
    GetDataGaps {
        range: TimeRange,
        respond: oneshot::Sender<Result<Vec<DataGap>>>,
    },
    CacheFromSource {
        start_from: Option<f64>,
        progress: mpsc::Sender<CacheProgress>,
        respond: oneshot::Sender<Result<()>>,
    },
    UpdateSettings {
        config: CacheConfig,
        respond: oneshot::Sender<Result<()>>,
    },
    ReleaseCache {
        respond: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadDirection {
    Forward,
    Backward,
    Alternating,
}

/// An in-flight load covering a record span. Created when a request
/// needs asynchronous loading, removed on completion or cancellation.
struct CacheProcess {
    /// Target record span `[start, end)`
    target_start: usize,
    target_end: usize,

    cursor_fwd: usize,
    cursor_back: usize,
    direction: LoadDirection,
    take_forward: bool,
    cancelled: bool,

    progress: Option<mpsc::Sender<CacheProgress>>,
    respond: Option<oneshot::Sender<Result<()>>>,
}

impl CacheProcess {
    fn new(target_start: usize, target_end: usize, focus: usize, direction: LoadDirection) -> Self {
        let focus = focus.clamp(target_start, target_end);
        Self {
            target_start,
            target_end,
            cursor_fwd: if direction == LoadDirection::Backward { target_end } else { focus },
            cursor_back: if direction == LoadDirection::Forward { target_start } else { focus },
            direction,
            take_forward: true,
            cancelled: false,
            progress: None,
            respond: None,
        }
    }

    fn is_complete(&self) -> bool {
        match self.direction {
            LoadDirection::Forward => self.cursor_fwd >= self.target_end,
            LoadDirection::Backward => self.cursor_back <= self.target_start,
            LoadDirection::Alternating => {
                self.cursor_fwd >= self.target_end && self.cursor_back <= self.target_start
            }
        }
    }

    fn is_active(&self) -> bool {
        !self.cancelled && !self.is_complete()
    }

    fn covers_records(&self, start: usize, end: usize) -> bool {
        self.target_start <= start && self.target_end >= end
    }

    /// Pick the next record span to load and advance the cursor. The
    /// cursor advances even if the load later fails, so a bad chunk
    /// does not stall the sweep.
    fn next_chunk(&mut self, chunk_records: usize) -> Option<(usize, usize)> {
        let forward = |p: &mut Self| {
            let r0 = p.cursor_fwd;
            let r1 = (r0 + chunk_records).min(p.target_end);
            p.cursor_fwd = r1;
            (r0, r1)
        };
        let backward = |p: &mut Self| {
            let r1 = p.cursor_back;
            let r0 = r1.saturating_sub(chunk_records).max(p.target_start);
            p.cursor_back = r0;
            (r0, r1)
        };

        match self.direction {
            LoadDirection::Forward if self.cursor_fwd < self.target_end => Some(forward(self)),
            LoadDirection::Backward if self.cursor_back > self.target_start => {
                Some(backward(self))
            }
            LoadDirection::Alternating => {
                // 围绕焦点对称扩展，一侧用尽后只走另一侧
                let can_fwd = self.cursor_fwd < self.target_end;
                let can_back = self.cursor_back > self.target_start;
                let chunk = match (can_fwd, can_back) {
                    (true, true) => {
                        let c = if self.take_forward { forward(self) } else { backward(self) };
                        self.take_forward = !self.take_forward;
                        c
                    }
                    (true, false) => forward(self),
                    (false, true) => backward(self),
                    (false, false) => return None,
                };
                Some(chunk)
            }
            _ => None,
        }
    }
}

/// A get-signals caller suspended until a load covers its range or the
/// deadline passes.
struct Awaiter {
    range: TimeRange,
    filter: Option<ChannelFilter>,
    deadline: Instant,
    respond: oneshot::Sender<Result<SignalData>>,
}

/// The signal-data engine. Owns the byte source, the caches and all
/// load bookkeeping; runs as a single task.
pub struct CacheEngine {
    source: Box<dyn ByteSource>,
    header: RecordingHeader,
    config: CacheConfig,

    cache: Option<SignalCache>,
    gaps: GapModel,
    /// Flat list kept sorted by start
    annotations: Vec<Annotation>,

    processes: Vec<CacheProcess>,
    awaiters: Vec<Awaiter>,

    /// Damps repeated record-overlap warnings across chunks
    start_correction: f64,

    cancel: CancellationToken,
}

impl CacheEngine {
    pub fn new(
        source: Box<dyn ByteSource>,
        header: RecordingHeader,
        config: CacheConfig,
        cancel: CancellationToken,
    ) -> Self {
        let gaps = GapModel::new(header.data_length());
        Self {
            source,
            header,
            config,
            cache: None,
            gaps,
            annotations: Vec::new(),
            processes: Vec::new(),
            awaiters: Vec::new(),
            start_correction: 0.0,
            cancel,
        }
    }

    /// Initial setup: on discontinuous files, probe the last record's
    /// TAL start so the total recording length covers trailing gaps.
    /// Annotations and gaps seen by the probe are discarded; the
    /// forward sweep re-collects them.
    pub async fn setup(&mut self) -> Result<Study> {
        if self.header.discontinuous && self.header.data_record_count > 0 {
            let last = self.header.data_record_count - 1;
            match self.probe_record_start(last).await {
                Ok(Some(start)) => {
                    let total = (start + self.header.data_record_duration)
                        .max(self.header.data_length());
                    self.gaps.set_recording_length_hint(total);
                    debug!("discontinuous probe: last record starts at {start}s, total {total}s");
                }
                Ok(None) => {
                    warn!("discontinuous file without a record-start TAL in its last record");
                }
                Err(e) => {
                    warn!("discontinuous probe failed: {e}");
                }
            }
        }

        Ok(Study {
            format: self.header.format,
            data_length: self.header.data_length(),
            recording_length: self.gaps.recording_length(),
            channel_labels: self.header.signals.iter().map(|s| s.label.clone()).collect(),
        })
    }

    /// Read one record and return its record-start TAL onset, without
    /// touching the annotation or gap caches.
    async fn probe_record_start(&mut self, record: usize) -> Result<Option<f64>> {
        let channel = match self
            .header
            .signals
            .iter()
            .position(|s| s.is_annotation(self.header.format))
        {
            Some(c) => c,
            None => return Ok(None),
        };

        let buf = self
            .source
            .read(
                self.header.record_offset(record) as u64,
                self.header.record_byte_size,
            )
            .await?;

        let bytes_per_sample = self.header.format.bytes_per_sample();
        let mut offset = 0;
        for signal in &self.header.signals[..channel] {
            offset += signal.samples_per_record * bytes_per_sample;
        }
        let len = self.header.signals[channel].samples_per_record * bytes_per_sample;
        let tal = parse_tal_record(&buf[offset..offset + len])?;
        Ok(tal.record_start)
    }

    pub fn total_recording_length(&self) -> f64 {
        self.gaps.recording_length()
    }

    /// The request loop. Exits on shutdown, cancellation, or when all
    /// senders are dropped.
    pub async fn run(mut self, mut rx: mpsc::Receiver<EngineRequest>) {
        let cancel = self.cancel.clone();
        loop {
            let next_deadline = self.awaiters.iter().map(|a| a.deadline).min();
            let deadline = next_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(60));
            let has_work = self.processes.iter().any(|p| p.is_active());

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    self.release();
                    break;
                }

                request = rx.recv() => {
                    match request {
                        Some(EngineRequest::Shutdown) | None => {
                            self.release();
                            break;
                        }
                        Some(request) => self.handle_request(request).await,
                    }
                }

                _ = tokio::time::sleep_until(deadline), if next_deadline.is_some() => {
                    self.expire_awaiters();
                }

                _ = tokio::time::sleep(Duration::from_millis(CHUNK_YIELD_MS)), if has_work => {
                    self.step_first_process().await;
                    self.satisfy_awaiters();
                    self.expire_awaiters();
                }
            }
        }
    }

    async fn handle_request(&mut self, request: EngineRequest) {
        match request {
            EngineRequest::SetupCache { sink, respond } => {
                let _ = respond.send(self.setup_cache(sink));
            }
            EngineRequest::GetSignals { range, filter, respond } => {
                self.handle_get_signals(range, filter, respond).await;
            }
            EngineRequest::GetAnnotations { range, respond } => {
                let _ = respond.send(Ok(self.annotations_in(self.clip_to_bounds(range))));
            }
            EngineRequest::GetDataGaps { range, respond } => {
                let clipped = self.clip_to_bounds(range);
                let _ = respond.send(Ok(self.gaps.gaps_in_range(clipped.start, clipped.end)));
            }
            EngineRequest::CacheFromSource { start_from, progress, respond } => {
                self.start_sweep(start_from, progress, respond);
            }
            EngineRequest::UpdateSettings { config, respond } => {
                self.config = config;
                let _ = respond.send(Ok(()));
            }
            EngineRequest::ReleaseCache { respond } => {
                self.release();
                let _ = respond.send(Ok(()));
            }
            // Shutdown从不到达这里，run循环先拦截
            EngineRequest::Shutdown => {}
        }
    }

    fn setup_cache(&mut self, sink: Option<Box<dyn SignalSink>>) -> Result<()> {
        if self.cache.is_some() {
            return Err(EdfError::AlreadyInitialised);
        }
        let mut cache = SignalCache::new(&self.header);
        if let Some(sink) = sink {
            cache.attach_sink(sink, self.header.data_length())?;
        }
        self.cache = Some(cache);
        Ok(())
    }

    /// Cancel all processes, fail pending awaiters, drop buffers.
    fn release(&mut self) {
        for mut process in self.processes.drain(..) {
            process.cancelled = true;
            if let Some(respond) = process.respond.take() {
                let _ = respond.send(Err(EdfError::Cancelled));
            }
        }
        for awaiter in self.awaiters.drain(..) {
            let _ = awaiter.respond.send(Err(EdfError::Cancelled));
        }
        if let Some(cache) = self.cache.as_mut() {
            cache.clear();
        }
        self.cache = None;
    }

    // ---- get-signals ----

    async fn handle_get_signals(
        &mut self,
        range: TimeRange,
        filter: Option<ChannelFilter>,
        respond: oneshot::Sender<Result<SignalData>>,
    ) {
        if self.cache.is_none() {
            let _ = respond.send(Err(EdfError::NotInitialised));
            return;
        }
        if let Err(e) = self.validate_range(range) {
            let _ = respond.send(Err(e));
            return;
        }

        let needed = match self.needed_cache_range(range) {
            Ok(needed) => needed,
            Err(e) => {
                let _ = respond.send(Err(e));
                return;
            }
        };

        if self.is_covered(&needed) {
            let _ = respond.send(self.assemble(range, filter.as_ref()));
            return;
        }

        let (r0, r1) = self.record_span(&needed);
        if self.processes.iter().any(|p| p.is_active() && p.covers_records(r0, r1)) {
            // 已有载入进程覆盖该区间，挂起等待
            self.awaiters.push(Awaiter {
                range,
                filter,
                deadline: Instant::now() + Duration::from_millis(self.config.await_signals_ms),
                respond,
            });
            return;
        }

        // 无进程覆盖：读取最小对齐区间
        match self.load_records(r0, r1).await {
            Ok(_) => {
                let _ = respond.send(self.assemble(range, filter.as_ref()));
            }
            Err(e) => {
                let _ = respond.send(Err(e));
            }
        }
    }

    fn validate_range(&self, range: TimeRange) -> Result<()> {
        let max = self.total_recording_length();
        if range.start < 0.0 || range.end > max + 1e-9 || range.end < range.start {
            return Err(EdfError::OutOfRange { start: range.start, end: range.end, max });
        }
        Ok(())
    }

    fn clip_to_bounds(&self, range: TimeRange) -> TimeRange {
        range.clip(&TimeRange::new(0.0, self.total_recording_length()))
    }

    /// Cache-time counterpart of a recording-time request.
    fn needed_cache_range(&self, range: TimeRange) -> Result<TimeRange> {
        let total = self.total_recording_length();
        let data_length = self.gaps.data_length();
        let start = self
            .gaps
            .rec_to_cache(RecordingTime(range.start.clamp(0.0, total)))?
            .seconds();
        let end = self
            .gaps
            .rec_to_cache(RecordingTime(range.end.clamp(0.0, total)))?
            .seconds();
        Ok(TimeRange::new(start.min(data_length), end.min(data_length)))
    }

    fn is_covered(&self, needed: &TimeRange) -> bool {
        if needed.is_empty() {
            return true;
        }
        match self.cache.as_ref().and_then(|c| c.updated_range()) {
            Some(updated) => updated.covers(needed),
            None => false,
        }
    }

    /// Minimum aligned record span covering a cache-time range.
    fn record_span(&self, needed: &TimeRange) -> (usize, usize) {
        let duration = self.header.data_record_duration;
        let count = self.header.data_record_count;
        let r0 = ((needed.start / duration) + 1e-9).floor() as usize;
        let r1 = ((needed.end / duration) - 1e-9).ceil() as usize;
        (r0.min(count), r1.clamp(r0.min(count), count))
    }

    // ---- loading ----

    fn chunk_records(&self) -> usize {
        (self.config.data_chunk_size / self.header.record_byte_size).max(1)
    }

    /// Load and decode records `[r0, r1)`, merge gaps and annotations,
    /// insert samples. Returns the annotations found in the span and
    /// any recoverable record-overlap warnings.
    async fn load_records(
        &mut self,
        r0: usize,
        r1: usize,
    ) -> Result<(Vec<Annotation>, Vec<EdfError>)> {
        if r1 <= r0 {
            return Ok((Vec::new(), Vec::new()));
        }
        let n = r1 - r0;
        let duration = self.header.data_record_duration;
        let prior_gap = self.gaps.gap_time_before_cache(r0 as f64 * duration);

        let buf = self
            .source
            .read(
                self.header.record_offset(r0) as u64,
                n * self.header.record_byte_size,
            )
            .await?;

        let mut decoder = RecordDecoder::new(&self.header);
        decoder.set_start_correction(self.start_correction);
        let span = decoder.decode_span(&buf, r0, n, prior_gap)?;
        self.start_correction = decoder.start_correction();

        self.gaps.add_gaps(&span.gaps);
        self.merge_annotations(&span.annotations);
        if let Some(cache) = self.cache.as_mut() {
            cache.insert(CacheTime(r0 as f64 * duration), &span.samples)?;
        }

        Ok((span.annotations, span.warnings))
    }

    /// Insert new annotations keeping the flat list sorted and free of
    /// duplicates, so re-decoded records are harmless.
    fn merge_annotations(&mut self, new: &[Annotation]) {
        for annotation in new {
            let at = self
                .annotations
                .partition_point(|a| a.start < annotation.start);
            let duplicate = self.annotations[at..]
                .iter()
                .take_while(|a| a.start == annotation.start)
                .any(|a| a.label == annotation.label && a.duration == annotation.duration);
            if !duplicate {
                self.annotations.insert(at, annotation.clone());
            }
        }
    }

    fn annotations_in(&self, range: TimeRange) -> Vec<Annotation> {
        let lo = self.annotations.partition_point(|a| a.start < range.start);
        let hi = self.annotations.partition_point(|a| a.start < range.end);
        self.annotations[lo..hi].to_vec()
    }

    // ---- sweep ----

    /// Start the progressive whole-recording sweep. With `start_from`,
    /// the sweep runs from there to the end first and then wraps to
    /// fill the head.
    fn start_sweep(
        &mut self,
        start_from: Option<f64>,
        progress: mpsc::Sender<CacheProgress>,
        respond: oneshot::Sender<Result<()>>,
    ) {
        if self.cache.is_none() {
            let _ = respond.send(Err(EdfError::NotInitialised));
            return;
        }

        let widened = self.widened_byte_size();
        if widened > self.config.max_load_cache_size {
            let _ = respond.send(Err(EdfError::CacheTooSmall {
                needed: widened,
                budget: self.config.max_load_cache_size,
            }));
            return;
        }

        let count = self.header.data_record_count;
        let start_record = match start_from {
            Some(t) => {
                let cache_t = self
                    .gaps
                    .rec_to_cache(RecordingTime(t.clamp(0.0, self.total_recording_length())))
                    .map(|c| c.seconds())
                    .unwrap_or(0.0);
                (((cache_t / self.header.data_record_duration) + 1e-9).floor() as usize).min(count)
            }
            None => 0,
        };

        let mut tail = CacheProcess::new(start_record, count, start_record, LoadDirection::Forward);
        tail.progress = Some(progress.clone());

        if start_record > 0 {
            // 回绕补齐开头，完成时回应
            let mut head = CacheProcess::new(0, start_record, 0, LoadDirection::Forward);
            head.progress = Some(progress);
            head.respond = Some(respond);
            self.processes.push(tail);
            self.processes.push(head);
        } else {
            tail.respond = Some(respond);
            self.processes.push(tail);
        }
    }

    /// Sample bytes after digital-to-float widening: 16-bit EDF doubles
    /// (2 -> 4 bytes), 24-bit BDF grows by 4/3.
    fn widened_byte_size(&self) -> usize {
        let raw = self.header.record_byte_size * self.header.data_record_count;
        match self.header.format.bytes_per_sample() {
            2 => raw * 2,
            _ => raw * 4 / 3,
        }
    }

    /// Run one chunk of the first active process. Chunk failures are
    /// surfaced and the sweep moves on; the cursor has already
    /// advanced.
    async fn step_first_process(&mut self) {
        let idx = match self.processes.iter().position(|p| p.is_active()) {
            Some(idx) => idx,
            None => return,
        };
        let chunk_records = self.chunk_records();
        let chunk = self.processes[idx].next_chunk(chunk_records);

        if let Some((r0, r1)) = chunk {
            match self.load_records(r0, r1).await {
                Ok((annotations, warnings)) => {
                    self.send_progress(idx, annotations, warnings);
                }
                Err(e) => {
                    warn!("sweep chunk [{r0}, {r1}) failed: {e}");
                }
            }
        }

        if self.processes[idx].is_complete() {
            let mut process = self.processes.remove(idx);
            if let Some(respond) = process.respond.take() {
                let _ = respond.send(Ok(()));
            }
        }
    }

    fn send_progress(&mut self, idx: usize, annotations: Vec<Annotation>, warnings: Vec<EdfError>) {
        let updated = self.cache.as_ref().and_then(|c| c.updated_range());
        let range = match updated {
            Some(updated) => {
                let start = self
                    .gaps
                    .cache_to_rec(CacheTime(updated.start))
                    .map(|r| r.seconds())
                    .unwrap_or(updated.start);
                let end = self
                    .gaps
                    .cache_to_rec(CacheTime(updated.end))
                    .map(|r| r.seconds())
                    .unwrap_or(updated.end);
                TimeRange::new(start, end)
            }
            None => TimeRange::new(0.0, 0.0),
        };

        let event = CacheProgress {
            annotations,
            gaps: self.gaps.all_gaps(),
            range,
            warnings: warnings.iter().map(|w| w.to_string()).collect(),
        };

        let consumer_gone = match self.processes[idx].progress.as_ref() {
            Some(progress) => match progress.try_send(event) {
                Ok(()) => false,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("progress consumer is behind, dropping event");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => true,
            },
            None => false,
        };
        if consumer_gone {
            self.processes[idx].progress = None;
        }
    }

    // ---- awaiters ----

    fn satisfy_awaiters(&mut self) {
        let mut i = 0;
        while i < self.awaiters.len() {
            let needed = match self.needed_cache_range(self.awaiters[i].range) {
                Ok(needed) => needed,
                Err(_) => {
                    let awaiter = self.awaiters.remove(i);
                    let _ = awaiter.respond.send(self.assemble(awaiter.range, awaiter.filter.as_ref()));
                    continue;
                }
            };
            if self.is_covered(&needed) {
                let awaiter = self.awaiters.remove(i);
                let _ = awaiter.respond.send(self.assemble(awaiter.range, awaiter.filter.as_ref()));
            } else {
                i += 1;
            }
        }
    }

    /// Serve expired awaiters best-effort from whatever is cached.
    fn expire_awaiters(&mut self) {
        let now = Instant::now();
        let mut i = 0;
        while i < self.awaiters.len() {
            if self.awaiters[i].deadline <= now {
                let awaiter = self.awaiters.remove(i);
                warn!(
                    "get-signals [{:.3}, {:.3}] deadline passed, serving from cache",
                    awaiter.range.start, awaiter.range.end
                );
                let _ = awaiter.respond.send(self.assemble(awaiter.range, awaiter.filter.as_ref()));
            } else {
                i += 1;
            }
        }
    }

    // ---- assembly ----

    /// Build the response for a recording-time range: zero-filled
    /// buffers per channel, cached samples placed, then each gap span
    /// shifts the tail forward and is zeroed.
    fn assemble(&self, range: TimeRange, filter: Option<&ChannelFilter>) -> Result<SignalData> {
        let cache = self.cache.as_ref().ok_or(EdfError::NotInitialised)?;
        let needed = self.needed_cache_range(range)?;
        let gaps = self.gaps.gaps_in_range(range.start, range.end);

        let mut signals = Vec::new();
        for (c, signal) in self.header.signals.iter().enumerate() {
            if signal.is_annotation(self.header.format) {
                continue;
            }
            if let Some(filter) = filter {
                if !filter.allows(c) {
                    continue;
                }
            }

            let sr = cache.sampling_rate(c);
            let total = (range.duration() * sr).round() as usize;
            let mut samples = vec![0.0; total];

            let data_len = ((needed.duration() * sr).round() as usize).min(total);
            cache.read(c, CacheTime(needed.start), &mut samples[..data_len]);

            for gap in &gaps {
                let at = ((gap.start - range.start) * sr).round() as usize;
                if at >= total {
                    break;
                }
                let shift = ((gap.duration * sr).round() as usize).min(total - at);
                if at + shift < total {
                    samples.copy_within(at..total - shift, at + shift);
                }
                samples[at..at + shift].fill(0.0);
            }

            signals.push(SignalSlice {
                channel: c,
                label: signal.label.clone(),
                sampling_rate: sr,
                samples,
            });
        }

        Ok(SignalData {
            range,
            signals,
            annotations: self.annotations_in(range),
            gaps,
        })
    }
}
