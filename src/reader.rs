use std::path::Path;

use log::debug;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::SignalSink;
use crate::engine::{
    CacheConfig, CacheEngine, CacheProgress, ChannelFilter, EngineRequest, SignalData,
};
use crate::error::{EdfError, Result};
use crate::header::{parse_header, peek_signal_count, HEADER_BLOCK_SIZE};
use crate::source::{ByteSource, FileSource, HttpSource, MemorySource};
use crate::time::TimeRange;
use crate::types::{Annotation, DataGap, RecordingHeader, Study};

/// Reader facade over one EDF/BDF recording.
///
/// Opening a source parses the header (two reads: the 256-byte main
/// block, then the signal blocks), runs the discontinuous-duration
/// probe if needed, and starts the engine task. All further operations
/// are request/response messages to that task.
///
/// # Examples
///
/// ```rust,no_run
/// use edfstream::{EdfReader, TimeRange};
///
/// # async fn example() -> edfstream::Result<()> {
/// let reader = EdfReader::open_file("recording.edf").await?;
/// println!("format: {:?}", reader.study().format);
/// println!("signals: {}", reader.header().signal_count());
///
/// reader.setup_cache().await?;
/// let data = reader.get_signals(TimeRange::new(0.0, 30.0), None).await?;
/// for slice in &data.signals {
///     println!("{}: {} samples", slice.label, slice.samples.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct EdfReader {
    header: RecordingHeader,
    study: Study,
    tx: mpsc::Sender<EngineRequest>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Handle to a running whole-recording sweep: a progress stream plus
/// the completion result.
pub struct CacheSweep {
    progress: mpsc::Receiver<CacheProgress>,
    done: oneshot::Receiver<Result<()>>,
}

impl CacheSweep {
    /// Next progress event, `None` once the sweep stops emitting.
    pub async fn recv_progress(&mut self) -> Option<CacheProgress> {
        self.progress.recv().await
    }

    /// Wait for the sweep to finish.
    pub async fn wait(self) -> Result<()> {
        drop(self.progress);
        self.done.await.map_err(|_| EdfError::EngineGone)?
    }
}

impl EdfReader {
    /// Open a recording from a local file.
    pub async fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = FileSource::open(path).await?;
        Self::open_source(Box::new(source), CacheConfig::default()).await
    }

    /// Open a recording from an HTTP URL supporting range requests.
    pub async fn open_url(url: impl Into<String>) -> Result<Self> {
        let source = HttpSource::open(url).await?;
        Self::open_source(Box::new(source), CacheConfig::default()).await
    }

    /// Open a recording the host already holds in memory.
    pub async fn open_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::open_source(Box::new(MemorySource::new(bytes)), CacheConfig::default()).await
    }

    /// Open a recording from any byte source with explicit settings.
    pub async fn open_source(source: Box<dyn ByteSource>, config: CacheConfig) -> Result<Self> {
        // 先读主头部块取得信号数，再读完整头部
        let main = source.read(0, HEADER_BLOCK_SIZE).await?;
        let signal_count = peek_signal_count(&main)?;
        let full = source
            .read(0, HEADER_BLOCK_SIZE * (signal_count + 1))
            .await?;
        let header = parse_header(&full)?;

        debug!(
            "opened {:?} recording: {} signals, {} records of {}s",
            header.format,
            header.signal_count(),
            header.data_record_count,
            header.data_record_duration
        );

        let cancel = CancellationToken::new();
        let mut engine = CacheEngine::new(source, header.clone(), config, cancel.clone());
        let study = engine.setup().await?;

        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(engine.run(rx));

        Ok(Self { header, study, tx, cancel, task: Some(task) })
    }

    pub fn header(&self) -> &RecordingHeader {
        &self.header
    }

    pub fn study(&self) -> &Study {
        &self.study
    }

    /// Total recording span in seconds, gaps included.
    pub fn recording_length(&self) -> f64 {
        self.study.recording_length
    }

    /// Seconds of recorded data, gaps excluded.
    pub fn data_length(&self) -> f64 {
        self.study.data_length
    }

    /// Allocate the per-channel sample buffers. Must run before any
    /// signal request; calling it twice is rejected.
    pub async fn setup_cache(&self) -> Result<()> {
        self.request(|respond| EngineRequest::SetupCache { sink: None, respond })
            .await
    }

    /// Like [`setup_cache`](Self::setup_cache), but mirrors every
    /// insert into the given sink.
    pub async fn setup_cache_with_sink(&self, sink: Box<dyn SignalSink>) -> Result<()> {
        self.request(|respond| EngineRequest::SetupCache { sink: Some(sink), respond })
            .await
    }

    /// Physical samples, annotations and gaps for a recording-time
    /// range. Suspends while a running load covers the range, bounded
    /// by the configured awaiter deadline.
    pub async fn get_signals(
        &self,
        range: TimeRange,
        filter: Option<ChannelFilter>,
    ) -> Result<SignalData> {
        self.request(|respond| EngineRequest::GetSignals { range, filter, respond })
            .await
    }

    /// Annotations whose onset falls in `range`, clipped to recording
    /// bounds.
    pub async fn get_annotations(&self, range: TimeRange) -> Result<Vec<Annotation>> {
        self.request(|respond| EngineRequest::GetAnnotations { range, respond })
            .await
    }

    /// Data gaps overlapping `range`, clipped to it.
    pub async fn get_data_gaps(&self, range: TimeRange) -> Result<Vec<DataGap>> {
        self.request(|respond| EngineRequest::GetDataGaps { range, respond })
            .await
    }

    /// Launch the progressive whole-recording sweep, optionally
    /// starting from a recording-time position (the head is filled
    /// after the tail wraps around).
    pub async fn cache_signals(&self, start_from: Option<f64>) -> Result<CacheSweep> {
        let (progress_tx, progress_rx) = mpsc::channel(64);
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::CacheFromSource {
                start_from,
                progress: progress_tx,
                respond: done_tx,
            })
            .await
            .map_err(|_| EdfError::EngineGone)?;

        Ok(CacheSweep { progress: progress_rx, done: done_rx })
    }

    pub async fn update_settings(&self, config: CacheConfig) -> Result<()> {
        self.request(|respond| EngineRequest::UpdateSettings { config, respond })
            .await
    }

    /// Cancel all load processes and drop the sample buffers. The
    /// reader stays usable; call [`setup_cache`](Self::setup_cache)
    /// again to reallocate.
    pub async fn release(&self) -> Result<()> {
        self.request(|respond| EngineRequest::ReleaseCache { respond })
            .await
    }

    /// Shut the engine down and wait for its task to exit.
    pub async fn close(mut self) -> Result<()> {
        let _ = self.tx.send(EngineRequest::Shutdown).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        Ok(())
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> EngineRequest,
    ) -> Result<T> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(build(respond))
            .await
            .map_err(|_| EdfError::EngineGone)?;
        rx.await.map_err(|_| EdfError::EngineGone)?
    }
}

impl Drop for EdfReader {
    fn drop(&mut self) {
        // 引擎在下一个让出点自行退出并释放缓冲
        self.cancel.cancel();
    }
}
