mod common;

use std::sync::{Arc, Mutex};

use common::{bdf_signal, eeg_signal, init_test_logging, tal_record_start, to_param, ChannelData, EdfImage};
use edfstream::{
    CacheConfig, ChannelFilter, EdfError, EdfReader, MemorySource, SignalSink, SinkChannel,
    TimeRange,
};

/// S1标准文件：2通道256Hz，10条1秒记录，每条记录恒定值 r*1000
fn continuous_image() -> Vec<u8> {
    EdfImage::edf()
        .signal(eeg_signal("EEG Fp1", 256))
        .signal(eeg_signal("EEG Fp2", 256))
        .constant_records(10, |r| r as i32 * 1000)
        .build()
}

async fn open_with_chunked_config(bytes: Vec<u8>, config: CacheConfig) -> EdfReader {
    EdfReader::open_source(Box::new(MemorySource::new(bytes)), config)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_continuous_read_s1() {
    let reader = EdfReader::open_bytes(continuous_image()).await.unwrap();
    reader.setup_cache().await.unwrap();

    let data = reader
        .get_signals(TimeRange::new(2.0, 4.0), None)
        .await
        .unwrap();

    assert_eq!(data.range, TimeRange::new(2.0, 4.0));
    assert_eq!(data.signals.len(), 2);
    assert!(data.annotations.is_empty());
    assert!(data.gaps.is_empty());

    let param = to_param(&eeg_signal("EEG Fp1", 256));
    for slice in &data.signals {
        assert_eq!(slice.samples.len(), 512);
        assert_eq!(slice.sampling_rate, 256.0);
        // 前256个样本来自记录2，后256个来自记录3
        assert!((slice.samples[0] - param.to_physical(2000)).abs() < 1e-9);
        assert!((slice.samples[255] - param.to_physical(2000)).abs() < 1e-9);
        assert!((slice.samples[256] - param.to_physical(3000)).abs() < 1e-9);
        assert!((slice.samples[511] - param.to_physical(3000)).abs() < 1e-9);
    }
}

#[tokio::test]
async fn test_concurrent_request_during_sweep_s5() {
    let config = CacheConfig { data_chunk_size: 1, ..CacheConfig::default() };
    let reader = open_with_chunked_config(continuous_image(), config).await;
    reader.setup_cache().await.unwrap();

    // 启动sweep后立刻请求最后2秒：请求应挂起到载入覆盖为止
    let sweep = reader.cache_signals(None).await.unwrap();
    let data = reader
        .get_signals(TimeRange::new(8.0, 10.0), None)
        .await
        .unwrap();

    let param = to_param(&eeg_signal("EEG Fp1", 256));
    assert_eq!(data.signals[0].samples.len(), 512);
    assert!((data.signals[0].samples[0] - param.to_physical(8000)).abs() < 1e-9);
    assert!((data.signals[0].samples[511] - param.to_physical(9000)).abs() < 1e-9);

    // sweep照常完成
    sweep.wait().await.unwrap();
}

#[tokio::test]
async fn test_sweep_progress_is_monotonic() {
    let config = CacheConfig { data_chunk_size: 1, ..CacheConfig::default() };
    let reader = open_with_chunked_config(continuous_image(), config).await;
    reader.setup_cache().await.unwrap();

    let mut sweep = reader.cache_signals(None).await.unwrap();
    let mut last_end = 0.0;
    let mut events = 0;
    while let Some(progress) = sweep.recv_progress().await {
        assert!(
            progress.range.end >= last_end,
            "progress went backwards: {} < {}",
            progress.range.end,
            last_end
        );
        last_end = progress.range.end;
        events += 1;
    }

    assert_eq!(events, 10, "one progress event per record chunk");
    assert_eq!(last_end, 10.0);
    sweep.wait().await.unwrap();
}

#[tokio::test]
async fn test_sweep_with_start_from_wraps_around() {
    let config = CacheConfig { data_chunk_size: 1, ..CacheConfig::default() };
    let reader = open_with_chunked_config(continuous_image(), config).await;
    reader.setup_cache().await.unwrap();

    let sweep = reader.cache_signals(Some(6.0)).await.unwrap();
    sweep.wait().await.unwrap();

    // 回绕后整个录制都已缓存
    let data = reader
        .get_signals(TimeRange::new(0.0, 10.0), None)
        .await
        .unwrap();
    let param = to_param(&eeg_signal("EEG Fp1", 256));
    assert!((data.signals[0].samples[0] - param.to_physical(0)).abs() < 1e-9);
    assert!((data.signals[0].samples[2559] - param.to_physical(9000)).abs() < 1e-9);
}

#[tokio::test]
async fn test_bdf_sign_extension_s6() {
    let bytes = EdfImage::bdf()
        .signal(bdf_signal("EEG Oz", 4))
        .record(vec![ChannelData::Digital(vec![-1, 8388607, -8388608, 0])])
        .build();

    let reader = EdfReader::open_bytes(bytes).await.unwrap();
    reader.setup_cache().await.unwrap();

    let data = reader
        .get_signals(TimeRange::new(0.0, 1.0), None)
        .await
        .unwrap();

    let param = to_param(&bdf_signal("EEG Oz", 4));
    let samples = &data.signals[0].samples;
    // 0xFFFFFF 必须符号扩展成 -1，而不是 16777215
    assert!((samples[0] - param.to_physical(-1)).abs() < 1e-6);
    assert!((samples[1] - param.to_physical(8388607)).abs() < 1e-6);
    assert!((samples[2] - param.to_physical(-8388608)).abs() < 1e-6);
    assert!((samples[3] - param.to_physical(0)).abs() < 1e-6);
}

#[tokio::test]
async fn test_channel_filter() {
    let reader = EdfReader::open_bytes(continuous_image()).await.unwrap();
    reader.setup_cache().await.unwrap();

    let include = ChannelFilter { include: Some(vec![1]), exclude: None };
    let data = reader
        .get_signals(TimeRange::new(0.0, 1.0), Some(include))
        .await
        .unwrap();
    assert_eq!(data.signals.len(), 1);
    assert_eq!(data.signals[0].channel, 1);
    assert_eq!(data.signals[0].label, "EEG Fp2");

    let exclude = ChannelFilter { include: None, exclude: Some(vec![1]) };
    let data = reader
        .get_signals(TimeRange::new(0.0, 1.0), Some(exclude))
        .await
        .unwrap();
    assert_eq!(data.signals.len(), 1);
    assert_eq!(data.signals[0].channel, 0);
}

#[tokio::test]
async fn test_get_signals_before_setup_is_rejected() {
    let reader = EdfReader::open_bytes(continuous_image()).await.unwrap();
    let err = reader
        .get_signals(TimeRange::new(0.0, 1.0), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EdfError::NotInitialised));
}

#[tokio::test]
async fn test_double_setup_is_rejected() {
    let reader = EdfReader::open_bytes(continuous_image()).await.unwrap();
    reader.setup_cache().await.unwrap();
    let err = reader.setup_cache().await.unwrap_err();
    assert!(matches!(err, EdfError::AlreadyInitialised));
}

#[tokio::test]
async fn test_out_of_range_request_is_rejected() {
    let reader = EdfReader::open_bytes(continuous_image()).await.unwrap();
    reader.setup_cache().await.unwrap();

    let err = reader
        .get_signals(TimeRange::new(-1.0, 2.0), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EdfError::OutOfRange { .. }));

    let err = reader
        .get_signals(TimeRange::new(0.0, 100.0), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EdfError::OutOfRange { .. }));
}

#[tokio::test]
async fn test_release_then_reinitialise() {
    let reader = EdfReader::open_bytes(continuous_image()).await.unwrap();
    reader.setup_cache().await.unwrap();
    reader
        .get_signals(TimeRange::new(0.0, 2.0), None)
        .await
        .unwrap();

    reader.release().await.unwrap();
    let err = reader
        .get_signals(TimeRange::new(0.0, 1.0), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EdfError::NotInitialised));

    // 释放后可以重新建缓存继续用
    reader.setup_cache().await.unwrap();
    let data = reader
        .get_signals(TimeRange::new(0.0, 1.0), None)
        .await
        .unwrap();
    assert_eq!(data.signals[0].samples.len(), 256);
}

#[tokio::test]
async fn test_sweep_rejected_when_over_cache_budget() {
    let config = CacheConfig { max_load_cache_size: 16, ..CacheConfig::default() };
    let reader = open_with_chunked_config(continuous_image(), config).await;
    reader.setup_cache().await.unwrap();

    let sweep = reader.cache_signals(None).await.unwrap();
    let err = sweep.wait().await.unwrap_err();
    assert!(matches!(err, EdfError::CacheTooSmall { .. }));
}

#[tokio::test]
async fn test_overlap_warning_surfaces_in_progress() {
    init_test_logging();

    // 记录1比预期提前0.5秒开始，记录2保持同样的偏移：
    // 阻尼让同一偏差只报一次
    let bytes = EdfImage::edf_plus(false)
        .signal(eeg_signal("EEG Fp1", 8))
        .annotation_channel(32)
        .record(vec![
            ChannelData::Digital(vec![0; 8]),
            ChannelData::Tal(tal_record_start(0.0)),
        ])
        .record(vec![
            ChannelData::Digital(vec![0; 8]),
            ChannelData::Tal(tal_record_start(0.5)),
        ])
        .record(vec![
            ChannelData::Digital(vec![0; 8]),
            ChannelData::Tal(tal_record_start(1.5)),
        ])
        .build();

    let config = CacheConfig { data_chunk_size: 1, ..CacheConfig::default() };
    let reader = open_with_chunked_config(bytes, config).await;
    reader.setup_cache().await.unwrap();

    let mut sweep = reader.cache_signals(None).await.unwrap();
    let mut warnings = Vec::new();
    while let Some(progress) = sweep.recv_progress().await {
        warnings.extend(progress.warnings);
    }
    sweep.wait().await.unwrap();

    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("overlaps"), "got: {}", warnings[0]);
}

#[tokio::test]
async fn test_awaiter_deadline_serves_best_effort() {
    init_test_logging();

    // deadline远小于sweep完成时间
    let config = CacheConfig {
        data_chunk_size: 1,
        await_signals_ms: 20,
        ..CacheConfig::default()
    };
    let reader = open_with_chunked_config(continuous_image(), config).await;
    reader.setup_cache().await.unwrap();

    let sweep = reader.cache_signals(None).await.unwrap();
    let data = reader
        .get_signals(TimeRange::new(9.0, 10.0), None)
        .await
        .unwrap();

    // 超时后尽力而为：缓冲长度正确，未载入部分为零
    assert_eq!(data.signals[0].samples.len(), 256);

    sweep.wait().await.unwrap();
}

#[tokio::test]
async fn test_update_settings() {
    let reader = EdfReader::open_bytes(continuous_image()).await.unwrap();
    let config = CacheConfig { await_signals_ms: 100, ..CacheConfig::default() };
    reader.update_settings(config).await.unwrap();
}

#[tokio::test]
async fn test_shutdown_is_clean() {
    let reader = EdfReader::open_bytes(continuous_image()).await.unwrap();
    reader.setup_cache().await.unwrap();
    reader.close().await.unwrap();
}

/// Sink backed by shared state so the test can observe engine writes.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<SharedSinkState>>);

#[derive(Default)]
struct SharedSinkState {
    rates: Vec<f64>,
    samples: Vec<Vec<f64>>,
    updated: Vec<Option<TimeRange>>,
}

impl SignalSink for SharedSink {
    fn init(&mut self, channels: &[SinkChannel]) -> edfstream::Result<()> {
        let mut state = self.0.lock().unwrap();
        state.rates = channels.iter().map(|c| c.sampling_rate).collect();
        state.samples = channels
            .iter()
            .map(|c| vec![0.0; c.capacity_samples])
            .collect();
        state.updated = vec![None; channels.len()];
        Ok(())
    }

    fn write_range(
        &mut self,
        channel: usize,
        start: edfstream::CacheTime,
        samples: &[f64],
    ) -> edfstream::Result<()> {
        let mut state = self.0.lock().unwrap();
        let at = (start.seconds() * state.rates[channel]).round() as usize;
        let end = (at + samples.len()).min(state.samples[channel].len());
        state.samples[channel][at..end].copy_from_slice(&samples[..end - at]);
        Ok(())
    }

    fn read_range(&self, channel: usize, range: TimeRange) -> edfstream::Result<Vec<f64>> {
        let state = self.0.lock().unwrap();
        let lo = (range.start * state.rates[channel]).round() as usize;
        let hi = ((range.end * state.rates[channel]).round() as usize)
            .min(state.samples[channel].len());
        Ok(state.samples[channel][lo..hi].to_vec())
    }

    fn set_updated_range(&mut self, channel: usize, range: TimeRange) -> edfstream::Result<()> {
        self.0.lock().unwrap().updated[channel] = Some(range);
        Ok(())
    }
}

#[tokio::test]
async fn test_sink_mirrors_inserts() {
    let sink = SharedSink::default();
    let state = sink.0.clone();

    let reader = EdfReader::open_bytes(continuous_image()).await.unwrap();
    reader.setup_cache_with_sink(Box::new(sink)).await.unwrap();

    let sweep = reader.cache_signals(None).await.unwrap();
    sweep.wait().await.unwrap();

    let state = state.lock().unwrap();
    assert_eq!(state.rates, vec![256.0, 256.0]);
    assert_eq!(state.updated[0], Some(TimeRange::new(0.0, 10.0)));
    assert_eq!(state.updated[1], Some(TimeRange::new(0.0, 10.0)));

    let param = to_param(&eeg_signal("EEG Fp1", 256));
    assert!((state.samples[0][0] - param.to_physical(0)).abs() < 1e-9);
    assert!((state.samples[0][2559] - param.to_physical(9000)).abs() < 1e-9);
}
