//! Shared helpers that synthesise EDF/BDF byte images in memory.
#![allow(dead_code)]

use edfstream::SignalParam;

/// 让引擎日志进测试输出：`RUST_LOG=debug cargo test -- --nocapture`
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Per-channel payload of one data record.
#[derive(Clone)]
pub enum ChannelData {
    /// Digital sample values, one per `samples_per_record`
    Digital(Vec<i32>),
    /// Raw TAL bytes, padded with NUL to the channel's byte size
    Tal(Vec<u8>),
}

pub struct SignalDef {
    pub label: String,
    pub transducer: String,
    pub physical_dimension: String,
    pub physical_min: f64,
    pub physical_max: f64,
    pub digital_min: i32,
    pub digital_max: i32,
    pub prefilter: String,
    pub samples_per_record: usize,
}

/// 标准测试EEG信号，±200µV
pub fn eeg_signal(label: &str, samples_per_record: usize) -> SignalDef {
    SignalDef {
        label: label.to_string(),
        transducer: "AgAgCl electrodes".to_string(),
        physical_dimension: "uV".to_string(),
        physical_min: -200.0,
        physical_max: 200.0,
        digital_min: -32768,
        digital_max: 32767,
        prefilter: "HP:0.1Hz LP:70Hz".to_string(),
        samples_per_record,
    }
}

/// BDF测试信号，24位范围
pub fn bdf_signal(label: &str, samples_per_record: usize) -> SignalDef {
    SignalDef {
        label: label.to_string(),
        transducer: String::new(),
        physical_dimension: "uV".to_string(),
        physical_min: -262144.0,
        physical_max: 262144.0,
        digital_min: -8388608,
        digital_max: 8388607,
        prefilter: String::new(),
        samples_per_record,
    }
}

/// TAL注释通道；`bytes_per_record`必须是偶数（EDF每样本2字节）
pub fn annotation_signal(format_label: &str, bytes_per_record: usize, bytes_per_sample: usize) -> SignalDef {
    SignalDef {
        label: format_label.to_string(),
        transducer: String::new(),
        physical_dimension: String::new(),
        physical_min: -1.0,
        physical_max: 1.0,
        digital_min: -32768,
        digital_max: 32767,
        prefilter: String::new(),
        samples_per_record: bytes_per_record / bytes_per_sample,
    }
}

/// Conversion helper mirroring the library's own parameters, for
/// computing expected physical values in assertions.
pub fn to_param(def: &SignalDef) -> SignalParam {
    SignalParam {
        label: def.label.clone(),
        transducer: def.transducer.clone(),
        physical_dimension: def.physical_dimension.clone(),
        prefilter: def.prefilter.clone(),
        reserved: String::new(),
        physical_min: def.physical_min,
        physical_max: def.physical_max,
        digital_min: def.digital_min,
        digital_max: def.digital_max,
        samples_per_record: def.samples_per_record,
    }
}

pub struct EdfImage {
    bdf: bool,
    reserved: String,
    record_duration: f64,
    signals: Vec<SignalDef>,
    records: Vec<Vec<ChannelData>>,
}

impl EdfImage {
    pub fn edf() -> Self {
        Self::new(false, "")
    }

    pub fn edf_plus(discontinuous: bool) -> Self {
        Self::new(false, if discontinuous { "EDF+D" } else { "EDF+C" })
    }

    pub fn bdf() -> Self {
        Self::new(true, "")
    }

    pub fn bdf_plus(discontinuous: bool) -> Self {
        Self::new(true, if discontinuous { "BDF+D" } else { "BDF+C" })
    }

    fn new(bdf: bool, reserved: &str) -> Self {
        Self {
            bdf,
            reserved: reserved.to_string(),
            record_duration: 1.0,
            signals: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn record_duration(mut self, seconds: f64) -> Self {
        self.record_duration = seconds;
        self
    }

    pub fn signal(mut self, def: SignalDef) -> Self {
        self.signals.push(def);
        self
    }

    pub fn annotation_channel(mut self, bytes_per_record: usize) -> Self {
        let label = if self.bdf { "BDF Annotations" } else { "EDF Annotations" };
        let bps = self.bytes_per_sample();
        self.signals.push(annotation_signal(label, bytes_per_record, bps));
        self
    }

    pub fn record(mut self, channels: Vec<ChannelData>) -> Self {
        assert_eq!(channels.len(), self.signals.len(), "record/signal count mismatch");
        self.records.push(channels);
        self
    }

    /// Fill `count` records of constant digital values per data
    /// channel, with a plain record-start TAL on annotation channels.
    pub fn constant_records(mut self, count: usize, value_of_record: impl Fn(usize) -> i32) -> Self {
        for r in 0..count {
            let mut channels = Vec::new();
            for signal in &self.signals {
                if signal.label.ends_with("Annotations") {
                    channels.push(ChannelData::Tal(tal_record_start(
                        r as f64 * self.record_duration,
                    )));
                } else {
                    channels.push(ChannelData::Digital(vec![
                        value_of_record(r);
                        signal.samples_per_record
                    ]));
                }
            }
            self.records.push(channels);
        }
        self
    }

    fn bytes_per_sample(&self) -> usize {
        if self.bdf { 3 } else { 2 }
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let n = self.signals.len();

        // 主头部块
        if self.bdf {
            out.push(0xFF);
            push_field(&mut out, "BIOSEMI", 7);
        } else {
            push_field(&mut out, "0", 8);
        }
        push_field(&mut out, "X X X X", 80);
        push_field(&mut out, "Startdate 01-JAN-2024 X X X", 80);
        push_field(&mut out, "01.01.24", 8);
        push_field(&mut out, "10.00.00", 8);
        push_field(&mut out, &format!("{}", 256 * (n + 1)), 8);
        push_field(&mut out, &self.reserved, 44);
        push_field(&mut out, &format!("{}", self.records.len()), 8);
        push_field(&mut out, &fmt_seconds(self.record_duration), 8);
        push_field(&mut out, &format!("{}", n), 4);

        // 信号块：字段优先排列
        for s in &self.signals {
            push_field(&mut out, &s.label, 16);
        }
        for s in &self.signals {
            push_field(&mut out, &s.transducer, 80);
        }
        for s in &self.signals {
            push_field(&mut out, &s.physical_dimension, 8);
        }
        for s in &self.signals {
            push_field(&mut out, &fmt_seconds(s.physical_min), 8);
        }
        for s in &self.signals {
            push_field(&mut out, &fmt_seconds(s.physical_max), 8);
        }
        for s in &self.signals {
            push_field(&mut out, &format!("{}", s.digital_min), 8);
        }
        for s in &self.signals {
            push_field(&mut out, &format!("{}", s.digital_max), 8);
        }
        for s in &self.signals {
            push_field(&mut out, &s.prefilter, 80);
        }
        for s in &self.signals {
            push_field(&mut out, &format!("{}", s.samples_per_record), 8);
        }
        for _ in &self.signals {
            push_field(&mut out, "", 32);
        }

        assert_eq!(out.len(), 256 * (n + 1));

        // 数据记录
        let bps = self.bytes_per_sample();
        for record in &self.records {
            for (c, data) in record.iter().enumerate() {
                let byte_size = self.signals[c].samples_per_record * bps;
                match data {
                    ChannelData::Digital(values) => {
                        assert_eq!(values.len(), self.signals[c].samples_per_record);
                        for &v in values {
                            let bytes = v.to_le_bytes();
                            out.extend_from_slice(&bytes[..bps]);
                        }
                    }
                    ChannelData::Tal(bytes) => {
                        assert!(bytes.len() <= byte_size, "TAL larger than channel");
                        out.extend_from_slice(bytes);
                        out.resize(out.len() + byte_size - bytes.len(), 0);
                    }
                }
            }
        }

        out
    }
}

/// 固定宽度左对齐ASCII字段
fn push_field(out: &mut Vec<u8>, value: &str, width: usize) {
    let bytes = value.as_bytes();
    assert!(bytes.len() <= width, "field {:?} wider than {}", value, width);
    out.extend_from_slice(bytes);
    out.resize(out.len() + width - bytes.len(), b' ');
}

/// Format a float the way EDF headers carry them: integers lose the
/// fraction ("1", not "1.0").
pub fn fmt_seconds(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Record-start TAL: `+T 0x14 0x14 0x00`.
pub fn tal_record_start(t: f64) -> Vec<u8> {
    let mut out = format!("+{}", fmt_seconds(t)).into_bytes();
    out.extend_from_slice(&[0x14, 0x14, 0x00]);
    out
}

/// Record-start TAL followed by one annotation TAL.
pub fn tal_with_annotation(record_start: f64, onset: f64, duration: f64, label: &str) -> Vec<u8> {
    let mut out = tal_record_start(record_start);
    out.extend_from_slice(format!("+{}", fmt_seconds(onset)).as_bytes());
    out.push(0x15);
    out.extend_from_slice(fmt_seconds(duration).as_bytes());
    out.push(0x14);
    out.extend_from_slice(label.as_bytes());
    out.extend_from_slice(&[0x14, 0x00]);
    out
}
