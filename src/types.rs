use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Supported on-disk data formats.
///
/// EDF stores 16-bit samples; BDF (the BioSemi variant) stores 24-bit
/// samples. The `+` variants add TAL annotation channels and, for
/// `EDF+D`/`BDF+D`, discontinuous data records.
///
/// # Examples
///
/// ```rust
/// use edfstream::FileFormat;
///
/// assert_eq!(FileFormat::Edf.bytes_per_sample(), 2);
/// assert_eq!(FileFormat::BdfPlus.bytes_per_sample(), 3);
/// assert!(FileFormat::EdfPlus.is_plus());
/// assert!(!FileFormat::Bdf.is_plus());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileFormat {
    #[serde(rename = "edf")]
    Edf,
    #[serde(rename = "edf+")]
    EdfPlus,
    #[serde(rename = "bdf")]
    Bdf,
    #[serde(rename = "bdf+")]
    BdfPlus,
}

impl FileFormat {
    pub fn is_plus(&self) -> bool {
        matches!(self, FileFormat::EdfPlus | FileFormat::BdfPlus)
    }

    /// Bytes per stored sample: 2 for EDF, 3 for BDF.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            FileFormat::Edf | FileFormat::EdfPlus => 2,
            FileFormat::Bdf | FileFormat::BdfPlus => 3,
        }
    }

    /// Label that marks a TAL annotation channel in this format.
    pub fn annotation_label(&self) -> &'static str {
        match self {
            FileFormat::Edf | FileFormat::EdfPlus => "EDF Annotations",
            FileFormat::Bdf | FileFormat::BdfPlus => "BDF Annotations",
        }
    }
}

/// Signal parameters and metadata for one channel.
///
/// Contains the physical and digital value ranges, labels, and the
/// per-record sample count from which the sampling rate derives.
#[derive(Debug, Clone)]
pub struct SignalParam {
    /// Signal label/name (e.g., "EEG Fp1", "ECG Lead II")
    pub label: String,

    /// Transducer type (e.g., "AgAgCl cup electrodes")
    pub transducer: String,

    /// Physical dimension/unit (e.g., "uV", "mV", "BPM")
    pub physical_dimension: String,

    /// Prefilter information (e.g., "HP:0.1Hz LP:70Hz")
    pub prefilter: String,

    /// Reserved field, kept verbatim
    pub reserved: String,

    /// Minimum physical value (e.g., -200.0 µV)
    pub physical_min: f64,

    /// Maximum physical value (e.g., +200.0 µV)
    pub physical_max: f64,

    /// Minimum digital value (typically -32768 for EDF, -8388608 for BDF)
    pub digital_min: i32,

    /// Maximum digital value (typically 32767 for EDF, 8388607 for BDF)
    pub digital_max: i32,

    /// Number of samples this channel contributes to each data record
    pub samples_per_record: usize,
}

impl SignalParam {
    /// Physical units represented by one digital step.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use edfstream::SignalParam;
    ///
    /// let signal = SignalParam {
    ///     label: "EEG Fp1".to_string(),
    ///     transducer: String::new(),
    ///     physical_dimension: "uV".to_string(),
    ///     prefilter: String::new(),
    ///     reserved: String::new(),
    ///     physical_min: -100.0,
    ///     physical_max: 100.0,
    ///     digital_min: -32768,
    ///     digital_max: 32767,
    ///     samples_per_record: 256,
    /// };
    ///
    /// // ±100µV over ±32767 digital: ≈ 0.00305 µV per bit
    /// assert!((signal.units_per_bit() - 0.00305).abs() < 0.0001);
    /// ```
    pub fn units_per_bit(&self) -> f64 {
        (self.physical_max - self.physical_min) /
        (self.digital_max - self.digital_min) as f64
    }

    /// Offset applied to digital values before scaling.
    pub fn digital_offset(&self) -> f64 {
        self.physical_max / self.units_per_bit() - self.digital_max as f64
    }

    /// Convert a digital value to its physical measurement value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use edfstream::SignalParam;
    ///
    /// let signal = SignalParam {
    ///     label: "ECG Lead II".to_string(),
    ///     transducer: String::new(),
    ///     physical_dimension: "mV".to_string(),
    ///     prefilter: String::new(),
    ///     reserved: String::new(),
    ///     physical_min: -5.0,
    ///     physical_max: 5.0,
    ///     digital_min: -32768,
    ///     digital_max: 32767,
    ///     samples_per_record: 256,
    /// };
    ///
    /// assert!((signal.to_physical(32767) - 5.0).abs() < 0.001);
    /// assert!((signal.to_physical(-32768) - (-5.0)).abs() < 0.001);
    /// assert!(signal.to_physical(0).abs() < 0.001);
    /// ```
    pub fn to_physical(&self, digital_value: i32) -> f64 {
        self.units_per_bit() * (digital_value as f64 + self.digital_offset())
    }

    /// Samples per second, given the data record duration in seconds.
    pub fn sampling_rate(&self, record_duration: f64) -> f64 {
        self.samples_per_record as f64 / record_duration
    }

    /// Whether this channel carries TAL annotations instead of samples.
    ///
    /// Conformant writers emit the exact label, but files in the wild
    /// vary in case, so the match is case-insensitive.
    pub fn is_annotation(&self, format: FileFormat) -> bool {
        format.is_plus() && self.label.eq_ignore_ascii_case(format.annotation_label())
    }
}

/// Parsed recording header, immutable after parse.
#[derive(Debug, Clone)]
pub struct RecordingHeader {
    /// On-disk data format
    pub format: FileFormat,

    /// True for EDF+D / BDF+D: data records may not abut in time
    pub discontinuous: bool,

    /// Raw local patient identification field (80 bytes, trimmed)
    pub patient_id: String,

    /// Raw local recording identification field (80 bytes, trimmed)
    pub recording_id: String,

    /// Recording start, if the date/time fields parsed
    pub start_datetime: Option<NaiveDateTime>,

    /// Byte offset of the first data record
    pub header_record_bytes: usize,

    /// Number of data records in the file (fixed and finite)
    pub data_record_count: usize,

    /// Duration of one data record in seconds, always > 0
    pub data_record_duration: f64,

    /// Size of one data record in bytes, over all channels
    pub record_byte_size: usize,

    /// Reserved header field, kept verbatim
    pub reserved: String,

    /// All channels, annotation channels included
    pub signals: Vec<SignalParam>,
}

impl RecordingHeader {
    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    /// Seconds of recorded data, gaps excluded.
    pub fn data_length(&self) -> f64 {
        self.data_record_count as f64 * self.data_record_duration
    }

    /// Byte offset of data record `index`.
    pub fn record_offset(&self, index: usize) -> usize {
        self.header_record_bytes + index * self.record_byte_size
    }

    /// Sampling rate of channel `index` in Hz; annotation channels are
    /// pinned to 0.
    pub fn sampling_rate(&self, index: usize) -> f64 {
        let signal = &self.signals[index];
        if signal.is_annotation(self.format) {
            0.0
        } else {
            signal.sampling_rate(self.data_record_duration)
        }
    }

    /// Structured view of the EDF+ patient identification field.
    pub fn patient_info(&self) -> PatientInfo {
        let mut parts = self.patient_id.split_whitespace();
        PatientInfo {
            code: parts.next().unwrap_or("").to_string(),
            sex: parts.next().unwrap_or("").to_string(),
            birthdate: parts.next().unwrap_or("").to_string(),
            name: parts.next().unwrap_or("").to_string(),
            additional: parts.collect::<Vec<_>>().join(" "),
        }
    }

    /// Structured view of the EDF+ recording identification field.
    pub fn recording_info(&self) -> RecordingInfo {
        // 格式: "Startdate dd-MMM-yyyy admincode technician equipment ..."
        let mut parts = self.recording_id.split_whitespace();
        let _marker = parts.next();
        RecordingInfo {
            start_date: parts.next().unwrap_or("").to_string(),
            admin_code: parts.next().unwrap_or("").to_string(),
            technician: parts.next().unwrap_or("").to_string(),
            equipment: parts.next().unwrap_or("").to_string(),
            additional: parts.collect::<Vec<_>>().join(" "),
        }
    }
}

/// EDF+ structured patient subfields ("patientcode sex birthdate name ...").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientInfo {
    pub code: String,
    pub sex: String,
    pub birthdate: String,
    pub name: String,
    pub additional: String,
}

/// EDF+ structured recording subfields ("Startdate date admincode ...").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingInfo {
    pub start_date: String,
    pub admin_code: String,
    pub technician: String,
    pub equipment: String,
    pub additional: String,
}

/// Annotation or event marker.
///
/// # Examples
///
/// ```rust
/// use edfstream::Annotation;
///
/// let seizure = Annotation::event(150.0, 30.0, "Seizure detected");
/// assert_eq!(seizure.start, 150.0);
/// assert_eq!(seizure.duration, 30.0);
/// assert_eq!(seizure.class, "event");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Onset in seconds of recording time
    pub start: f64,

    /// Duration in seconds, 0 for instantaneous events
    pub duration: f64,

    /// UTF-8 description of the event
    pub label: String,

    /// Channels the event applies to, if attributed
    pub channels: Option<Vec<usize>>,

    /// Annotation class, `"event"` unless the host assigns another
    pub class: String,
}

impl Annotation {
    pub fn event(start: f64, duration: f64, label: impl Into<String>) -> Self {
        Self {
            start,
            duration,
            label: label.into(),
            channels: None,
            class: "event".to_string(),
        }
    }
}

/// A data gap as exposed to the host, in recording time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataGap {
    /// Seconds from recording start to where the interruption begins
    pub start: f64,

    /// Length of the interruption in seconds
    pub duration: f64,
}

/// Summary of an opened recording, returned by study setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Study {
    pub format: FileFormat,

    /// Seconds of recorded data (gaps excluded)
    pub data_length: f64,

    /// Total recording span (gaps included)
    pub recording_length: f64,

    /// Channel labels in file order, annotation channels included
    pub channel_labels: Vec<String>,
}
