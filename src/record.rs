//! Decoder for contiguous spans of data records.
//!
//! A span is `n_records * record_byte_size` bytes starting at a known
//! record index. Signal channels become physical sample vectors,
//! annotation channels route through the TAL parser and may surface
//! data gaps on discontinuous files.

use byteorder::{ByteOrder, LittleEndian};
use log::warn;

use crate::error::{EdfError, Result};
use crate::time::nearly_equal;
use crate::types::{Annotation, RecordingHeader};
use crate::tal::parse_tal_record;

/// A gap discovered while decoding, in cache time.
///
/// `data_time` is where the contiguous data ends (the start of the
/// record that arrived late, measured on the gap-free clock);
/// `duration` is how long the recording was interrupted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapEntry {
    pub data_time: f64,
    pub duration: f64,
}

/// Result of decoding one span of records.
#[derive(Debug)]
pub struct DecodedSpan {
    /// Physical samples per channel, in file channel order. Annotation
    /// channels contribute an empty vector.
    pub samples: Vec<Vec<f64>>,

    /// Annotations found in the span, in TAL order
    pub annotations: Vec<Annotation>,

    /// Gaps newly observed in the span
    pub gaps: Vec<GapEntry>,

    /// Sum of the new gap durations, for the caller's running total
    pub gap_time: f64,

    /// Recoverable [`EdfError::CorruptedRecord`] warnings for records
    /// whose start overlaps the previous record. Damped: a run of
    /// records sharing the same deviation warns once.
    pub warnings: Vec<EdfError>,
}

/// Span decoder. One instance lives per sweep so the overlap warning
/// is damped across chunks.
pub struct RecordDecoder<'a> {
    header: &'a RecordingHeader,

    /// Byte offset of each channel inside a record
    channel_offsets: Vec<usize>,

    /// First annotation channel, the one carrying record-start TALs
    timekeeping_channel: Option<usize>,

    /// Last observed record-start deviation, damps repeated warnings
    start_correction: f64,
}

impl<'a> RecordDecoder<'a> {
    pub fn new(header: &'a RecordingHeader) -> Self {
        let bytes_per_sample = header.format.bytes_per_sample();
        let mut channel_offsets = Vec::with_capacity(header.signal_count());
        let mut offset = 0;
        for signal in &header.signals {
            channel_offsets.push(offset);
            offset += signal.samples_per_record * bytes_per_sample;
        }

        let timekeeping_channel = header
            .signals
            .iter()
            .position(|s| s.is_annotation(header.format));

        Self {
            header,
            channel_offsets,
            timekeeping_channel,
            start_correction: 0.0,
        }
    }

    /// Carry the overlap-warning damping state across chunk decoders
    /// within one sweep.
    pub fn set_start_correction(&mut self, correction: f64) {
        self.start_correction = correction;
    }

    pub fn start_correction(&self) -> f64 {
        self.start_correction
    }

    /// Decode `n_records` records starting at absolute record index
    /// `first_record`. `prior_gap` is the total gap time preceding the
    /// span, used to compute expected record-start timestamps.
    pub fn decode_span(
        &mut self,
        buf: &[u8],
        first_record: usize,
        n_records: usize,
        prior_gap: f64,
    ) -> Result<DecodedSpan> {
        let header = self.header;
        if !(header.data_record_duration > 0.0) {
            return Err(EdfError::MalformedHeader(
                "data record duration must be > 0".to_string(),
            ));
        }

        let expected_len = n_records * header.record_byte_size;
        if buf.len() != expected_len {
            return Err(EdfError::ShortRead { requested: expected_len, got: buf.len() });
        }

        let bytes_per_sample = header.format.bytes_per_sample();
        let mut samples: Vec<Vec<f64>> = header
            .signals
            .iter()
            .map(|s| {
                if s.is_annotation(header.format) {
                    Vec::new()
                } else {
                    Vec::with_capacity(s.samples_per_record * n_records)
                }
            })
            .collect();

        let mut annotations = Vec::new();
        let mut gaps = Vec::new();
        let mut gap_time = 0.0;
        let mut warnings = Vec::new();

        for r in 0..n_records {
            let record_index = first_record + r;
            let record = &buf[r * header.record_byte_size..(r + 1) * header.record_byte_size];
            let expected = record_index as f64 * header.data_record_duration
                + prior_gap
                + gap_time;

            for (c, signal) in header.signals.iter().enumerate() {
                let start = self.channel_offsets[c];
                let end = start + signal.samples_per_record * bytes_per_sample;
                let raw = &record[start..end];

                if signal.is_annotation(header.format) {
                    let tal = parse_tal_record(raw)?;

                    if Some(c) == self.timekeeping_channel {
                        if let Some(record_start) = tal.record_start {
                            if let Some(gap) = self.check_record_start(
                                record_index,
                                record_start,
                                expected,
                                &mut warnings,
                            ) {
                                gap_time += gap.duration;
                                gaps.push(gap);
                            }
                        }
                    }

                    for entry in &tal.entries {
                        for text in &entry.texts {
                            if !text.is_empty() {
                                annotations.push(Annotation::event(
                                    entry.start,
                                    entry.duration,
                                    text.clone(),
                                ));
                            }
                        }
                    }
                } else {
                    let out = &mut samples[c];
                    match bytes_per_sample {
                        2 => {
                            for chunk in raw.chunks_exact(2) {
                                let digital = LittleEndian::read_i16(chunk) as i32;
                                out.push(signal.to_physical(digital));
                            }
                        }
                        _ => {
                            // BDF: 24位补码，read_i24符号扩展到i32
                            for chunk in raw.chunks_exact(3) {
                                let digital = LittleEndian::read_i24(chunk);
                                out.push(signal.to_physical(digital));
                            }
                        }
                    }
                }
            }
        }

        Ok(DecodedSpan { samples, annotations, gaps, gap_time, warnings })
    }

    /// Compare a record-start TAL onset against the expected start.
    /// Late records on discontinuous files surface a gap; early ones
    /// mean overlapping or corrupted records and surface a warning
    /// value without failing the span.
    fn check_record_start(
        &mut self,
        record_index: usize,
        record_start: f64,
        expected: f64,
        warnings: &mut Vec<EdfError>,
    ) -> Option<GapEntry> {
        if nearly_equal(record_start, expected) {
            return None;
        }

        if record_start > expected {
            if self.header.discontinuous {
                return Some(GapEntry {
                    data_time: record_index as f64 * self.header.data_record_duration,
                    duration: record_start - expected,
                });
            }
            return None;
        }

        // record_start < expected: 记录重叠
        let deviation = record_start - expected;
        if !nearly_equal(deviation, self.start_correction) {
            let err = EdfError::CorruptedRecord { expected, found: record_start };
            warn!("record {}: {}", record_index, err);
            warnings.push(err);
            self.start_correction = deviation;
        }
        None
    }
}
