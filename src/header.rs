//! Fixed-width ASCII header codec for EDF/EDF+/BDF/BDF+.
//!
//! The header record is `256 * (signal_count + 1)` bytes: a 256-byte
//! main block followed by the per-signal blocks, each field repeated
//! `signal_count` times contiguously (field-major, not record-major).

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use log::warn;

use crate::error::{EdfError, Result};
use crate::types::{FileFormat, RecordingHeader, SignalParam};
use crate::utils::{header_field, is_integer_number, parse_float_field, parse_int_field};

/// Size of the main header block and of each per-signal block.
pub const HEADER_BLOCK_SIZE: usize = 256;

/// Upper bound on signals, matching edflib.
pub const MAX_SIGNALS: usize = 4096;

/// Extract the signal count from the first 256 header bytes.
///
/// Callers use this to size the second read that fetches the signal
/// blocks before calling [`parse_header`].
pub fn peek_signal_count(buf: &[u8]) -> Result<usize> {
    if buf.len() < HEADER_BLOCK_SIZE {
        return Err(EdfError::MalformedHeader(format!(
            "main header needs {} bytes, got {}",
            HEADER_BLOCK_SIZE,
            buf.len()
        )));
    }

    let field = header_field(buf, 252, 4);
    if !is_integer_number(&field) {
        return Err(EdfError::MalformedHeader(format!("signal count missing: {:?}", field)));
    }

    let count = parse_int_field(&field);
    if count < 1 || count as usize > MAX_SIGNALS {
        return Err(EdfError::MalformedHeader(format!("invalid signal count: {}", count)));
    }

    Ok(count as usize)
}

/// Parse a complete header record into a [`RecordingHeader`].
///
/// `buf` must hold at least `256 * (signal_count + 1)` bytes.
pub fn parse_header(buf: &[u8]) -> Result<RecordingHeader> {
    let signal_count = peek_signal_count(buf)?;

    let needed = HEADER_BLOCK_SIZE * (signal_count + 1);
    if buf.len() < needed {
        return Err(EdfError::MalformedHeader(format!(
            "header needs {} bytes for {} signals, got {}",
            needed,
            signal_count,
            buf.len()
        )));
    }

    let (format, discontinuous) = parse_format(buf)?;

    let patient_id = header_field(buf, 8, 80);
    let recording_id = header_field(buf, 88, 80);

    let start_datetime = parse_start_datetime(
        &header_field(buf, 168, 8),
        &header_field(buf, 176, 8),
    );

    let record_count_field = header_field(buf, 236, 8);
    if !is_integer_number(&record_count_field) {
        return Err(EdfError::MalformedHeader(format!(
            "data record count missing: {:?}",
            record_count_field
        )));
    }
    let data_record_count = parse_int_field(&record_count_field);
    if data_record_count <= 0 {
        // 在线记录(-1)和空文件都不支持
        return Err(EdfError::MalformedHeader(format!(
            "data record count must be positive, got {}",
            data_record_count
        )));
    }

    let data_record_duration = parse_float_field(&header_field(buf, 244, 8));
    if !(data_record_duration > 0.0) {
        return Err(EdfError::MalformedHeader(format!(
            "data record duration must be > 0, got {}",
            data_record_duration
        )));
    }

    let signals = parse_signal_blocks(&buf[HEADER_BLOCK_SIZE..needed], signal_count)?;

    let record_byte_size: usize = signals
        .iter()
        .map(|s| s.samples_per_record * format.bytes_per_sample())
        .sum();

    let expected_header_bytes = HEADER_BLOCK_SIZE * (signal_count + 1);
    let stated_header_bytes = parse_int_field(&header_field(buf, 184, 8));
    let header_record_bytes = if stated_header_bytes as usize == expected_header_bytes {
        expected_header_bytes
    } else if stated_header_bytes > 0 {
        warn!(
            "header size field says {} bytes, expected {}; using stated value",
            stated_header_bytes, expected_header_bytes
        );
        stated_header_bytes as usize
    } else {
        warn!("header size field unparseable, using computed {}", expected_header_bytes);
        expected_header_bytes
    };

    Ok(RecordingHeader {
        format,
        discontinuous,
        patient_id,
        recording_id,
        start_datetime,
        header_record_bytes,
        data_record_count: data_record_count as usize,
        data_record_duration,
        record_byte_size,
        reserved: header_field(buf, 192, 44),
        signals,
    })
}

/// Determine the data format from the version field and the reserved
/// field's `EDF+`/`BDF+` prefix, plus the `C`/`D` continuity byte.
fn parse_format(buf: &[u8]) -> Result<(FileFormat, bool)> {
    let is_bdf = buf[0] == 0xFF && header_field(buf, 1, 7) == "BIOSEMI";
    let is_edf = !is_bdf && header_field(buf, 0, 8) == "0";

    if !is_bdf && !is_edf {
        return Err(EdfError::MalformedHeader(format!(
            "unsupported data format: {:?}",
            header_field(buf, 0, 8)
        )));
    }

    let reserved = header_field(buf, 192, 44);
    let upper = reserved.to_ascii_uppercase();
    let is_plus = (is_edf && upper.starts_with("EDF+")) || (is_bdf && upper.starts_with("BDF+"));
    let discontinuous = is_plus && upper.as_bytes().get(4) == Some(&b'D');

    let format = match (is_bdf, is_plus) {
        (false, false) => FileFormat::Edf,
        (false, true) => FileFormat::EdfPlus,
        (true, false) => FileFormat::Bdf,
        (true, true) => FileFormat::BdfPlus,
    };

    Ok((format, discontinuous))
}

/// Parse "dd.mm.yy" + "hh.mm.ss" into a timestamp.
///
/// Two-digit years pivot at 85: `yy >= 85` is 19yy, otherwise 20yy.
/// Parse failure is tolerated; the viewer shows the recording without
/// a start time.
fn parse_start_datetime(date_str: &str, time_str: &str) -> Option<NaiveDateTime> {
    let date_parts: Vec<&str> = date_str.split('.').collect();
    let time_parts: Vec<&str> = time_str.split('.').collect();
    if date_parts.len() != 3 || time_parts.len() != 3 {
        warn!("unparseable start date/time: {:?} {:?}", date_str, time_str);
        return None;
    }

    let day = parse_int_field(date_parts[0]) as u32;
    let month = parse_int_field(date_parts[1]) as u32;
    let yy = parse_int_field(date_parts[2]);
    let year = if yy >= 85 { 1900 + yy } else { 2000 + yy };

    let date = NaiveDate::from_ymd_opt(year, month, day);
    let time = NaiveTime::from_hms_opt(
        parse_int_field(time_parts[0]) as u32,
        parse_int_field(time_parts[1]) as u32,
        parse_int_field(time_parts[2]) as u32,
    );

    match (date, time) {
        (Some(d), Some(t)) => Some(NaiveDateTime::new(d, t)),
        _ => {
            warn!("invalid start date/time: {:?} {:?}", date_str, time_str);
            None
        }
    }
}

/// Parse the per-signal blocks. Each field is repeated `count` times
/// contiguously, so field offsets are multiples of the field width
/// times the signal count.
fn parse_signal_blocks(buf: &[u8], count: usize) -> Result<Vec<SignalParam>> {
    let mut signals = Vec::with_capacity(count);

    for i in 0..count {
        let label = header_field(buf, i * 16, 16);
        let transducer = header_field(buf, count * 16 + i * 80, 80);
        let physical_dimension = header_field(buf, count * 96 + i * 8, 8);
        let physical_min = parse_float_field(&header_field(buf, count * 104 + i * 8, 8));
        let physical_max = parse_float_field(&header_field(buf, count * 112 + i * 8, 8));
        let digital_min = parse_int_field(&header_field(buf, count * 120 + i * 8, 8));
        let digital_max = parse_int_field(&header_field(buf, count * 128 + i * 8, 8));
        let prefilter = header_field(buf, count * 136 + i * 80, 80);
        let samples_per_record = parse_int_field(&header_field(buf, count * 216 + i * 8, 8));
        let reserved = header_field(buf, count * 224 + i * 32, 32);

        if samples_per_record <= 0 {
            return Err(EdfError::MalformedHeader(format!(
                "signal {} has invalid samples per record: {}",
                i, samples_per_record
            )));
        }

        if digital_min == digital_max {
            return Err(EdfError::MalformedHeader(format!(
                "signal {} has equal digital min and max ({})",
                i, digital_min
            )));
        }

        if physical_min == physical_max {
            return Err(EdfError::MalformedHeader(format!(
                "signal {} has equal physical min and max ({})",
                i, physical_min
            )));
        }

        signals.push(SignalParam {
            label,
            transducer,
            physical_dimension,
            prefilter,
            reserved,
            physical_min,
            physical_max,
            digital_min,
            digital_max,
            samples_per_record: samples_per_record as usize,
        });
    }

    Ok(signals)
}
