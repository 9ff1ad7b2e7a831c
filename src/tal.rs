//! Parser for the Timestamped Annotation List (TAL) byte language
//! carried inside EDF+/BDF+ annotation channels.
//!
//! Per data record the channel holds:
//!
//! ```text
//! record       = start_tal { tal } *0x00
//! start_tal    = onset 0x14 0x14
//! tal          = onset [0x15 duration] 0x14 text { 0x14 text } 0x14 0x00
//! onset        = ("+"|"-") digits ["." digits]
//! duration     = digits ["." digits]
//! ```
//!
//! `0x14` ends a field, `0x15` introduces a duration, `0x00` terminates
//! a TAL and pads the channel to its fixed per-record byte size.

use crate::error::{EdfError, Result};
use crate::utils::parse_tal_number;

/// One TAL: an onset, an optional duration, and its text fields.
#[derive(Debug, Clone, PartialEq)]
pub struct TalEntry {
    /// Onset in seconds relative to recording start
    pub start: f64,

    /// Duration in seconds, 0 when the TAL carries none
    pub duration: f64,

    /// Text fields, empty ones included (callers discard them)
    pub texts: Vec<String>,
}

/// All TALs of one data record.
#[derive(Debug, Clone, PartialEq)]
pub struct TalRecord {
    /// Onset of the record-start TAL (the first `onset 0x14 0x14`),
    /// `None` when the channel slice holds no TAL at all
    pub record_start: Option<f64>,

    pub entries: Vec<TalEntry>,
}

const END_OF_FIELD: u8 = 0x14;
const DURATION_MARK: u8 = 0x15;
const TERMINATOR: u8 = 0x00;

/// Parse the annotation-channel bytes of one data record.
///
/// Scanning stops at two consecutive NUL bytes or at the end of the
/// slice. An unparseable onset or duration fails the whole record with
/// [`EdfError::MalformedAnnotation`].
pub fn parse_tal_record(data: &[u8]) -> Result<TalRecord> {
    let mut record = TalRecord { record_start: None, entries: Vec::new() };
    let mut pos = 0;

    while pos < data.len() {
        if data[pos] == TERMINATOR {
            // 单个NUL结束一个TAL；两个连续NUL结束整个记录
            if pos + 1 >= data.len() || data[pos + 1] == TERMINATOR {
                break;
            }
            pos += 1;
            continue;
        }

        let entry = parse_entry(data, &mut pos)?;
        if record.record_start.is_none() {
            record.record_start = Some(entry.start);
        }
        record.entries.push(entry);
    }

    Ok(record)
}

/// Parse one TAL starting at `*pos`; leaves `*pos` on the terminating
/// NUL (or at the end of the slice).
fn parse_entry(data: &[u8], pos: &mut usize) -> Result<TalEntry> {
    let onset_start = *pos;
    while *pos < data.len() && data[*pos] != END_OF_FIELD && data[*pos] != DURATION_MARK {
        if data[*pos] == TERMINATOR {
            return Err(EdfError::MalformedAnnotation(format!(
                "unterminated onset at byte {}",
                onset_start
            )));
        }
        *pos += 1;
    }
    let start = parse_tal_number(&String::from_utf8_lossy(&data[onset_start..*pos]))?;

    let mut duration = 0.0;
    if *pos < data.len() && data[*pos] == DURATION_MARK {
        *pos += 1;
        let dur_start = *pos;
        while *pos < data.len() && data[*pos] != END_OF_FIELD {
            if data[*pos] == TERMINATOR {
                return Err(EdfError::MalformedAnnotation(format!(
                    "unterminated duration at byte {}",
                    dur_start
                )));
            }
            *pos += 1;
        }
        duration = parse_tal_number(&String::from_utf8_lossy(&data[dur_start..*pos]))?;
        if duration < 0.0 {
            return Err(EdfError::MalformedAnnotation(format!(
                "negative duration: {}",
                duration
            )));
        }
    }

    // 跳过onset/duration后面的0x14
    if *pos < data.len() {
        *pos += 1;
    }

    let mut texts = Vec::new();
    while *pos < data.len() && data[*pos] != TERMINATOR {
        let text_start = *pos;
        while *pos < data.len() && data[*pos] != END_OF_FIELD && data[*pos] != TERMINATOR {
            *pos += 1;
        }
        texts.push(String::from_utf8_lossy(&data[text_start..*pos]).into_owned());
        if *pos < data.len() && data[*pos] == END_OF_FIELD {
            *pos += 1;
        }
    }

    Ok(TalEntry { start, duration, texts })
}
