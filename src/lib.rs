//! # edfstream
//!
//! A Rust library for reading EDF/EDF+ and BDF/BDF+ biosignal
//! recordings progressively, built for interactive viewers of long
//! polygraphic (EEG/EMG/EOG/ECG) recordings.
//!
//! The crate reads from a random-access byte source (local file or
//! HTTP range-request URL) and serves time-ranged physical signals,
//! annotations, and data-gap metadata from an engine task that caches
//! the recording in the background while direct requests interleave.

pub mod error;
pub mod types;
pub mod time;
pub mod utils;
pub mod source;
pub mod header;
pub mod tal;
pub mod record;
pub mod gaps;
pub mod cache;
pub mod engine;
pub mod reader;

// Re-export main types for convenience
pub use error::{EdfError, Result};
pub use types::{
    Annotation, DataGap, FileFormat, PatientInfo, RecordingHeader, RecordingInfo, SignalParam,
    Study,
};
pub use time::{CacheTime, RecordingTime, TimeRange};
pub use source::{ByteSource, FileSource, HttpSource, MemorySource};
pub use cache::{MemorySink, SignalSink, SinkChannel};
pub use engine::{CacheConfig, CacheProgress, ChannelFilter, LoadDirection, SignalData, SignalSlice};
pub use reader::{CacheSweep, EdfReader};

/// Maximum number of signals accepted in a header (matches edflib)
pub const EDFLIB_MAXSIGNALS: usize = header::MAX_SIGNALS;

/// Library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
