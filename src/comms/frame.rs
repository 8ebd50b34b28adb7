//! Cutting byte frames into records and rebuilding them from an arbitrated stream.
use bytemuck::Pod;
use tracing::{debug, warn};

use crate::comms::Record;
use crate::MuxError;

/// Splits `frame` into words of `size_of::<T>()` bytes, zero-padding the final word. Only the
/// final word carries `last`. An empty frame produces no words.
pub fn segment<T: Pod>(frame: &[u8]) -> Result<Vec<Record<T>>, MuxError> {
    let size = std::mem::size_of::<T>();
    if size == 0 {
        return Err(MuxError::WordWidth { width: 0, max: 0 });
    }
    let count = frame.len().div_ceil(size);
    let words = frame
        .chunks(size)
        .enumerate()
        .map(|(i, chunk)| {
            let mut payload = T::zeroed();
            bytemuck::bytes_of_mut(&mut payload)[..chunk.len()].copy_from_slice(chunk);
            Record::new(payload, i + 1 == count)
        })
        .collect();
    Ok(words)
}

/// A frame rebuilt from one record, padded to a whole number of words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub source: usize,
    pub bytes: Vec<u8>,
}

/// Rebuilds frames from the arbiter's egress stream.
///
/// The assembler holds at most one open record. A word from a different source while a record is
/// open means the stream lost record atomicity, and is reported as `MuxError::Interleaved`.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    open: Option<usize>,
    bytes: Vec<u8>,
    words: usize,
    frames: u64,
}

impl FrameAssembler {
    /// An assembler with no open record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one egress word, returning the finished frame when `record.last` is set.
    pub fn accept<T: Pod>(
        &mut self,
        source: usize,
        record: &Record<T>,
    ) -> Result<Option<Frame>, MuxError> {
        match self.open {
            Some(open) if open != source => {
                warn!(open, source, "word from another source inside an open record");
                return Err(MuxError::Interleaved { open, got: source });
            }
            _ => self.open = Some(source),
        }
        self.bytes.extend_from_slice(bytemuck::bytes_of(&record.payload));
        self.words += 1;

        if !record.last {
            return Ok(None);
        }
        self.open = None;
        self.words = 0;
        self.frames += 1;
        Ok(Some(Frame {
            source,
            bytes: std::mem::take(&mut self.bytes),
        }))
    }

    /// Drops any partially assembled record, for use after an arbiter reset. Returns the number of
    /// words discarded.
    pub fn reset(&mut self) -> usize {
        let discarded = self.words;
        if discarded > 0 {
            debug!(source = ?self.open, discarded, "discarding partial frame");
        }
        self.open = None;
        self.bytes.clear();
        self.words = 0;
        discarded
    }

    /// Source of the record currently being assembled, if any.
    pub fn open_source(&self) -> Option<usize> {
        self.open
    }

    /// Frames completed so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }
}
