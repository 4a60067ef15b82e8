use crate::config::MAX_PART_COUNT;
use crate::services::fault::{Fault, FaultCode, FaultOrigin};
use bytes::{Bytes, BytesMut};
use std::ops::Range;

/// A contiguous, numbered slice of the payload ready for upload.
#[derive(Debug, Clone)]
pub struct UploadPart {
    pub part_number: i32,
    pub byte_range: Range<u64>,
    pub data: Bytes,
}

impl UploadPart {
    pub fn len(&self) -> u64 {
        self.byte_range.end - self.byte_range.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Groups an ordered chunk stream into upload parts.
///
/// Every emitted part except the last holds exactly `part_size` bytes.
pub struct PartBuilder {
    part_size: usize,
    buffer: BytesMut,
    next_part_number: i32,
    part_start: u64,
    cursor: u64,
}

impl PartBuilder {
    pub fn new(part_size: usize) -> Self {
        let part_size = part_size.max(1);
        Self {
            part_size,
            buffer: BytesMut::with_capacity(part_size),
            next_part_number: 1,
            part_start: 0,
            cursor: 0,
        }
    }

    /// Total bytes consumed so far.
    pub fn bytes_consumed(&self) -> u64 {
        self.cursor
    }

    /// Buffers `chunk` and returns every full part it completes. A chunk larger than the
    /// part size can complete several.
    pub fn consume(&mut self, chunk: &[u8]) -> Result<Vec<UploadPart>, Fault> {
        self.buffer.extend_from_slice(chunk);
        self.cursor += chunk.len() as u64;

        let mut parts = Vec::new();
        while self.buffer.len() >= self.part_size {
            parts.push(self.emit(self.part_size)?);
        }
        Ok(parts)
    }

    /// Flushes the tail. A payload of zero bytes still yields one empty part.
    pub fn finish(mut self) -> Result<Option<UploadPart>, Fault> {
        if !self.buffer.is_empty() || self.next_part_number == 1 {
            let len = self.buffer.len();
            return self.emit(len).map(Some);
        }
        Ok(None)
    }

    fn emit(&mut self, len: usize) -> Result<UploadPart, Fault> {
        if self.next_part_number > MAX_PART_COUNT {
            return Err(Fault::new(
                FaultOrigin::PartBuilder,
                FaultCode::PartLimitExceeded,
                format!(
                    "payload needs more than {} parts of {} bytes",
                    MAX_PART_COUNT, self.part_size
                ),
            ));
        }

        let data = self.buffer.split_to(len).freeze();
        let end = self.part_start + len as u64;
        let part = UploadPart {
            part_number: self.next_part_number,
            byte_range: self.part_start..end,
            data,
        };

        self.next_part_number += 1;
        self.part_start = end;
        self.buffer
            .reserve(self.part_size.saturating_sub(self.buffer.len()));
        Ok(part)
    }
}
