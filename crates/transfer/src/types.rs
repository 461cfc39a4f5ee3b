/// A contiguous byte range of a file, the unit of transfer and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// Zero-based position in the chunk sequence.
    pub index: u64,
    /// Byte offset within the file.
    pub offset: u64,
    /// Length of the range in bytes (only the last chunk may be shorter).
    pub len: usize,
}

impl ChunkRange {
    /// Offset one past the last byte of this range.
    pub fn end(&self) -> u64 {
        self.offset + self.len as u64
    }
}

/// A chunk of plaintext file data read from a source.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub range: ChunkRange,
    pub data: Vec<u8>,
    /// `true` for the final chunk of the file.
    pub is_last: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_end() {
        let r = ChunkRange {
            index: 2,
            offset: 8,
            len: 4,
        };
        assert_eq!(r.end(), 12);
    }
}
