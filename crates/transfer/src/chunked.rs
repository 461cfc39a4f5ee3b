use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::types::{Chunk, ChunkRange};
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

// ---------------------------------------------------------------------------
// FileSource
// ---------------------------------------------------------------------------

/// Opaque handle to the bytes of a user-selected file.
///
/// Bytes are only read when a chunk is needed; nothing is buffered up front.
/// Reads are blocking and are expected to run off the async executor.
pub trait FileSource: Send + Sync + fmt::Debug {
    /// Display name (usually the file name).
    fn name(&self) -> &str;

    /// Reads exactly `len` bytes starting at `offset`.
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, TransferError>;
}

/// A file held in memory (clipboard paste, generated content, tests).
#[derive(Clone)]
pub struct MemorySource {
    name: String,
    data: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: Arc::from(data.into()),
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySource")
            .field("name", &self.name)
            .field("len", &self.data.len())
            .finish()
    }
}

impl FileSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, TransferError> {
        let total = self.data.len() as u64;
        let end = offset.saturating_add(len as u64);
        if end > total {
            return Err(TransferError::ShortRead {
                expected: end,
                actual: total,
            });
        }
        Ok(self.data[offset as usize..end as usize].to_vec())
    }
}

/// A file on local disk, opened on every read.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    name: String,
}

impl LocalFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the file on disk.
    pub fn size(&self) -> Result<u64, TransferError> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

impl FileSource for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, TransferError> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(TransferError::ShortRead {
                    expected: offset + len as u64,
                    actual: offset + filled as u64,
                });
            }
            filled += n;
        }
        Ok(buf)
    }
}

// ---------------------------------------------------------------------------
// Range splitting
// ---------------------------------------------------------------------------

/// Splits `size` bytes into consecutive ranges of `chunk_size` bytes.
///
/// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used. A zero-byte file
/// yields no ranges.
pub fn split_ranges(size: u64, chunk_size: usize) -> ChunkRanges {
    let chunk_size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    ChunkRanges {
        size,
        chunk_size,
        next_offset: 0,
        next_index: 0,
    }
}

/// Iterator over the ordered, gap-free chunk ranges of a file.
#[derive(Debug, Clone)]
pub struct ChunkRanges {
    size: u64,
    chunk_size: usize,
    next_offset: u64,
    next_index: u64,
}

impl ChunkRanges {
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Total number of ranges for the whole file.
    pub fn total_chunks(&self) -> u64 {
        self.size.div_ceil(self.chunk_size as u64)
    }
}

impl Iterator for ChunkRanges {
    type Item = ChunkRange;

    fn next(&mut self) -> Option<ChunkRange> {
        if self.next_offset >= self.size {
            return None;
        }
        let remaining = self.size - self.next_offset;
        let len = remaining.min(self.chunk_size as u64) as usize;
        let range = ChunkRange {
            index: self.next_index,
            offset: self.next_offset,
            len,
        };
        self.next_offset += len as u64;
        self.next_index += 1;
        Some(range)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.size - self.next_offset.min(self.size)).div_ceil(self.chunk_size as u64);
        let left = usize::try_from(left).unwrap_or(usize::MAX);
        (left, Some(left))
    }
}

impl ExactSizeIterator for ChunkRanges {}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a [`FileSource`] chunk by chunk, in order.
pub struct ChunkReader {
    source: Arc<dyn FileSource>,
    ranges: ChunkRanges,
    size: u64,
    offset: u64,
}

impl ChunkReader {
    /// Prepares to read `size` bytes of `source` in `chunk_size` pieces.
    pub fn new(source: Arc<dyn FileSource>, size: u64, chunk_size: usize) -> Self {
        Self {
            source,
            ranges: split_ranges(size, chunk_size),
            size,
            offset: 0,
        }
    }

    /// Reads the next chunk. Returns `None` once every range was read.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        let Some(range) = self.ranges.next() else {
            return Ok(None);
        };
        let data = self.source.read_at(range.offset, range.len)?;
        self.offset = range.end();
        Ok(Some(Chunk {
            range,
            data,
            is_last: self.offset >= self.size,
        }))
    }

    /// Offset of the next byte to be read.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn file_size(&self) -> u64 {
        self.size
    }

    pub fn remaining(&self) -> u64 {
        self.size - self.offset
    }

    pub fn total_chunks(&self) -> u64 {
        self.ranges.total_chunks()
    }
}

impl fmt::Debug for ChunkReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkReader")
            .field("source", &self.source.name())
            .field("size", &self.size)
            .field("offset", &self.offset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn split_exact_multiple() {
        let ranges: Vec<_> = split_ranges(12, 4).collect();
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0], ChunkRange { index: 0, offset: 0, len: 4 });
        assert_eq!(ranges[2], ChunkRange { index: 2, offset: 8, len: 4 });
    }

    #[test]
    fn split_with_short_tail() {
        let ranges: Vec<_> = split_ranges(10, 4).collect();
        let lens: Vec<_> = ranges.iter().map(|r| r.len).collect();
        assert_eq!(lens, vec![4, 4, 2]);
        // Contiguous, no gaps.
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end(), pair[1].offset);
        }
        assert_eq!(ranges.last().unwrap().end(), 10);
    }

    #[test]
    fn split_empty_file() {
        let mut ranges = split_ranges(0, 4);
        assert_eq!(ranges.total_chunks(), 0);
        assert!(ranges.next().is_none());
    }

    #[test]
    fn split_zero_chunk_size_uses_default() {
        let ranges = split_ranges(3 * DEFAULT_CHUNK_SIZE as u64 + 1, 0);
        assert_eq!(ranges.chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(ranges.total_chunks(), 4);
        assert_eq!(ranges.len(), 4);
    }

    #[test]
    fn memory_source_rejects_out_of_bounds() {
        let src = MemorySource::new("a.txt", b"abc".to_vec());
        assert_eq!(src.read_at(1, 2).unwrap(), b"bc");
        assert!(matches!(
            src.read_at(2, 5),
            Err(TransferError::ShortRead { expected: 7, actual: 3 })
        ));
    }

    #[test]
    fn chunk_reader_reads_all() {
        let src: Arc<dyn FileSource> = Arc::new(MemorySource::new("t.bin", b"AABBCCDDEE".to_vec()));
        let mut reader = ChunkReader::new(src, 10, 4);
        assert_eq!(reader.total_chunks(), 3);
        assert_eq!(reader.remaining(), 10);

        let c1 = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c1.range.offset, 0);
        assert_eq!(&c1.data, b"AABB");
        assert!(!c1.is_last);
        assert_eq!(reader.remaining(), 6);

        let c2 = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c2.range.offset, 4);
        assert_eq!(&c2.data, b"CCDD");

        let c3 = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c3.range.offset, 8);
        assert_eq!(&c3.data, b"EE");
        assert!(c3.is_last);

        assert!(reader.next_chunk().unwrap().is_none());
        assert_eq!(reader.offset(), 10);
    }

    #[test]
    fn local_file_reads_ranges() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");
        let file = LocalFile::new(&path);
        assert_eq!(file.name(), "test.bin");
        assert_eq!(file.size().unwrap(), 10);
        assert_eq!(file.read_at(6, 4).unwrap(), b"6789");
    }

    #[test]
    fn local_file_truncated_after_enqueue() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123");
        let src: Arc<dyn FileSource> = Arc::new(LocalFile::new(&path));
        // Declared size is larger than what is on disk.
        let mut reader = ChunkReader::new(src, 8, 4);
        assert!(reader.next_chunk().unwrap().is_some());
        assert!(matches!(
            reader.next_chunk(),
            Err(TransferError::ShortRead { .. })
        ));
    }

    #[test]
    fn local_file_missing() {
        let dir = TempDir::new().unwrap();
        let file = LocalFile::new(dir.path().join("nope.bin"));
        assert!(matches!(file.read_at(0, 1), Err(TransferError::Io(_))));
    }
}
