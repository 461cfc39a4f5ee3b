//! Chunked, encrypted file transfer building blocks.
//!
//! - [`split_ranges`] / [`ChunkReader`]: fixed-size byte ranges read from a [`FileSource`]
//! - [`encrypt_chunk`] / [`decrypt_chunk`]: AES-256-GCM sealing with a fresh nonce per chunk
//! - [`SpeedCalculator`]: sliding-window throughput and ETA

mod chunked;
mod crypto;
mod progress;
mod types;

pub use chunked::{ChunkRanges, ChunkReader, FileSource, LocalFile, MemorySource, split_ranges};
pub use crypto::{
    EncryptionError, KEY_LEN, KeyMaterial, NONCE_LEN, TAG_LEN, decrypt_chunk, encrypt_chunk,
};
pub use progress::SpeedCalculator;
pub use types::{Chunk, ChunkRange};

/// Default chunk size: 1 MiB.
///
/// Small enough that one chunk transfer is a bounded-latency call, large
/// enough to keep per-chunk overhead (nonce, tag, round trip) negligible.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source ended at {actual} bytes, expected {expected}")]
    ShortRead { expected: u64, actual: u64 },
}
