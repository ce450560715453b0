//! Chunked transport seam
//!
//! The shaping layer sits between a proxy's data path and the real
//! transport. Both sides speak in batches of byte chunks: a writer accepts
//! an ordered [`MultiChunk`], a reader yields the next one.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::io;

/// Maximum size of a single transport chunk
pub const MAX_CHUNK_SIZE: usize = 8192;

/// Bytes kept free at the end of every chunk for the transport's header
pub const HEADER_RESERVE: usize = 21;

/// A resizable byte chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    buf: BytesMut,
}

impl Chunk {
    /// Create an empty chunk with room for a full transport payload
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(MAX_CHUNK_SIZE),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Grow the chunk by `n` zeroed bytes and return the appended region
    pub fn extend(&mut self, n: usize) -> &mut [u8] {
        let start = self.buf.len();
        self.buf.resize(start + n, 0);
        &mut self.buf[start..]
    }

    /// Bytes from `start` to the end of the chunk
    pub fn bytes_from(&self, start: usize) -> &[u8] {
        &self.buf[start.min(self.buf.len())..]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl From<&[u8]> for Chunk {
    fn from(data: &[u8]) -> Self {
        Self {
            buf: BytesMut::from(data),
        }
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(data: Vec<u8>) -> Self {
        Self {
            buf: BytesMut::from(&data[..]),
        }
    }
}

impl From<BytesMut> for Chunk {
    fn from(buf: BytesMut) -> Self {
        Self { buf }
    }
}

impl AsRef<[u8]> for Chunk {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

/// One ordered batch of chunks. Empty chunks stand for absent units.
pub type MultiChunk = Vec<Chunk>;

/// Total payload bytes in a batch
pub fn total_len(mb: &[Chunk]) -> usize {
    mb.iter().map(Chunk::len).sum()
}

/// Outbound half of a chunked transport
#[async_trait]
pub trait ChunkWriter: Send {
    /// Write one batch, preserving chunk order
    async fn write_chunks(&mut self, chunks: MultiChunk) -> io::Result<()>;

    /// Release the transport
    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Inbound half of a chunked transport
#[async_trait]
pub trait ChunkReader: Send {
    /// Read the next available batch
    async fn read_chunks(&mut self) -> io::Result<MultiChunk>;
}

#[async_trait]
impl<W: ChunkWriter + ?Sized> ChunkWriter for Box<W> {
    async fn write_chunks(&mut self, chunks: MultiChunk) -> io::Result<()> {
        (**self).write_chunks(chunks).await
    }

    async fn close(&mut self) -> io::Result<()> {
        (**self).close().await
    }
}

#[async_trait]
impl<R: ChunkReader + ?Sized> ChunkReader for Box<R> {
    async fn read_chunks(&mut self) -> io::Result<MultiChunk> {
        (**self).read_chunks().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_returns_appended_region() {
        let mut chunk = Chunk::from(&b"abc"[..]);
        let tail = chunk.extend(4);
        assert_eq!(tail.len(), 4);
        tail.copy_from_slice(b"wxyz");

        assert_eq!(chunk.len(), 7);
        assert_eq!(chunk.bytes_from(3), b"wxyz");
        assert_eq!(chunk.as_slice(), b"abcwxyz");
    }

    #[test]
    fn test_bytes_from_past_end() {
        let chunk = Chunk::from(vec![1, 2]);
        assert!(chunk.bytes_from(10).is_empty());
    }

    #[test]
    fn test_total_len() {
        let mb = vec![Chunk::from(vec![0; 3]), Chunk::new(), Chunk::from(vec![0; 5])];
        assert_eq!(total_len(&mb), 8);
    }
}
