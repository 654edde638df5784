//! Framing for the network state image.
//!
//! ```text
//! image   := MAGIC version:u32 chunk*
//! chunk   := tag:[u8; 4] len:u32 payload[len]
//! payload := raw bytes, or (for compressed chunks) raw_len:u32 lz4-block
//! ```
//!
//! Integers and floats are little-endian. Readers skip chunks they do not know.

use std::io::{self, Read, Write};

pub const MAGIC: &[u8; 8] = b"SYNMOD01";
pub const VERSION_V1: u32 = 1;
pub const VERSION_CURRENT: u32 = VERSION_V1;

pub type Tag = [u8; 4];

pub const TAG_STAT: Tag = *b"STAT";
pub const TAG_NEUR: Tag = *b"NEUR";
pub const TAG_SYNZ: Tag = *b"SYNZ";

pub(crate) fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Lengths are stored as u32.
pub(crate) fn len_u32(len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| invalid("length does not fit in u32"))
}

/// Encoding half of the image format, available on every writer.
pub trait WriteImage: Write {
    fn put_u8(&mut self, v: u8) -> io::Result<()> {
        self.write_all(&[v])
    }

    fn put_u32(&mut self, v: u32) -> io::Result<()> {
        self.write_all(&v.to_le_bytes())
    }

    fn put_u64(&mut self, v: u64) -> io::Result<()> {
        self.write_all(&v.to_le_bytes())
    }

    /// Bit-exact, including NaN payloads.
    fn put_f32(&mut self, v: f32) -> io::Result<()> {
        self.write_all(&v.to_bits().to_le_bytes())
    }

    fn put_len(&mut self, len: usize) -> io::Result<()> {
        self.put_u32(len_u32(len)?)
    }

    fn put_chunk(&mut self, tag: Tag, payload: &[u8]) -> io::Result<()> {
        self.write_all(&tag)?;
        self.put_len(payload.len())?;
        self.write_all(payload)
    }

    /// The chunk length covers the 4-byte raw length prefix plus the block.
    fn put_chunk_lz4(&mut self, tag: Tag, payload: &[u8]) -> io::Result<()> {
        let block = lz4_flex::compress(payload);
        let raw_len = len_u32(payload.len())?;
        let chunk_len = len_u32(block.len())?
            .checked_add(4)
            .ok_or_else(|| invalid("compressed chunk too large"))?;

        self.write_all(&tag)?;
        self.put_u32(chunk_len)?;
        self.put_u32(raw_len)?;
        self.write_all(&block)
    }
}

impl<W: Write + ?Sized> WriteImage for W {}

/// Decoding half of the image format, available on every reader.
pub trait ReadImage: Read {
    fn get_array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn get_u8(&mut self) -> io::Result<u8> {
        Ok(self.get_array::<1>()?[0])
    }

    fn get_u32(&mut self) -> io::Result<u32> {
        self.get_array().map(u32::from_le_bytes)
    }

    fn get_u64(&mut self) -> io::Result<u64> {
        self.get_array().map(u64::from_le_bytes)
    }

    fn get_f32(&mut self) -> io::Result<f32> {
        self.get_u32().map(f32::from_bits)
    }

    /// Next chunk header, or `None` at a clean end of image.
    fn next_chunk(&mut self) -> io::Result<Option<(Tag, u32)>> {
        let tag = match self.get_array::<4>() {
            Ok(tag) => tag,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        };
        let len = self.get_u32()?;
        Ok(Some((tag, len)))
    }

    /// Inverse of [`WriteImage::put_chunk_lz4`]; `self` must be limited to the
    /// chunk payload.
    fn get_lz4_payload(&mut self) -> io::Result<Vec<u8>> {
        let raw_len = self.get_u32()? as usize;
        let mut block = Vec::new();
        self.read_to_end(&mut block)?;
        lz4_flex::decompress(&block, raw_len).map_err(|_| invalid("lz4 decompression failed"))
    }
}

impl<R: Read + ?Sized> ReadImage for R {}

/// Sink that only counts bytes, for sizing an image without buffering it.
#[derive(Debug, Default)]
pub struct CountingWriter {
    written: usize,
}

impl CountingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written = self.written.saturating_add(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
