// Sequential fixed-size block reader over a raw recorder image.
//
// The image is read strictly forward from a start offset. Every read fills
// exactly one block; a short read at the end of the image is reported as
// end-of-stream and the partial tail is discarded.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use log::{info, trace};

/// Default channel block size used by the recorder (32 KiB).
pub const DEFAULT_BLOCK_SIZE: usize = 0x8000;

/// Number of leading bytes shown in trace-level block previews.
const PREVIEW_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Fill `buf` from `reader`, retrying on `Interrupted`.
///
/// Returns the number of bytes actually read, which is less than
/// `buf.len()` only when the reader hit end-of-input.
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Short hex rendering of the first bytes of a block, for trace logs.
pub(crate) fn preview(block: &[u8]) -> String {
    let n = block.len().min(PREVIEW_LEN);
    let mut s = hex::encode(&block[..n]);
    if block.len() > n {
        s.push_str("..");
    }
    s
}

// ---------------------------------------------------------------------------
// BlockSource
// ---------------------------------------------------------------------------

/// Forward-only block reader over an image.
///
/// Owns a single block buffer, allocated once, which every call to
/// [`next_block`](Self::next_block) overwrites.
pub struct BlockSource<R> {
    reader: R,
    buf: Vec<u8>,
    /// Absolute offset of the next unread byte.
    pos: u64,
    /// Absolute offset of the block most recently returned.
    last_offset: u64,
    blocks_read: u64,
    eof: bool,
}

impl BlockSource<File> {
    /// Open an image file read-only and position it at `start_offset`.
    pub fn open(path: &Path, start_offset: u64, block_size: usize) -> io::Result<Self> {
        info!("opening image {}", path.display());
        let file = File::open(path)?;
        Self::new(file, start_offset, block_size)
    }
}

impl<R: Read + Seek> BlockSource<R> {
    /// Wrap a reader and seek it to `start_offset`.
    pub fn new(mut reader: R, start_offset: u64, block_size: usize) -> io::Result<Self> {
        if block_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "block size must be non-zero",
            ));
        }
        info!("seeking image to {start_offset:#x}");
        reader.seek(SeekFrom::Start(start_offset))?;
        Ok(Self {
            reader,
            buf: vec![0u8; block_size],
            pos: start_offset,
            last_offset: start_offset,
            blocks_read: 0,
            eof: false,
        })
    }

    /// Read the next block.
    ///
    /// Returns `Ok(None)` once the image cannot supply another full block.
    pub fn next_block(&mut self) -> io::Result<Option<&[u8]>> {
        if self.eof {
            return Ok(None);
        }
        let start = self.pos;
        let n = read_full(&mut self.reader, &mut self.buf)?;
        self.pos += n as u64;
        if n < self.buf.len() {
            trace!("image short read of {n:#x} bytes at {start:#x}, end of image");
            self.eof = true;
            return Ok(None);
        }
        self.last_offset = start;
        self.blocks_read += 1;
        trace!(
            "read image block {:#x} bytes from {start:#x} to {:#x}: {}",
            self.buf.len(),
            self.pos,
            preview(&self.buf)
        );
        Ok(Some(&self.buf))
    }

    /// Skip `blocks` whole blocks forward without reading them.
    pub fn skip_blocks(&mut self, blocks: u64) -> io::Result<()> {
        if blocks == 0 {
            return Ok(());
        }
        let target = blocks
            .checked_mul(self.buf.len() as u64)
            .and_then(|delta| self.pos.checked_add(delta))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "skip overflow"))?;
        self.pos = self.reader.seek(SeekFrom::Start(target))?;
        trace!("skipped {blocks} blocks, image now at {:#x}", self.pos);
        Ok(())
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> usize {
        self.buf.len()
    }

    /// Absolute offset of the block most recently returned by `next_block`.
    pub fn last_offset(&self) -> u64 {
        self.last_offset
    }

    /// Absolute offset of the next unread byte.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Number of full blocks returned so far.
    pub fn blocks_read(&self) -> u64 {
        self.blocks_read
    }

    /// Whether the end of the image has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.eof
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_blocks_from_offset() {
        let data = b"xxAAAABBBBCC".to_vec();
        let mut src = BlockSource::new(Cursor::new(data), 2, 4).unwrap();

        assert_eq!(src.next_block().unwrap(), Some(&b"AAAA"[..]));
        assert_eq!(src.last_offset(), 2);
        assert_eq!(src.next_block().unwrap(), Some(&b"BBBB"[..]));
        assert_eq!(src.last_offset(), 6);
        assert_eq!(src.blocks_read(), 2);
    }

    #[test]
    fn short_tail_is_end_of_stream() {
        let mut src = BlockSource::new(Cursor::new(b"AAAABB".to_vec()), 0, 4).unwrap();
        assert!(src.next_block().unwrap().is_some());
        assert!(src.next_block().unwrap().is_none());
        assert!(src.is_exhausted());
        // Stays exhausted.
        assert!(src.next_block().unwrap().is_none());
        assert_eq!(src.blocks_read(), 1);
    }

    #[test]
    fn offset_past_end_yields_nothing() {
        let mut src = BlockSource::new(Cursor::new(b"AAAA".to_vec()), 100, 4).unwrap();
        assert!(src.next_block().unwrap().is_none());
    }

    #[test]
    fn skip_blocks_moves_forward() {
        let data = b"AAAABBBBCCCCDDDD".to_vec();
        let mut src = BlockSource::new(Cursor::new(data), 0, 4).unwrap();
        src.skip_blocks(2).unwrap();
        assert_eq!(src.next_block().unwrap(), Some(&b"CCCC"[..]));
        assert_eq!(src.position(), 12);
        src.skip_blocks(0).unwrap();
        assert_eq!(src.next_block().unwrap(), Some(&b"DDDD"[..]));
    }

    #[test]
    fn skip_past_offset_range_fails() {
        let mut src = BlockSource::new(Cursor::new(b"AAAABBBB".to_vec()), 4, 4).unwrap();
        let err = src.skip_blocks(u64::MAX / 4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(src.position(), 4);
        assert_eq!(src.next_block().unwrap(), Some(&b"BBBB"[..]));
    }

    #[test]
    fn zero_block_size_rejected() {
        let err = BlockSource::new(Cursor::new(Vec::new()), 0, 0).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn preview_truncates() {
        assert_eq!(preview(b"\x01\x02"), "0102");
        let long = [0xabu8; 20];
        assert_eq!(preview(&long), format!("{}..", "ab".repeat(16)));
    }
}
