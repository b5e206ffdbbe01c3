// Canonical 44-byte RIFF/WAVE header for recovered PCM data.
//
// The recorder's own header is lost for unsaved sessions, so recovery writes
// a synthetic one. By default the RIFF and data chunk sizes are fixed
// placeholders (nearly 2 GiB, so players read until end of file);
// `patch_sizes` rewrites them with the real sizes once the data length is
// known.

use std::io::{self, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, WriteBytesExt};

/// Size of the canonical header in bytes.
pub const HEADER_SIZE: u64 = 44;

/// Placeholder RIFF chunk size.
pub const PLACEHOLDER_CHUNK_SIZE: u32 = 0x7FFF_FF98;

/// Placeholder data chunk size.
pub const PLACEHOLDER_DATA_SIZE: u32 = 0x7FFF_FF74;

const PCM: u16 = 1;
const FMT_CHUNK_SIZE: u32 = 16;

/// Offset of the RIFF chunk size field.
const CHUNK_SIZE_OFFSET: u64 = 4;
/// Offset of the data chunk size field.
const DATA_SIZE_OFFSET: u64 = 40;

/// PCM sample format described by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl Default for WavFormat {
    /// Mono, 48 kHz, 24-bit: the recorder's native channel format.
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 24,
        }
    }
}

impl WavFormat {
    /// Bytes per sample frame across all channels, or `None` if it does not
    /// fit the header field.
    pub fn block_align(&self) -> Option<u16> {
        self.channels.checked_mul(self.bits_per_sample.div_ceil(8))
    }

    /// Bytes per second, or `None` if it does not fit the header field.
    pub fn byte_rate(&self) -> Option<u32> {
        self.block_align()
            .and_then(|align| self.sample_rate.checked_mul(u32::from(align)))
    }
}

/// A RIFF/WAVE header with a single `fmt ` and `data` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub format: WavFormat,
    pub chunk_size: u32,
    pub data_size: u32,
}

impl WavHeader {
    /// Header carrying the placeholder sizes.
    pub fn placeholder(format: WavFormat) -> Self {
        Self {
            format,
            chunk_size: PLACEHOLDER_CHUNK_SIZE,
            data_size: PLACEHOLDER_DATA_SIZE,
        }
    }

    /// Serialize the header. Fails with `InvalidInput` when the format's
    /// derived rates overflow their fields.
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let (Some(block_align), Some(byte_rate)) =
            (self.format.block_align(), self.format.byte_rate())
        else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("WAV format out of range: {:?}", self.format),
            ));
        };

        writer.write_all(b"RIFF")?;
        writer.write_u32::<LittleEndian>(self.chunk_size)?;
        writer.write_all(b"WAVE")?;

        writer.write_all(b"fmt ")?;
        writer.write_u32::<LittleEndian>(FMT_CHUNK_SIZE)?;
        writer.write_u16::<LittleEndian>(PCM)?;
        writer.write_u16::<LittleEndian>(self.format.channels)?;
        writer.write_u32::<LittleEndian>(self.format.sample_rate)?;
        writer.write_u32::<LittleEndian>(byte_rate)?;
        writer.write_u16::<LittleEndian>(block_align)?;
        writer.write_u16::<LittleEndian>(self.format.bits_per_sample)?;

        writer.write_all(b"data")?;
        writer.write_u32::<LittleEndian>(self.data_size)?;
        Ok(())
    }
}

/// RIFF chunk size and data chunk size for `data_len` bytes of samples.
/// Sizes beyond what the 32-bit fields can hold saturate.
fn sizes_for(data_len: u64) -> (u32, u32) {
    let data_size = u32::try_from(data_len).unwrap_or(u32::MAX);
    (data_size.saturating_add((HEADER_SIZE - 8) as u32), data_size)
}

/// Rewrite the size fields of a header written at the start of `writer` so
/// they describe `data_len` bytes of sample data. The stream position is
/// restored afterwards.
pub fn patch_sizes<W: Write + Seek>(writer: &mut W, data_len: u64) -> io::Result<()> {
    let (chunk_size, data_size) = sizes_for(data_len);
    let end = writer.stream_position()?;
    writer.seek(SeekFrom::Start(CHUNK_SIZE_OFFSET))?;
    writer.write_u32::<LittleEndian>(chunk_size)?;
    writer.seek(SeekFrom::Start(DATA_SIZE_OFFSET))?;
    writer.write_u32::<LittleEndian>(data_size)?;
    writer.seek(SeekFrom::Start(end))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
