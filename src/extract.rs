// Fixed-pattern extraction of one channel from a healthy interleave.
//
// The recorder writes `repetition` consecutive blocks per channel, channels in
// order 1..num_tracks, then starts over. When that layout is intact one
// channel can be pulled out with plain reads and seeks, no matching needed.
//
// Two layouts are supported:
//   - `Layout::Healthy`: the session was saved; the first interleave row
//     holds one header block per channel, copied verbatim ahead of the data.
//   - `Layout::Session`: an unsaved session without header blocks; a
//     synthetic WAV header is written instead.

use std::io::{self, Read, Seek, Write};

use log::{debug, error, info};
use thiserror::Error;

use crate::block::{BlockSource, DEFAULT_BLOCK_SIZE, preview};
use crate::wav::{WavFormat, WavHeader};

/// Default number of channels on the recorder.
pub const DEFAULT_TRACKS: usize = 34;

/// Default consecutive blocks per channel in one interleave group.
pub const DEFAULT_REPETITION: u64 = 8;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Image layout to extract from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// Saved session: one header block per channel precedes the data.
    Healthy,
    /// Unsaved session: data only; a synthetic WAV header is emitted.
    #[default]
    Session,
}

/// Configuration for fixed-pattern extraction.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub block_size: usize,
    pub num_tracks: usize,
    /// 1-based channel to extract.
    pub selected: usize,
    /// Consecutive blocks per channel in one interleave group.
    pub repetition: u64,
    /// Interleave groups to copy. `None` copies until the image ends.
    pub count: Option<u64>,
    pub layout: Layout,
    /// Format written into the synthetic header (session layout only).
    pub format: WavFormat,
    /// Rewrite the synthetic header's sizes after a successful run.
    pub patch_sizes: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            num_tracks: DEFAULT_TRACKS,
            selected: 1,
            repetition: DEFAULT_REPETITION,
            count: None,
            layout: Layout::default(),
            format: WavFormat::default(),
            patch_sizes: false,
        }
    }
}

impl ExtractOptions {
    pub fn validate(&self) -> Result<(), ExtractError> {
        if self.block_size == 0 {
            return Err(ExtractError::InvalidOptions("block size must be non-zero".into()));
        }
        if self.num_tracks == 0 {
            return Err(ExtractError::InvalidOptions("track count must be at least 1".into()));
        }
        if !(1..=self.num_tracks).contains(&self.selected) {
            return Err(ExtractError::InvalidOptions(format!(
                "selected channel {} outside 1..={}",
                self.selected, self.num_tracks
            )));
        }
        if self.repetition == 0 {
            return Err(ExtractError::InvalidOptions("repetition must be at least 1".into()));
        }
        // Bytes spanned by one full interleave group; every skip stays below it.
        let group_bytes = (self.num_tracks as u64)
            .checked_mul(self.repetition)
            .and_then(|blocks| blocks.checked_mul(self.block_size as u64));
        if group_bytes.is_none() {
            return Err(ExtractError::InvalidOptions(format!(
                "interleave group of {} tracks x {} blocks of {:#x} bytes is too large",
                self.num_tracks, self.repetition, self.block_size
            )));
        }
        if self.layout == Layout::Session && self.format.byte_rate().is_none() {
            return Err(ExtractError::InvalidOptions(format!(
                "WAV format out of range: {} channels, {} Hz, {} bits",
                self.format.channels, self.format.sample_rate, self.format.bits_per_sample
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Errors and stats
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("image exhausted at {offset:#x} after {completed} of {requested} groups")]
    ImageExhausted {
        requested: u64,
        completed: u64,
        offset: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Statistics returned by an extraction run.
#[derive(Debug, Clone, Default)]
pub struct ExtractStats {
    /// Image blocks copied to the output, header block included.
    pub blocks_copied: u64,
    /// Interleave groups fully copied.
    pub groups: u64,
    /// Bytes written to the output, header included.
    pub bytes_written: u64,
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract the selected channel from `image` into `out` according to
/// `opts.layout`.
pub fn extract<R, W>(
    image: &mut BlockSource<R>,
    out: &mut W,
    opts: &ExtractOptions,
) -> Result<ExtractStats, ExtractError>
where
    R: Read + Seek,
    W: Write,
{
    opts.validate()?;
    if image.block_size() != opts.block_size {
        return Err(ExtractError::InvalidOptions(format!(
            "image reads {:#x}-byte blocks, options expect {:#x}",
            image.block_size(),
            opts.block_size
        )));
    }
    let mut stats = ExtractStats::default();
    let before = (opts.selected - 1) as u64;

    match opts.layout {
        Layout::Healthy => {
            // Header row: one block per channel.
            image.skip_blocks(before)?;
            let start = image.position();
            let Some(header) = image.next_block()? else {
                error!("image exhausted reading header block at {start:#x}");
                return Err(exhausted(opts, &stats, start));
            };
            let len = header.len() as u64;
            out.write_all(header)?;
            info!(
                "read header: {len:#x} bytes from {start:#x} to {:#x}",
                image.position()
            );
            stats.blocks_copied += 1;
            stats.bytes_written += len;
            image.skip_blocks((opts.num_tracks - opts.selected) as u64)?;
        }
        Layout::Session => {
            let header = WavHeader::placeholder(opts.format);
            header.write(&mut *out)?;
            stats.bytes_written += crate::wav::HEADER_SIZE;
        }
    }

    image.skip_blocks(before * opts.repetition)?;
    copy_groups(image, out, opts, &mut stats)?;

    info!(
        "extracted channel {}: {} groups, {} bytes",
        opts.selected, stats.groups, stats.bytes_written
    );
    Ok(stats)
}

/// Copy `repetition` blocks per group, skipping the other channels' groups
/// in between.
fn copy_groups<R, W>(
    image: &mut BlockSource<R>,
    out: &mut W,
    opts: &ExtractOptions,
    stats: &mut ExtractStats,
) -> Result<(), ExtractError>
where
    R: Read + Seek,
    W: Write,
{
    let gap = (opts.num_tracks - 1) as u64 * opts.repetition;

    while opts.count.is_none_or(|count| stats.groups < count) {
        for _ in 0..opts.repetition {
            let start = image.position();
            let Some(block) = image.next_block()? else {
                if opts.count.is_none() {
                    debug!("image ended at {start:#x}");
                    return Ok(());
                }
                error!("image exhausted at {start:#x}");
                return Err(exhausted(opts, stats, start));
            };
            debug!(
                "read {:#x} bytes from {start:#x}: {}",
                block.len(),
                preview(block)
            );
            out.write_all(block)?;
            stats.blocks_copied += 1;
            stats.bytes_written += block.len() as u64;
        }
        image.skip_blocks(gap)?;
        stats.groups += 1;
        debug!(
            "finalizing group {}, seeking to {:#x}",
            stats.groups,
            image.position()
        );
    }
    Ok(())
}

fn exhausted(opts: &ExtractOptions, stats: &ExtractStats, offset: u64) -> ExtractError {
    ExtractError::ImageExhausted {
        requested: opts.count.unwrap_or(stats.groups),
        completed: stats.groups,
        offset,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
