// Reference track streams.
//
// Each track is an already-recovered (possibly partial) copy of one recorder
// channel. The matcher compares image blocks against the block under each
// track's cursor; the cursor only moves forward.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use thiserror::Error;

use crate::block::read_full;

/// Default reference file name; `{n}` is the 1-based track number.
pub const DEFAULT_REFERENCE_PATTERN: &str = "{n}.audio(0).wav";

/// A reference file could not be opened. Opening is all-or-nothing, so this
/// aborts the whole set.
#[derive(Debug, Error)]
#[error("cannot open reference track {track} at {}: {source}", .path.display())]
pub struct TrackOpenError {
    /// 1-based track number.
    pub track: usize,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Expand a reference file-name pattern for tracks `1..=num_tracks` under `dir`.
pub fn reference_paths(dir: &Path, pattern: &str, num_tracks: usize) -> Vec<PathBuf> {
    (1..=num_tracks)
        .map(|n| dir.join(pattern.replace("{n}", &n.to_string())))
        .collect()
}

// ---------------------------------------------------------------------------
// TrackStream
// ---------------------------------------------------------------------------

/// One reference track read block by block.
///
/// The stream measures its length once when it is created, so a trailing
/// partial block is never loaded. After exhaustion the buffer keeps the last
/// full block the stream held.
pub struct TrackStream<R> {
    reader: R,
    /// 1-based track number, for diagnostics.
    number: usize,
    buf: Vec<u8>,
    total_blocks: u64,
    consumed: u64,
    loaded: bool,
    exhausted: bool,
}

impl<R: Read + Seek> TrackStream<R> {
    /// Wrap `reader` as track `number` and load its first block.
    pub fn new(mut reader: R, number: usize, block_size: usize) -> io::Result<Self> {
        if block_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "block size must be non-zero",
            ));
        }
        let len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        let mut track = Self {
            reader,
            number,
            buf: vec![0u8; block_size],
            total_blocks: len / block_size as u64,
            consumed: 0,
            loaded: false,
            exhausted: false,
        };
        info!(
            "track {number}: {} full blocks of {block_size:#x} bytes",
            track.total_blocks
        );
        track.load();
        Ok(track)
    }

    /// Read the block at the cursor into the buffer, or mark exhaustion.
    fn load(&mut self) {
        if self.consumed >= self.total_blocks {
            debug!("track {}: exhausted after {} blocks", self.number, self.consumed);
            self.exhausted = true;
            return;
        }
        match read_full(&mut self.reader, &mut self.buf) {
            Ok(n) if n == self.buf.len() => self.loaded = true,
            Ok(n) => {
                warn!(
                    "track {}: short read of {n:#x} bytes at block {}, treating as exhausted",
                    self.number, self.consumed
                );
                self.exhausted = true;
            }
            Err(e) => {
                warn!(
                    "track {}: read failed at block {}: {e}, treating as exhausted",
                    self.number, self.consumed
                );
                self.exhausted = true;
            }
        }
    }

    /// The block under the cursor, without consuming it.
    ///
    /// Once the track is exhausted this is the last full block it held, or
    /// `None` if it never held one.
    pub fn current_block(&self) -> Option<&[u8]> {
        self.loaded.then_some(&self.buf[..])
    }

    /// Consume the current block and load the next one.
    ///
    /// Does nothing once the track is exhausted.
    pub fn advance(&mut self) {
        if self.exhausted {
            return;
        }
        self.consumed += 1;
        self.load();
    }

    /// Whether `block` equals the block under the cursor.
    pub fn matches(&self, block: &[u8]) -> bool {
        self.current_block() == Some(block)
    }

    /// 1-based track number.
    pub fn number(&self) -> usize {
        self.number
    }

    /// Index of the next unread block.
    pub fn cursor(&self) -> u64 {
        self.consumed
    }

    /// Whether the track has no block left to offer.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

// ---------------------------------------------------------------------------
// TrackSet
// ---------------------------------------------------------------------------

/// All reference tracks of one run, indexed from 0 (track number - 1).
pub struct TrackSet<R> {
    tracks: Vec<TrackStream<R>>,
}

impl TrackSet<File> {
    /// Open every reference file read-only. The first failure aborts the set.
    pub fn open_all(paths: &[PathBuf], block_size: usize) -> Result<Self, TrackOpenError> {
        let mut tracks = Vec::with_capacity(paths.len());
        for (i, path) in paths.iter().enumerate() {
            let number = i + 1;
            info!("track {number}: opening {}", path.display());
            let stream = File::open(path)
                .and_then(|file| TrackStream::new(file, number, block_size))
                .map_err(|source| TrackOpenError {
                    track: number,
                    path: path.clone(),
                    source,
                })?;
            tracks.push(stream);
        }
        Ok(Self { tracks })
    }
}

impl<R: Read + Seek> TrackSet<R> {
    /// Build a set from in-memory or already-open readers, numbered from 1.
    pub fn from_readers<I>(readers: I, block_size: usize) -> io::Result<Self>
    where
        I: IntoIterator<Item = R>,
    {
        let tracks = readers
            .into_iter()
            .enumerate()
            .map(|(i, r)| TrackStream::new(r, i + 1, block_size))
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self { tracks })
    }

    /// Whether any track still has a block to offer.
    pub fn any_viable(&self) -> bool {
        self.tracks.iter().any(|t| !t.is_exhausted())
    }
}

impl<R> TrackSet<R> {
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TrackStream<R>> {
        self.tracks.get(index)
    }

    pub fn as_mut_slice(&mut self) -> &mut [TrackStream<R>] {
        &mut self.tracks
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn track(data: &[u8], block_size: usize) -> TrackStream<Cursor<Vec<u8>>> {
        TrackStream::new(Cursor::new(data.to_vec()), 1, block_size).unwrap()
    }

    #[test]
    fn advance_walks_blocks_then_exhausts() {
        let mut t = track(b"AAAABBBB", 4);
        assert_eq!(t.current_block(), Some(&b"AAAA"[..]));
        assert!(t.matches(b"AAAA"));
        t.advance();
        assert_eq!(t.cursor(), 1);
        assert!(t.matches(b"BBBB"));
        assert!(!t.is_exhausted());
        t.advance();
        assert!(t.is_exhausted());
        assert_eq!(t.cursor(), 2);
        // The last full block stays visible.
        assert_eq!(t.current_block(), Some(&b"BBBB"[..]));
        t.advance();
        assert_eq!(t.cursor(), 2);
    }

    #[test]
    fn trailing_partial_block_is_ignored() {
        let mut t = track(b"AAAABB", 4);
        assert!(t.matches(b"AAAA"));
        t.advance();
        assert!(t.is_exhausted());
        assert!(!t.matches(b"BB\0\0"));
    }

    #[test]
    fn empty_track_is_exhausted_without_block() {
        let t = track(b"", 4);
        assert!(t.is_exhausted());
        assert_eq!(t.current_block(), None);
        assert!(!t.matches(b"\0\0\0\0"));
    }

    #[test]
    fn set_numbers_tracks_from_one() {
        let set = TrackSet::from_readers(
            vec![Cursor::new(b"AAAA".to_vec()), Cursor::new(Vec::new())],
            4,
        )
        .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(1).map(|t| t.number()), Some(2));
        assert!(set.any_viable());
    }

    #[test]
    fn reference_paths_expand_pattern() {
        let paths = reference_paths(Path::new("dest"), DEFAULT_REFERENCE_PATTERN, 2);
        assert_eq!(
            paths,
            vec![
                PathBuf::from("dest/1.audio(0).wav"),
                PathBuf::from("dest/2.audio(0).wav")
            ]
        );
    }

    #[test]
    fn open_all_reports_missing_track() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1.audio(0).wav"), b"AAAA").unwrap();
        let paths = reference_paths(dir.path(), DEFAULT_REFERENCE_PATTERN, 2);
        let err = TrackSet::open_all(&paths, 4).err().unwrap();
        assert_eq!(err.track, 2);
        assert_eq!(err.path, paths[1]);
    }
}
