// File-level helpers for mapping and extraction runs.
//
// Provides `map_file()` and `extract_file()`, which open the image, the
// reference tracks and the outputs, drive the core, and fold every failure
// into a `RecoverError` whose kind (and exit code) tells the caller what went
// wrong. Optionally computes a SHA-256 of the extracted output (feature-gated
// behind `file-io`).

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use thiserror::Error;

#[cfg(feature = "file-io")]
use sha2::Digest;

use crate::block::BlockSource;
use crate::extract::{self, ExtractError, ExtractOptions, ExtractStats, Layout};
use crate::mapping::{self, Assignment, MapOptions, MapStats, MatchError, Position};
use crate::track::{TrackOpenError, TrackSet};
use crate::wav;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error type for file-level runs.
#[derive(Debug, Error)]
pub enum RecoverError {
    /// The image could not be opened or positioned at the start offset.
    #[error("cannot open image {}: {source}", .path.display())]
    OpenImage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A reference track could not be opened.
    #[error(transparent)]
    OpenReference(#[from] TrackOpenError),
    /// An output file could not be created.
    #[error("cannot create output {}: {source}", .path.display())]
    OpenOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Map(#[from] MatchError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RecoverError {
    /// Process exit code for this failure. Each fatal condition has its own.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::OpenImage { .. } => 1,
            Self::OpenReference(_) | Self::OpenOutput { .. } => 2,
            Self::Map(MatchError::TrackExhausted { .. }) => 3,
            Self::Map(MatchError::ImageExhausted { .. })
            | Self::Extract(ExtractError::ImageExhausted { .. }) => 4,
            Self::Map(MatchError::NoConsistentMatch { .. }) => 5,
            Self::Map(MatchError::Io(_))
            | Self::Extract(ExtractError::Io(_) | ExtractError::InvalidOptions(_))
            | Self::Io(_) => 6,
        }
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by `extract_file()`.
#[derive(Debug, Clone)]
pub struct ExtractFileStats {
    pub extract: ExtractStats,
    /// Final size of the output file.
    pub output_size: u64,
    /// Whether the synthetic header sizes were patched.
    pub sizes_patched: bool,
    /// SHA-256 of the output file (if `file-io` feature is enabled).
    pub output_sha256: Option<[u8; 32]>,
}

// ---------------------------------------------------------------------------
// Default buffer size
// ---------------------------------------------------------------------------

const BUF_SIZE: usize = 64 * 1024; // 64 KiB

fn open_image(path: &Path, start_offset: u64, block_size: usize) -> Result<BlockSource<File>, RecoverError> {
    BlockSource::open(path, start_offset, block_size).map_err(|source| RecoverError::OpenImage {
        path: path.to_path_buf(),
        source,
    })
}

fn create_output(path: &Path) -> Result<BufWriter<File>, RecoverError> {
    let file = File::create(path).map_err(|source| RecoverError::OpenOutput {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufWriter::with_capacity(BUF_SIZE, file))
}

// ---------------------------------------------------------------------------
// map_file
// ---------------------------------------------------------------------------

/// Map the blocks of the image at `image_path` onto the reference tracks at
/// `references` (track 1 first).
///
/// When `map_out` is given, one `index,offset,track` line is written and
/// flushed per image block as it is resolved; on failure the file keeps the
/// resolved prefix. A mapping error takes precedence over a failed final
/// flush.
pub fn map_file(
    image_path: &Path,
    start_offset: u64,
    references: &[PathBuf],
    map_out: Option<&Path>,
    opts: &MapOptions,
) -> Result<MapStats, RecoverError> {
    let mut image = open_image(image_path, start_offset, opts.block_size)?;
    let mut tracks = TrackSet::open_all(references, opts.block_size)?;

    let mut sink = match map_out {
        Some(path) => {
            let mut w = create_output(path)?;
            writeln!(w, "index,offset,track")?;
            Some(w)
        }
        None => None,
    };

    let result = mapping::map_blocks(&mut image, &mut tracks, opts, |at, assignment| {
        match sink.as_mut() {
            Some(w) => write_map_line(w, at, assignment),
            None => Ok(()),
        }
    });

    let flushed = sink.map_or(Ok(()), |mut w| w.flush());
    let stats = result?;
    flushed?;
    Ok(stats)
}

fn write_map_line<W: Write>(w: &mut W, at: Position, assignment: Assignment) -> io::Result<()> {
    match assignment {
        Assignment::Track(n) => writeln!(w, "{},{:#x},{n}", at.index, at.offset)?,
        Assignment::Unassigned => writeln!(w, "{},{:#x},-", at.index, at.offset)?,
    }
    w.flush()
}

// ---------------------------------------------------------------------------
// extract_file
// ---------------------------------------------------------------------------

/// Extract one channel of the image at `image_path` into `output_path`.
///
/// The output is streamed through a `BufWriter`. A failed run leaves the
/// partial output in place.
pub fn extract_file(
    image_path: &Path,
    start_offset: u64,
    output_path: &Path,
    opts: &ExtractOptions,
) -> Result<ExtractFileStats, RecoverError> {
    opts.validate()?;
    let mut image = open_image(image_path, start_offset, opts.block_size)?;
    let mut writer = create_output(output_path)?;

    let stats = extract::extract(&mut image, &mut writer, opts)?;

    let sizes_patched = match (opts.patch_sizes, opts.layout) {
        (true, Layout::Session) => {
            let data_len = stats.bytes_written - wav::HEADER_SIZE;
            wav::patch_sizes(&mut writer, data_len)?;
            info!("patched WAV header sizes for {data_len} data bytes");
            true
        }
        (true, Layout::Healthy) => {
            warn!("healthy layout copies the recorder's own header; not patching sizes");
            false
        }
        (false, _) => false,
    };

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    let output_size = file.metadata()?.len();

    #[cfg(feature = "file-io")]
    let output_sha256 = Some(sha256_file(output_path)?);
    #[cfg(not(feature = "file-io"))]
    let output_sha256: Option<[u8; 32]> = None;

    Ok(ExtractFileStats {
        extract: stats,
        output_size,
        sizes_patched,
        output_sha256,
    })
}

#[cfg(feature = "file-io")]
fn sha256_file(path: &Path) -> io::Result<[u8; 32]> {
    use std::io::Read;

    let mut file = File::open(path)?;
    let mut hasher = sha2::Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::Policy;
    use crate::track::{DEFAULT_REFERENCE_PATTERN, reference_paths};
    use tempfile::tempdir;

    fn write_refs(dir: &Path, tracks: &[&[u8]]) -> Vec<PathBuf> {
        let paths = reference_paths(dir, DEFAULT_REFERENCE_PATTERN, tracks.len());
        for (path, data) in paths.iter().zip(tracks) {
            std::fs::write(path, data).unwrap();
        }
        paths
    }

    fn map_opts(policy: Policy, count: Option<u64>) -> MapOptions {
        MapOptions {
            block_size: 4,
            count,
            policy,
        }
    }

    #[test]
    fn map_file_writes_assignment_map() {
        let dir = tempdir().unwrap();
        let refs = write_refs(dir.path(), &[b"AAAABBBB", b"CCCCDDDD"]);
        let image = dir.path().join("image.bin");
        std::fs::write(&image, b"junkAAAACCCCBBBBDDDD").unwrap();
        let map_out = dir.path().join("map.csv");

        let stats = map_file(
            &image,
            4,
            &refs,
            Some(&map_out),
            &map_opts(Policy::RoundRobin, Some(4)),
        )
        .unwrap();
        assert_eq!(stats.per_track, vec![2, 2]);
        assert_eq!(stats.rounds, 2);

        let map = std::fs::read_to_string(&map_out).unwrap();
        assert_eq!(
            map,
            "index,offset,track\n0,0x4,1\n1,0x8,2\n2,0xc,1\n3,0x10,2\n"
        );
    }

    /// Writer that records how many bytes were pending at each flush.
    #[derive(Default)]
    struct FlushLog {
        pending: usize,
        flushed: Vec<usize>,
    }

    impl Write for FlushLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.pending += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushed.push(std::mem::take(&mut self.pending));
            Ok(())
        }
    }

    #[test]
    fn map_lines_are_flushed_per_block() {
        let mut w = FlushLog::default();
        write_map_line(&mut w, Position { index: 0, offset: 0x10 }, Assignment::Track(3)).unwrap();
        write_map_line(&mut w, Position { index: 1, offset: 0x14 }, Assignment::Unassigned)
            .unwrap();
        assert_eq!(w.flushed, vec!["0,0x10,3\n".len(), "1,0x14,-\n".len()]);
        assert_eq!(w.pending, 0);
    }

    #[test]
    fn failed_map_keeps_resolved_prefix() {
        let dir = tempdir().unwrap();
        let refs = write_refs(dir.path(), &[b"AAAABBBB", b"CCCCDDDD"]);
        let image = dir.path().join("image.bin");
        std::fs::write(&image, b"AAAABBBBCCCCDDDD").unwrap();
        let map_out = dir.path().join("map.csv");

        let err = map_file(
            &image,
            0,
            &refs,
            Some(&map_out),
            &map_opts(Policy::RoundRobin, Some(4)),
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 5);
        let map = std::fs::read_to_string(&map_out).unwrap();
        assert_eq!(map, "index,offset,track\n0,0x0,1\n");
    }

    #[test]
    fn open_failures_are_distinct() {
        let dir = tempdir().unwrap();
        let refs = write_refs(dir.path(), &[b"AAAA"]);
        let missing_image = dir.path().join("nope.bin");
        let err = map_file(&missing_image, 0, &refs, None, &map_opts(Policy::Sequential, None))
            .unwrap_err();
        assert!(matches!(err, RecoverError::OpenImage { .. }));
        assert_eq!(err.exit_code(), 1);

        let image = dir.path().join("image.bin");
        std::fs::write(&image, b"AAAA").unwrap();
        let mut refs = refs;
        refs.push(dir.path().join("2.audio(0).wav"));
        let err = map_file(&image, 0, &refs, None, &map_opts(Policy::Sequential, None))
            .unwrap_err();
        assert!(matches!(err, RecoverError::OpenReference(ref e) if e.track == 2));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn image_exhaustion_exit_code() {
        let dir = tempdir().unwrap();
        let refs = write_refs(dir.path(), &[b"AAAA"]);
        let image = dir.path().join("image.bin");
        std::fs::write(&image, b"AAAA").unwrap();
        let err = map_file(&image, 0, &refs, None, &map_opts(Policy::Sequential, Some(2)))
            .unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn extract_file_patches_header_sizes() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("image.bin");
        // Two channels, one block each per group, two groups.
        std::fs::write(&image, b"a1a1b1b1a2a2b2b2").unwrap();
        let out = dir.path().join("out.wav");

        let opts = ExtractOptions {
            block_size: 4,
            num_tracks: 2,
            selected: 2,
            repetition: 1,
            count: Some(2),
            patch_sizes: true,
            ..Default::default()
        };
        let stats = extract_file(&image, 0, &out, &opts).unwrap();
        assert!(stats.sizes_patched);
        assert_eq!(stats.output_size, wav::HEADER_SIZE + 8);

        let bytes = std::fs::read(&out).unwrap();
        assert_eq!(&bytes[40..44], &8u32.to_le_bytes());
        assert_eq!(&bytes[44..], b"b1b1b2b2");
    }

    #[test]
    fn extract_file_keeps_placeholder_by_default() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("image.bin");
        std::fs::write(&image, b"a1a1b1b1").unwrap();
        let out = dir.path().join("out.wav");

        let opts = ExtractOptions {
            block_size: 4,
            num_tracks: 2,
            selected: 1,
            repetition: 1,
            count: Some(1),
            ..Default::default()
        };
        let stats = extract_file(&image, 0, &out, &opts).unwrap();
        assert!(!stats.sizes_patched);
        let bytes = std::fs::read(&out).unwrap();
        assert_eq!(&bytes[40..44], &wav::PLACEHOLDER_DATA_SIZE.to_le_bytes());
    }

    #[cfg(feature = "file-io")]
    #[test]
    fn sha256_matches_output() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("image.bin");
        std::fs::write(&image, b"a1a1b1b1").unwrap();
        let out = dir.path().join("out.wav");
        let opts = ExtractOptions {
            block_size: 4,
            num_tracks: 2,
            repetition: 1,
            count: Some(1),
            ..Default::default()
        };
        let stats = extract_file(&image, 0, &out, &opts).unwrap();
        let expected: [u8; 32] = sha2::Sha256::digest(std::fs::read(&out).unwrap()).into();
        assert_eq!(stats.output_sha256, Some(expected));
    }
}
