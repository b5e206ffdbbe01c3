// Sector mapping: reconstruct which track each image block belongs to.
//
// The image is consumed strictly forward, one block per iteration. For every
// block a `BlockMatcher` decides, by exact byte equality against the blocks
// under each reference track's cursor, which track wrote it. Two policies
// exist:
//   - `sequential`: tracks advance as soon as they match
//   - `round_robin`: each track may match once per interleave round, and all
//     tracks advance together when the round closes
//
// Both scan tracks in index order and take the first match. When two tracks
// hold identical bytes at the same step the lower track number wins.

pub mod round_robin;
pub mod sequential;

use std::fmt;
use std::io::{self, Read, Seek};

use log::{error, info};
use thiserror::Error;

use crate::block::{BlockSource, DEFAULT_BLOCK_SIZE};
use crate::track::TrackSet;

pub use round_robin::RoundRobinMatcher;
pub use sequential::SequentialMatcher;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Matching policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// First exhaustion wins: a matching track advances immediately.
    Sequential,
    /// Round-robin claim: one match per track per round.
    #[default]
    RoundRobin,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => f.write_str("sequential"),
            Self::RoundRobin => f.write_str("round-robin"),
        }
    }
}

/// Configuration for a mapping run.
#[derive(Debug, Clone)]
pub struct MapOptions {
    /// Block size in bytes.
    pub block_size: usize,
    /// Number of image blocks to map. `None` maps until the image ends.
    pub count: Option<u64>,
    pub policy: Policy,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            count: None,
            policy: Policy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Where an image block sits in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// 0-based iteration number.
    pub index: u64,
    /// Absolute byte offset in the image.
    pub offset: u64,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image block {} at {:#x}", self.index, self.offset)
    }
}

/// Result of matching one image block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// The block belongs to this 1-based track number.
    Track(usize),
    /// No track was credited and that is not an error (every track finished).
    Unassigned,
}

/// Fatal mapping conditions. Each one ends the run.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("image exhausted after {read} of {requested} requested blocks")]
    ImageExhausted { requested: u64, read: u64 },

    #[error("track {track} exhausted while {at} still matches it")]
    TrackExhausted { track: usize, at: Position },

    #[error("no consistent match for {at}")]
    NoConsistentMatch { at: Position },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Statistics returned by a mapping run.
#[derive(Debug, Clone, Default)]
pub struct MapStats {
    pub policy: Policy,
    /// Image blocks consumed.
    pub blocks_read: u64,
    /// Blocks credited to each track, indexed by track number - 1.
    pub per_track: Vec<u64>,
    /// Blocks left unassigned because every track had finished.
    pub unassigned: u64,
    /// Completed interleave rounds (round-robin only).
    pub rounds: u64,
}

impl MapStats {
    fn new(policy: Policy, num_tracks: usize) -> Self {
        Self {
            policy,
            per_track: vec![0; num_tracks],
            ..Default::default()
        }
    }

    fn record(&mut self, assignment: Assignment) {
        self.blocks_read += 1;
        match assignment {
            Assignment::Track(n) => self.per_track[n - 1] += 1,
            Assignment::Unassigned => self.unassigned += 1,
        }
    }

    /// Total blocks credited to some track.
    pub fn assigned(&self) -> u64 {
        self.per_track.iter().sum()
    }
}

// ---------------------------------------------------------------------------
// Matcher trait
// ---------------------------------------------------------------------------

/// A policy that assigns image blocks to reference tracks.
pub trait BlockMatcher {
    /// Decide which track wrote `block`, updating track cursors.
    fn match_block<R: Read + Seek>(
        &mut self,
        tracks: &mut TrackSet<R>,
        block: &[u8],
        at: Position,
    ) -> Result<Assignment, MatchError>;

    /// Number of interleave rounds closed so far.
    fn rounds_completed(&self) -> u64 {
        0
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Map image blocks to tracks until `opts.count` blocks are consumed (or the
/// image ends when no count is given).
///
/// `on_assign` is invoked after every resolved block, in image order.
pub fn map_blocks<R, T, F>(
    image: &mut BlockSource<R>,
    tracks: &mut TrackSet<T>,
    opts: &MapOptions,
    on_assign: F,
) -> Result<MapStats, MatchError>
where
    R: Read + Seek,
    T: Read + Seek,
    F: FnMut(Position, Assignment) -> io::Result<()>,
{
    if tracks.is_empty() {
        error!("no reference tracks to map against");
        return Err(MatchError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "at least one reference track is required",
        )));
    }
    info!(
        "mapping {} tracks with {} policy, block size {:#x}",
        tracks.len(),
        opts.policy,
        image.block_size()
    );
    match opts.policy {
        Policy::Sequential => run(SequentialMatcher::new(), image, tracks, opts, on_assign),
        Policy::RoundRobin => run(
            RoundRobinMatcher::new(tracks.len()),
            image,
            tracks,
            opts,
            on_assign,
        ),
    }
}

fn run<M, R, T, F>(
    mut matcher: M,
    image: &mut BlockSource<R>,
    tracks: &mut TrackSet<T>,
    opts: &MapOptions,
    mut on_assign: F,
) -> Result<MapStats, MatchError>
where
    M: BlockMatcher,
    R: Read + Seek,
    T: Read + Seek,
    F: FnMut(Position, Assignment) -> io::Result<()>,
{
    let mut stats = MapStats::new(opts.policy, tracks.len());

    loop {
        if opts.count.is_some_and(|limit| stats.blocks_read >= limit) {
            break;
        }
        let at = Position {
            index: stats.blocks_read,
            offset: image.position(),
        };
        let Some(block) = image.next_block()? else {
            if let Some(requested) = opts.count {
                error!("image exhausted at {:#x}", at.offset);
                return Err(MatchError::ImageExhausted {
                    requested,
                    read: stats.blocks_read,
                });
            }
            break;
        };
        let assignment = matcher.match_block(tracks, block, at)?;
        stats.record(assignment);
        on_assign(at, assignment)?;
    }

    stats.rounds = matcher.rounds_completed();
    info!(
        "mapped {} blocks: {} assigned, {} unassigned, {} rounds",
        stats.blocks_read,
        stats.assigned(),
        stats.unassigned,
        stats.rounds
    );
    Ok(stats)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
