// Sequential policy ("first exhaustion wins").
//
// Assumes every reference track advances in image order. A track is credited
// and advanced the moment it matches; exhausted tracks are skipped for the
// rest of the run. Tracks may finish early, but a block that matches nothing
// while some track still has data means the image and references diverged.

use std::io::{Read, Seek};

use log::{debug, error, warn};

use super::{Assignment, BlockMatcher, MatchError, Position};
use crate::track::TrackSet;

/// Greedy matcher that advances a track as soon as it matches.
#[derive(Debug, Default)]
pub struct SequentialMatcher {
    /// Image blocks seen after every track finished.
    trailing: u64,
}

impl SequentialMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image blocks ignored because every track had already finished.
    pub fn trailing_blocks(&self) -> u64 {
        self.trailing
    }
}

impl BlockMatcher for SequentialMatcher {
    fn match_block<R: Read + Seek>(
        &mut self,
        tracks: &mut TrackSet<R>,
        block: &[u8],
        at: Position,
    ) -> Result<Assignment, MatchError> {
        let hit = tracks
            .as_mut_slice()
            .iter_mut()
            .find(|t| !t.is_exhausted() && t.matches(block));

        if let Some(track) = hit {
            debug!(
                "match for track {} at {at}, track cursor {}",
                track.number(),
                track.cursor()
            );
            track.advance();
            return Ok(Assignment::Track(track.number()));
        }

        if tracks.any_viable() {
            error!("unable to find match at {at}");
            return Err(MatchError::NoConsistentMatch { at });
        }

        // Every track has finished; the rest of the image is not checked.
        if self.trailing == 0 {
            warn!("all tracks finished, ignoring image from {:#x} on", at.offset);
        }
        self.trailing += 1;
        Ok(Assignment::Unassigned)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
