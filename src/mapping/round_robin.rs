// Round-robin policy ("claim once per round").
//
// Used when the write order inside one interleave period is unknown. Each
// track may be claimed by at most one image block per round. A claim does not
// move the track's cursor; once every live track holds a claim the round
// closes, all claimed tracks advance together and every claim is released.
// This catches a track being credited twice within one cycle, which the
// sequential policy would accept.

use std::io::{Read, Seek};

use log::{debug, error, trace};

use super::{Assignment, BlockMatcher, MatchError, Position};
use crate::track::{TrackSet, TrackStream};

/// Matcher enforcing one claim per track per interleave round.
#[derive(Debug)]
pub struct RoundRobinMatcher {
    /// Claim flags, indexed by track number - 1.
    claimed: Vec<bool>,
    rounds: u64,
}

impl RoundRobinMatcher {
    pub fn new(num_tracks: usize) -> Self {
        Self {
            claimed: vec![false; num_tracks],
            rounds: 0,
        }
    }

    /// Claim flags for the current round, indexed by track number - 1.
    pub fn claims(&self) -> &[bool] {
        &self.claimed
    }

    /// A round is complete when at least one track is live and every live
    /// track holds a claim.
    fn round_complete<R: Read + Seek>(&self, tracks: &[TrackStream<R>]) -> bool {
        let mut live = false;
        for (track, &claimed) in tracks.iter().zip(&self.claimed) {
            if track.is_exhausted() {
                continue;
            }
            if !claimed {
                return false;
            }
            live = true;
        }
        live
    }

    /// Advance every claimed track by one block and release all claims.
    fn roll_over<R: Read + Seek>(&mut self, tracks: &mut [TrackStream<R>]) {
        for (track, claimed) in tracks.iter_mut().zip(self.claimed.iter_mut()) {
            if *claimed {
                track.advance();
                *claimed = false;
            }
        }
        self.rounds += 1;
        debug!("round {} complete, all tracks advanced", self.rounds);
    }
}

impl BlockMatcher for RoundRobinMatcher {
    fn match_block<R: Read + Seek>(
        &mut self,
        tracks: &mut TrackSet<R>,
        block: &[u8],
        at: Position,
    ) -> Result<Assignment, MatchError> {
        let tracks = tracks.as_mut_slice();
        let mut matched = None;

        for (i, track) in tracks.iter().enumerate() {
            if self.claimed[i] || !track.matches(block) {
                continue;
            }
            if track.is_exhausted() {
                error!("track {}: exhausted, but {at} matches its last block", track.number());
                return Err(MatchError::TrackExhausted {
                    track: track.number(),
                    at,
                });
            }
            debug!("match for track {} at {at}", track.number());
            self.claimed[i] = true;
            matched = Some(track.number());
            break;
        }

        trace!("claims after {at}: {:?}", self.claimed);
        let complete = self.round_complete(tracks);
        if complete {
            self.roll_over(tracks);
        }

        match matched {
            Some(number) => Ok(Assignment::Track(number)),
            None if complete => Ok(Assignment::Unassigned),
            None => {
                error!("unable to find match at {at}");
                Err(MatchError::NoConsistentMatch { at })
            }
        }
    }

    fn rounds_completed(&self) -> u64 {
        self.rounds
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
