//! Byzantine quorum arithmetic.
//!
//! Two predicates drive every round: "has some value reached the quorum" and
//! "can any value still reach the quorum". The second allows a round to abort
//! as soon as divergent votes make agreement impossible, instead of waiting
//! for the remaining votes to trickle in.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::identifiers::Address;

/// The Byzantine quorum size for `n` participants: `2n/3 + 1`.
///
/// Tolerates `f` faulty participants out of `n = 3f + 1`.
pub fn consensus_threshold(n: usize) -> usize {
    2 * n / 3 + 1
}

/// Failure modes of the majority predicates.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QuorumError {
    /// No value can reach the quorum with the votes still outstanding.
    #[error(
        "cannot reach quorum={quorum}, number of remaining votes={remaining}, \
         number of most voted item's votes={largest}"
    )]
    MajorityUnreachable {
        /// The quorum size.
        quorum: usize,
        /// Votes not yet delivered.
        remaining: usize,
        /// Size of the largest agreeing bucket so far.
        largest: usize,
    },

    /// The hypothetical voter has already voted.
    #[error("voter has already voted")]
    VoterAlreadyVoted,

    /// The tally is larger than the participant set.
    #[error("number of participants {participants} not consistent with {votes} votes")]
    InconsistentTally {
        /// The declared participant count.
        participants: usize,
        /// The number of votes in the tally.
        votes: usize,
    },
}

/// Consensus configuration shared by every round of a period.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsensusParams {
    max_participants: usize,
}

impl ConsensusParams {
    /// Create the parameters for a committee of `max_participants`.
    pub fn new(max_participants: usize) -> Self {
        Self { max_participants }
    }

    /// The committee size.
    pub fn max_participants(&self) -> usize {
        self.max_participants
    }

    /// The Byzantine quorum for the committee.
    pub fn consensus_threshold(&self) -> usize {
        consensus_threshold(self.max_participants)
    }
}

/// Check that some value can still reach the quorum.
///
/// Votes are keyed by participant; vote values are canonical-JSON strings so
/// bucket sizes are well defined. Fails iff
/// `remaining + largest_bucket < threshold(n)`.
pub fn check_majority_possible(
    votes_by_participant: &BTreeMap<Address, String>,
    nb_participants: usize,
) -> Result<(), QuorumError> {
    if nb_participants == 0 || votes_by_participant.len() > nb_participants {
        return Err(QuorumError::InconsistentTally {
            participants: nb_participants,
            votes: votes_by_participant.len(),
        });
    }
    if votes_by_participant.is_empty() {
        return Ok(());
    }

    let mut buckets: BTreeMap<&str, usize> = BTreeMap::new();
    for vote in votes_by_participant.values() {
        *buckets.entry(vote).or_insert(0) += 1;
    }
    let largest = buckets.values().copied().max().unwrap_or(0);
    let remaining = nb_participants - votes_by_participant.len();
    let quorum = consensus_threshold(nb_participants);

    if remaining + largest < quorum {
        return Err(QuorumError::MajorityUnreachable {
            quorum,
            remaining,
            largest,
        });
    }
    Ok(())
}

/// Check that a quorum is still achievable once `new_vote` is added.
///
/// The new voter must not already be in the tally.
pub fn check_majority_possible_with_new_voter(
    votes_by_participant: &BTreeMap<Address, String>,
    new_voter: &Address,
    new_vote: &str,
    nb_participants: usize,
) -> Result<(), QuorumError> {
    if votes_by_participant.contains_key(new_voter) {
        return Err(QuorumError::VoterAlreadyVoted);
    }
    if nb_participants == 0 || votes_by_participant.len() > nb_participants - 1 {
        return Err(QuorumError::InconsistentTally {
            participants: nb_participants,
            votes: votes_by_participant.len(),
        });
    }

    let mut hypothetical = votes_by_participant.clone();
    hypothetical.insert(new_voter.clone(), new_vote.to_owned());
    check_majority_possible(&hypothetical, nb_participants)
}

/// Whether a quorum is still achievable for the given tally.
pub fn is_majority_possible(
    votes_by_participant: &BTreeMap<Address, String>,
    nb_participants: usize,
) -> bool {
    check_majority_possible(votes_by_participant, nb_participants).is_ok()
}
