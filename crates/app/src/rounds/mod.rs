//! The round variant family.
//!
//! Each variant pairs the [`Collection`](crate::round::Collection)
//! accumulator (or a single keeper slot) with a quorum rule and a verdict.
//! Variants are configured at construction with their events and the state
//! keys their verdicts write, so one variant type serves many application
//! rounds.

mod collect;
mod keeper;
mod voting;

pub use collect::{
    CollectDifferentUntilAllConfig, CollectDifferentUntilAllRound,
    CollectDifferentUntilThresholdConfig, CollectDifferentUntilThresholdRound,
    CollectNonEmptyUntilThresholdConfig, CollectNonEmptyUntilThresholdRound, CollectSameConfig,
    CollectSameUntilThresholdRound,
};
pub use keeper::{OnlyKeeperSendsConfig, OnlyKeeperSendsRound};
pub use voting::{VotingConfig, VotingRound};
