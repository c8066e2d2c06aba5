//! Round FSM and period driver for applications running on a Tendermint-style
//! consensus engine.
//!
//! The engine agrees on an ordered log of opaque transactions and drives the
//! application through the block lifecycle (`begin_block`, `deliver_tx`,
//! `end_block`, `commit`). On top of that log this crate orchestrates
//! *rounds*: bounded phases that collect signed payloads from a fixed set of
//! participants, aggregate them under a Byzantine quorum rule, and
//! deterministically transition to the next round. A *period* is the full
//! sequence of rounds forming one application cycle.
//!
//! # Architecture
//!
//! ```text
//! engine → Period → AbciApp → current Round
//!               ↘ Blockchain
//! ```
//!
//! - [`Period`] translates engine callbacks into round operations and mirrors
//!   delivered blocks into an append-only chain.
//! - [`AbciApp`] holds the current round and applies the
//!   [`AbciAppConfig`] transition table when a round produces a verdict,
//!   including block-time [`Timeouts`].
//! - The [`rounds`] module provides the round variant family: same-value,
//!   different-value, keeper-only, voting, collect-until-all.
//!
//! The whole stack is synchronous and deterministic: no wall-clock time, no
//! randomness in the replicated path, key-sorted iteration wherever order is
//! observable. Identical inputs produce identical states, events, and blocks
//! on every replica.

mod app;
mod config;
mod error;
mod period;
mod round;
pub mod rounds;
mod state;
mod timeouts;

pub use app::AbciApp;
pub use config::{AbciAppConfig, RoundFactory};
pub use error::AppError;
pub use period::Period;
pub use round::{Collection, Round, RoundContext, RoundId};
pub use state::{PeriodState, MOST_VOTED_KEEPER_KEY};
pub use timeouts::{Timeouts, UnknownTimeout};
