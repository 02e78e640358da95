//! Encore Registry -- live index of running game server instances.
//!
//! Keyed by secret, with a secondary invite-code index and a process-wide
//! lifetime join counter. All operations are non-blocking and safe for
//! concurrent callers; per-key updates are atomic, cross-key scans see each
//! server at some consistent instant.

pub mod model;
pub mod placement;
pub mod registry;

pub use model::*;
pub use placement::{select_least_populated, PlacementCriteria, EARLY_EXIT_PLAYER_COUNT};
pub use registry::ServerRegistry;

#[cfg(test)]
pub(crate) mod fixtures;
