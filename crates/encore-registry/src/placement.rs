//! Placement search: exact-match filter, then least-populated selection
//! with an early exit.
//!
//! Selection stops at the first candidate with at most
//! `EARLY_EXIT_PLAYER_COUNT` players instead of hunting for a strictly
//! better one, keeping the scan short when thousands of lobbies match.
//! The capacity check runs on the chosen candidate only: a full best
//! candidate means "no match", never a fallback to a worse lobby.

use crate::model::*;

/// A lobby this empty is good enough; stop scanning.
pub const EARLY_EXIT_PLAYER_COUNT: i32 = 1;

/// Everything a quick-play lobby must match exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementCriteria {
    pub invite_policy: InvitePolicy,
    pub gameplay_server_mode: GameplayServerMode,
    pub song_selection_mode: SongSelectionMode,
    pub control_settings: GameplayServerControlSettings,
    pub difficulty_mask: BeatmapDifficultyMask,
    pub modifiers_mask: GameplayModifiersMask,
    pub song_pack_top: u64,
    pub song_pack_bottom: u64,
}

impl PlacementCriteria {
    /// Publicly discoverable, identical configuration and selection mask,
    /// and not mid-song.
    pub fn matches(&self, server: &Server) -> bool {
        let cfg = &server.configuration;
        cfg.discovery_policy == DiscoveryPolicy::Public
            && cfg.invite_policy == self.invite_policy
            && cfg.gameplay_server_mode == self.gameplay_server_mode
            && cfg.song_selection_mode == self.song_selection_mode
            && cfg.gameplay_server_control_settings == self.control_settings
            && server.beatmap_difficulty_mask == self.difficulty_mask
            && server.gameplay_modifiers_mask == self.modifiers_mask
            && server.song_pack_bloom_filter_top == self.song_pack_top
            && server.song_pack_bloom_filter_bottom == self.song_pack_bottom
            && !server.is_in_gameplay
    }
}

/// Pick the candidate with the fewest players, stopping early once one with
/// at most `EARLY_EXIT_PLAYER_COUNT` is held. Ties keep the earlier candidate.
pub fn select_least_populated<'a, I>(candidates: I) -> Option<&'a Server>
where
    I: IntoIterator<Item = &'a Server>,
{
    let mut candidates = candidates.into_iter();
    let mut best = candidates.next()?;
    if best.current_player_count <= EARLY_EXIT_PLAYER_COUNT {
        return Some(best);
    }
    for candidate in candidates {
        if candidate.current_player_count < best.current_player_count {
            best = candidate;
        }
        if best.current_player_count <= EARLY_EXIT_PLAYER_COUNT {
            break;
        }
    }
    Some(best)
}

/// Full placement over an ordered candidate list: filter, select, then
/// reject the selection if it is already at capacity.
pub fn place<'a, I>(criteria: &PlacementCriteria, servers: I) -> Option<&'a Server>
where
    I: IntoIterator<Item = &'a Server>,
{
    let chosen = select_least_populated(servers.into_iter().filter(|s| criteria.matches(s)))?;
    if chosen.is_full() {
        return None;
    }
    Some(chosen)
}
