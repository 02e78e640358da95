//! Server data model and the gameplay configuration enums it is matched on.

use std::net::SocketAddr;
use std::sync::Arc;

use encore_protocol::Platform;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscoveryPolicy {
    Hidden,
    WithCode,
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvitePolicy {
    OnlyConnectionOwnerCanInvite,
    AnyoneCanInvite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameplayServerMode {
    Countdown,
    Managed,
    QuickStartOneSong,
    Tournament,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SongSelectionMode {
    Vote,
    Random,
    OwnerPicks,
    ServerPicks,
}

/// Bit set of lobby control permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GameplayServerControlSettings(pub u8);

impl GameplayServerControlSettings {
    pub const NONE: Self = Self(0);
    pub const ALLOW_MODIFIER_SELECTION: Self = Self(1);
    pub const ALLOW_SPECTATE: Self = Self(2);
    pub const ALL: Self = Self(3);
}

/// Bit set of beatmap difficulties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BeatmapDifficultyMask(pub u8);

impl BeatmapDifficultyMask {
    pub const EASY: Self = Self(1);
    pub const NORMAL: Self = Self(2);
    pub const HARD: Self = Self(4);
    pub const EXPERT: Self = Self(8);
    pub const EXPERT_PLUS: Self = Self(16);
    pub const ALL: Self = Self(31);
}

/// Bit set of allowed gameplay modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GameplayModifiersMask(pub u16);

impl GameplayModifiersMask {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(u16::MAX);
}

/// Lobby configuration chosen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameplayServerConfiguration {
    pub max_player_count: i32,
    pub discovery_policy: DiscoveryPolicy,
    pub invite_policy: InvitePolicy,
    pub gameplay_server_mode: GameplayServerMode,
    pub song_selection_mode: SongSelectionMode,
    pub gameplay_server_control_settings: GameplayServerControlSettings,
}

/// Difficulty/modifier filter plus the song pack bloom filter words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BeatmapLevelSelectionMask {
    pub difficulties: BeatmapDifficultyMask,
    pub modifiers: GameplayModifiersMask,
    pub song_packs_top: u64,
    pub song_packs_bottom: u64,
}

/// A connected player. Servers reference their host; they do not own it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub user_id: String,
    pub user_name: String,
    pub platform: Platform,
    /// Session endpoint the player connected from.
    pub endpoint: SocketAddr,
}

/// One running game session.
#[derive(Debug, Clone)]
pub struct Server {
    pub host: Arc<Player>,
    /// Endpoint of the instance on its owning node.
    pub remote_endpoint: SocketAddr,
    pub secret: String,
    pub code: String,
    pub is_public: bool,
    pub is_in_gameplay: bool,
    pub beatmap_difficulty_mask: BeatmapDifficultyMask,
    pub gameplay_modifiers_mask: GameplayModifiersMask,
    pub configuration: GameplayServerConfiguration,
    pub song_pack_bloom_filter_top: u64,
    pub song_pack_bloom_filter_bottom: u64,
    pub current_player_count: i32,
    /// Handshake seed captured at creation.
    pub random: Vec<u8>,
    pub public_key: Vec<u8>,
}

impl Server {
    pub fn selection_mask(&self) -> BeatmapLevelSelectionMask {
        BeatmapLevelSelectionMask {
            difficulties: self.beatmap_difficulty_mask,
            modifiers: self.gameplay_modifiers_mask,
            song_packs_top: self.song_pack_bloom_filter_top,
            song_packs_bottom: self.song_pack_bloom_filter_bottom,
        }
    }

    pub fn is_full(&self) -> bool {
        self.current_player_count >= self.configuration.max_player_count
    }
}
