//! Test servers.

use std::net::SocketAddr;
use std::sync::Arc;

use encore_protocol::Platform;

use crate::model::*;

pub fn quick_play_config(max_player_count: i32) -> GameplayServerConfiguration {
    GameplayServerConfiguration {
        max_player_count,
        discovery_policy: DiscoveryPolicy::Public,
        invite_policy: InvitePolicy::AnyoneCanInvite,
        gameplay_server_mode: GameplayServerMode::Countdown,
        song_selection_mode: SongSelectionMode::Vote,
        gameplay_server_control_settings: GameplayServerControlSettings::ALL,
    }
}

pub fn server(secret: &str, node: &str, players: i32) -> Server {
    let host = Arc::new(Player {
        user_id: format!("host-{secret}"),
        user_name: "Host".into(),
        platform: Platform::Steam,
        endpoint: "198.51.100.1:40000".parse().unwrap(),
    });
    let node: SocketAddr = node.parse().unwrap();
    Server {
        host,
        remote_endpoint: node,
        secret: secret.into(),
        code: format!("C{secret}").to_uppercase(),
        is_public: true,
        is_in_gameplay: false,
        beatmap_difficulty_mask: BeatmapDifficultyMask::ALL,
        gameplay_modifiers_mask: GameplayModifiersMask::ALL,
        configuration: quick_play_config(5),
        song_pack_bloom_filter_top: 0xAAAA,
        song_pack_bloom_filter_bottom: 0x5555,
        current_player_count: players,
        random: vec![1; 32],
        public_key: vec![2; 91],
    }
}
