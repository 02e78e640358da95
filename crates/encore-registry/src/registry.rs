//! Server registry -- thread-safe index of live game servers.
//!
//! Maps secret -> Server and code -> secret. Single-key operations lock only
//! the shard holding that key; scans (listing, placement, bulk removal)
//! visit shards one at a time and may see different keys at different
//! instants, but never a half-applied update to one server.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::model::*;
use crate::placement::{self, PlacementCriteria};

#[derive(Default)]
struct Inner {
    servers: DashMap<String, Server>,
    secrets_by_code: DashMap<String, String>,
    total_joins: AtomicU64,
}

/// Shared handle to the registry. Clones see the same servers.
#[derive(Clone, Default)]
pub struct ServerRegistry {
    inner: Arc<Inner>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lifetime number of successful `increment_current_player_count` calls.
    pub fn total_player_joins(&self) -> u64 {
        self.inner.total_joins.load(Ordering::Relaxed)
    }

    /// Secrets of servers flagged public.
    pub fn get_server_secrets_list(&self) -> Vec<String> {
        self.inner
            .servers
            .iter()
            .filter(|e| e.is_public)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Servers flagged public.
    pub fn get_server_list(&self) -> Vec<Server> {
        self.inner
            .servers
            .iter()
            .filter(|e| e.is_public)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Every secret, regardless of visibility (admin view).
    pub fn get_public_server_secrets_list(&self) -> Vec<String> {
        self.inner.servers.iter().map(|e| e.key().clone()).collect()
    }

    /// Every server, regardless of visibility (admin view).
    pub fn get_public_server_list(&self) -> Vec<Server> {
        self.inner
            .servers
            .iter()
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn get_public_server_count(&self) -> usize {
        self.inner.servers.iter().filter(|e| e.is_public).count()
    }

    pub fn get_server_count(&self) -> usize {
        self.inner.servers.len()
    }

    pub fn get_server(&self, secret: &str) -> Option<Server> {
        self.inner.servers.get(secret).map(|e| e.value().clone())
    }

    pub fn get_server_by_code(&self, code: &str) -> Option<Server> {
        let secret = self.inner.secrets_by_code.get(code)?.value().clone();
        self.get_server(&secret)
    }

    /// Find a quick-play lobby matching every criterion exactly.
    ///
    /// Candidates are snapshotted first so the selection scan runs without
    /// holding any shard lock.
    #[allow(clippy::too_many_arguments)]
    pub fn get_available_public_server(
        &self,
        invite_policy: InvitePolicy,
        gameplay_server_mode: GameplayServerMode,
        song_selection_mode: SongSelectionMode,
        control_settings: GameplayServerControlSettings,
        difficulty_mask: BeatmapDifficultyMask,
        modifiers_mask: GameplayModifiersMask,
        song_pack_top: u64,
        song_pack_bottom: u64,
    ) -> Option<Server> {
        let criteria = PlacementCriteria {
            invite_policy,
            gameplay_server_mode,
            song_selection_mode,
            control_settings,
            difficulty_mask,
            modifiers_mask,
            song_pack_top,
            song_pack_bottom,
        };
        self.find_available(&criteria)
    }

    /// `get_available_public_server` taking the criteria as one value.
    pub fn find_available(&self, criteria: &PlacementCriteria) -> Option<Server> {
        let candidates: Vec<Server> = self
            .inner
            .servers
            .iter()
            .filter(|e| criteria.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let chosen = placement::place(criteria, &candidates).cloned();
        match &chosen {
            Some(server) => tracing::debug!(
                secret = %server.secret,
                players = server.current_player_count,
                candidates = candidates.len(),
                "registry: placement match"
            ),
            None => tracing::debug!(
                candidates = candidates.len(),
                "registry: best candidate is full"
            ),
        }
        chosen
    }

    /// Insert a server. Returns false if the secret is already taken.
    /// A non-empty code is (re)pointed at this server.
    pub fn add_server(&self, server: Server) -> bool {
        let secret = server.secret.clone();
        let code = server.code.clone();
        match self.inner.servers.entry(secret.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!(%secret, "registry: duplicate secret rejected");
                return false;
            }
            Entry::Vacant(slot) => {
                // Map the code while the slot is held so a concurrent remove
                // of this secret always finds the mapping to drop
                if !code.is_empty() {
                    self.inner.secrets_by_code.insert(code.clone(), secret.clone());
                }
                slot.insert(server);
            }
        }
        tracing::info!(
            %secret,
            %code,
            servers = self.inner.servers.len(),
            "registry: server added"
        );
        true
    }

    /// Remove a server and its code mapping. Returns false if absent.
    pub fn remove_server(&self, secret: &str) -> bool {
        let Some((_, server)) = self.inner.servers.remove(secret) else {
            return false;
        };
        // Only drop the code if it still points here; a newer server may own it
        self.inner
            .secrets_by_code
            .remove_if(&server.code, |_, owner| owner == secret);
        tracing::info!(
            %secret,
            servers = self.inner.servers.len(),
            "registry: server removed"
        );
        true
    }

    /// Remove every server hosted on the node at `address`. Returns how many
    /// were removed. Each removal is atomic; the sweep as a whole is not.
    pub fn remove_servers_with_endpoint(&self, address: IpAddr) -> usize {
        let secrets: Vec<String> = self
            .inner
            .servers
            .iter()
            .filter(|e| e.remote_endpoint.ip() == address)
            .map(|e| e.key().clone())
            .collect();

        let removed = secrets.iter().filter(|s| self.remove_server(s)).count();
        if removed > 0 {
            tracing::info!(%address, removed, "registry: purged servers of node");
        }
        removed
    }

    /// Count a joined player. Also advances the lifetime join counter.
    pub fn increment_current_player_count(&self, secret: &str) -> bool {
        let Some(mut server) = self.inner.servers.get_mut(secret) else {
            return false;
        };
        server.current_player_count += 1;
        drop(server);
        self.inner.total_joins.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Count a departed player. No floor at zero.
    pub fn decrement_current_player_count(&self, secret: &str) -> bool {
        self.update(secret, |s| s.current_player_count -= 1)
    }

    pub fn update_current_player_count(&self, secret: &str, current_player_count: i32) -> bool {
        self.update(secret, |s| s.current_player_count = current_player_count)
    }

    pub fn update_server_gameplay_state(&self, secret: &str, in_gameplay: bool) -> bool {
        self.update(secret, |s| s.is_in_gameplay = in_gameplay)
    }

    fn update(&self, secret: &str, f: impl FnOnce(&mut Server)) -> bool {
        match self.inner.servers.get_mut(secret) {
            Some(mut server) => {
                f(&mut server);
                true
            }
            None => false,
        }
    }
}
