//! Matchmaking flow -- resolve a connect request to a server, provisioning
//! one when quick play finds nothing. A provisioned server is started on its
//! node first, then the player's encryption parameters are relayed to the
//! hosting node before the server is handed back.
//!
//! Resolution order:
//!   1. non-empty secret -> that server, or InvalidSecret
//!   2. non-empty code   -> that server, or InvalidCode
//!   3. a resolved server that is full -> ServerAtCapacity
//!   4. otherwise quick play (public lobbies only), then provisioning
//!
//! A provisioned server the node never confirms is removed again and the
//! request fails with NoAvailableDedicatedServers.
//!
//! The resulting `ConnectToServerResult` maps onto the client-facing
//! `PlacementErrorCode` through `From`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use encore_coordinator::NodeCoordinator;
use encore_protocol::CreateServer;
use encore_registry::{
    BeatmapLevelSelectionMask, DiscoveryPolicy, GameplayServerConfiguration, PlacementCriteria,
    Player, Server, ServerRegistry,
};
use rand::Rng;
use serde::Serialize;

/// Invite code alphabet: no 0/O or 1/I lookalikes.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const SECRET_LENGTH: usize = 32;
const MINT_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectToServerResult {
    Success,
    InvalidSecret,
    InvalidCode,
    InvalidPassword,
    ServerAtCapacity,
    NoAvailableDedicatedServers,
    RelayTimedOut,
    UnknownError,
}

/// What the game client is told when placement fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlacementErrorCode {
    Success,
    ServerDoesNotExist,
    ServerAtCapacity,
    MatchmakingTimeout,
    Unknown,
}

impl From<ConnectToServerResult> for PlacementErrorCode {
    fn from(result: ConnectToServerResult) -> Self {
        match result {
            ConnectToServerResult::Success => PlacementErrorCode::Success,
            ConnectToServerResult::InvalidPassword
            | ConnectToServerResult::InvalidCode
            | ConnectToServerResult::InvalidSecret => PlacementErrorCode::ServerDoesNotExist,
            ConnectToServerResult::ServerAtCapacity => PlacementErrorCode::ServerAtCapacity,
            ConnectToServerResult::NoAvailableDedicatedServers
            | ConnectToServerResult::RelayTimedOut => PlacementErrorCode::MatchmakingTimeout,
            ConnectToServerResult::UnknownError => PlacementErrorCode::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub player: Player,
    pub random: Vec<u8>,
    pub public_key: Vec<u8>,
    /// Private game secret; empty for code or quick play.
    pub secret: String,
    /// Private game code; empty for secret or quick play.
    pub code: String,
    pub selection_mask: BeatmapLevelSelectionMask,
    pub configuration: GameplayServerConfiguration,
}

impl ConnectRequest {
    pub fn criteria(&self) -> PlacementCriteria {
        PlacementCriteria {
            invite_policy: self.configuration.invite_policy,
            gameplay_server_mode: self.configuration.gameplay_server_mode,
            song_selection_mode: self.configuration.song_selection_mode,
            control_settings: self.configuration.gameplay_server_control_settings,
            difficulty_mask: self.selection_mask.difficulties,
            modifiers_mask: self.selection_mask.modifiers,
            song_pack_top: self.selection_mask.song_packs_top,
            song_pack_bottom: self.selection_mask.song_packs_bottom,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectResponse {
    /// User id of the server's host.
    pub manager_id: String,
    pub remote_endpoint: SocketAddr,
    pub secret: String,
    pub code: String,
    pub configuration: GameplayServerConfiguration,
    pub selection_mask: BeatmapLevelSelectionMask,
}

impl From<&Server> for ConnectResponse {
    fn from(server: &Server) -> Self {
        Self {
            manager_id: server.host.user_id.clone(),
            remote_endpoint: server.remote_endpoint,
            secret: server.secret.clone(),
            code: server.code.clone(),
            configuration: server.configuration,
            selection_mask: server.selection_mask(),
        }
    }
}

// ============================================================================
// Provisioning
// ============================================================================

/// Creates a server when no existing one fits a request.
pub trait ServerProvisioner: Send + Sync {
    /// Create and register a server hosted by the requesting player.
    /// `None` when no node can take it.
    fn provision(&self, request: &ConnectRequest) -> Option<Server>;
}

/// Places new servers on the online node hosting the fewest, assigning each
/// the lowest free instance port on that node.
pub struct NodeProvisioner {
    coordinator: Arc<NodeCoordinator>,
    registry: ServerRegistry,
    instance_port: u16,
    code_length: usize,
}

impl NodeProvisioner {
    pub fn new(
        coordinator: Arc<NodeCoordinator>,
        registry: ServerRegistry,
        instance_port: u16,
        code_length: usize,
    ) -> Self {
        Self {
            coordinator,
            registry,
            instance_port,
            code_length,
        }
    }

    /// Online node with the fewest servers, plus the ports already in use
    /// on it. Ties go to the lowest address.
    fn pick_node(&self) -> Option<(std::net::IpAddr, Vec<u16>)> {
        let servers = self.registry.get_public_server_list();
        self.coordinator
            .online_nodes()
            .into_iter()
            .map(|node| {
                let ports: Vec<u16> = servers
                    .iter()
                    .filter(|s| s.remote_endpoint.ip() == node.address)
                    .map(|s| s.remote_endpoint.port())
                    .collect();
                (node.address, ports)
            })
            .min_by_key(|(address, ports)| (ports.len(), *address))
    }

    fn mint_code(&self, rng: &mut impl Rng) -> String {
        (0..self.code_length)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }
}

fn mint_secret(rng: &mut impl Rng) -> String {
    rng.sample_iter(&rand::distributions::Alphanumeric)
        .take(SECRET_LENGTH)
        .map(char::from)
        .collect()
}

impl ServerProvisioner for NodeProvisioner {
    fn provision(&self, request: &ConnectRequest) -> Option<Server> {
        let Some((address, used_ports)) = self.pick_node() else {
            tracing::info!("match: no online node to provision on");
            return None;
        };
        let port = (self.instance_port..=u16::MAX).find(|p| !used_ports.contains(p))?;

        let mut rng = rand::thread_rng();
        let host = Arc::new(request.player.clone());
        for _ in 0..MINT_ATTEMPTS {
            let code = self.mint_code(&mut rng);
            if self.registry.get_server_by_code(&code).is_some() {
                continue;
            }
            let server = Server {
                host: host.clone(),
                remote_endpoint: SocketAddr::new(address, port),
                secret: mint_secret(&mut rng),
                code,
                is_public: request.configuration.discovery_policy == DiscoveryPolicy::Public,
                is_in_gameplay: false,
                beatmap_difficulty_mask: request.selection_mask.difficulties,
                gameplay_modifiers_mask: request.selection_mask.modifiers,
                configuration: request.configuration,
                song_pack_bloom_filter_top: request.selection_mask.song_packs_top,
                song_pack_bloom_filter_bottom: request.selection_mask.song_packs_bottom,
                current_player_count: 0,
                random: request.random.clone(),
                public_key: request.public_key.clone(),
            };
            if self.registry.add_server(server.clone()) {
                tracing::info!(
                    node = %address,
                    port,
                    code = %server.code,
                    host = %request.player.user_id,
                    "match: server provisioned"
                );
                return Some(server);
            }
        }
        tracing::warn!(node = %address, "match: could not mint a unique secret and code");
        None
    }
}

/// Instance start request for `server`, with enum settings as their wire
/// discriminants.
pub fn create_server_message(server: &Server) -> CreateServer {
    let configuration = &server.configuration;
    CreateServer {
        secret: server.secret.clone(),
        code: server.code.clone(),
        instance_endpoint: server.remote_endpoint,
        host_user_id: server.host.user_id.clone(),
        max_player_count: configuration.max_player_count,
        discovery_policy: configuration.discovery_policy as u8,
        invite_policy: configuration.invite_policy as u8,
        gameplay_server_mode: configuration.gameplay_server_mode as u8,
        song_selection_mode: configuration.song_selection_mode as u8,
        control_settings: configuration.gameplay_server_control_settings.0,
        difficulties: server.beatmap_difficulty_mask.0,
        modifiers: server.gameplay_modifiers_mask.0,
        song_packs_top: server.song_pack_bloom_filter_top,
        song_packs_bottom: server.song_pack_bloom_filter_bottom,
    }
}

// ============================================================================
// Matchmaker
// ============================================================================

pub struct Matchmaker {
    registry: ServerRegistry,
    coordinator: Arc<NodeCoordinator>,
    provisioner: Arc<dyn ServerProvisioner>,
    relay_timeout: Duration,
}

impl Matchmaker {
    pub fn new(
        registry: ServerRegistry,
        coordinator: Arc<NodeCoordinator>,
        provisioner: Arc<dyn ServerProvisioner>,
        relay_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            coordinator,
            provisioner,
            relay_timeout,
        }
    }

    /// Resolve `request` to a server and hand the player's encryption
    /// parameters to its node.
    pub async fn connect(
        &self,
        request: &ConnectRequest,
    ) -> Result<ConnectResponse, ConnectToServerResult> {
        let (server, created) = self.resolve(request)?;

        if let Err(result) = self.hand_off(request, &server, created).await {
            if created {
                self.registry.remove_server(&server.secret);
            }
            tracing::info!(
                user = %request.player.user_id,
                node = %server.remote_endpoint,
                ?result,
                "match: connect failed"
            );
            return Err(result);
        }

        tracing::info!(
            user = %request.player.user_id,
            node = %server.remote_endpoint,
            code = %server.code,
            created,
            "match: player placed"
        );
        Ok(ConnectResponse::from(&server))
    }

    /// Start a freshly provisioned instance on its node, then relay the
    /// player's encryption parameters to it.
    async fn hand_off(
        &self,
        request: &ConnectRequest,
        server: &Server,
        created: bool,
    ) -> Result<(), ConnectToServerResult> {
        if created {
            let started = self
                .coordinator
                .send_and_await_server_created_on_node(
                    create_server_message(server),
                    self.relay_timeout,
                )
                .await;
            match started {
                Ok(true) => {}
                Ok(false) => return Err(ConnectToServerResult::NoAvailableDedicatedServers),
                Err(e) => {
                    tracing::warn!(secret = %server.secret, "match: create failed: {e}");
                    return Err(ConnectToServerResult::UnknownError);
                }
            }
        }

        let relayed = self
            .coordinator
            .send_and_await_player_encryption_received_from_node(
                server.remote_endpoint,
                request.player.endpoint,
                &request.player.user_id,
                &request.player.user_name,
                request.player.platform,
                &request.random,
                &request.public_key,
                self.relay_timeout,
            )
            .await;
        match relayed {
            Ok(true) => Ok(()),
            Ok(false) => Err(ConnectToServerResult::RelayTimedOut),
            Err(e) => {
                tracing::warn!(secret = %server.secret, "match: relay failed: {e}");
                Err(ConnectToServerResult::UnknownError)
            }
        }
    }

    /// Same as `connect`, flattened to the client-facing error code.
    pub async fn connect_for_placement(
        &self,
        request: &ConnectRequest,
    ) -> Result<ConnectResponse, PlacementErrorCode> {
        self.connect(request).await.map_err(PlacementErrorCode::from)
    }

    /// Pick the target server. The flag is true when it was created for
    /// this request.
    fn resolve(&self, request: &ConnectRequest) -> Result<(Server, bool), ConnectToServerResult> {
        let targeted = if !request.secret.is_empty() {
            Some(
                self.registry
                    .get_server(&request.secret)
                    .ok_or(ConnectToServerResult::InvalidSecret)?,
            )
        } else if !request.code.is_empty() {
            Some(
                self.registry
                    .get_server_by_code(&request.code.to_uppercase())
                    .ok_or(ConnectToServerResult::InvalidCode)?,
            )
        } else {
            None
        };

        if let Some(server) = targeted {
            if server.is_full() {
                return Err(ConnectToServerResult::ServerAtCapacity);
            }
            return Ok((server, false));
        }

        if request.configuration.discovery_policy == DiscoveryPolicy::Public {
            if let Some(server) = self.registry.find_available(&request.criteria()) {
                return Ok((server, false));
            }
        }

        self.provisioner
            .provision(request)
            .map(|server| (server, true))
            .ok_or(ConnectToServerResult::NoAvailableDedicatedServers)
    }
}
