//! Test harness for in-process encore-master integration tests.
//!
//! Provides TestMaster (a real master on an ephemeral UDP port) and FakeNode
//! (a scripted dedicated-server node speaking the side-channel protocol).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use encore_master::config::MasterConfig;
use encore_master::matchmaking::ConnectRequest;
use encore_master::Master;
use encore_protocol::{
    node_registry, CreateServer, Message, MessageCodec, NodeMessage, NodeOnline, Platform,
    PlayerEncryptionReceived, RelayPlayerEncryption, ServerCreated,
};
use encore_registry::{
    BeatmapDifficultyMask, BeatmapLevelSelectionMask, DiscoveryPolicy, GameplayModifiersMask,
    GameplayServerConfiguration, GameplayServerControlSettings, GameplayServerMode, InvitePolicy,
    Player, SongSelectionMode,
};
use tokio::net::UdpSocket;
use tokio_util::codec::Decoder;

/// Master config with an ephemeral port and short timers. Periodic sweeps
/// are pushed out of the way; tests start sweeps explicitly.
pub fn test_config(relay_timeout_ms: u64, sweep_window_ms: u64) -> MasterConfig {
    let mut cfg = MasterConfig::default();
    cfg.master.node_listen_addr = "127.0.0.1:0".into();
    cfg.nodes.sweep_interval_secs = 3600;
    cfg.nodes.sweep_window_ms = sweep_window_ms;
    cfg.matchmaking.relay_timeout_ms = relay_timeout_ms;
    cfg
}

pub struct TestMaster {
    pub master: Master,
}

#[allow(dead_code)]
impl TestMaster {
    pub async fn start(cfg: MasterConfig) -> anyhow::Result<Self> {
        Ok(Self {
            master: Master::start(&cfg).await?,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.master.local_addr
    }

    /// Connect a fake node and wait until the master lists it online.
    pub async fn attach_node(&self, version: &str) -> anyhow::Result<FakeNode> {
        let mut node = FakeNode::bind(self.addr()).await?;
        node.send(&NodeOnline {
            version: version.into(),
        })
        .await?;
        let coordinator = self.master.coordinator.clone();
        let ip = node.local_addr()?.ip();
        wait_until(Duration::from_secs(2), || {
            coordinator
                .get_node(ip)
                .map(|n| n.is_online())
                .unwrap_or(false)
        })
        .await?;
        Ok(node)
    }

    pub async fn shutdown(self) {
        self.master.shutdown().await;
    }
}

/// A scripted node on its own UDP socket.
pub struct FakeNode {
    socket: UdpSocket,
    master: SocketAddr,
    codec: MessageCodec<NodeMessage>,
}

#[allow(dead_code)]
impl FakeNode {
    pub async fn bind(master: SocketAddr) -> anyhow::Result<Self> {
        Ok(Self {
            socket: UdpSocket::bind("127.0.0.1:0").await?,
            master,
            codec: MessageCodec::new(Arc::new(node_registry())),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn send<M: Message>(&mut self, message: &M) -> anyhow::Result<()> {
        let mut buf = BytesMut::new();
        self.codec.write_to(message, &mut buf)?;
        self.socket.send_to(&buf, self.master).await?;
        Ok(())
    }

    /// Next message from the master, or an error after `timeout`.
    pub async fn recv(&mut self, timeout: Duration) -> anyhow::Result<NodeMessage> {
        let mut buf = vec![0u8; 1536];
        let (len, _) = tokio::time::timeout(timeout, self.socket.recv_from(&mut buf)).await??;
        let mut frame = BytesMut::from(&buf[..len]);
        self.codec
            .decode(&mut frame)?
            .ok_or_else(|| anyhow::anyhow!("truncated frame from master"))
    }

    /// Expect an instance creation request and report the instance as up.
    pub async fn accept_create(&mut self, timeout: Duration) -> anyhow::Result<CreateServer> {
        let NodeMessage::CreateServer(request) = self.recv(timeout).await? else {
            anyhow::bail!("expected create request");
        };
        let created = request.reply(
            1,
            ServerCreated {
                secret: request.body.secret.clone(),
            },
        );
        self.send(&created).await?;
        Ok(request.body)
    }

    /// Expect an encryption relay and confirm it.
    pub async fn confirm_relay(&mut self, timeout: Duration) -> anyhow::Result<RelayPlayerEncryption> {
        let NodeMessage::RelayPlayerEncryption(request) = self.recv(timeout).await? else {
            anyhow::bail!("expected relay request");
        };
        let ack = request.reply(
            2,
            PlayerEncryptionReceived {
                node_endpoint: request.body.node_endpoint,
                player_endpoint: request.body.player_endpoint,
            },
        );
        self.send(&ack).await?;
        Ok(request.body)
    }
}

/// Poll `cond` every 10ms until it holds, or fail after `timeout`.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return Ok(());
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn quick_play_request(user_id: &str, port: u16) -> ConnectRequest {
    ConnectRequest {
        player: Player {
            user_id: user_id.into(),
            user_name: format!("{user_id} name"),
            platform: Platform::Steam,
            endpoint: SocketAddr::from(([203, 0, 113, 9], port)),
        },
        random: vec![0x11; 32],
        public_key: vec![0x22; 91],
        secret: String::new(),
        code: String::new(),
        selection_mask: BeatmapLevelSelectionMask {
            difficulties: BeatmapDifficultyMask::ALL,
            modifiers: GameplayModifiersMask::ALL,
            song_packs_top: 1,
            song_packs_bottom: 2,
        },
        configuration: GameplayServerConfiguration {
            max_player_count: 5,
            discovery_policy: DiscoveryPolicy::Public,
            invite_policy: InvitePolicy::AnyoneCanInvite,
            gameplay_server_mode: GameplayServerMode::Countdown,
            song_selection_mode: SongSelectionMode::Vote,
            gameplay_server_control_settings: GameplayServerControlSettings::ALL,
        },
    }
}
