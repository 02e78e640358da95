//! Protocol parameters -- the timing and size limits master and nodes agree on.
//!
//! Node-local tuning (listen addresses, queue sizes) lives in the master's
//! config file; only values both sides must share belong here.

/// A named set of protocol-level parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolParams {
    /// Version written into every frame header.
    pub protocol_version: u32,

    // -- Framing --
    /// Scratch buffer bound for one payload (type id + body).
    pub max_payload_bytes: usize,

    // -- Relay --
    /// Milliseconds a node has to acknowledge a player's encryption parameters.
    pub relay_timeout_ms: u64,

    // -- Liveness --
    /// Seconds between fleet-wide liveness sweeps.
    pub sweep_interval_secs: u64,
    /// Milliseconds every node has to answer a sweep check.
    pub sweep_window_ms: u64,
}

/// Version 1 parameters.
pub const DEFAULT_PARAMS: ProtocolParams = ProtocolParams {
    protocol_version: 1,

    // Framing
    max_payload_bytes: 412,

    // Relay
    relay_timeout_ms: 6_000,

    // Liveness
    sweep_interval_secs: 30,
    sweep_window_ms: 5_000,
};
