//! Configuration schema. Deserialized from TOML; every
//! optional field carries a `#[serde(default = "...")]`, so a minimal file
//! with only `[[listen]]` entries is valid.

use serde::Deserialize;

use crate::listener::Proto;

fn default_pid_file() -> Option<String> {
    None
}

fn default_initial_pdus() -> usize {
    64
}

fn default_high_water() -> usize {
    256
}

fn default_pdu_capacity() -> usize {
    2200
}

fn default_retransmit_initial_ms() -> u64 {
    2000
}

fn default_retransmit_max_ms() -> u64 {
    30_000
}

fn default_max_retransmits() -> u8 {
    8
}

fn default_metrics_port() -> Option<u16> {
    None
}

fn default_station_address() -> Vec<u8> {
    vec![0]
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ListenEntry {
    pub proto: Proto,
    #[serde(default = "default_iface")]
    pub iface: String,
    pub port: u16,
}

fn default_iface() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    #[serde(default = "default_initial_pdus")]
    pub initial_pdus: usize,
    #[serde(default = "default_high_water")]
    pub high_water: usize,
    #[serde(default = "default_pdu_capacity")]
    pub pdu_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_pdus: default_initial_pdus(),
            high_water: default_high_water(),
            pdu_capacity: default_pdu_capacity(),
        }
    }
}

/// ARQ retransmit scheduling parameters.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ArqConfig {
    #[serde(default = "default_retransmit_initial_ms")]
    pub retransmit_initial_ms: u64,
    #[serde(default = "default_retransmit_max_ms")]
    pub retransmit_max_ms: u64,
    #[serde(default = "default_max_retransmits")]
    pub max_retransmits: u8,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            retransmit_initial_ms: default_retransmit_initial_ms(),
            retransmit_max_ms: default_retransmit_max_ms(),
            max_retransmits: default_max_retransmits(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct TelemetryConfig {
    #[serde(default = "default_metrics_port")]
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default = "default_pid_file")]
    pub pid_file: Option<String>,
    /// This node's DTS address, as nibbles 0..15; used as the `src`
    /// field of every frame this daemon originates.
    #[serde(default = "default_station_address")]
    pub station_address: Vec<u8>,
    /// How long a clean shutdown waits for in-flight ARQ transmissions to
    /// drain before the process exits.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default)]
    pub listen: Vec<ListenEntry>,
    #[serde(default)]
    pub peer: Vec<PeerEntry>,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub arq: ArqConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            station_address: default_station_address(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            listen: Vec::new(),
            peer: Vec::new(),
            pool: PoolConfig::default(),
            arq: ArqConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}
