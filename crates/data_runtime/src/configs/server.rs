//! Server configuration loaded from data/config/server.toml with env overrides.
//!
//! Env overrides: `TICK_MS`, `BIND_ADDR`, `COMPRESS_THRESHOLD` (`off` disables
//! compression), `MAX_EVENTS_PER_DRAIN`, `STATS_EVERY_TICKS`.

use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerCfg {
    /// Nominal step interval.
    pub tick_ms: u64,
    pub world: WorldCfg,
    pub view: ViewCfg,
    pub net: NetCfg,
    pub events: EventsCfg,
    /// Log a diagnostics line every N ticks (0 disables).
    pub stats_every_ticks: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorldCfg {
    /// World size in tiles: width, height, floors.
    pub size: [u32; 3],
    /// Chunk size in tiles: width, height, depth (floors).
    pub chunk: [u32; 3],
    /// Where players appear and are restored after death.
    pub spawn: [u16; 2],
    pub spawn_floor: u8,
    /// Delay before a dead monster reappears at its home.
    pub respawn_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ViewCfg {
    /// Horizontal visible radius in tiles.
    pub radius_x: u16,
    /// Vertical (north/south) visible radius in tiles.
    pub radius_y: u16,
    /// Floors visible above and below the viewer.
    pub floors: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NetCfg {
    pub bind_addr: String,
    /// Batches queued per connection before it is treated as a slow consumer.
    pub outbound_capacity: usize,
    /// Largest inbound payload accepted before the session is dropped.
    pub max_inbound_frame: usize,
    /// Frames read from one connection per step; the rest wait their turn.
    pub max_frames_per_step: usize,
    /// Compress a flush batch once its body reaches this many bytes.
    pub compress_threshold: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EventsCfg {
    /// Upper bound on callbacks fired in one drain.
    pub max_events_per_drain: usize,
}

impl Default for ServerCfg {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            world: WorldCfg::default(),
            view: ViewCfg::default(),
            net: NetCfg::default(),
            events: EventsCfg::default(),
            stats_every_ticks: 200,
        }
    }
}

impl Default for WorldCfg {
    fn default() -> Self {
        Self {
            size: [288, 224, 16],
            chunk: [9, 7, 8],
            spawn: [32, 32],
            spawn_floor: 7,
            respawn_ms: 60_000,
        }
    }
}

impl Default for ViewCfg {
    fn default() -> Self {
        Self {
            radius_x: 8,
            radius_y: 6,
            floors: 2,
        }
    }
}

impl Default for NetCfg {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7171".to_string(),
            outbound_capacity: 64,
            max_inbound_frame: 4096,
            max_frames_per_step: 64,
            compress_threshold: Some(1024),
        }
    }
}

impl Default for EventsCfg {
    fn default() -> Self {
        Self {
            max_events_per_drain: 10_000,
        }
    }
}

impl ServerCfg {
    /// Reject configurations the world cannot be built from.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.tick_ms > 0, "tick_ms must be > 0");
        ensure!(
            self.world.size.iter().all(|&d| d > 0),
            "world.size must be non-zero on every axis: {:?}",
            self.world.size
        );
        ensure!(
            self.world.chunk.iter().all(|&d| d > 0),
            "world.chunk must be non-zero on every axis: {:?}",
            self.world.chunk
        );
        ensure!(
            self.world.size[0] <= u32::from(u16::MAX) + 1
                && self.world.size[1] <= u32::from(u16::MAX) + 1
                && self.world.size[2] <= u32::from(u8::MAX) + 1,
            "world.size exceeds the addressable position range: {:?}",
            self.world.size
        );
        ensure!(
            u32::from(self.world.spawn[0]) < self.world.size[0]
                && u32::from(self.world.spawn[1]) < self.world.size[1]
                && u32::from(self.world.spawn_floor) < self.world.size[2],
            "spawn point lies outside the world"
        );
        ensure!(
            self.events.max_events_per_drain > 0,
            "events.max_events_per_drain must be > 0"
        );
        Ok(())
    }
}

fn clamp(mut cfg: ServerCfg) -> ServerCfg {
    if cfg.net.outbound_capacity == 0 {
        cfg.net.outbound_capacity = 1;
    }
    if cfg.net.max_inbound_frame > usize::from(u16::MAX) {
        cfg.net.max_inbound_frame = usize::from(u16::MAX);
    }
    cfg.net.max_frames_per_step = cfg.net.max_frames_per_step.max(1);
    cfg
}

fn apply_env(cfg: &mut ServerCfg) {
    if let Some(ms) = std::env::var("TICK_MS").ok().and_then(|v| v.parse().ok()) {
        cfg.tick_ms = ms;
    }
    if let Ok(addr) = std::env::var("BIND_ADDR") {
        cfg.net.bind_addr = addr;
    }
    if let Ok(v) = std::env::var("COMPRESS_THRESHOLD") {
        if v.eq_ignore_ascii_case("off") {
            cfg.net.compress_threshold = None;
        } else if let Ok(n) = v.parse() {
            cfg.net.compress_threshold = Some(n);
        }
    }
    if let Some(n) = std::env::var("MAX_EVENTS_PER_DRAIN").ok().and_then(|v| v.parse().ok()) {
        cfg.events.max_events_per_drain = n;
    }
    if let Some(n) = std::env::var("STATS_EVERY_TICKS").ok().and_then(|v| v.parse().ok()) {
        cfg.stats_every_ticks = n;
    }
}

/// Parse a server config file (no env overrides).
pub fn load_from(path: &Path) -> Result<ServerCfg> {
    let txt = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ServerCfg = toml::from_str(&txt).context("parse server TOML")?;
    let cfg = clamp(cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Load from `path` if given, else data/config/server.toml, else defaults;
/// then apply env overrides and validate.
pub fn load(path: Option<&Path>) -> Result<ServerCfg> {
    let default_path = crate::data_root().join("config/server.toml");
    let path = path.unwrap_or(&default_path);
    let mut cfg = if path.is_file() {
        load_from(path)?
    } else {
        ServerCfg::default()
    };
    apply_env(&mut cfg);
    let cfg = clamp(cfg);
    cfg.validate()?;
    Ok(cfg)
}

pub fn load_default() -> Result<ServerCfg> {
    load(None)
}
