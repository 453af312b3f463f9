// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Driver tunables.  Everything has a default matching the values the
//! protocol was brought up with; a YAML file can override them.

use std::{fs, path::{Path, PathBuf}, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::dma::PAGE_SIZE;

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Config {
    /// Channel and pool geometry.
    #[serde(default)]
    pub adapter: AdapterConfig,
    /// Attach-time handshake budget.
    #[serde(default)]
    pub handshake: HandshakeConfig,
    /// Polled-submission budget.
    #[serde(default)]
    pub poll: PollConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AdapterConfig {
    /// Ring buffer size in pages.
    #[serde(default = "default_ring_pages")]
    pub ring_pages: usize,
    /// Commands in flight; also the openings count advertised to the
    /// midlayer.
    #[serde(default = "default_max_ccbs")]
    pub max_ccbs: usize,
    /// Largest single transfer, in bytes.  Page-aligned.
    #[serde(default = "default_max_transfer")]
    pub max_transfer: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct HandshakeConfig {
    /// How long one init command may wait for its reply.
    #[serde(default = "default_handshake_timeout_ms")]
    pub timeout_ms: u64,
    /// Send attempts while the ring reports it is full.
    #[serde(default = "default_send_retries")]
    pub send_retries: u32,
    /// Pause between those attempts.
    #[serde(default = "default_retry_tick_ms")]
    pub retry_tick_ms: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PollConfig {
    /// Iterations of the polled-completion wait loop.
    #[serde(default = "default_poll_budget")]
    pub budget: u32,
    /// Sleep per iteration.
    #[serde(default = "default_sleep_tick_ms")]
    pub sleep_tick_ms: u64,
    /// Busy delay per iteration when sleeping is not allowed.
    #[serde(default = "default_busy_delay_us")]
    pub busy_delay_us: u64,
}

fn default_ring_pages() -> usize {
    20
}
fn default_max_ccbs() -> usize {
    128
}
fn default_max_transfer() -> u32 {
    64 * 1024
}
fn default_handshake_timeout_ms() -> u64 {
    5_000
}
fn default_send_retries() -> u32 {
    10
}
fn default_retry_tick_ms() -> u64 {
    10
}
fn default_poll_budget() -> u32 {
    1_000
}
fn default_sleep_tick_ms() -> u64 {
    10
}
fn default_busy_delay_us() -> u64 {
    100
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            ring_pages: default_ring_pages(),
            max_ccbs: default_max_ccbs(),
            max_transfer: default_max_transfer(),
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_handshake_timeout_ms(),
            send_retries: default_send_retries(),
            retry_tick_ms: default_retry_tick_ms(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            budget: default_poll_budget(),
            sleep_tick_ms: default_sleep_tick_ms(),
            busy_delay_us: default_busy_delay_us(),
        }
    }
}

impl AdapterConfig {
    #[inline]
    pub fn ring_size(&self) -> usize {
        self.ring_pages * PAGE_SIZE
    }

    /// Largest gather list a transfer may need: one page per full page
    /// of the maximum transfer, plus one for a straddling start.
    #[inline]
    pub fn max_sge(&self) -> usize {
        self.max_transfer as usize / PAGE_SIZE + 1
    }
}

impl HandshakeConfig {
    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[inline]
    pub fn retry_tick(&self) -> Duration {
        Duration::from_millis(self.retry_tick_ms)
    }
}

impl PollConfig {
    #[inline]
    pub fn sleep_tick(&self) -> Duration {
        Duration::from_millis(self.sleep_tick_ms)
    }

    #[inline]
    pub fn busy_delay(&self) -> Duration {
        Duration::from_micros(self.busy_delay_us)
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("failed to read config file: {}", path.as_ref().display())
        })?;
        let cfg: Config = serde_yaml::from_str(&raw).with_context(|| {
            format!("failed to parse config file: {}", path.as_ref().display())
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.adapter.ring_pages > 0, "ring_pages must be positive");
        ensure!(
            self.adapter.max_ccbs > 0 && self.adapter.max_ccbs <= u16::MAX as usize + 1,
            "max_ccbs out of range: {}",
            self.adapter.max_ccbs
        );
        ensure!(
            self.adapter.max_transfer > 0
                && self.adapter.max_transfer as usize % PAGE_SIZE == 0,
            "max_transfer must be a positive multiple of the page size"
        );
        ensure!(
            self.handshake.send_retries > 0,
            "send_retries must be positive"
        );
        ensure!(self.poll.budget > 0, "poll budget must be positive");
        Ok(())
    }
}

/// Resolve a config path against the working directory first, then the
/// crate root, so tests behave the same from either.
pub fn resolve_config_path(path: &str) -> Result<PathBuf> {
    let direct = PathBuf::from(path);
    if direct.exists() {
        return Ok(direct);
    }
    let from_manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(path);
    ensure!(from_manifest.exists(), "config not found: {path}");
    Ok(from_manifest)
}
