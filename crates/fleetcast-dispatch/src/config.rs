//! Dispatch tuning loaded from TOML.

use std::path::Path;
use std::time::Duration;

use fleetcast_transfer::{DEFAULT_CHUNK_SIZE, DEFAULT_TRANSFER_CONCURRENCY, MergeStrategy, TransferOptions};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{DispatchError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Bytes per chunk for chunked transfers.
    #[serde(deserialize_with = "deserialize_size")]
    pub chunk_size:            u64,
    /// Artifacts strictly larger than this are sent in chunks.
    #[serde(deserialize_with = "deserialize_size")]
    pub chunk_threshold:       u64,
    /// Chunk workers per transfer.
    pub transfer_concurrency:  usize,
    /// Deliveries in flight per job.
    pub dispatch_concurrency:  usize,
    /// Default pause between task submissions, used when a job sets none.
    pub throttle_ms:           u64,
    pub merge_strategy:        MergeStrategy,
    pub delivery_timeout_secs: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            chunk_size:            DEFAULT_CHUNK_SIZE,
            chunk_threshold:       DEFAULT_CHUNK_SIZE,
            transfer_concurrency:  DEFAULT_TRANSFER_CONCURRENCY,
            dispatch_concurrency:  4,
            throttle_ms:           0,
            merge_strategy:        MergeStrategy::default(),
            delivery_timeout_secs: None,
        }
    }
}

impl DispatchConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| DispatchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DispatchError::Config(format!("failed to read '{}': {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("chunk_size", self.chunk_size == 0),
            ("chunk_threshold", self.chunk_threshold == 0),
            ("transfer_concurrency", self.transfer_concurrency == 0),
            ("dispatch_concurrency", self.dispatch_concurrency == 0),
            ("delivery_timeout_secs", self.delivery_timeout_secs == Some(0)),
        ];
        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((field, _)) => Err(DispatchError::Config(format!("{field} must be greater than 0"))),
            None => Ok(()),
        }
    }

    pub fn delivery_timeout(&self) -> Option<Duration> { self.delivery_timeout_secs.map(Duration::from_secs) }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions::default()
            .chunk_size(self.chunk_size)
            .concurrency(self.transfer_concurrency)
    }

    /// Whether an artifact of `len` bytes goes through the chunked path.
    pub fn is_chunked(&self, len: u64) -> bool { len > self.chunk_threshold }
}

/// Parses a human-readable size like "64MB", "1GiB" or "512K" into bytes.
///
/// Decimal units (KB, MB, GB, TB) are 1000-based; binary units (KiB, MiB,
/// GiB, TiB) and the bare letters K, M, G, T are 1024-based.
pub fn parse_size(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim();
    if let Ok(n) = s.parse::<u64>() {
        return Ok(n);
    }

    let split_pos = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .ok_or_else(|| format!("invalid size format: {s}"))?;
    let (num_str, unit) = s.split_at(split_pos);
    let num: f64 = num_str.parse().map_err(|_| format!("invalid number: {num_str}"))?;

    let multiplier: u64 = match unit.trim().to_uppercase().as_str() {
        "B" => 1,
        "KIB" | "K" => 1 << 10,
        "MIB" | "M" => 1 << 20,
        "GIB" | "G" => 1 << 30,
        "TIB" | "T" => 1 << 40,
        "KB" => 1_000,
        "MB" => 1_000_000,
        "GB" => 1_000_000_000,
        "TB" => 1_000_000_000_000,
        other => {
            return Err(format!(
                "unknown unit: {other}. Supported: B, KB, MB, GB, TB, KiB, MiB, GiB, TiB"
            ));
        }
    };

    Ok((num * multiplier as f64) as u64)
}

fn deserialize_size<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Bytes(u64),
        Human(String),
    }

    match Size::deserialize(deserializer)? {
        Size::Bytes(n) => Ok(n),
        Size::Human(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}
