//! Unit normalisation
//!
//! Storage is carried in bytes and memory in MiB everywhere outside the
//! scrapers.

use crate::error::{Error, Result};

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

/// Convert KiB to MiB, truncating
pub fn kib_to_mib(kib: u64) -> u64 {
    kib / KIB
}

/// Convert GiB to bytes
pub fn gib_to_bytes(gib: f64) -> u64 {
    (gib * GIB as f64).round() as u64
}

/// Whole GiB in `bytes`, rounded down
pub fn bytes_to_gib(bytes: u64) -> u64 {
    bytes / GIB
}

/// Render bytes for operator-facing messages
pub fn human_size(bytes: u64) -> String {
    if bytes % GIB == 0 {
        format!("{} GiB", bytes / GIB)
    } else {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    }
}

/// Parse a human size string such as `452.96 GiB` or `2.21 TiB` into bytes
pub fn parse_size(value: &str) -> Result<u64> {
    let mut parts = value.split_whitespace();
    let number = parts
        .next()
        .ok_or_else(|| size_error(value))?
        .parse::<f64>()
        .map_err(|_| size_error(value))?;
    let multiplier = match parts.next().unwrap_or("B") {
        "B" | "bytes" => 1,
        "KiB" | "K" => KIB,
        "MiB" | "M" => MIB,
        "GiB" | "G" => GIB,
        "TiB" | "T" => TIB,
        _ => return Err(size_error(value)),
    };
    Ok((number * multiplier as f64).round() as u64)
}

/// Parse a leading integer from a value such as `2400 MHz` or `16307176 KiB`
pub fn leading_u64(value: &str) -> Result<u64> {
    value
        .split_whitespace()
        .next()
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| size_error(value))
}

fn size_error(value: &str) -> Error {
    Error::Parse {
        command: "size".into(),
        reason: format!("cannot interpret '{}'", value),
    }
}
