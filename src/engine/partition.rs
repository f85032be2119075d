//! Input partitioning strategies.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Total order over items, required by [`PartitionStrategy::Range`].
pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// Item `i` goes to partition `i mod n`.
    #[default]
    RoundRobin,
    /// Partition chosen by a content hash, for key co-location.
    Hash,
    /// Sorted, then split into contiguous chunks.
    Range,
}

impl fmt::Display for PartitionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionStrategy::RoundRobin => write!(f, "round_robin"),
            PartitionStrategy::Hash => write!(f, "hash"),
            PartitionStrategy::Range => write!(f, "range"),
        }
    }
}

impl FromStr for PartitionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "round_robin" | "round-robin" | "roundrobin" => Ok(PartitionStrategy::RoundRobin),
            "hash" => Ok(PartitionStrategy::Hash),
            "range" => Ok(PartitionStrategy::Range),
            other => Err(Error::Config(format!(
                "unknown partition strategy '{}' (expected round_robin, hash or range)",
                other
            ))),
        }
    }
}

/// Split `items` into exactly `n` partitions using `strategy`.
///
/// `Range` needs `comparator`; every other strategy ignores it.
pub fn partition<T: Serialize>(
    items: Vec<T>,
    n: usize,
    strategy: PartitionStrategy,
    comparator: Option<&Comparator<T>>,
) -> Result<Vec<Vec<T>>> {
    if n == 0 {
        return Err(Error::Config("num_workers must be positive".to_string()));
    }
    match strategy {
        PartitionStrategy::RoundRobin => Ok(round_robin(items, n)),
        PartitionStrategy::Hash => by_hash(items, n),
        PartitionStrategy::Range => {
            let comparator = comparator.ok_or_else(|| {
                Error::Config("range partitioning requires a comparator".to_string())
            })?;
            Ok(by_range(items, n, comparator))
        }
    }
}

pub fn round_robin<T>(items: Vec<T>, n: usize) -> Vec<Vec<T>> {
    let n = n.max(1);
    let mut partitions: Vec<Vec<T>> = (0..n).map(|_| Vec::new()).collect();
    for (i, item) in items.into_iter().enumerate() {
        partitions[i % n].push(item);
    }
    partitions
}

pub fn by_hash<T: Serialize>(items: Vec<T>, n: usize) -> Result<Vec<Vec<T>>> {
    let n = n.max(1);
    let mut partitions: Vec<Vec<T>> = (0..n).map(|_| Vec::new()).collect();
    for item in items {
        let key = string_form(&item)?;
        let index = (content_hash(&key) % n as u64) as usize;
        partitions[index].push(item);
    }
    Ok(partitions)
}

/// Sort, then cut into chunks of `ceil(len / n)`. Trailing partitions may be empty.
pub fn by_range<T>(mut items: Vec<T>, n: usize, comparator: &Comparator<T>) -> Vec<Vec<T>> {
    let n = n.max(1);
    items.sort_by(|a, b| comparator(a, b));

    let chunk = items.len().div_ceil(n).max(1);
    let mut partitions: Vec<Vec<T>> = Vec::with_capacity(n);
    let mut rest = items.into_iter().peekable();
    while rest.peek().is_some() {
        partitions.push(rest.by_ref().take(chunk).collect());
    }
    partitions.resize_with(n, Vec::new);
    partitions
}

/// Low-order 64 bits of the SHA-256 of `key`.
pub fn content_hash(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut low = [0u8; 8];
    low.copy_from_slice(&digest[digest.len() - 8..]);
    u64::from_be_bytes(low)
}

/// The string an item hashes as: bare text for strings, JSON otherwise.
fn string_form<T: Serialize>(item: &T) -> Result<String> {
    Ok(match serde_json::to_value(item)? {
        Value::String(s) => s,
        other => other.to_string(),
    })
}
