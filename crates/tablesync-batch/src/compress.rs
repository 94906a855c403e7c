//! Structural pattern compression for batch packets
//!
//! Events whose field layout repeats within a batch are tagged with a
//! reference into a per-packet pattern table. Aggressive mode also drops
//! recent timestamps and rounds positions. The compressed form replaces
//! the original only when it is strictly smaller than the accept ratio.

use crate::config::BatchConfig;
use serde_json::Value;
use std::collections::HashMap;
use tablesync_state::{BatchEvent, BatchPacket, Fingerprint, Pattern, StateError};
use tracing::debug;

const PATTERN_FIELD: &str = "__pattern";

/// Map each field of the serialized event to its coarse JSON type.
/// The pattern tag itself is not part of the structure.
pub fn fingerprint(event: &BatchEvent) -> Result<Fingerprint, StateError> {
    let value = serde_json::to_value(event)?;
    let Value::Object(fields) = value else {
        return Ok(Fingerprint::new());
    };
    Ok(fields
        .iter()
        .filter(|(key, _)| key.as_str() != PATTERN_FIELD)
        .map(|(key, value)| (key.clone(), coarse_type(value).to_string()))
        .collect())
}

fn coarse_type(value: &Value) -> &'static str {
    match value {
        Value::Null | Value::Object(_) => "object",
        Value::Array(_) => "array",
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
    }
}

/// Fingerprints occurring more than once, in order of first appearance,
/// together with each event's own fingerprint.
pub fn extract_patterns(
    events: &[BatchEvent],
) -> Result<(Vec<Pattern>, Vec<Fingerprint>), StateError> {
    let fingerprints = events
        .iter()
        .map(fingerprint)
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen: Vec<(&Fingerprint, usize)> = Vec::new();
    let mut index: HashMap<&Fingerprint, usize> = HashMap::new();
    for fp in &fingerprints {
        match index.get(fp) {
            Some(&slot) => seen[slot].1 += 1,
            None => {
                index.insert(fp, seen.len());
                seen.push((fp, 1));
            }
        }
    }

    let patterns = seen
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .enumerate()
        .map(|(id, (structure, count))| Pattern {
            id,
            structure: structure.clone(),
            count,
        })
        .collect();

    Ok((patterns, fingerprints))
}

/// Strict acceptance rule: keep the compressed form only if
/// `compressed / original < accept_ratio`.
pub fn compression_accepted(original_size: usize, compressed_size: usize, accept_ratio: f64) -> bool {
    original_size > 0 && (compressed_size as f64 / original_size as f64) < accept_ratio
}

/// Lossy per-event shrinking used for low-bandwidth recipients
fn compress_event(event: &mut BatchEvent, now_ms: u64, config: &BatchConfig) {
    if let Some(ts) = event.timestamp {
        if now_ms.saturating_sub(ts) < config.recent_event_ms {
            event.timestamp = None;
        }
    }
    if let Some(position) = event.payload.position_mut() {
        *position = position.rounded(config.position_decimals);
    }
}

/// Compress a packet, falling back to an untouched copy of the original
/// whenever compression does not pay off or cannot be measured.
pub fn compress_batch(
    packet: &BatchPacket,
    aggressive: bool,
    now_ms: u64,
    config: &BatchConfig,
) -> BatchPacket {
    match try_compress(packet, aggressive, now_ms, config) {
        Ok(Some(compressed)) => compressed,
        Ok(None) => packet.clone(),
        Err(e) => {
            debug!(room_id = %packet.room_id, error = %e, "Compression skipped");
            packet.clone()
        }
    }
}

fn try_compress(
    packet: &BatchPacket,
    aggressive: bool,
    now_ms: u64,
    config: &BatchConfig,
) -> Result<Option<BatchPacket>, StateError> {
    let mut compressed = packet.clone();
    compressed.compressed = true;

    let (patterns, fingerprints) = extract_patterns(&packet.events)?;
    if !patterns.is_empty() {
        let ids: HashMap<&Fingerprint, usize> =
            patterns.iter().map(|p| (&p.structure, p.id)).collect();
        for (event, fp) in compressed.events.iter_mut().zip(&fingerprints) {
            event.pattern = ids.get(fp).copied();
        }
        compressed.patterns = patterns;
    }

    if aggressive {
        for event in &mut compressed.events {
            compress_event(event, now_ms, config);
        }
    }

    let original_size = packet.serialized_len()?;
    let compressed_size = compressed.serialized_len()?;
    if !compression_accepted(original_size, compressed_size, config.compression_accept_ratio) {
        return Ok(None);
    }

    compressed.metadata.compression_ratio = Some(compressed_size as f64 / original_size as f64);
    compressed.metadata.original_size = Some(original_size);
    compressed.metadata.compressed_size = Some(compressed_size);
    Ok(Some(compressed))
}
