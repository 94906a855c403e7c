//! Per-recipient shaping of a flushed batch

use crate::compress::compress_batch;
use crate::config::BatchConfig;
use tablesync_state::{BatchMetadata, BatchPacket, ClientNetworkMetrics, Priority, Role};

/// Adapt a batch to one recipient's network conditions.
///
/// High latency keeps only critical/high events (when that actually drops
/// something); low bandwidth forces aggressive compression. The two checks
/// are independent and compose.
///
/// Filtering invalidates any pattern table and size figures computed for
/// the full batch, so those are stripped before the bandwidth check.
pub fn adapt_batch_for_client(
    packet: &BatchPacket,
    metrics: &ClientNetworkMetrics,
    now_ms: u64,
    config: &BatchConfig,
) -> BatchPacket {
    let mut adapted = packet.clone();

    if metrics.latency > config.high_latency_ms {
        let urgent: Vec<_> = packet
            .events
            .iter()
            .filter(|e| e.priority.is_urgent())
            .cloned()
            .collect();
        if urgent.len() < packet.events.len() {
            adapted.set_events(urgent);
            strip_compression(&mut adapted);
            adapted.metadata.adapted_for_latency = true;
            adapted.metadata.original_event_count = Some(packet.event_count);
        }
    }

    if metrics.bandwidth < config.low_bandwidth_bps {
        adapted = compress_batch(&adapted, true, now_ms, config);
    }

    adapted
}

fn strip_compression(packet: &mut BatchPacket) {
    packet.compressed = false;
    packet.patterns.clear();
    packet.metadata.compression_ratio = None;
    packet.metadata.original_size = None;
    packet.metadata.compressed_size = None;
    for event in &mut packet.events {
        event.pattern = None;
    }
}

/// Reduce a batch to what a player client needs: critical events plus
/// movement and chat. Metadata shrinks to the simplification marker.
pub fn simplify_for_player(packet: &BatchPacket) -> BatchPacket {
    let events: Vec<_> = packet
        .events
        .iter()
        .filter(|e| e.priority == Priority::Critical || e.payload.is_player_essential())
        .cloned()
        .map(|mut e| {
            e.pattern = None;
            e
        })
        .collect();

    BatchPacket {
        id: packet.id,
        timestamp: packet.timestamp,
        room_id: packet.room_id.clone(),
        event_count: events.len(),
        events,
        metadata: BatchMetadata {
            simplified: true,
            original_event_count: Some(packet.event_count),
            ..BatchMetadata::default()
        },
        compressed: false,
        patterns: Vec::new(),
    }
}

/// Players get the simplified batch; game masters and sockets with no
/// known role get the network-adapted one.
pub fn shape_for_recipient(
    packet: &BatchPacket,
    role: Option<Role>,
    metrics: &ClientNetworkMetrics,
    now_ms: u64,
    config: &BatchConfig,
) -> BatchPacket {
    match role {
        Some(Role::Player) => simplify_for_player(packet),
        Some(Role::GameMaster) | None => adapt_batch_for_client(packet, metrics, now_ms, config),
    }
}
