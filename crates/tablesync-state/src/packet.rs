//! Batch packets as delivered to sockets (`batch_update` messages)

use crate::event::{Event, EventPayload, Priority};
use crate::{RoomId, StateError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Message name the transport uses for batch deliveries
pub const BATCH_UPDATE: &str = "batch_update";

/// Field name -> coarse JSON type (`object`, `array`, `string`, `number`, `boolean`)
pub type Fingerprint = BTreeMap<String, String>;

/// One event as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEvent {
    pub id: Uuid,

    /// Dropped by aggressive compression when the event is recent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,

    pub priority: Priority,

    #[serde(flatten)]
    pub payload: EventPayload,

    /// Reference into the packet's pattern table
    #[serde(rename = "__pattern", default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<usize>,
}

impl From<Event> for BatchEvent {
    fn from(event: Event) -> Self {
        Self {
            id: event.id,
            timestamp: Some(event.timestamp),
            priority: event.priority,
            payload: event.payload,
            pattern: None,
        }
    }
}

/// A structural fingerprint seen more than once in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: usize,
    pub structure: Fingerprint,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMetadata {
    /// Milliseconds since the previous flush of this room
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_interval: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_timestamp: Option<u64>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub simplified: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub adapted_for_latency: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_event_count: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<usize>,
}

/// A flushed batch. Built once per flush; recipients get adapted copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPacket {
    pub id: Uuid,
    pub timestamp: u64,
    pub room_id: RoomId,
    pub event_count: usize,
    pub events: Vec<BatchEvent>,
    pub metadata: BatchMetadata,

    #[serde(default, skip_serializing_if = "is_false")]
    pub compressed: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<Pattern>,
}

impl BatchPacket {
    pub fn new(room_id: impl Into<RoomId>, timestamp: u64, events: Vec<BatchEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            room_id: room_id.into(),
            event_count: events.len(),
            events,
            metadata: BatchMetadata::default(),
            compressed: false,
            patterns: Vec::new(),
        }
    }

    /// Replace the event list, keeping `event_count` in step
    pub fn set_events(&mut self, events: Vec<BatchEvent>) {
        self.event_count = events.len();
        self.events = events;
    }

    /// Size of the JSON encoding in bytes
    pub fn serialized_len(&self) -> Result<usize, StateError> {
        Ok(serde_json::to_vec(self)?.len())
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}
