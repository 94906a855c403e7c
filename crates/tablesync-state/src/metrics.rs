//! Per-connection network metrics
//!
//! Written by the prediction ledger (exponential smoothing of measured
//! samples) and read by the batcher to shape delivery. Reads hand out
//! copies, so a reader never holds the lock across its own work.

use crate::SocketId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Smoothing factor for the exponential moving average
pub const SMOOTHING_ALPHA: f64 = 0.3;

pub const DEFAULT_LATENCY_MS: f64 = 50.0;
pub const DEFAULT_JITTER_MS: f64 = 5.0;
pub const DEFAULT_BANDWIDTH_BPS: f64 = 10_000_000.0;

/// Discrete update-rate tier derived from smoothed metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateTier {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl UpdateTier {
    /// Target updates per second for this tier
    pub fn fps(self) -> u32 {
        match self {
            UpdateTier::Excellent => 60,
            UpdateTier::Good => 30,
            UpdateTier::Fair => 20,
            UpdateTier::Poor => 10,
        }
    }

    pub fn classify(latency: f64, jitter: f64, packet_loss: f64) -> Self {
        if latency < 20.0 && jitter < 5.0 && packet_loss < 0.01 {
            UpdateTier::Excellent
        } else if latency < 50.0 && jitter < 10.0 && packet_loss < 0.02 {
            UpdateTier::Good
        } else if latency < 100.0 && jitter < 20.0 && packet_loss < 0.05 {
            UpdateTier::Fair
        } else {
            UpdateTier::Poor
        }
    }
}

/// A raw measurement reported for one socket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasuredMetrics {
    pub latency: f64,
    pub jitter: f64,
    pub packet_loss: f64,
    #[serde(default)]
    pub bandwidth: Option<f64>,
}

impl MeasuredMetrics {
    pub fn new(latency: f64, jitter: f64, packet_loss: f64) -> Self {
        Self {
            latency,
            jitter,
            packet_loss,
            bandwidth: None,
        }
    }

    pub fn with_bandwidth(mut self, bandwidth: f64) -> Self {
        self.bandwidth = Some(bandwidth);
        self
    }
}

/// Smoothed metrics for one connection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientNetworkMetrics {
    /// Milliseconds
    pub latency: f64,
    pub jitter: f64,
    /// Fraction in `[0, 1]`
    pub packet_loss: f64,
    /// Bits per second
    pub bandwidth: f64,
    pub update_rate: UpdateTier,
    pub last_measurement: u64,
}

impl ClientNetworkMetrics {
    pub fn initial(now_ms: u64) -> Self {
        Self {
            latency: DEFAULT_LATENCY_MS,
            jitter: DEFAULT_JITTER_MS,
            packet_loss: 0.0,
            bandwidth: DEFAULT_BANDWIDTH_BPS,
            update_rate: UpdateTier::Good,
            last_measurement: now_ms,
        }
    }

    /// Fold one measurement in: `new = alpha * measured + (1 - alpha) * old`
    pub fn smooth(&mut self, measured: &MeasuredMetrics, now_ms: u64) {
        self.latency = ema(measured.latency, self.latency);
        self.jitter = ema(measured.jitter, self.jitter);
        self.packet_loss = ema(measured.packet_loss, self.packet_loss);
        if let Some(bandwidth) = measured.bandwidth {
            self.bandwidth = ema(bandwidth, self.bandwidth);
        }
        self.last_measurement = now_ms;
        self.update_rate = UpdateTier::classify(self.latency, self.jitter, self.packet_loss);
    }
}

fn ema(measured: f64, previous: f64) -> f64 {
    SMOOTHING_ALPHA * measured + (1.0 - SMOOTHING_ALPHA) * previous
}

/// Shared metrics table keyed by socket id. Cloning shares the table.
#[derive(Debug, Clone, Default)]
pub struct NetworkMetricsStore {
    entries: Arc<RwLock<HashMap<SocketId, ClientNetworkMetrics>>>,
}

impl NetworkMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a socket with default metrics. Existing entries are kept.
    pub fn register(&self, socket_id: &str, now_ms: u64) -> ClientNetworkMetrics {
        *self
            .entries
            .write()
            .entry(socket_id.to_string())
            .or_insert_with(|| ClientNetworkMetrics::initial(now_ms))
    }

    pub fn get(&self, socket_id: &str) -> Option<ClientNetworkMetrics> {
        self.entries.read().get(socket_id).copied()
    }

    /// Metrics for delivery decisions; untracked sockets get the defaults
    pub fn get_or_default(&self, socket_id: &str, now_ms: u64) -> ClientNetworkMetrics {
        self.get(socket_id)
            .unwrap_or_else(|| ClientNetworkMetrics::initial(now_ms))
    }

    /// Smooth a new measurement into a tracked socket.
    /// Returns `None` when the socket is not tracked.
    pub fn update(
        &self,
        socket_id: &str,
        measured: &MeasuredMetrics,
        now_ms: u64,
    ) -> Option<ClientNetworkMetrics> {
        let mut entries = self.entries.write();
        let metrics = entries.get_mut(socket_id)?;
        metrics.smooth(measured, now_ms);
        Some(*metrics)
    }

    /// Overwrite the smoothed metrics for a socket
    pub fn set(&self, socket_id: &str, metrics: ClientNetworkMetrics) {
        self.entries.write().insert(socket_id.to_string(), metrics);
    }

    pub fn remove(&self, socket_id: &str) -> Option<ClientNetworkMetrics> {
        self.entries.write().remove(socket_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn average_latency(&self) -> Option<f64> {
        let entries = self.entries.read();
        if entries.is_empty() {
            return None;
        }
        let total: f64 = entries.values().map(|m| m.latency).sum();
        Some(total / entries.len() as f64)
    }
}
