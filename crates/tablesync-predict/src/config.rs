use serde::{Deserialize, Serialize};

/// Latency below `below_ms` tolerates discrepancies up to `threshold`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrectionTier {
    pub below_ms: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Snapshots kept per room, in frames
    pub state_history_size: usize,
    pub frame_duration_ms: f64,
    /// Pending-input window and upper latency bound for prediction
    pub max_prediction_ms: f64,
    /// Below this latency prediction is pointless
    pub min_prediction_latency_ms: f64,
    /// Discrepancy milliseconds per grid unit of positional error
    pub ms_per_unit: f64,
    /// Checked in order; first tier whose bound exceeds the latency wins
    pub correction_tiers: Vec<CorrectionTier>,
    pub fallback_threshold: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            state_history_size: 60,
            frame_duration_ms: 16.67,
            max_prediction_ms: 200.0,
            min_prediction_latency_ms: 10.0,
            ms_per_unit: 10.0,
            correction_tiers: vec![
                CorrectionTier {
                    below_ms: 20.0,
                    threshold: 30.0,
                },
                CorrectionTier {
                    below_ms: 50.0,
                    threshold: 50.0,
                },
                CorrectionTier {
                    below_ms: 100.0,
                    threshold: 80.0,
                },
            ],
            fallback_threshold: 100.0,
        }
    }
}

impl LedgerConfig {
    /// How far back room history reaches, in milliseconds
    pub fn history_window_ms(&self) -> f64 {
        self.state_history_size as f64 * self.frame_duration_ms
    }

    pub fn correction_threshold(&self, latency_ms: f64) -> f64 {
        self.correction_tiers
            .iter()
            .find(|tier| latency_ms < tier.below_ms)
            .map_or(self.fallback_threshold, |tier| tier.threshold)
    }

    pub fn should_predict(&self, latency_ms: f64) -> bool {
        latency_ms >= self.min_prediction_latency_ms && latency_ms <= self.max_prediction_ms
    }
}
