//! Per-room authoritative snapshot history, bounded by time

use serde::Serialize;
use std::collections::VecDeque;
use tablesync_state::GameState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub state: GameState,
    pub timestamp: u64,
}

#[derive(Debug, Default)]
pub struct StateHistory {
    entries: VecDeque<StateSnapshot>,
}

impl StateHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a snapshot, then evict every entry at or before
    /// `timestamp - window_ms`.
    pub fn record(&mut self, state: GameState, timestamp: u64, window_ms: f64) {
        self.entries.push_back(StateSnapshot { state, timestamp });

        let cutoff = timestamp as f64 - window_ms;
        self.entries.retain(|entry| entry.timestamp as f64 > cutoff);
    }

    /// Most recently recorded snapshot
    pub fn latest(&self) -> Option<&StateSnapshot> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StateSnapshot> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_prunes_by_time() {
        let mut history = StateHistory::new();
        let window = 60.0 * 16.67;

        history.record(GameState::new(), 1_000, window);
        history.record(GameState::new(), 1_500, window);
        history.record(GameState::new(), 2_000, window);
        assert_eq!(history.len(), 3);

        // 2_100 - 1_000.2 = 1_099.8, so the entry at 1_000 goes
        history.record(GameState::new(), 2_100, window);
        let stamps: Vec<_> = history.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![1_500, 2_000, 2_100]);
        assert_eq!(history.latest().map(|s| s.timestamp), Some(2_100));
    }

    #[test]
    fn test_history_keeps_call_order() {
        let mut history = StateHistory::new();
        history.record(GameState::new(), 5_000, 100.0);
        // Cutoff follows the newest call, not the largest timestamp
        history.record(GameState::new(), 100, 100.0);
        assert_eq!(history.len(), 2);
        assert_eq!(history.latest().map(|s| s.timestamp), Some(100));
    }
}
