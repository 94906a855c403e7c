use proptest::prelude::*;
use tablesync_predict::{calculate_state_discrepancy, LedgerConfig, StateHistory};
use tablesync_state::{GameState, Vec2};

fn coord() -> impl Strategy<Value = f64> {
    -1_000.0..1_000.0f64
}

proptest! {
    #[test]
    fn history_only_holds_the_recent_window(gaps in prop::collection::vec(0u64..400, 1..80)) {
        let window = LedgerConfig::default().history_window_ms();
        let mut history = StateHistory::new();
        let mut now = 10_000u64;

        for gap in gaps {
            now += gap;
            history.record(GameState::new(), now, window);

            prop_assert_eq!(history.latest().map(|s| s.timestamp), Some(now));
            for snapshot in history.iter() {
                prop_assert!(snapshot.timestamp as f64 > now as f64 - window);
            }
        }
    }

    #[test]
    fn discrepancy_is_a_scaled_distance(
        ax in coord(), ay in coord(), bx in coord(), by in coord(), unit in 0.5..50.0f64,
    ) {
        let a = GameState::new().with_token("t", Vec2::new(ax, ay));
        let b = GameState::new().with_token("t", Vec2::new(bx, by));

        prop_assert_eq!(calculate_state_discrepancy(&a, &a, unit), 0.0);

        let forward = calculate_state_discrepancy(&a, &b, unit);
        let backward = calculate_state_discrepancy(&b, &a, unit);
        prop_assert!((forward - backward).abs() < 1e-6);
        let expected = Vec2::new(ax, ay).distance(&Vec2::new(bx, by)) * unit;
        prop_assert!((forward - expected).abs() < 1e-6);
    }

    #[test]
    fn correction_threshold_never_shrinks_with_latency(a in 0.0..500.0f64, b in 0.0..500.0f64) {
        let config = LedgerConfig::default();
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(config.correction_threshold(low) <= config.correction_threshold(high));
    }
}
