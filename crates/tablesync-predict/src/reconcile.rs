//! Comparing predictions with authoritative state

use serde::Serialize;
use tablesync_state::{GameState, PendingInput, SocketId};

/// Correction addressed to one client. The retained inputs are returned
/// as data; replaying them is up to the consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Correction {
    pub socket_id: SocketId,
    pub corrected_state: GameState,
    pub discrepancy: f64,
    pub pending_inputs: Vec<PendingInput>,
}

/// Largest positional error over tokens present with a position in both
/// states, scaled to milliseconds by `ms_per_unit`. Other facets are not
/// compared.
pub fn calculate_state_discrepancy(
    predicted: &GameState,
    server: &GameState,
    ms_per_unit: f64,
) -> f64 {
    predicted
        .tokens
        .iter()
        .filter_map(|(id, token)| {
            let predicted = token.position?;
            let server = server.tokens.get(id)?.position?;
            Some(predicted.distance(&server) * ms_per_unit)
        })
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablesync_state::{TokenState, Vec2};

    #[test]
    fn test_max_over_shared_tokens() {
        let predicted = GameState::new()
            .with_token("a", Vec2::new(3.0, 4.0))
            .with_token("b", Vec2::new(1.0, 0.0))
            .with_token("only_predicted", Vec2::new(100.0, 100.0));
        let server = GameState::new()
            .with_token("a", Vec2::new(0.0, 0.0))
            .with_token("b", Vec2::new(0.0, 0.0));

        assert_eq!(calculate_state_discrepancy(&predicted, &server, 10.0), 50.0);
        assert_eq!(calculate_state_discrepancy(&predicted, &server, 1.0), 5.0);
    }

    #[test]
    fn test_tokens_without_position_are_ignored() {
        let mut predicted = GameState::new();
        predicted.tokens.insert("a".into(), TokenState::default());
        let server = GameState::new().with_token("a", Vec2::new(9.0, 9.0));
        assert_eq!(calculate_state_discrepancy(&predicted, &server, 10.0), 0.0);
        assert_eq!(calculate_state_discrepancy(&GameState::new(), &server, 10.0), 0.0);
    }
}
