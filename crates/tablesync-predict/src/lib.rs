//! Client-side prediction and server reconciliation
//!
//! Each client's inputs are sequenced and turned into an immediate predicted
//! state; authoritative snapshots are recorded per room and compared against
//! those predictions, producing corrections for clients that drifted too far.

pub mod combat;
pub mod config;
pub mod history;
pub mod ledger;
pub mod prediction;
pub mod reconcile;

pub use combat::{
    find_combat_discrepancies, CombatCorrection, CombatDiscrepancy, CombatPredictionMetrics,
    PredictedCombatAction, PredictionQuality,
};
pub use config::{CorrectionTier, LedgerConfig};
pub use history::{StateHistory, StateSnapshot};
pub use ledger::{ClientPredictionState, LagCompensator, LedgerSystemMetrics, ProcessedInput};
pub use prediction::predict;
pub use reconcile::{calculate_state_discrepancy, Correction};

use tablesync_state::SocketId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Client {0} is not tracked for lag compensation")]
    ClientNotTracked(SocketId),
}
