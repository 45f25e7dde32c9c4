//! Reserve lifecycle: decides what a commit or cancel does to a stored
//! movement before any balance is touched.
//!
//! ```text
//!   target   current    outcome
//!   ------   -------    -------
//!   SUCCESS  PENDING    apply COMMIT
//!   SUCCESS  SUCCESS    replay (idempotent)
//!   SUCCESS  CANCEL     NotReserved
//!   CANCEL   PENDING    apply CANCEL
//!   CANCEL   CANCEL     replay (idempotent)
//!   CANCEL   SUCCESS    NotReserved
//! ```

use tally_types::{Movement, MovementStatus, Result, Stage, TallyError};

/// What to do with a movement for a requested terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Already in the requested state: return it unchanged.
    Replay,
    /// Run the calculator for this stage, then move to the target state.
    Apply(Stage),
}

/// Plan the move of `movement` to `target`.
///
/// # Errors
/// - `InvalidTransition` when `target` is not terminal
/// - `NotReserved` when the movement already reached the other terminal state
/// - `CorruptState` when a pending record cannot drive the transition
pub fn plan(movement: &Movement, target: MovementStatus) -> Result<Transition> {
    let stage = match target {
        MovementStatus::Success => Stage::Commit,
        MovementStatus::Cancel => Stage::Cancel,
        MovementStatus::Pending => {
            return Err(TallyError::InvalidTransition {
                from: movement.status,
                to: target,
            });
        }
    };
    if movement.status == target {
        return Ok(Transition::Replay);
    }
    if movement.status != MovementStatus::Pending {
        return Err(TallyError::NotReserved {
            movement: movement.id,
            status: movement.status,
        });
    }
    movement.check_integrity()?;
    Ok(Transition::Apply(stage))
}

/// Move `movement` to `target` after its balances were applied.
///
/// # Errors
/// `InvalidTransition` unless the movement is pending.
pub fn finish(movement: &mut Movement, target: MovementStatus) -> Result<()> {
    match target {
        MovementStatus::Success => movement.mark_success(),
        MovementStatus::Cancel => movement.mark_cancelled(),
        MovementStatus::Pending => Err(TallyError::InvalidTransition {
            from: movement.status,
            to: target,
        }),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use tally_types::{MovementId, SettlementRequest};

    use super::*;

    fn pending() -> Movement {
        let request = SettlementRequest::transfer("R-1", "A", "B", 500).reserve();
        request.to_movement(MovementId::deterministic(&request.reference))
    }

    #[test]
    fn pending_commits_and_cancels() {
        let m = pending();
        assert_eq!(plan(&m, MovementStatus::Success).unwrap(), Transition::Apply(Stage::Commit));
        assert_eq!(plan(&m, MovementStatus::Cancel).unwrap(), Transition::Apply(Stage::Cancel));
    }

    #[test]
    fn same_terminal_state_replays() {
        let mut m = pending();
        m.status = MovementStatus::Success;
        assert_eq!(plan(&m, MovementStatus::Success).unwrap(), Transition::Replay);
        m.status = MovementStatus::Cancel;
        assert_eq!(plan(&m, MovementStatus::Cancel).unwrap(), Transition::Replay);
    }

    #[test]
    fn other_terminal_state_is_not_reserved() {
        let mut m = pending();
        m.status = MovementStatus::Cancel;
        let err = plan(&m, MovementStatus::Success).unwrap_err();
        assert!(matches!(err, TallyError::NotReserved { status: MovementStatus::Cancel, .. }));
    }

    #[test]
    fn corrupt_pending_record() {
        let mut m = pending();
        m.amount = Decimal::ZERO;
        let err = plan(&m, MovementStatus::Success).unwrap_err();
        assert!(matches!(err, TallyError::CorruptState { .. }));
    }

    #[test]
    fn pending_is_not_a_target() {
        let err = plan(&pending(), MovementStatus::Pending).unwrap_err();
        assert!(matches!(err, TallyError::InvalidTransition { .. }));
    }

    #[test]
    fn finish_sets_status() {
        let mut m = pending();
        finish(&mut m, MovementStatus::Cancel).unwrap();
        assert_eq!(m.status, MovementStatus::Cancel);
        assert!(finish(&mut m, MovementStatus::Success).is_err());
    }
}
