//! Pickup status transitions
//!
//! `transition` is the complete table. The guard functions below narrow it for
//! individual operations: cancel and reschedule are only offered before a
//! driver has started, and reject is the one move back to PENDING.

use wastewise_shared::types::PickupStatus;

use crate::error::{DispatchError, DispatchResult};

/// Statuses reachable from `from` in one step
pub fn allowed_targets(from: PickupStatus) -> &'static [PickupStatus] {
    use PickupStatus::*;
    match from {
        Pending => &[Assigned, Cancelled],
        Assigned => &[InProgress, Cancelled],
        InProgress => &[Completed, Cancelled],
        Completed | Cancelled => &[],
    }
}

pub fn can_transition(from: PickupStatus, to: PickupStatus) -> bool {
    allowed_targets(from).contains(&to)
}

/// Validate `from -> to` against the transition table
pub fn transition(from: PickupStatus, to: PickupStatus) -> DispatchResult<PickupStatus> {
    if can_transition(from, to) {
        Ok(to)
    } else {
        Err(DispatchError::InvalidTransition { from, to })
    }
}

fn before_pickup_started(status: PickupStatus) -> bool {
    matches!(status, PickupStatus::Pending | PickupStatus::Assigned)
}

pub fn check_cancellable(status: PickupStatus) -> DispatchResult<PickupStatus> {
    let to = transition(status, PickupStatus::Cancelled)?;
    if !before_pickup_started(status) {
        return Err(DispatchError::InvalidState(format!(
            "Pickup in status {} can no longer be cancelled",
            status
        )));
    }
    Ok(to)
}

pub fn check_reschedulable(status: PickupStatus) -> DispatchResult<()> {
    if before_pickup_started(status) {
        Ok(())
    } else {
        Err(DispatchError::InvalidState(format!(
            "Pickup in status {} cannot be rescheduled",
            status
        )))
    }
}

pub fn check_assignable(status: PickupStatus) -> DispatchResult<PickupStatus> {
    if status != PickupStatus::Pending {
        return Err(DispatchError::InvalidState(format!(
            "Pickup must be PENDING to assign a driver, found {}",
            status
        )));
    }
    transition(status, PickupStatus::Assigned)
}

/// Rejection returns an ASSIGNED pickup to PENDING
pub fn check_rejectable(status: PickupStatus) -> DispatchResult<PickupStatus> {
    if status != PickupStatus::Assigned {
        return Err(DispatchError::InvalidState(format!(
            "Only ASSIGNED pickups can be rejected, found {}",
            status
        )));
    }
    Ok(PickupStatus::Pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use PickupStatus::*;

    const TABLE: [(PickupStatus, PickupStatus); 6] = [
        (Pending, Assigned),
        (Pending, Cancelled),
        (Assigned, InProgress),
        (Assigned, Cancelled),
        (InProgress, Completed),
        (InProgress, Cancelled),
    ];

    #[test]
    fn test_every_pair_matches_the_table() {
        for from in PickupStatus::ALL {
            for to in PickupStatus::ALL {
                let result = transition(from, to);
                if TABLE.contains(&(from, to)) {
                    assert_eq!(result.unwrap(), to, "{} -> {} should be allowed", from, to);
                } else {
                    match result {
                        Err(DispatchError::InvalidTransition { from: f, to: t }) => {
                            assert_eq!((f, t), (from, to));
                        }
                        other => panic!("{} -> {} should be refused, got {:?}", from, to, other),
                    }
                }
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for status in PickupStatus::ALL {
            assert_eq!(status.is_terminal(), allowed_targets(status).is_empty());
        }
    }

    #[test]
    fn test_cancel_only_before_start() {
        assert_eq!(check_cancellable(Pending).unwrap(), Cancelled);
        assert_eq!(check_cancellable(Assigned).unwrap(), Cancelled);
        assert!(matches!(check_cancellable(InProgress), Err(DispatchError::InvalidState(_))));
        assert!(matches!(
            check_cancellable(Completed),
            Err(DispatchError::InvalidTransition { .. })
        ));
        assert!(matches!(
            check_cancellable(Cancelled),
            Err(DispatchError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_reschedule_only_before_start() {
        assert!(check_reschedulable(Pending).is_ok());
        assert!(check_reschedulable(Assigned).is_ok());
        for status in [InProgress, Completed, Cancelled] {
            assert!(matches!(check_reschedulable(status), Err(DispatchError::InvalidState(_))));
        }
    }

    #[test]
    fn test_assign_requires_pending() {
        assert_eq!(check_assignable(Pending).unwrap(), Assigned);
        for status in [Assigned, InProgress, Completed, Cancelled] {
            assert!(matches!(check_assignable(status), Err(DispatchError::InvalidState(_))));
        }
    }

    #[test]
    fn test_reject_returns_to_pending() {
        assert_eq!(check_rejectable(Assigned).unwrap(), Pending);
        assert!(check_rejectable(Pending).is_err());
        assert!(check_rejectable(InProgress).is_err());
    }
}
