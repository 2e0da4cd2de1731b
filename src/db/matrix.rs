//! The phase-status escalation algorithm (§4.1): the sole authority on concurrent writes to a
//! (phase, status) pair anywhere in the `xml → download → action` chain.

use crate::types::{Phase, Status};

/// Apply the escalation matrix: given the stored `(old_phase, old_status)` and a proposed
/// `(new_phase, new_status)`, compute the pair that should actually be stored.
///
/// "Earliest failure wins while failing; never regress while healthy" — see §4.1 for the full
/// truth table this implements. The operation is idempotent: applying it twice with the same
/// `new` pair equals applying it once (tested below), which is what lets concurrent escalations
/// converge without additional locking beyond the write itself.
pub fn escalate(old: (Phase, Status), new: (Phase, Status)) -> (Phase, Status) {
    let (old_phase, old_status) = old;
    let (new_phase, new_status) = new;
    let old_failed = old_status.is_failed();
    let new_failed = new_status.is_failed();

    match (old_failed, new_failed) {
        (true, true) => {
            if new_phase < old_phase {
                (new_phase, Status::Failed)
            } else {
                (old_phase, Status::Failed)
            }
        }
        (true, false) => (old_phase, old_status),
        (false, true) => (new_phase, new_status),
        (false, false) => {
            if new_phase < old_phase {
                (old_phase, old_status)
            } else if new_phase == old_phase {
                if new_status > old_status {
                    (old_phase, new_status)
                } else {
                    (old_phase, old_status)
                }
            } else {
                (new_phase, new_status)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Phase, Status};

    #[test]
    fn advances_phase_when_strictly_later() {
        let result = escalate(
            (Phase::ZipName, Status::Done),
            (Phase::Download, Status::Running),
        );
        assert_eq!(result, (Phase::Download, Status::Running));
    }

    #[test]
    fn advances_status_within_same_phase() {
        let result = escalate(
            (Phase::Download, Status::Running),
            (Phase::Download, Status::Done),
        );
        assert_eq!(result, (Phase::Download, Status::Done));
    }

    #[test]
    fn ignores_regression_within_same_phase() {
        let result = escalate(
            (Phase::Download, Status::Done),
            (Phase::Download, Status::Running),
        );
        assert_eq!(result, (Phase::Download, Status::Done));
    }

    #[test]
    fn ignores_earlier_phase_when_healthy() {
        let result = escalate(
            (Phase::Unzip, Status::Running),
            (Phase::Download, Status::Done),
        );
        assert_eq!(result, (Phase::Unzip, Status::Running));
    }

    #[test]
    fn first_failure_replaces_both() {
        let result = escalate(
            (Phase::Unzip, Status::Running),
            (Phase::XmlName, Status::Failed),
        );
        assert_eq!(result, (Phase::XmlName, Status::Failed));
    }

    #[test]
    fn earlier_failure_wins_over_later_failure() {
        let result = escalate(
            (Phase::Xsd, Status::Failed),
            (Phase::XmlName, Status::Failed),
        );
        assert_eq!(result, (Phase::XmlName, Status::Failed));
    }

    #[test]
    fn later_failure_is_ignored_once_earlier_failure_recorded() {
        let result = escalate(
            (Phase::XmlName, Status::Failed),
            (Phase::Xsd, Status::Failed),
        );
        assert_eq!(result, (Phase::XmlName, Status::Failed));
    }

    #[test]
    fn success_after_failure_is_ignored() {
        let result = escalate(
            (Phase::XmlName, Status::Failed),
            (Phase::Xsd, Status::Done),
        );
        assert_eq!(result, (Phase::XmlName, Status::Failed));
    }

    #[test]
    fn escalation_is_idempotent() {
        let old = (Phase::Download, Status::Running);
        let new = (Phase::Unzip, Status::Done);
        let once = escalate(old, new);
        let twice = escalate(once, new);
        assert_eq!(once, twice);
    }

    #[test]
    fn escalation_is_idempotent_across_failures() {
        let old = (Phase::Unzip, Status::Running);
        let new = (Phase::XmlName, Status::Failed);
        let once = escalate(old, new);
        let twice = escalate(once, new);
        assert_eq!(once, twice);
    }
}
