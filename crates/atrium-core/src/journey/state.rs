// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node state machine.
//!
//! ```text
//! locked ──auto──► todo ──► active ──► in_progress ──► submitted ──► done
//!                             │                         ▲   │         │
//!                             └─────────────────────────┘   ▼         │ reopen
//!                                          needs_fixes ◄────┘         │ (admin)
//!                                               └──► submitted ◄──────┘
//! ```

use std::collections::HashSet;

use super::model::NodeState;
use crate::error::{Error, Result};
use crate::tenancy::{Role, RoleSet};

/// Who may drive a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Performed by the engine when prerequisites complete.
    Automatic,
    /// Performed by an actor holding one of the roles.
    Roles(&'static [Role]),
}

const STUDENT: &[Role] = &[Role::Student];
const REVIEWERS: &[Role] = &[Role::Advisor, Role::Registrar, Role::Chair, Role::Admin];
const ADMIN: &[Role] = &[Role::Admin];

/// The exhaustive transition table.
pub const TRANSITIONS: [(NodeState, NodeState, Gate); 9] = [
    (NodeState::Locked, NodeState::Todo, Gate::Automatic),
    (NodeState::Todo, NodeState::Active, Gate::Roles(STUDENT)),
    (NodeState::Active, NodeState::InProgress, Gate::Roles(STUDENT)),
    (NodeState::Active, NodeState::Submitted, Gate::Roles(STUDENT)),
    (NodeState::InProgress, NodeState::Submitted, Gate::Roles(STUDENT)),
    (NodeState::NeedsFixes, NodeState::Submitted, Gate::Roles(STUDENT)),
    (NodeState::Submitted, NodeState::NeedsFixes, Gate::Roles(REVIEWERS)),
    (NodeState::Submitted, NodeState::Done, Gate::Roles(REVIEWERS)),
    (NodeState::Done, NodeState::Submitted, Gate::Roles(ADMIN)),
];

/// Gate of `from → to`, if the transition exists.
pub fn gate(from: NodeState, to: NodeState) -> Option<Gate> {
    TRANSITIONS
        .iter()
        .find(|(f, t, _)| *f == from && *t == to)
        .map(|(_, _, gate)| *gate)
}

/// Check that an actor holding `roles` may move a node from `from` to `to`.
///
/// Unknown transitions fail `IllegalTransition`; known transitions whose gate
/// the roles do not satisfy fail `NotAuthorized`. Automatic transitions are
/// never available to actors.
pub fn check(from: NodeState, to: NodeState, roles: &RoleSet) -> Result<()> {
    match gate(from, to) {
        None | Some(Gate::Automatic) => Err(Error::IllegalTransition {
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        }),
        Some(Gate::Roles(allowed)) if roles.satisfies_any(allowed) => Ok(()),
        Some(Gate::Roles(allowed)) => Err(Error::NotAuthorized(format!(
            "moving a node from {from} to {to} requires one of: {}",
            allowed
                .iter()
                .map(Role::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

/// Check a path of transitions, e.g. `todo → active → submitted`.
pub fn check_path(path: &[NodeState], roles: &RoleSet) -> Result<()> {
    for pair in path.windows(2) {
        check(pair[0], pair[1], roles)?;
    }
    Ok(())
}

/// States reachable from `locked` through the table.
pub fn reachable_states() -> HashSet<NodeState> {
    let mut seen = HashSet::from([NodeState::Locked]);
    let mut frontier = vec![NodeState::Locked];
    while let Some(state) = frontier.pop() {
        for (from, to, _) in TRANSITIONS {
            if from == state && seen.insert(to) {
                frontier.push(to);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(list: &[Role]) -> RoleSet {
        list.iter().copied().collect()
    }

    #[test]
    fn test_student_transitions() {
        let student = roles(&[Role::Student]);
        assert!(check(NodeState::Todo, NodeState::Active, &student).is_ok());
        assert!(check(NodeState::Active, NodeState::Submitted, &student).is_ok());
        assert!(check(NodeState::NeedsFixes, NodeState::Submitted, &student).is_ok());
        assert!(matches!(
            check(NodeState::Submitted, NodeState::Done, &student),
            Err(Error::NotAuthorized(_))
        ));
    }

    #[test]
    fn test_reviewer_transitions() {
        for role in [Role::Advisor, Role::Registrar, Role::Chair, Role::Admin] {
            let r = roles(&[role]);
            assert!(check(NodeState::Submitted, NodeState::Done, &r).is_ok());
            assert!(check(NodeState::Submitted, NodeState::NeedsFixes, &r).is_ok());
        }
        assert!(check(NodeState::Submitted, NodeState::Done, &roles(&[Role::Dean])).is_err());
    }

    #[test]
    fn test_reopen_is_admin_only() {
        assert!(check(NodeState::Done, NodeState::Submitted, &roles(&[Role::Admin])).is_ok());
        assert!(check(NodeState::Done, NodeState::Submitted, &roles(&[Role::Superadmin])).is_ok());
        assert!(matches!(
            check(NodeState::Done, NodeState::Submitted, &roles(&[Role::Advisor])),
            Err(Error::NotAuthorized(_))
        ));
    }

    #[test]
    fn test_illegal_and_automatic() {
        let everyone: RoleSet = Role::ALL.into_iter().collect();
        assert!(matches!(
            check(NodeState::Locked, NodeState::Todo, &everyone),
            Err(Error::IllegalTransition { .. })
        ));
        assert!(matches!(
            check(NodeState::Todo, NodeState::Done, &everyone),
            Err(Error::IllegalTransition { .. })
        ));
        assert!(matches!(
            check(NodeState::Submitted, NodeState::Submitted, &everyone),
            Err(Error::IllegalTransition { .. })
        ));
    }

    #[test]
    fn test_path() {
        let student = roles(&[Role::Student]);
        assert!(check_path(&[NodeState::Todo, NodeState::Active, NodeState::Submitted], &student).is_ok());
        assert!(check_path(&[NodeState::Locked, NodeState::Todo, NodeState::Active], &student).is_err());
    }

    #[test]
    fn test_every_state_but_waiting_is_reachable() {
        let reachable = reachable_states();
        for state in NodeState::ALL {
            assert_eq!(reachable.contains(&state), state != NodeState::Waiting, "{state}");
        }
    }
}
