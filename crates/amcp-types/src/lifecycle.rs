//! Agent lifecycle state machine.
//!
//! Normal operation follows `inactive -> activating -> active ->
//! deactivating -> inactive`; strong mobility follows `active -> migrating
//! -> (gone, reborn on the destination as active)`. Any non-terminal state
//! may transition to the terminal `destroyed`.

use serde::{Deserialize, Serialize};

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Not running; no subscriptions installed.
    Inactive,
    /// `onActivate` is in flight.
    Activating,
    /// Running; events are delivered.
    Active,
    /// `onDeactivate` is in flight; in-flight events drain.
    Deactivating,
    /// Quiesced for strong mobility; events are parked or redelivered.
    Migrating,
    /// Terminal. No further transitions are possible.
    Destroyed,
}

impl AgentState {
    /// Whether `self -> next` is a legal lifecycle transition.
    ///
    /// `Destroyed` is reachable from every non-terminal state; the rest
    /// follow the two linear paths (normal lifecycle, migration) plus the
    /// activation rollback (`Activating -> Inactive` on `onActivate`
    /// failure) and the migration-abort path (`Migrating -> Active`,
    /// resuming after a refused or failed hand-off).
    pub fn can_transition_to(self, next: AgentState) -> bool {
        use AgentState::*;
        if next == Destroyed {
            return self != Destroyed;
        }
        matches!(
            (self, next),
            (Inactive, Activating)
                | (Activating, Active)
                | (Activating, Inactive) // rollback on onActivate failure
                | (Active, Deactivating)
                | (Deactivating, Inactive)
                | (Active, Migrating)
                | (Migrating, Active) // resumed after failed/refused hand-off
        )
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentState::Inactive => "inactive",
            AgentState::Activating => "activating",
            AgentState::Active => "active",
            AgentState::Deactivating => "deactivating",
            AgentState::Migrating => "migrating",
            AgentState::Destroyed => "destroyed",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AgentState::*;

    #[test]
    fn normal_lifecycle_path_is_legal() {
        assert!(Inactive.can_transition_to(Activating));
        assert!(Activating.can_transition_to(Active));
        assert!(Active.can_transition_to(Deactivating));
        assert!(Deactivating.can_transition_to(Inactive));
    }

    #[test]
    fn migration_round_trip_is_legal() {
        assert!(Active.can_transition_to(Migrating));
        assert!(Migrating.can_transition_to(Active));
    }

    #[test]
    fn any_non_terminal_state_can_be_destroyed() {
        for state in [Inactive, Activating, Active, Deactivating, Migrating] {
            assert!(state.can_transition_to(Destroyed));
        }
        assert!(!Destroyed.can_transition_to(Destroyed));
    }

    #[test]
    fn illegal_jumps_are_rejected() {
        assert!(!Inactive.can_transition_to(Active));
        assert!(!Deactivating.can_transition_to(Migrating));
    }
}
