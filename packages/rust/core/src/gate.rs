//! Practice gate derived from the learner's confusion state.

use studyforge_shared::{ConfusionState, Result, StudyForgeError};

/// Whether practice exercises may be generated. Never stored; always derived
/// from [`ConfusionState::understood`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionGate {
    Locked,
    Unlocked,
}

impl SessionGate {
    pub fn from_state(state: &ConfusionState) -> Self {
        if state.understood {
            Self::Unlocked
        } else {
            Self::Locked
        }
    }

    pub fn is_unlocked(self) -> bool {
        self == Self::Unlocked
    }

    /// Reject practice requests while locked.
    pub fn ensure_unlocked(self) -> Result<()> {
        match self {
            Self::Unlocked => Ok(()),
            Self::Locked => Err(StudyForgeError::precondition(
                "practice is locked until the learner confirms understanding",
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
        }
    }
}

impl std::fmt::Display for SessionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_is_locked() {
        let gate = SessionGate::from_state(&ConfusionState::default());
        assert_eq!(gate, SessionGate::Locked);
        assert!(matches!(
            gate.ensure_unlocked(),
            Err(StudyForgeError::Precondition { .. })
        ));
    }

    #[test]
    fn understood_unlocks() {
        let state = ConfusionState {
            understood: true,
            ..ConfusionState::default()
        };
        let gate = SessionGate::from_state(&state);
        assert!(gate.is_unlocked());
        assert!(gate.ensure_unlocked().is_ok());
    }
}
