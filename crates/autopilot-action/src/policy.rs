//! Autonomy policy: maps a rule's trust level to an execution mode.

use autopilot_core::types::{AutonomyLevel, ExecutionMode};

/// Decides how a rule firing is handled.
///
/// An optional operator ceiling caps every rule's level, so trust can be
/// dialed down globally without editing rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutonomyPolicy {
    ceiling: Option<AutonomyLevel>,
}

impl AutonomyPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ceiling(ceiling: Option<AutonomyLevel>) -> Self {
        Self { ceiling }
    }

    pub fn effective_level(&self, level: AutonomyLevel) -> AutonomyLevel {
        match self.ceiling {
            Some(ceiling) => level.min(ceiling),
            None => level,
        }
    }

    pub fn determine_execution_status(&self, level: AutonomyLevel) -> ExecutionMode {
        match self.effective_level(level) {
            AutonomyLevel::Autonomous => ExecutionMode::AutoExecute,
            AutonomyLevel::Supervised => ExecutionMode::RequireApproval,
            AutonomyLevel::Advisory => ExecutionMode::AdviseOnly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_map_to_modes() {
        let policy = AutonomyPolicy::new();
        assert_eq!(
            policy.determine_execution_status(AutonomyLevel::Autonomous),
            ExecutionMode::AutoExecute
        );
        assert_eq!(
            policy.determine_execution_status(AutonomyLevel::Supervised),
            ExecutionMode::RequireApproval
        );
        assert_eq!(
            policy.determine_execution_status(AutonomyLevel::Advisory),
            ExecutionMode::AdviseOnly
        );
    }

    #[test]
    fn test_ceiling_caps_autonomy() {
        let policy = AutonomyPolicy::with_ceiling(Some(AutonomyLevel::Supervised));
        assert_eq!(
            policy.determine_execution_status(AutonomyLevel::Autonomous),
            ExecutionMode::RequireApproval
        );
        // A ceiling never raises a level.
        assert_eq!(
            policy.determine_execution_status(AutonomyLevel::Advisory),
            ExecutionMode::AdviseOnly
        );
    }

    #[test]
    fn test_advisory_ceiling_disables_execution() {
        let policy = AutonomyPolicy::with_ceiling(Some(AutonomyLevel::Advisory));
        for level in [
            AutonomyLevel::Advisory,
            AutonomyLevel::Supervised,
            AutonomyLevel::Autonomous,
        ] {
            assert_eq!(
                policy.determine_execution_status(level),
                ExecutionMode::AdviseOnly
            );
        }
    }
}
