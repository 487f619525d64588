use std::collections::HashMap;
use std::time::Duration;

use strum::IntoEnumIterator;

use crate::error::OrchestrationError;
use crate::models::mode::{
    ExecutionStyle, Mode, ModeDescriptor, ModePolicy, RejectAction, SelectionStrategy,
    TimeoutAction,
};

/// Every accepted external identifier, after normalisation.
///
/// A `None` target marks a retired alias that is recognised but no longer
/// mapped to any mode.
const MODE_ALIASES: &[(&str, Option<Mode>)] = &[
    // Canonical ids
    ("manual-interactive", Some(Mode::ManualInteractive)),
    ("automatic-interactive", Some(Mode::AutomaticInteractive)),
    ("manual-autonomous", Some(Mode::ManualAutonomous)),
    ("automatic-autonomous", Some(Mode::AutomaticAutonomous)),
    // Word-swapped forms used by older UI builds
    ("interactive-manual", Some(Mode::ManualInteractive)),
    ("interactive-automatic", Some(Mode::AutomaticInteractive)),
    ("autonomous-manual", Some(Mode::ManualAutonomous)),
    ("autonomous-automatic", Some(Mode::AutomaticAutonomous)),
    // Numbered forms
    ("mode1", Some(Mode::ManualInteractive)),
    ("mode2", Some(Mode::AutomaticInteractive)),
    ("mode3", Some(Mode::ManualAutonomous)),
    ("mode4", Some(Mode::AutomaticAutonomous)),
    ("mode-1", Some(Mode::ManualInteractive)),
    ("mode-2", Some(Mode::AutomaticInteractive)),
    ("mode-3", Some(Mode::ManualAutonomous)),
    ("mode-4", Some(Mode::AutomaticAutonomous)),
    ("1", Some(Mode::ManualInteractive)),
    ("2", Some(Mode::AutomaticInteractive)),
    ("3", Some(Mode::ManualAutonomous)),
    ("4", Some(Mode::AutomaticAutonomous)),
    // Retired
    ("mode0", None),
    ("mode5", None),
    ("ask-panel", None),
];

fn normalize(external_id: &str) -> String {
    external_id
        .trim()
        .chars()
        .map(|c| match c {
            '_' | ' ' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Resolve an external mode identifier. The only place untyped mode input is accepted.
pub fn resolve_mode(external_id: &str) -> Result<Mode, OrchestrationError> {
    let key = normalize(external_id);
    match MODE_ALIASES.iter().find(|(alias, _)| *alias == key) {
        Some((_, Some(mode))) => Ok(*mode),
        Some((_, None)) => Err(OrchestrationError::InvalidMode {
            mode_id: external_id.to_string(),
            reason: "deprecated alias with no current mapping",
        }),
        None => Err(OrchestrationError::InvalidMode {
            mode_id: external_id.to_string(),
            reason: "unknown mode identifier",
        }),
    }
}

/// Resolve the two UI toggles to a mode. Total over all four inputs.
pub fn resolve_simplified_mode(auto_select_expert: bool, autonomous_execution: bool) -> Mode {
    let selection = [SelectionStrategy::Manual, SelectionStrategy::Automatic];
    let execution = [ExecutionStyle::Interactive, ExecutionStyle::Autonomous];
    Mode::from_capabilities(
        selection[auto_select_expert as usize],
        execution[autonomous_execution as usize],
    )
}

fn default_policy(mode: Mode) -> ModePolicy {
    match mode {
        Mode::ManualInteractive | Mode::AutomaticInteractive => ModePolicy {
            checkpoint_timeout: Some(Duration::from_secs(10 * 60)),
            on_timeout: TimeoutAction::FailJob,
            on_reject: RejectAction::ResumeEngine,
        },
        Mode::ManualAutonomous => ModePolicy {
            checkpoint_timeout: Some(Duration::from_secs(24 * 60 * 60)),
            on_timeout: TimeoutAction::FailJob,
            on_reject: RejectAction::FailJob,
        },
        Mode::AutomaticAutonomous => ModePolicy {
            checkpoint_timeout: Some(Duration::from_secs(60 * 60)),
            on_timeout: TimeoutAction::AutoContinue,
            on_reject: RejectAction::FailJob,
        },
    }
}

/// Static capabilities and HITL policy of every mode.
#[derive(Debug, Clone)]
pub struct ModeRegistry {
    policies: HashMap<Mode, ModePolicy>,
}

impl Default for ModeRegistry {
    fn default() -> Self {
        Self {
            policies: Mode::iter().map(|m| (m, default_policy(m))).collect(),
        }
    }
}

impl ModeRegistry {
    /// Replace one mode's policy.
    pub fn with_policy(mut self, mode: Mode, policy: ModePolicy) -> Self {
        self.policies.insert(mode, policy);
        self
    }

    /// Apply one checkpoint timeout to every mode.
    pub fn with_checkpoint_timeout(mut self, timeout: Duration) -> Self {
        for policy in self.policies.values_mut() {
            policy.checkpoint_timeout = Some(timeout);
        }
        self
    }

    pub fn policy(&self, mode: Mode) -> ModePolicy {
        self.policies
            .get(&mode)
            .copied()
            .unwrap_or_else(|| default_policy(mode))
    }

    pub fn resolve(&self, external_id: &str) -> Result<Mode, OrchestrationError> {
        resolve_mode(external_id)
    }

    pub fn descriptors(&self) -> Vec<ModeDescriptor> {
        Mode::iter()
            .map(|mode| ModeDescriptor {
                id: mode,
                number: mode.number(),
                selection: mode.selection(),
                execution: mode.execution(),
                policy: self.policy(mode),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_ids_resolve() {
        for mode in Mode::iter() {
            assert_eq!(resolve_mode(mode.id()).unwrap(), mode);
        }
    }

    #[test]
    fn test_simplified_mapping_agrees_with_resolve() {
        for auto in [false, true] {
            for autonomous in [false, true] {
                let mode = resolve_simplified_mode(auto, autonomous);
                assert_eq!(resolve_mode(mode.id()).unwrap(), mode);
                assert_eq!(mode.selection() == SelectionStrategy::Automatic, auto);
                assert_eq!(mode.execution() == ExecutionStyle::Autonomous, autonomous);
            }
        }
    }

    #[test]
    fn test_numbered_aliases_follow_mode_number() {
        for mode in Mode::iter() {
            let alias = format!("mode{}", mode.number());
            assert_eq!(resolve_mode(&alias).unwrap(), mode);
        }
    }

    #[test]
    fn test_normalisation() {
        assert_eq!(
            resolve_mode("  Manual_Interactive ").unwrap(),
            Mode::ManualInteractive
        );
        assert_eq!(
            resolve_mode("AUTOMATIC AUTONOMOUS").unwrap(),
            Mode::AutomaticAutonomous
        );
    }

    #[test]
    fn test_unknown_and_empty_ids_rejected() {
        for id in ["", "mode9", "manual", "interactive-interactive", "ask_expert"] {
            assert!(matches!(
                resolve_mode(id),
                Err(OrchestrationError::InvalidMode { .. })
            ));
        }
    }

    #[test]
    fn test_deprecated_alias_rejected_with_reason() {
        match resolve_mode("ask_panel") {
            Err(OrchestrationError::InvalidMode { reason, .. }) => {
                assert!(reason.contains("deprecated"))
            }
            other => panic!("expected InvalidMode, got {:?}", other),
        }
    }

    #[test]
    fn test_every_alias_target_is_consistent() {
        for (alias, target) in MODE_ALIASES {
            assert_eq!(normalize(alias), *alias, "alias {} is not normalised", alias);
            if let Some(mode) = target {
                assert_eq!(resolve_mode(alias).unwrap(), *mode);
            }
        }
    }

    #[test]
    fn test_policy_override() {
        let policy = ModePolicy {
            checkpoint_timeout: None,
            on_timeout: TimeoutAction::AutoContinue,
            on_reject: RejectAction::ResumeEngine,
        };
        let registry = ModeRegistry::default().with_policy(Mode::ManualAutonomous, policy);
        assert_eq!(registry.policy(Mode::ManualAutonomous), policy);
        assert_eq!(
            registry.policy(Mode::AutomaticAutonomous).on_timeout,
            TimeoutAction::AutoContinue
        );
        assert_eq!(registry.descriptors().len(), 4);
    }
}
