//! Trigger evaluation: does an event start a run?

use serde::Serialize;

use crate::domain::{Event, PipelineDefinition};

/// Outcome of matching an event against a pipeline's triggers.
///
/// A non-`Run` decision is a normal outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerDecision {
    Run,
    EventNotDeclared,
    BranchNotMatched,
}

impl TriggerDecision {
    pub fn should_run(&self) -> bool {
        matches!(self, TriggerDecision::Run)
    }
}

/// Match `event` against the definition's trigger set.
///
/// The event type must be declared and the branch must equal one of its
/// filters exactly. A declared event with no branches matches nothing.
pub fn evaluate(definition: &PipelineDefinition, event: &Event) -> TriggerDecision {
    let Some(filter) = definition.triggers.get(&event.kind) else {
        return TriggerDecision::EventNotDeclared;
    };
    if filter.branches.iter().any(|b| *b == event.branch) {
        TriggerDecision::Run
    } else {
        TriggerDecision::BranchNotMatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventType, OrderedMap, TriggerFilter};
    use std::collections::BTreeMap;

    fn definition(triggers: &[(EventType, &[&str])]) -> PipelineDefinition {
        PipelineDefinition {
            name: "CI".to_string(),
            triggers: triggers
                .iter()
                .map(|(kind, branches)| {
                    (
                        *kind,
                        TriggerFilter {
                            branches: branches.iter().map(|b| b.to_string()).collect(),
                        },
                    )
                })
                .collect(),
            env: BTreeMap::new(),
            jobs: OrderedMap::new(),
        }
    }

    #[test]
    fn push_to_declared_branch_runs() {
        let def = definition(&[(EventType::Push, &["master"])]);
        assert_eq!(
            evaluate(&def, &Event::new(EventType::Push, "master")),
            TriggerDecision::Run
        );
        assert_eq!(
            evaluate(&def, &Event::new(EventType::Push, "dev")),
            TriggerDecision::BranchNotMatched
        );
    }

    #[test]
    fn undeclared_event_type_does_not_run() {
        let def = definition(&[(EventType::Push, &["master"])]);
        let decision = evaluate(&def, &Event::new(EventType::PullRequest, "master"));
        assert_eq!(decision, TriggerDecision::EventNotDeclared);
        assert!(!decision.should_run());
    }

    #[test]
    fn branch_match_is_exact() {
        let def = definition(&[(EventType::Push, &["release/*"])]);
        assert!(!evaluate(&def, &Event::new(EventType::Push, "release/1.0")).should_run());
        assert!(!evaluate(&def, &Event::new(EventType::Push, "Master")).should_run());
    }

    #[test]
    fn empty_trigger_set_never_runs() {
        let def = definition(&[]);
        assert!(!evaluate(&def, &Event::new(EventType::Push, "master")).should_run());

        let def = definition(&[(EventType::Push, &[])]);
        assert!(!evaluate(&def, &Event::new(EventType::Push, "master")).should_run());
    }
}
