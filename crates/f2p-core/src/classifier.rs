//! Differential classification of before/after outcome maps.
//!
//! Pure functions: the same inputs always produce the same rows and verdict.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::error::{F2pError, Result};
use crate::domain::instance::{TestPartition, TestRole};
use crate::domain::outcome::{OutcomeMap, TestOutcome};
use crate::domain::report::TestTransition;
use crate::domain::transition::TransitionLabel;

/// Labels for every identifier plus the aggregate verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Classification {
    pub transitions: Vec<TestTransition>,
    pub verdict: TransitionLabel,
}

fn outcome_in(map: Option<&OutcomeMap>, id: &str) -> TestOutcome {
    map.and_then(|m| m.get(id).copied())
        .unwrap_or(TestOutcome::Absent)
}

/// Label every identifier in the union of both maps.
///
/// Fails with a classification error on an empty identifier or when the
/// row count does not match the union size.
pub fn classify(
    before: &OutcomeMap,
    after: &OutcomeMap,
    partition: &TestPartition,
) -> Result<Classification> {
    let union: BTreeSet<&String> = before.keys().chain(after.keys()).collect();

    let mut transitions = Vec::with_capacity(union.len());
    for id in &union {
        if id.trim().is_empty() {
            return Err(F2pError::Classification(
                "empty test identifier in outcome map".to_string(),
            ));
        }
        let b = outcome_in(Some(before), id);
        let a = outcome_in(Some(after), id);
        transitions.push(TestTransition {
            test_id: (*id).clone(),
            before: b,
            after: a,
            label: TransitionLabel::from_outcomes(b, a),
            role: partition.role_of(id),
        });
    }

    if transitions.len() != union.len() {
        return Err(F2pError::Classification(format!(
            "{} labels for {} identifiers",
            transitions.len(),
            union.len()
        )));
    }

    let verdict = compute_verdict(&transitions);
    Ok(Classification {
        transitions,
        verdict,
    })
}

/// Every identifier labelled `error` after a fatal build or apply failure.
///
/// Identifiers are the union of whatever was observed and the requested
/// targets, so a failed build still reports each target.
pub fn force_error(
    before: Option<&OutcomeMap>,
    after: Option<&OutcomeMap>,
    test_targets: &[String],
    partition: &TestPartition,
) -> Classification {
    let mut ids: BTreeSet<&str> = test_targets.iter().map(String::as_str).collect();
    for map in [before, after].into_iter().flatten() {
        ids.extend(map.keys().map(String::as_str));
    }

    let transitions = ids
        .into_iter()
        .map(|id| TestTransition {
            test_id: id.to_string(),
            before: outcome_in(before, id),
            after: outcome_in(after, id),
            label: TransitionLabel::Error,
            role: partition.role_of(id),
        })
        .collect();

    Classification {
        transitions,
        verdict: TransitionLabel::Error,
    }
}

/// Aggregate verdict for an instance.
///
/// `fail2pass` when some target goes fail→pass and no guard regresses from
/// pass (to fail or error); otherwise the most severe label observed.
pub fn compute_verdict(transitions: &[TestTransition]) -> TransitionLabel {
    if transitions.is_empty() {
        return TransitionLabel::Error;
    }

    let target_fixed = transitions
        .iter()
        .any(|t| t.role == TestRole::Target && t.label == TransitionLabel::FailToPass);
    let guard_regressed = transitions.iter().any(|t| {
        t.role == TestRole::Guard
            && t.before == TestOutcome::Pass
            && matches!(t.label, TransitionLabel::PassToFail | TransitionLabel::Error)
    });

    if target_fixed && !guard_regressed {
        return TransitionLabel::FailToPass;
    }

    transitions
        .iter()
        .map(|t| t.label)
        .max_by_key(TransitionLabel::severity)
        .unwrap_or(TransitionLabel::Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, TestOutcome)]) -> OutcomeMap {
        entries
            .iter()
            .map(|(id, o)| (id.to_string(), *o))
            .collect()
    }

    fn partition(targets: &[&str], guards: &[&str]) -> TestPartition {
        TestPartition::new(
            targets.iter().map(|s| s.to_string()).collect(),
            guards.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_identifier_missing_from_one_phase_is_error() {
        let before = map(&[("t1", TestOutcome::Fail)]);
        let after = map(&[("t2", TestOutcome::Pass)]);
        let c = classify(&before, &after, &partition(&[], &[])).unwrap();
        assert_eq!(c.transitions.len(), 2);
        assert!(c.transitions.iter().all(|t| t.label == TransitionLabel::Error));
        assert_eq!(c.transitions[0].after, TestOutcome::Absent);
    }

    #[test]
    fn test_empty_union_is_error() {
        let c = classify(&OutcomeMap::new(), &OutcomeMap::new(), &partition(&[], &[])).unwrap();
        assert!(c.transitions.is_empty());
        assert_eq!(c.verdict, TransitionLabel::Error);
    }

    #[test]
    fn test_empty_identifier_is_classification_error() {
        let before = map(&[("", TestOutcome::Pass)]);
        let err = classify(&before, &before, &partition(&[], &[])).unwrap_err();
        assert!(matches!(err, F2pError::Classification(_)));
    }

    #[test]
    fn test_guard_pass_to_error_blocks_fail2pass() {
        let before = map(&[("t1", TestOutcome::Fail), ("g1", TestOutcome::Pass)]);
        let after = map(&[("t1", TestOutcome::Pass), ("g1", TestOutcome::Error)]);
        let c = classify(&before, &after, &partition(&["t1"], &["g1"])).unwrap();
        assert_eq!(c.verdict, TransitionLabel::Error);
    }

    #[test]
    fn test_non_guard_error_does_not_block_fail2pass() {
        let before = map(&[("t1", TestOutcome::Fail), ("x", TestOutcome::Skipped)]);
        let after = map(&[("t1", TestOutcome::Pass), ("x", TestOutcome::Skipped)]);
        let c = classify(&before, &after, &partition(&["t1"], &[])).unwrap();
        assert_eq!(c.verdict, TransitionLabel::FailToPass);
    }

    #[test]
    fn test_fail2pass_outside_targets_does_not_count() {
        let before = map(&[("t1", TestOutcome::Fail), ("other", TestOutcome::Fail)]);
        let after = map(&[("t1", TestOutcome::Fail), ("other", TestOutcome::Pass)]);
        let c = classify(&before, &after, &partition(&["t1"], &[])).unwrap();
        assert_eq!(c.verdict, TransitionLabel::FailToFail);
    }

    #[test]
    fn test_force_error_includes_targets() {
        let before = map(&[("t1", TestOutcome::Fail), ("t9", TestOutcome::Pass)]);
        let targets = vec!["t1".to_string(), "t2".to_string()];
        let c = force_error(Some(&before), None, &targets, &partition(&["t1", "t2"], &[]));
        let ids: Vec<&str> = c.transitions.iter().map(|t| t.test_id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t9"]);
        assert!(c.transitions.iter().all(|t| t.label == TransitionLabel::Error));
        assert_eq!(c.transitions[0].before, TestOutcome::Fail);
        assert_eq!(c.transitions[0].after, TestOutcome::Absent);
        assert_eq!(c.verdict, TransitionLabel::Error);
    }
}
