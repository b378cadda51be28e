//! Policy engine.
//!
//! Owns the evaluation function registry and turns a policy plus a request
//! context into a [`Decision`]. Evaluation is synchronous, deterministic and
//! never fails: every fault becomes a deny reason.

use serde_json::Value;
use tracing::{debug, info, warn};

use super::context::PolicyContext;
use super::decision::{Decision, Reason, ReasonKind};
use super::evaluator::{FunctionRegistry, RuleOutcome};
use super::model::{Operator, Policy, Rule, RuleKind};

/// Evaluates policies against request contexts.
#[derive(Default)]
pub struct PolicyEngine {
    functions: FunctionRegistry,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the evaluation function for `(scope, kind, left_key)`.
    ///
    /// Last write wins. Returns `true` if an earlier function was replaced.
    pub fn register_function<F>(&self, scope: &str, kind: RuleKind, left_key: &str, function: F) -> bool
    where
        F: Fn(Operator, &Value, &Rule, &PolicyContext) -> bool + Send + Sync + 'static,
    {
        let replaced = self.functions.register(scope, kind, left_key, function);
        if replaced {
            info!(scope = %scope, kind = %kind, key = %left_key, "Replaced evaluation function");
        } else {
            debug!(scope = %scope, kind = %kind, key = %left_key, "Registered evaluation function");
        }
        replaced
    }

    /// Number of registered functions.
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Evaluate a policy.
    ///
    /// Prohibitions whose constraints hold forbid their action. Permissions
    /// whose constraints hold grant theirs; an unsatisfied permission
    /// constraint denies. Duties whose constraints cannot be met deny. A
    /// policy without permissions denies everything.
    pub fn evaluate(&self, policy: &Policy, context: &PolicyContext) -> Decision {
        let evaluator = self.functions.snapshot();
        let mut decision = Decision::new(policy.id(), context.scope());

        for rule in policy.prohibitions() {
            match evaluator.evaluate_rule(rule, context) {
                RuleOutcome::Satisfied => decision.deny(reason(
                    ReasonKind::Prohibited,
                    rule,
                    "prohibited by policy".to_string(),
                )),
                RuleOutcome::Unsatisfied(_) => {}
                RuleOutcome::Failed(failure) => {
                    decision.deny(reason(ReasonKind::EvaluationFailure, rule, failure.to_string()))
                }
            }
        }

        for rule in policy.permissions() {
            match evaluator.evaluate_rule(rule, context) {
                RuleOutcome::Satisfied => decision.grant(&rule.action),
                RuleOutcome::Unsatisfied(constraint) => decision.deny(reason(
                    ReasonKind::NotSatisfied,
                    rule,
                    format!("constraint {} not satisfied", constraint),
                )),
                RuleOutcome::Failed(failure) => {
                    decision.deny(reason(ReasonKind::EvaluationFailure, rule, failure.to_string()))
                }
            }
        }

        for rule in policy.duties() {
            match evaluator.evaluate_rule(rule, context) {
                RuleOutcome::Satisfied => {}
                RuleOutcome::Unsatisfied(constraint) => decision.deny(reason(
                    ReasonKind::DutyUnmet,
                    rule,
                    format!("duty constraint {} cannot be met", constraint),
                )),
                RuleOutcome::Failed(failure) => {
                    decision.deny(reason(ReasonKind::EvaluationFailure, rule, failure.to_string()))
                }
            }
        }

        if policy.permissions().is_empty() {
            decision.deny(Reason {
                kind: ReasonKind::NoPermission,
                rule_kind: None,
                action: None,
                message: "policy grants no permissions".to_string(),
            });
        }

        if decision.has_faults() {
            warn!(policy_id = %policy.id(), scope = %context.scope(), "{}", decision);
        } else if decision.allowed() {
            debug!(policy_id = %policy.id(), scope = %context.scope(), "Policy allowed");
        } else {
            info!(policy_id = %policy.id(), scope = %context.scope(), "{}", decision);
        }

        decision
    }
}

fn reason(kind: ReasonKind, rule: &Rule, message: String) -> Reason {
    Reason {
        kind,
        rule_kind: Some(rule.kind),
        action: Some(rule.action.clone()),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::context::{ParticipantAgent, ALL_SCOPES};
    use crate::policy::functions::region_function;
    use crate::policy::model::{Action, Constraint, Expression};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn region_eq(region: &str) -> Constraint {
        Constraint::atomic(
            Expression::literal("region"),
            Operator::Eq,
            Expression::literal(region),
        )
    }

    fn use_eu() -> Policy {
        Policy::new(
            "use-eu",
            vec![Rule::permission(Action::new("USE"), vec![region_eq("eu")])],
            vec![],
            vec![],
        )
        .unwrap()
    }

    fn context(region: &str) -> PolicyContext {
        PolicyContext::new("transfer", ParticipantAgent::with_claims([("region", region)]))
    }

    #[test]
    fn test_region_scenario() {
        let engine = PolicyEngine::new();
        engine.register_function(ALL_SCOPES, RuleKind::Permission, "region", region_function());
        let policy = use_eu();
        let use_action = Action::new("USE");

        let decision = engine.evaluate(&policy, &context("eu"));
        assert!(decision.allowed());
        assert!(decision.permits(&use_action));

        let decision = engine.evaluate(&policy, &context("us"));
        assert!(!decision.allowed());
        assert!(!decision.permits(&use_action));
        assert_eq!(decision.reasons[0].kind, ReasonKind::NotSatisfied);
        assert!(!decision.has_faults());
    }

    #[test]
    fn test_default_deny() {
        let engine = PolicyEngine::new();

        let empty = Policy::new("empty", vec![], vec![], vec![]).unwrap();
        let decision = engine.evaluate(&empty, &context("eu"));
        assert!(!decision.allowed());
        assert!(!decision.permits(&Action::new("USE")));
        assert_eq!(decision.reasons[0].kind, ReasonKind::NoPermission);

        // Actions the policy never mentions are denied even when others are granted
        let decision = engine.evaluate(&use_eu(), &context("eu"));
        assert!(decision.permits(&Action::new("USE")));
        assert!(!decision.permits(&Action::new("MOVE")));
    }

    #[test]
    fn test_prohibition_overrides_permission() {
        let engine = PolicyEngine::new();
        let policy = Policy::new(
            "no-us-copy",
            vec![
                Rule::permission(Action::new("USE"), vec![]),
                Rule::permission(Action::new("COPY"), vec![]),
            ],
            vec![Rule::prohibition(Action::new("COPY"), vec![region_eq("us")])],
            vec![],
        )
        .unwrap();

        let decision = engine.evaluate(&policy, &context("us"));
        assert!(!decision.allowed());
        assert!(decision.permits(&Action::new("USE")));
        assert!(!decision.permits(&Action::new("COPY")));
        assert_eq!(decision.reasons[0].kind, ReasonKind::Prohibited);

        // The prohibition does not apply outside the us region
        assert!(engine.evaluate(&policy, &context("eu")).allowed());
    }

    #[test]
    fn test_unmet_duty_denies() {
        let engine = PolicyEngine::new();
        let policy = Policy::new(
            "use-with-duty",
            vec![Rule::permission(Action::new("USE"), vec![])],
            vec![],
            vec![Rule::duty(Action::new("USE"), vec![region_eq("eu")])],
        )
        .unwrap();

        assert!(engine.evaluate(&policy, &context("eu")).allowed());

        let decision = engine.evaluate(&policy, &context("us"));
        assert!(!decision.allowed());
        assert_eq!(decision.reasons[0].kind, ReasonKind::DutyUnmet);
    }

    #[test]
    fn test_evaluation_failure_fails_closed() {
        let engine = PolicyEngine::new();
        let policy = Policy::new(
            "tier",
            vec![Rule::permission(
                Action::new("USE"),
                vec![Constraint::atomic(
                    Expression::literal("tier"),
                    Operator::Gt,
                    Expression::literal(json!(1)),
                )],
            )],
            vec![],
            vec![],
        )
        .unwrap();

        // The default evaluator cannot apply GT
        let decision = engine.evaluate(&policy, &context("eu"));
        assert!(!decision.allowed());
        assert!(decision.has_faults());
        assert_eq!(decision.reasons[0].kind, ReasonKind::EvaluationFailure);
    }

    #[test]
    fn test_panicking_function_is_contained() {
        let engine = PolicyEngine::new();
        engine.register_function(ALL_SCOPES, RuleKind::Permission, "region", |_, _, _, _| {
            panic!("claims provider unavailable")
        });

        let decision = engine.evaluate(&use_eu(), &context("eu"));
        assert!(!decision.allowed());
        assert!(decision.has_faults());
        assert!(decision.reasons[0].message.contains("claims provider unavailable"));
    }

    #[test]
    fn test_last_registration_wins() {
        let engine = PolicyEngine::new();
        let first_calls = Arc::new(AtomicUsize::new(0));
        let second_calls = Arc::new(AtomicUsize::new(0));

        let counter = first_calls.clone();
        assert!(!engine.register_function(ALL_SCOPES, RuleKind::Permission, "region", move |_, _, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        }));

        let counter = second_calls.clone();
        assert!(engine.register_function(ALL_SCOPES, RuleKind::Permission, "region", move |_, _, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        }));
        assert_eq!(engine.function_count(), 1);

        engine.evaluate(&use_eu(), &context("us"));
        assert_eq!(first_calls.load(Ordering::SeqCst), 0);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registered_function_overrides_default() {
        let engine = PolicyEngine::new();
        let policy = use_eu();

        // Default evaluator: plain claim equality
        assert!(!engine.evaluate(&policy, &context("us")).allowed());

        // A function that ignores the claim entirely replaces it
        engine.register_function(ALL_SCOPES, RuleKind::Permission, "region", |_, _, _, _| true);
        assert!(engine.evaluate(&policy, &context("us")).allowed());
    }
}
