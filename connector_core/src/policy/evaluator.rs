//! Constraint evaluation.
//!
//! Registered evaluation functions are keyed by `(scope, rule kind, left
//! key)`. Lookup walks the context's scope chain from narrowest to broadest
//! and falls back to the built-in default evaluator, which only understands
//! `EQ`/`NEQ` between a claim and a value.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

use super::context::PolicyContext;
use super::model::{values_equal, AtomicConstraint, Constraint, Expression, Operator, Rule, RuleKind};
use crate::error::EvaluationFailure;

/// A pluggable evaluation function: `(operator, right value, rule, context) -> satisfied`.
pub type EvaluationFunction =
    Arc<dyn Fn(Operator, &Value, &Rule, &PolicyContext) -> bool + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct FunctionKey {
    scope: String,
    kind: RuleKind,
    left_key: String,
}

/// Registered evaluation functions.
#[derive(Default)]
pub(crate) struct FunctionRegistry {
    functions: RwLock<HashMap<FunctionKey, EvaluationFunction>>,
}

impl FunctionRegistry {
    /// Install a function, replacing any previous one for the same triple.
    ///
    /// Returns `true` if a function was replaced.
    pub(crate) fn register<F>(&self, scope: &str, kind: RuleKind, left_key: &str, function: F) -> bool
    where
        F: Fn(Operator, &Value, &Rule, &PolicyContext) -> bool + Send + Sync + 'static,
    {
        let function: EvaluationFunction = Arc::new(function);
        let key = FunctionKey {
            scope: scope.trim().to_string(),
            kind,
            left_key: left_key.to_string(),
        };
        self.functions.write().insert(key, function).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.functions.read().len()
    }

    /// Take a snapshot for one evaluation.
    ///
    /// Functions run against the snapshot without the lock held, so a
    /// function may itself register functions without deadlocking.
    pub(crate) fn snapshot(&self) -> ConstraintEvaluator {
        ConstraintEvaluator {
            functions: self.functions.read().clone(),
        }
    }
}

/// Result of checking one rule's constraints.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RuleOutcome {
    Satisfied,
    Unsatisfied(String),
    Failed(EvaluationFailure),
}

/// Evaluates constraint trees against a fixed set of functions.
pub(crate) struct ConstraintEvaluator {
    functions: HashMap<FunctionKey, EvaluationFunction>,
}

impl ConstraintEvaluator {
    /// Check every constraint of a rule (implicit AND).
    pub(crate) fn evaluate_rule(&self, rule: &Rule, context: &PolicyContext) -> RuleOutcome {
        for constraint in &rule.constraints {
            match self.evaluate(constraint, rule, context) {
                Ok(true) => {}
                Ok(false) => return RuleOutcome::Unsatisfied(describe(constraint)),
                Err(failure) => return RuleOutcome::Failed(failure),
            }
        }
        RuleOutcome::Satisfied
    }

    fn evaluate(
        &self,
        constraint: &Constraint,
        rule: &Rule,
        context: &PolicyContext,
    ) -> Result<bool, EvaluationFailure> {
        match constraint {
            Constraint::Atomic(atomic) => self.evaluate_atomic(atomic, rule, context),
            Constraint::And { constraints } => {
                for c in constraints {
                    if !self.evaluate(c, rule, context)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Constraint::Or { constraints } => {
                for c in constraints {
                    if self.evaluate(c, rule, context)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Constraint::Xone { constraints } => {
                let mut satisfied = 0;
                for c in constraints {
                    if self.evaluate(c, rule, context)? {
                        satisfied += 1;
                    }
                }
                Ok(satisfied == 1)
            }
        }
    }

    fn evaluate_atomic(
        &self,
        atomic: &AtomicConstraint,
        rule: &Rule,
        context: &PolicyContext,
    ) -> Result<bool, EvaluationFailure> {
        let key = atomic.left_expression.key();
        let right = resolve_right(&atomic.right_expression, context);

        match self.lookup(context, rule.kind, &key) {
            Some((scope, function)) => {
                trace!(key = %key, scope = %scope, kind = %rule.kind, "Invoking registered evaluation function");
                catch_unwind(AssertUnwindSafe(|| {
                    function(atomic.operator, &right, rule, context)
                }))
                .map_err(|payload| EvaluationFailure::FunctionPanicked {
                    key: key.clone(),
                    message: panic_message(payload.as_ref()),
                })
            }
            None => default_evaluate(&key, atomic.operator, &right, context),
        }
    }

    /// Most specific registration wins: walk the scope chain narrowest first.
    fn lookup(
        &self,
        context: &PolicyContext,
        kind: RuleKind,
        left_key: &str,
    ) -> Option<(String, &EvaluationFunction)> {
        context.scope_chain().into_iter().find_map(|scope| {
            let key = FunctionKey {
                scope,
                kind,
                left_key: left_key.to_string(),
            };
            self.functions.get(&key).map(|f| (key.scope, f))
        })
    }
}

/// Built-in evaluator: compares the claim named by the left key with the
/// right value. Only `EQ` and `NEQ` are understood; a missing claim
/// satisfies neither.
fn default_evaluate(
    key: &str,
    operator: Operator,
    right: &Value,
    context: &PolicyContext,
) -> Result<bool, EvaluationFailure> {
    let left = context.agent().resolve(key);
    match operator {
        Operator::Eq => Ok(left.is_some_and(|l| values_equal(l, right))),
        Operator::Neq => Ok(left.is_some_and(|l| !values_equal(l, right))),
        other => Err(EvaluationFailure::UnsupportedOperator {
            operator: other.to_string(),
            key: key.to_string(),
        }),
    }
}

fn resolve_right(expression: &Expression, context: &PolicyContext) -> Value {
    match expression {
        Expression::Literal(value) => value.clone(),
        Expression::Attribute(path) => context
            .agent()
            .resolve(path)
            .cloned()
            .unwrap_or(Value::Null),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Human-readable form of a constraint for deny reasons.
pub(crate) fn describe(constraint: &Constraint) -> String {
    let join = |name: &str, children: &[Constraint]| {
        let parts: Vec<String> = children.iter().map(describe).collect();
        format!("{}({})", name, parts.join(", "))
    };

    match constraint {
        Constraint::Atomic(atomic) => {
            let right = match &atomic.right_expression {
                Expression::Literal(v) => v.to_string(),
                Expression::Attribute(path) => format!("${}", path),
            };
            format!("{} {} {}", atomic.left_expression.key(), atomic.operator, right)
        }
        Constraint::And { constraints } => join("AND", constraints),
        Constraint::Or { constraints } => join("OR", constraints),
        Constraint::Xone { constraints } => join("XONE", constraints),
    }
}
