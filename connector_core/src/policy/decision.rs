//! Evaluation outcomes.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::model::{Action, RuleKind};

/// Why an action was not allowed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonKind {
    /// A permission constraint evaluated to false.
    NotSatisfied,
    /// A prohibition applied.
    Prohibited,
    /// A duty's constraints could not be met.
    DutyUnmet,
    /// The constraint could not be evaluated (unsupported operator, type
    /// mismatch, faulting function). Always denies.
    EvaluationFailure,
    /// The policy grants nothing.
    NoPermission,
}

/// A recorded deny reason.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Reason {
    pub kind: ReasonKind,
    pub rule_kind: Option<RuleKind>,
    pub action: Option<Action>,
    pub message: String,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            Some(action) => write!(f, "{}: {}", action, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Per-action verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Deny,
}

/// The result of evaluating a policy against a context.
#[derive(Clone, Debug, Serialize)]
pub struct Decision {
    pub policy_id: String,
    pub scope: String,
    pub verdicts: BTreeMap<Action, Verdict>,
    pub reasons: Vec<Reason>,
    pub evaluated_at: DateTime<Utc>,
}

impl Decision {
    pub(crate) fn new(policy_id: &str, scope: &str) -> Self {
        Self {
            policy_id: policy_id.to_string(),
            scope: scope.to_string(),
            verdicts: BTreeMap::new(),
            reasons: Vec::new(),
            evaluated_at: Utc::now(),
        }
    }

    /// Overall verdict: something was granted and nothing was violated.
    pub fn allowed(&self) -> bool {
        self.reasons.is_empty() && self.verdicts.values().any(|v| *v == Verdict::Allow)
    }

    /// Verdict for one action. Actions the policy never grants are denied.
    pub fn permits(&self, action: &Action) -> bool {
        self.reasons.iter().all(|r| r.action.as_ref() != Some(action))
            && self.verdicts.get(action) == Some(&Verdict::Allow)
    }

    /// Whether any deny came from an evaluation fault rather than a
    /// legitimately unmet constraint.
    pub fn has_faults(&self) -> bool {
        self.reasons
            .iter()
            .any(|r| r.kind == ReasonKind::EvaluationFailure)
    }

    pub(crate) fn grant(&mut self, action: &Action) {
        self.verdicts.entry(action.clone()).or_insert(Verdict::Allow);
    }

    pub(crate) fn deny(&mut self, reason: Reason) {
        if let Some(action) = &reason.action {
            self.verdicts.insert(action.clone(), Verdict::Deny);
        }
        self.reasons.push(reason);
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.allowed() { "ALLOW" } else { "DENY" };
        write!(f, "{} policy '{}' (scope {})", verdict, self.policy_id, self.scope)?;
        for reason in &self.reasons {
            write!(f, "; {}", reason)?;
        }
        Ok(())
    }
}
