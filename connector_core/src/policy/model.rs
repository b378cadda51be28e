//! Policy model.
//!
//! Typed representation of usage policies: rules of three kinds
//! (permission, prohibition, duty), each naming an action and carrying a
//! constraint tree whose leaves compare a left expression with a right
//! expression under an operator.
//!
//! All values are immutable once constructed. Construction validates, so a
//! `Policy` that exists is structurally sound.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::{EvaluationFailure, PolicyError};

/// A named operation kind such as `USE`, `MOVE` or `COPY`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(String);

impl Action {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into().trim().to_string())
    }

    pub fn kind(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Either a literal value or a reference to an attribute of the requester.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Expression {
    /// A literal value. On the left-hand side a string literal names the
    /// claim being constrained (`"region"`).
    Literal(Value),

    /// A dotted path into the requester's claims (`address.country`).
    Attribute(String),
}

impl Expression {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn attribute(path: impl Into<String>) -> Self {
        Expression::Attribute(path.into())
    }

    /// The key used to look up evaluation functions for this expression.
    pub fn key(&self) -> String {
        match self {
            Expression::Literal(Value::String(s)) => s.clone(),
            Expression::Literal(other) => other.to_string(),
            Expression::Attribute(path) => path.clone(),
        }
    }
}

/// Comparison operators understood by the engine.
///
/// The set is closed: parsing any other name fails at construction time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Geq,
    Lt,
    Leq,
    In,
}

impl Operator {
    pub const ALL: [Operator; 7] = [
        Operator::Eq,
        Operator::Neq,
        Operator::Gt,
        Operator::Geq,
        Operator::Lt,
        Operator::Leq,
        Operator::In,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "EQ",
            Operator::Neq => "NEQ",
            Operator::Gt => "GT",
            Operator::Geq => "GEQ",
            Operator::Lt => "LT",
            Operator::Leq => "LEQ",
            Operator::In => "IN",
        }
    }

    /// Apply the operator to two values.
    ///
    /// Ordering operators compare numbers numerically and strings lexically;
    /// `IN` tests membership of `left` in an array `right`. Any other
    /// combination is a type mismatch.
    pub fn apply(&self, left: &Value, right: &Value) -> Result<bool, EvaluationFailure> {
        let mismatch = || EvaluationFailure::TypeMismatch {
            operator: self.as_str().to_string(),
            left: left.to_string(),
            right: right.to_string(),
        };

        match self {
            Operator::Eq => Ok(values_equal(left, right)),
            Operator::Neq => Ok(!values_equal(left, right)),
            Operator::In => match right {
                Value::Array(items) => Ok(items.iter().any(|item| values_equal(left, item))),
                _ => Err(mismatch()),
            },
            Operator::Gt | Operator::Geq | Operator::Lt | Operator::Leq => {
                let ordering = compare_values(left, right).ok_or_else(mismatch)?;
                Ok(match self {
                    Operator::Gt => ordering == Ordering::Greater,
                    Operator::Geq => ordering != Ordering::Less,
                    Operator::Lt => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                })
            }
        }
    }
}

fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => compare_numbers(l, r),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

/// Integers compare exactly; anything involving a float goes through `f64`.
fn compare_numbers(left: &Number, right: &Number) -> Option<Ordering> {
    if let (Some(l), Some(r)) = (left.as_i64(), right.as_i64()) {
        return Some(l.cmp(&r));
    }
    if let (Some(l), Some(r)) = (left.as_u64(), right.as_u64()) {
        return Some(l.cmp(&r));
    }
    left.as_f64()?.partial_cmp(&right.as_f64()?)
}

/// Equality under which `3` and `3.0` are the same number. Non-numbers
/// compare structurally.
pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => compare_numbers(l, r) == Some(Ordering::Equal),
        _ => left == right,
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "EQ" => Ok(Operator::Eq),
            "NEQ" => Ok(Operator::Neq),
            "GT" => Ok(Operator::Gt),
            "GEQ" => Ok(Operator::Geq),
            "LT" => Ok(Operator::Lt),
            "LEQ" => Ok(Operator::Leq),
            "IN" => Ok(Operator::In),
            _ => Err(PolicyError::UnknownOperator(s.to_string())),
        }
    }
}

impl TryFrom<String> for Operator {
    type Error = PolicyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

/// A single comparison: `left operator right`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AtomicConstraint {
    pub left_expression: Expression,
    pub operator: Operator,
    pub right_expression: Expression,
}

/// A node in a constraint tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    Atomic(AtomicConstraint),

    /// Satisfied when every child is satisfied.
    And { constraints: Vec<Constraint> },

    /// Satisfied when at least one child is satisfied.
    Or { constraints: Vec<Constraint> },

    /// Satisfied when exactly one child is satisfied.
    Xone { constraints: Vec<Constraint> },
}

impl Constraint {
    /// Shorthand for an atomic constraint.
    pub fn atomic(left: Expression, operator: Operator, right: Expression) -> Self {
        Constraint::Atomic(AtomicConstraint {
            left_expression: left,
            operator,
            right_expression: right,
        })
    }

    fn validate(&self) -> Result<(), PolicyError> {
        match self {
            Constraint::Atomic(atomic) => {
                if atomic.left_expression.key().trim().is_empty() {
                    return Err(PolicyError::InvalidConstraint(
                        "left expression must name a key".to_string(),
                    ));
                }
                Ok(())
            }
            Constraint::And { constraints }
            | Constraint::Or { constraints }
            | Constraint::Xone { constraints } => {
                if constraints.is_empty() {
                    return Err(PolicyError::InvalidConstraint(
                        "composite constraint has no children".to_string(),
                    ));
                }
                constraints.iter().try_for_each(Constraint::validate)
            }
        }
    }
}

/// The three kinds of policy rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Permission,
    Prohibition,
    Duty,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Permission => write!(f, "permission"),
            RuleKind::Prohibition => write!(f, "prohibition"),
            RuleKind::Duty => write!(f, "duty"),
        }
    }
}

/// A rule of a given kind over an action, guarded by constraints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub kind: RuleKind,
    pub action: Action,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl Rule {
    pub fn permission(action: Action, constraints: Vec<Constraint>) -> Self {
        Self {
            kind: RuleKind::Permission,
            action,
            constraints,
        }
    }

    pub fn prohibition(action: Action, constraints: Vec<Constraint>) -> Self {
        Self {
            kind: RuleKind::Prohibition,
            action,
            constraints,
        }
    }

    pub fn duty(action: Action, constraints: Vec<Constraint>) -> Self {
        Self {
            kind: RuleKind::Duty,
            action,
            constraints,
        }
    }
}

/// A usage policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    id: String,
    #[serde(default)]
    permissions: Vec<Rule>,
    #[serde(default)]
    prohibitions: Vec<Rule>,
    #[serde(default)]
    duties: Vec<Rule>,
}

impl Policy {
    /// Create a validated policy.
    ///
    /// Fails when the id is blank, a rule sits in the wrong list, a rule has
    /// no action, or a composite constraint is empty.
    pub fn new(
        id: impl Into<String>,
        permissions: Vec<Rule>,
        prohibitions: Vec<Rule>,
        duties: Vec<Rule>,
    ) -> Result<Self, PolicyError> {
        let policy = Self {
            id: id.into(),
            permissions,
            prohibitions,
            duties,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Parse and validate a policy from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let policy: Policy = serde_json::from_str(json)
            .map_err(|e| PolicyError::InvalidPolicy(format!("malformed policy document: {}", e)))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.id.trim().is_empty() {
            return Err(PolicyError::InvalidPolicy("policy id must not be empty".to_string()));
        }

        let lists = [
            (RuleKind::Permission, &self.permissions),
            (RuleKind::Prohibition, &self.prohibitions),
            (RuleKind::Duty, &self.duties),
        ];
        for (expected, rules) in lists {
            for rule in rules {
                if rule.kind != expected {
                    return Err(PolicyError::InvalidPolicy(format!(
                        "{} rule for {} placed among {}s",
                        rule.kind, rule.action, expected
                    )));
                }
                if rule.action.kind().is_empty() {
                    return Err(PolicyError::InvalidPolicy(format!(
                        "{} without an action",
                        rule.kind
                    )));
                }
                rule.constraints.iter().try_for_each(Constraint::validate)?;
            }
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn permissions(&self) -> &[Rule] {
        &self.permissions
    }

    pub fn prohibitions(&self) -> &[Rule] {
        &self.prohibitions
    }

    pub fn duties(&self) -> &[Rule] {
        &self.duties
    }
}
