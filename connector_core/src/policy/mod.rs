//! Policy evaluation.
//!
//! Key concepts:
//!
//! 1. **Policy**: permissions, prohibitions and duties over actions, each
//!    guarded by a constraint tree.
//!
//! 2. **Evaluation function**: a pluggable check registered per
//!    `(scope, rule kind, left key)`; the most specific scope wins.
//!
//! 3. **Decision**: the per-action verdicts and deny reasons produced by the
//!    engine. Denial is an outcome, not an error.

pub mod context;
pub mod decision;
pub mod engine;
mod evaluator;
pub mod functions;
pub mod model;

pub use context::{ParticipantAgent, PolicyContext, ALL_SCOPES};
pub use decision::{Decision, Reason, ReasonKind, Verdict};
pub use engine::PolicyEngine;
pub use evaluator::EvaluationFunction;
pub use functions::{claim_function, region_function};
pub use model::{Action, AtomicConstraint, Constraint, Expression, Operator, Policy, Rule, RuleKind};
