//! Ready-made evaluation functions.
//!
//! Register these with [`super::PolicyEngine::register_function`] to
//! replace the default evaluator for a given left key.

use serde_json::Value;
use tracing::debug;

use super::context::PolicyContext;
use super::model::{Operator, Rule};

/// Claim consulted by [`region_function`].
pub const REGION_CLAIM: &str = "region";

/// Region rule: under `EQ`, the requester's `region` claim must equal the
/// right operand. Every other operator is unsatisfied.
pub fn region_function(
) -> impl Fn(Operator, &Value, &Rule, &PolicyContext) -> bool + Send + Sync + 'static {
    |operator: Operator, right: &Value, _rule: &Rule, context: &PolicyContext| {
        let consumer_region = context.agent().claim(REGION_CLAIM);
        match operator {
            Operator::Eq => consumer_region == Some(right),
            _ => false,
        }
    }
}

/// Compare a named claim with the right operand using the full operator set.
///
/// A missing claim or a type mismatch leaves the constraint unsatisfied.
pub fn claim_function(
    claim: impl Into<String>,
) -> impl Fn(Operator, &Value, &Rule, &PolicyContext) -> bool + Send + Sync + 'static {
    let claim = claim.into();
    move |operator: Operator, right: &Value, _rule: &Rule, context: &PolicyContext| {
        let Some(left) = context.agent().resolve(&claim) else {
            return false;
        };
        match operator.apply(left, right) {
            Ok(satisfied) => satisfied,
            Err(e) => {
                debug!(claim = %claim, error = %e, "Claim comparison failed");
                false
            }
        }
    }
}
