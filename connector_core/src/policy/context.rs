//! Request-scoped evaluation context.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scope matching every other scope.
pub const ALL_SCOPES: &str = "*";

/// Separator between scope segments (`contract.negotiation`).
pub const SCOPE_SEPARATOR: char = '.';

/// Separator between segments of a claim path (`address.country`).
pub const CLAIM_PATH_SEPARATOR: char = '.';

/// The requesting participant and its verified claims.
///
/// Claims are supplied by an external claims provider and are only read here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipantAgent {
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub claims: HashMap<String, Value>,
}

impl ParticipantAgent {
    pub fn new(identity: Option<String>, claims: HashMap<String, Value>) -> Self {
        Self { identity, claims }
    }

    /// Build an anonymous agent from claim pairs.
    pub fn with_claims<I, K, V>(claims: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            identity: None,
            claims: claims
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Resolve a dotted path, starting at a claim and descending into
    /// nested objects.
    ///
    /// A claim whose name itself contains dots wins over descent.
    pub fn resolve(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.claims.get(path) {
            return Some(value);
        }

        let mut segments = path.split(CLAIM_PATH_SEPARATOR);
        let mut current = self.claims.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

/// Transient, request-scoped input to policy evaluation. Never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyContext {
    scope: String,
    agent: ParticipantAgent,
}

impl PolicyContext {
    pub fn new(scope: impl Into<String>, agent: ParticipantAgent) -> Self {
        Self {
            scope: scope.into(),
            agent,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn agent(&self) -> &ParticipantAgent {
        &self.agent
    }

    pub fn claims(&self) -> &HashMap<String, Value> {
        &self.agent.claims
    }

    /// Scopes to search for an evaluation function, narrowest first, ending
    /// with [`ALL_SCOPES`].
    ///
    /// `contract.negotiation.request` yields `contract.negotiation.request`,
    /// `contract.negotiation`, `contract`, `*`.
    pub fn scope_chain(&self) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self.scope.trim();

        while !current.is_empty() && current != ALL_SCOPES {
            chain.push(current.to_string());
            current = match current.rfind(SCOPE_SEPARATOR) {
                Some(idx) => &current[..idx],
                None => "",
            };
        }
        chain.push(ALL_SCOPES.to_string());
        chain
    }
}
