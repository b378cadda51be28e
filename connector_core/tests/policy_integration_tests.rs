use std::sync::Arc;

use connector_core::extension::{ServiceContext, SAMPLE_ASSET_ID};
use connector_core::policy::{
    claim_function, Action, Operator, ReasonKind, RuleKind, ALL_SCOPES,
};
use connector_core::store::{Asset, AssetSelector, ContractDefinition};
use connector_core::{
    bootstrap, ConnectorConfig, DataAddress, Error, FileTransferExtension, ParticipantAgent,
    Policy, PolicyContext, PolicyEngine, ServiceExtension,
};
use serde_json::json;

const TIERED_POLICY: &str = r#"{
    "id": "tiered",
    "permissions": [
        {
            "kind": "permission",
            "action": "USE",
            "constraints": [
                {
                    "kind": "or",
                    "constraints": [
                        {
                            "kind": "atomic",
                            "left_expression": {"type": "literal", "value": "tier"},
                            "operator": "GEQ",
                            "right_expression": {"type": "literal", "value": 3}
                        },
                        {
                            "kind": "atomic",
                            "left_expression": {"type": "literal", "value": "region"},
                            "operator": "IN",
                            "right_expression": {"type": "literal", "value": ["eu", "uk"]}
                        }
                    ]
                }
            ]
        }
    ],
    "prohibitions": [
        {
            "kind": "prohibition",
            "action": "USE",
            "constraints": [
                {
                    "kind": "atomic",
                    "left_expression": {"type": "literal", "value": "sanctioned"},
                    "operator": "EQ",
                    "right_expression": {"type": "literal", "value": true}
                }
            ]
        }
    ]
}"#;

fn claims(pairs: &[(&str, serde_json::Value)]) -> ParticipantAgent {
    ParticipantAgent::with_claims(pairs.iter().cloned())
}

/// Registers claim comparisons for the tiered policy.
struct TieredPolicyExtension;

impl ServiceExtension for TieredPolicyExtension {
    fn name(&self) -> &str {
        "tiered-policy"
    }

    fn initialize(&self, context: &mut ServiceContext) -> Result<(), Error> {
        let policy = Policy::from_json(TIERED_POLICY)?;
        context.policy_store().save(policy)?;
        context.asset_index().accept(
            Asset::new("premium").unwrap(),
            DataAddress::file("/tmp/provider", "premium.bin")?,
        )?;
        context.contract_store().save(ContractDefinition::new(
            "premium-offer",
            "tiered",
            "tiered",
            AssetSelector::for_asset("premium"),
        )?)?;

        let engine = context.policy_engine();
        engine.register_function(ALL_SCOPES, RuleKind::Permission, "tier", claim_function("tier"));
        engine.register_function(ALL_SCOPES, RuleKind::Permission, "region", claim_function("region"));
        engine.register_function(ALL_SCOPES, RuleKind::Prohibition, "sanctioned", claim_function("sanctioned"));
        Ok(())
    }
}

#[test]
fn test_policy_from_json_with_registered_functions() {
    let runtime = bootstrap(
        ConnectorConfig::default(),
        &[&FileTransferExtension, &TieredPolicyExtension],
    )
    .unwrap();

    let high_tier = claims(&[("tier", json!(4)), ("region", json!("us"))]);
    assert!(runtime.evaluate_asset("premium", high_tier).unwrap().allowed());

    let uk = claims(&[("tier", json!(1)), ("region", json!("uk"))]);
    assert!(runtime.evaluate_asset("premium", uk).unwrap().allowed());

    let neither = claims(&[("tier", json!(1)), ("region", json!("us"))]);
    let decision = runtime.evaluate_asset("premium", neither).unwrap();
    assert_eq!(decision.reasons[0].kind, ReasonKind::NotSatisfied);

    let sanctioned = claims(&[("tier", json!(5)), ("sanctioned", json!(true))]);
    let decision = runtime.evaluate_asset("premium", sanctioned).unwrap();
    assert!(!decision.permits(&Action::new("USE")));
    assert_eq!(decision.reasons[0].kind, ReasonKind::Prohibited);

    // Both extensions registered "region" for every scope; the later claim
    // comparison replaced the sample function and still honours its EQ check
    assert_eq!(runtime.policy_engine().function_count(), 3);
    let eu = claims(&[("region", json!("eu"))]);
    assert!(runtime.evaluate_asset(SAMPLE_ASSET_ID, eu).unwrap().allowed());
    let us = claims(&[("region", json!("us"))]);
    assert!(!runtime.evaluate_asset(SAMPLE_ASSET_ID, us).unwrap().allowed());
}

#[test]
fn test_unknown_operator_rejected_at_load() {
    let invalid = TIERED_POLICY.replace("\"GEQ\"", "\"ROUGHLY\"");
    assert!(Policy::from_json(&invalid).is_err());
    assert!("roughly".parse::<Operator>().is_err());
}

#[test]
fn test_scope_specific_functions() {
    let engine = PolicyEngine::new();
    engine.register_function(ALL_SCOPES, RuleKind::Permission, "region", |_, _, _, _| false);
    engine.register_function("contract", RuleKind::Permission, "region", |_, _, _, _| true);

    let policy = Policy::from_json(
        r#"{
            "id": "regional",
            "permissions": [{
                "kind": "permission",
                "action": "USE",
                "constraints": [{
                    "kind": "atomic",
                    "left_expression": {"type": "literal", "value": "region"},
                    "operator": "EQ",
                    "right_expression": {"type": "literal", "value": "eu"}
                }]
            }]
        }"#,
    )
    .unwrap();

    let agent = claims(&[("region", json!("eu"))]);
    let negotiation = PolicyContext::new("contract.negotiation", agent.clone());
    let transfer = PolicyContext::new("transfer", agent);

    assert!(engine.evaluate(&policy, &negotiation).allowed());
    assert!(!engine.evaluate(&policy, &transfer).allowed());
}

#[test]
fn test_evaluation_from_many_threads() {
    let runtime = Arc::new(bootstrap(ConnectorConfig::default(), &[&FileTransferExtension]).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let runtime = runtime.clone();
            std::thread::spawn(move || {
                let region = if i % 2 == 0 { "eu" } else { "us" };
                let agent = ParticipantAgent::with_claims([("region", region)]);
                let decision = runtime.evaluate_asset(SAMPLE_ASSET_ID, agent).unwrap();
                (region, decision.allowed())
            })
        })
        .collect();

    for handle in handles {
        let (region, allowed) = handle.join().unwrap();
        assert_eq!(allowed, region == "eu");
    }
}

#[test]
fn test_denial_is_not_an_error() {
    let runtime = bootstrap(ConnectorConfig::default(), &[&FileTransferExtension]).unwrap();
    let sink = DataAddress::file("/tmp/never-written", "copy.txt").unwrap();
    let us = ParticipantAgent::with_claims([("region", "us")]);

    let outcome = tokio_test::block_on(runtime.transfer(SAMPLE_ASSET_ID, sink, us));
    assert!(matches!(outcome, Ok(connector_core::TransferOutcome::Denied(_))));
}
