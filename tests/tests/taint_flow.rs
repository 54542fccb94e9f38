//! Taint tracking across a simulated deliberation pipeline

use arbor_taint::{
    for_llm_output, from_map, propagate, to_map, Confidence, ReductionMethod, Taint, TaintLevel,
    UseContext, UseDecision,
};

#[test]
fn llm_pipeline_taint_flow() {
    // An operator instruction and a webhook payload feed one prompt
    let operator = Taint::pristine("operator").with_chain_entry("sig_op_1");
    let webhook = Taint::external("webhook").with_chain_entry("sig_web_7");

    let prompt_taint = propagate(&[operator, webhook]);
    assert_eq!(prompt_taint.level, TaintLevel::Untrusted);
    assert_eq!(prompt_taint.confidence, Confidence::Unverified);
    // Untrusted input steers nothing
    assert_eq!(
        prompt_taint.can_use_as(UseContext::Control),
        UseDecision::Denied
    );

    // The model's completion is never better than derived/plausible
    let completion = for_llm_output(&prompt_taint);
    assert_eq!(completion.level, TaintLevel::Untrusted); // max(untrusted, derived)
    assert!(completion.sanitizations.is_empty());
    assert_eq!(completion.source, "llm_output");
    assert_eq!(completion.chain, vec!["sig_op_1", "sig_web_7"]);

    // A consensus round buys one level back, but never trust
    let deliberated = completion
        .reduce(TaintLevel::Derived, ReductionMethod::Consensus)
        .unwrap();
    assert_eq!(
        deliberated.can_use_as(UseContext::Control),
        UseDecision::AllowedWithAudit
    );
    assert!(deliberated
        .reduce(TaintLevel::Trusted, ReductionMethod::Consensus)
        .is_err());

    // Only a human can fully clear it
    let reviewed = deliberated
        .reduce(TaintLevel::Trusted, ReductionMethod::HumanReview)
        .unwrap();
    assert_eq!(
        reviewed.can_use_as(UseContext::Control),
        UseDecision::Allowed
    );
}

#[test]
fn taint_survives_serialization_for_audit() {
    let taint = for_llm_output(&Taint::external("mcp_tool"));
    let map = to_map(&taint);

    // Deterministic form, suitable for audit metadata
    let a = serde_json::to_string(&map).unwrap();
    let b = serde_json::to_string(&to_map(&taint)).unwrap();
    assert_eq!(a, b);

    assert_eq!(from_map(&map), taint);
}

#[test]
fn unknown_wire_values_decode_to_most_restrictive() {
    let mut map = to_map(&Taint::pristine("operator"));
    map.insert(
        "level".to_string(),
        serde_json::Value::from("hyper_trusted"),
    );
    map.insert(
        "confidence".to_string(),
        serde_json::Value::from("absolutely"),
    );

    let decoded = from_map(&map);
    assert_eq!(decoded.level, TaintLevel::Hostile);
    assert_eq!(decoded.confidence, Confidence::Unverified);
    assert_eq!(decoded.can_use_as(UseContext::Data), UseDecision::Denied);
}
