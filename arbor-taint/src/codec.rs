//! Deterministic map codec for taint structures
//!
//! The serialized form is a string-keyed map with a version tag, suitable
//! for audit records and cross-process transfer. Decoding is fail-closed:
//! unknown enum strings collapse to the most restrictive member, and
//! unknown sanitization names are dropped from the mask.

use crate::lattice::{Confidence, Sanitizations, Sensitivity, Taint, TaintLevel};
use serde_json::Value;
use std::collections::BTreeMap;

/// Current codec version.
pub const TAINT_CODEC_VERSION: u64 = 1;

/// Encode a taint into a deterministic string-keyed map.
///
/// Keys sort lexicographically (BTreeMap), sanitization names are emitted
/// sorted, so equal taints always produce byte-identical JSON.
pub fn to_map(taint: &Taint) -> BTreeMap<String, Value> {
    let mut map = BTreeMap::new();
    map.insert("v".to_string(), Value::from(TAINT_CODEC_VERSION));
    map.insert("level".to_string(), Value::from(level_name(taint.level)));
    map.insert(
        "sensitivity".to_string(),
        Value::from(sensitivity_name(taint.sensitivity)),
    );
    map.insert(
        "confidence".to_string(),
        Value::from(confidence_name(taint.confidence)),
    );
    map.insert(
        "sanitizations".to_string(),
        Value::from(sanitization_names(taint.sanitizations)),
    );
    map.insert("source".to_string(), Value::from(taint.source.clone()));
    map.insert(
        "chain".to_string(),
        Value::from(taint.chain.iter().cloned().collect::<Vec<_>>()),
    );
    map
}

/// Decode a taint from its map form, fail-closed.
///
/// Missing or unknown `level` becomes `hostile`, `sensitivity` becomes
/// `restricted`, `confidence` becomes `unverified`; unrecognized
/// sanitization names do not set bits. A malformed map therefore decodes
/// to the most restrictive possible taint rather than an error.
pub fn from_map(map: &BTreeMap<String, Value>) -> Taint {
    let level = map
        .get("level")
        .and_then(Value::as_str)
        .map(level_from_name)
        .unwrap_or(TaintLevel::Hostile);

    let sensitivity = map
        .get("sensitivity")
        .and_then(Value::as_str)
        .map(sensitivity_from_name)
        .unwrap_or(Sensitivity::Restricted);

    let confidence = map
        .get("confidence")
        .and_then(Value::as_str)
        .map(confidence_from_name)
        .unwrap_or(Confidence::Unverified);

    let sanitizations = map
        .get("sanitizations")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .filter_map(Sanitizations::flag_from_name)
                .fold(Sanitizations::empty(), |acc, f| acc | f)
        })
        .unwrap_or_else(Sanitizations::empty);

    let source = map
        .get("source")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let chain = map
        .get("chain")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Taint {
        level,
        sensitivity,
        sanitizations,
        confidence,
        source,
        chain,
    }
}

fn level_name(level: TaintLevel) -> &'static str {
    match level {
        TaintLevel::Trusted => "trusted",
        TaintLevel::Derived => "derived",
        TaintLevel::Untrusted => "untrusted",
        TaintLevel::Hostile => "hostile",
    }
}

fn level_from_name(name: &str) -> TaintLevel {
    match name {
        "trusted" => TaintLevel::Trusted,
        "derived" => TaintLevel::Derived,
        "untrusted" => TaintLevel::Untrusted,
        "hostile" => TaintLevel::Hostile,
        _ => TaintLevel::Hostile,
    }
}

fn sensitivity_name(s: Sensitivity) -> &'static str {
    match s {
        Sensitivity::Public => "public",
        Sensitivity::Internal => "internal",
        Sensitivity::Confidential => "confidential",
        Sensitivity::Restricted => "restricted",
    }
}

fn sensitivity_from_name(name: &str) -> Sensitivity {
    match name {
        "public" => Sensitivity::Public,
        "internal" => Sensitivity::Internal,
        "confidential" => Sensitivity::Confidential,
        "restricted" => Sensitivity::Restricted,
        _ => Sensitivity::Restricted,
    }
}

fn confidence_name(c: Confidence) -> &'static str {
    match c {
        Confidence::Unverified => "unverified",
        Confidence::Plausible => "plausible",
        Confidence::Corroborated => "corroborated",
        Confidence::Verified => "verified",
    }
}

fn confidence_from_name(name: &str) -> Confidence {
    match name {
        "unverified" => Confidence::Unverified,
        "plausible" => Confidence::Plausible,
        "corroborated" => Confidence::Corroborated,
        "verified" => Confidence::Verified,
        _ => Confidence::Unverified,
    }
}

fn sanitization_names(mask: Sanitizations) -> Vec<String> {
    let mut names: Vec<String> = mask
        .iter()
        .filter_map(Sanitizations::flag_name)
        .map(str::to_string)
        .collect();
    names.sort();
    names
}
