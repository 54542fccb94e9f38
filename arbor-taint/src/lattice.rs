//! The taint lattice and its combination rules

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// How trustworthy the producer of a value was.
///
/// Ordered by severity: combining taints takes the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaintLevel {
    /// Produced by the system itself or a verified operator action
    Trusted,
    /// Computed from trusted inputs, possibly via an LLM
    Derived,
    /// Arrived from outside the trust boundary
    Untrusted,
    /// Known-adversarial origin
    Hostile,
}

/// How damaging disclosure of the value would be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    /// Freely disclosable
    Public,
    /// Internal to the deployment
    Internal,
    /// Disclosure causes real harm
    Confidential,
    /// Disclosure is never acceptable
    Restricted,
}

/// How well the content itself has been corroborated.
///
/// Ordered by rank: combining taints takes the minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// No corroboration at all
    Unverified,
    /// Plausible on its face
    Plausible,
    /// Independently corroborated at least once
    Corroborated,
    /// Verified against an authoritative source
    Verified,
}

bitflags! {
    /// Sanitization passes a value has survived.
    ///
    /// Combination intersects: a derived value only keeps the bits every
    /// input had.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Sanitizations: u32 {
        /// Markup-injection scrubbing
        const XSS = 1 << 0;
        /// SQL-injection scrubbing
        const SQLI = 1 << 1;
        /// Prompt-injection screening
        const PROMPT_INJECTION = 1 << 2;
        /// Shell metacharacter escaping
        const SHELL_ESCAPE = 1 << 3;
        /// Path traversal normalization
        const PATH_TRAVERSAL = 1 << 4;
    }
}

impl Sanitizations {
    /// Stable lowercase name for one flag, used by the map codec.
    pub fn flag_name(flag: Sanitizations) -> Option<&'static str> {
        match flag {
            Sanitizations::XSS => Some("xss"),
            Sanitizations::SQLI => Some("sqli"),
            Sanitizations::PROMPT_INJECTION => Some("prompt_injection"),
            Sanitizations::SHELL_ESCAPE => Some("shell_escape"),
            Sanitizations::PATH_TRAVERSAL => Some("path_traversal"),
            _ => None,
        }
    }

    /// Parse one flag name; unknown names yield `None` (the codec drops
    /// them, which is the restrictive direction for an intersection mask).
    pub fn flag_from_name(name: &str) -> Option<Sanitizations> {
        match name {
            "xss" => Some(Sanitizations::XSS),
            "sqli" => Some(Sanitizations::SQLI),
            "prompt_injection" => Some(Sanitizations::PROMPT_INJECTION),
            "shell_escape" => Some(Sanitizations::SHELL_ESCAPE),
            "path_traversal" => Some(Sanitizations::PATH_TRAVERSAL),
            _ => None,
        }
    }
}

/// Information-flow properties of one value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    /// Producer trust level
    pub level: TaintLevel,
    /// Disclosure sensitivity
    pub sensitivity: Sensitivity,
    /// Surviving sanitization passes
    pub sanitizations: Sanitizations,
    /// Content corroboration rank
    pub confidence: Confidence,
    /// Free-form producer tag ("operator", "llm_output", "propagated", ...)
    pub source: String,
    /// Signal ids this value flowed through, oldest first
    pub chain: Vec<String>,
}

impl Taint {
    /// A fully trusted, public, verified value with every sanitization bit.
    ///
    /// This is the identity element of [`propagate`].
    pub fn pristine(source: impl Into<String>) -> Self {
        Self {
            level: TaintLevel::Trusted,
            sensitivity: Sensitivity::Public,
            sanitizations: Sanitizations::all(),
            confidence: Confidence::Verified,
            source: source.into(),
            chain: Vec::new(),
        }
    }

    /// An untrusted, unverified external value with no sanitization bits.
    pub fn external(source: impl Into<String>) -> Self {
        Self {
            level: TaintLevel::Untrusted,
            sensitivity: Sensitivity::Internal,
            sanitizations: Sanitizations::empty(),
            confidence: Confidence::Unverified,
            source: source.into(),
            chain: Vec::new(),
        }
    }

    /// Append a signal id to the provenance chain.
    pub fn with_chain_entry(mut self, signal_id: impl Into<String>) -> Self {
        self.chain.push(signal_id.into());
        self
    }

    /// Whether this value may be used in the given context.
    pub fn can_use_as(&self, context: UseContext) -> UseDecision {
        match (self.level, context) {
            (TaintLevel::Hostile, _) => UseDecision::Denied,
            (TaintLevel::Trusted, _) => UseDecision::Allowed,
            (TaintLevel::Derived, UseContext::Control) => UseDecision::AllowedWithAudit,
            (TaintLevel::Derived, UseContext::Data) => UseDecision::Allowed,
            (TaintLevel::Untrusted, UseContext::Control) => UseDecision::Denied,
            (TaintLevel::Untrusted, UseContext::Data) => UseDecision::Allowed,
        }
    }

    /// Attempt to lower the taint level via an explicit review step.
    ///
    /// - [`ReductionMethod::HumanReview`] may reach any level, `Trusted`
    ///   included.
    /// - [`ReductionMethod::Consensus`] and
    ///   [`ReductionMethod::VerifiedPipeline`] improve at most one rank and
    ///   never reach `Trusted`.
    /// - A target at the same level or worse always succeeds.
    pub fn reduce(&self, target: TaintLevel, method: ReductionMethod) -> Result<Taint, TaintError> {
        // Moving toward hostile is always permitted.
        if target >= self.level {
            return Ok(Taint {
                level: target,
                ..self.clone()
            });
        }

        match method {
            ReductionMethod::HumanReview => {}
            ReductionMethod::Consensus | ReductionMethod::VerifiedPipeline => {
                if target == TaintLevel::Trusted {
                    return Err(TaintError::ReductionNotPermitted {
                        from: self.level,
                        to: target,
                        method,
                    });
                }
                let improvement = self.level as u8 - target as u8;
                if improvement > 1 {
                    return Err(TaintError::ReductionNotPermitted {
                        from: self.level,
                        to: target,
                        method,
                    });
                }
            }
        }

        Ok(Taint {
            level: target,
            ..self.clone()
        })
    }
}

/// The role a value would play in a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseContext {
    /// The value steers execution (command, path, prompt, policy)
    Control,
    /// The value is processed as inert data
    Data,
}

/// Outcome of a [`Taint::can_use_as`] check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseDecision {
    /// Use freely
    Allowed,
    /// Use, but the caller must record an audit event
    AllowedWithAudit,
    /// Do not use in this context
    Denied,
}

/// How a taint reduction was justified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionMethod {
    /// A human inspected the value
    HumanReview,
    /// A deliberation council agreed on the value
    Consensus,
    /// The value passed a pinned, audited pipeline
    VerifiedPipeline,
}

/// Errors from taint operations
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TaintError {
    /// The requested reduction exceeds what the method may grant
    #[error("reduction from {from:?} to {to:?} not permitted via {method:?}")]
    ReductionNotPermitted {
        /// Current level
        from: TaintLevel,
        /// Requested level
        to: TaintLevel,
        /// Method that was offered
        method: ReductionMethod,
    },
}

/// Combine the taints of all inputs to a computation.
///
/// Takes the maximum level and sensitivity, the minimum confidence, the
/// intersection of sanitization masks, and concatenates provenance chains.
/// An empty slice yields [`Taint::pristine`], the identity of all four
/// operators.
pub fn propagate(inputs: &[Taint]) -> Taint {
    let mut out = Taint::pristine("propagated");
    for input in inputs {
        out.level = out.level.max(input.level);
        out.sensitivity = out.sensitivity.max(input.sensitivity);
        out.confidence = out.confidence.min(input.confidence);
        out.sanitizations &= input.sanitizations;
        out.chain.extend(input.chain.iter().cloned());
    }
    out
}

/// Normalize the taint of an LLM completion.
///
/// Model output is never better than `derived`, never more than
/// `plausible`, and has survived no sanitization passes regardless of what
/// its inputs survived. A hostile input stays hostile.
pub fn for_llm_output(input: &Taint) -> Taint {
    Taint {
        level: input.level.max(TaintLevel::Derived),
        sensitivity: input.sensitivity,
        sanitizations: Sanitizations::empty(),
        confidence: input.confidence.min(Confidence::Plausible),
        source: "llm_output".to_string(),
        chain: input.chain.clone(),
    }
}
