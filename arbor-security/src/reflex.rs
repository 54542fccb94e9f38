//! The reflex engine
//!
//! Fast, declarative hard-blocks and warnings evaluated before any
//! capability machinery runs. Reflexes are cheap by construction (one
//! regex, one glob, one string compare, or one predicate) so the engine
//! can sit in front of every authorization without measurable cost.
//!
//! Evaluation walks enabled reflexes in descending priority. Any
//! matching `block` reflex short-circuits the whole check; `warn`
//! matches accumulate and ride along with an eventual grant.

use globset::{Glob, GlobMatcher};
use regex::Regex;
use std::collections::BTreeMap;

/// What a matching reflex does to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflexResponse {
    /// Deny outright
    Block,
    /// Let it pass, flagged
    Warn,
}

/// How a reflex matches the request context.
pub enum ReflexKind {
    /// Regex over the `command` field
    Pattern(Regex),
    /// Glob over the `path` field
    Path(GlobMatcher),
    /// Equality on the `action` field
    Action(String),
    /// Arbitrary predicate over the whole context
    Custom(Box<dyn Fn(&ReflexContext) -> bool + Send + Sync>),
}

impl std::fmt::Debug for ReflexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReflexKind::Pattern(re) => write!(f, "Pattern({})", re.as_str()),
            ReflexKind::Path(glob) => write!(f, "Path({})", glob.glob()),
            ReflexKind::Action(action) => write!(f, "Action({action})"),
            ReflexKind::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One declarative rule.
#[derive(Debug)]
pub struct Reflex {
    /// Stable identifier, shows up in denials and audit events
    pub id: String,
    /// Match shape
    pub kind: ReflexKind,
    /// Block or warn
    pub response: ReflexResponse,
    /// Higher evaluates earlier
    pub priority: i32,
    /// Disabled reflexes never match
    pub enabled: bool,
    /// Operator-facing explanation
    pub message: String,
}

impl Reflex {
    fn matches(&self, ctx: &ReflexContext) -> bool {
        match &self.kind {
            ReflexKind::Pattern(re) => ctx.command.as_deref().is_some_and(|c| re.is_match(c)),
            ReflexKind::Path(glob) => ctx.path.as_deref().is_some_and(|p| glob.is_match(p)),
            ReflexKind::Action(action) => ctx.action.as_deref() == Some(action.as_str()),
            ReflexKind::Custom(predicate) => predicate(ctx),
        }
    }
}

/// What the request looks like to the reflex layer.
#[derive(Debug, Clone, Default)]
pub struct ReflexContext {
    /// Shell command or equivalent, if any
    pub command: Option<String>,
    /// Resource path, if any
    pub path: Option<String>,
    /// Action verb, if any
    pub action: Option<String>,
    /// Anything else custom reflexes want to inspect
    pub extra: BTreeMap<String, String>,
}

/// Outcome of a reflex check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReflexOutcome {
    /// Nothing matched
    Ok,
    /// Only warn reflexes matched
    Warned(Vec<(String, String)>),
    /// A block reflex matched; evaluation stopped there
    Blocked {
        /// The blocking reflex
        reflex_id: String,
        /// Its message
        message: String,
    },
}

/// A priority-ordered set of reflexes.
#[derive(Debug, Default)]
pub struct ReflexEngine {
    reflexes: Vec<Reflex>,
}

impl ReflexEngine {
    /// An engine with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine preloaded with [`builtin_reflexes`].
    pub fn with_builtins() -> Self {
        let mut engine = Self::new();
        for reflex in builtin_reflexes() {
            engine.add(reflex);
        }
        engine
    }

    /// Add a reflex, keeping descending priority order.
    pub fn add(&mut self, reflex: Reflex) {
        let at = self
            .reflexes
            .partition_point(|r| r.priority >= reflex.priority);
        self.reflexes.insert(at, reflex);
    }

    /// Enable or disable a reflex by id. Returns false if unknown.
    pub fn set_enabled(&mut self, reflex_id: &str, enabled: bool) -> bool {
        match self.reflexes.iter_mut().find(|r| r.id == reflex_id) {
            Some(reflex) => {
                reflex.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Number of registered reflexes.
    pub fn len(&self) -> usize {
        self.reflexes.len()
    }

    /// Whether the engine has no rules.
    pub fn is_empty(&self) -> bool {
        self.reflexes.is_empty()
    }

    /// Evaluate the context.
    ///
    /// Blocks win over warnings regardless of priority because a block
    /// returns immediately while warnings only accumulate.
    pub fn check(&self, ctx: &ReflexContext) -> ReflexOutcome {
        let mut warnings = Vec::new();
        for reflex in self.reflexes.iter().filter(|r| r.enabled) {
            if !reflex.matches(ctx) {
                continue;
            }
            match reflex.response {
                ReflexResponse::Block => {
                    return ReflexOutcome::Blocked {
                        reflex_id: reflex.id.clone(),
                        message: reflex.message.clone(),
                    };
                }
                ReflexResponse::Warn => {
                    warnings.push((reflex.id.clone(), reflex.message.clone()));
                }
            }
        }
        if warnings.is_empty() {
            ReflexOutcome::Ok
        } else {
            ReflexOutcome::Warned(warnings)
        }
    }
}

fn pattern(id: &str, regex: &str, response: ReflexResponse, priority: i32, message: &str) -> Reflex {
    Reflex {
        id: id.to_string(),
        kind: ReflexKind::Pattern(Regex::new(regex).expect("builtin regex compiles")),
        response,
        priority,
        enabled: true,
        message: message.to_string(),
    }
}

fn path(id: &str, glob: &str, response: ReflexResponse, priority: i32, message: &str) -> Reflex {
    Reflex {
        id: id.to_string(),
        kind: ReflexKind::Path(
            Glob::new(glob)
                .expect("builtin glob compiles")
                .compile_matcher(),
        ),
        response,
        priority,
        enabled: true,
        message: message.to_string(),
    }
}

/// The built-in rule set.
///
/// Heuristics, not a sandbox: they catch the obviously catastrophic and
/// the obviously suspicious before any capability is even consulted.
pub fn builtin_reflexes() -> Vec<Reflex> {
    use ReflexResponse::{Block, Warn};

    vec![
        pattern(
            "rm_recursive_root",
            r"rm\s+(-[a-zA-Z]*[rf][a-zA-Z]*\s+)+(/|/\*)(\s|$)",
            Block,
            100,
            "recursive delete of the filesystem root",
        ),
        pattern(
            "privilege_escalation",
            r"(^|\s|;|&&|\|\|)\s*(sudo|su)(\s|$)",
            Block,
            95,
            "privilege escalation via sudo/su",
        ),
        pattern(
            "chmod_world_writable",
            r"chmod\s+(-[a-zA-Z]+\s+)*0?777\b",
            Block,
            90,
            "world-writable permission change",
        ),
        pattern(
            "dd_block_device",
            r"dd\s+[^|;]*of=/dev/(sd|hd|vd|nvme|mmcblk)",
            Block,
            90,
            "raw write to a block device",
        ),
        pattern(
            "mkfs",
            r"(^|\s|;|&&)\s*mkfs(\.[a-z0-9]+)?\s",
            Block,
            90,
            "filesystem creation over existing data",
        ),
        pattern(
            "fork_bomb",
            r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
            Block,
            85,
            "fork bomb",
        ),
        pattern(
            "cloud_metadata_ssrf",
            r"169\.254\.169\.254|metadata\.google\.internal|metadata\.azure\.com",
            Block,
            85,
            "cloud metadata endpoint access",
        ),
        pattern(
            "shadow_file",
            r"/etc/shadow\b",
            Block,
            80,
            "access to the system password hashes",
        ),
        path(
            "ssh_private_keys",
            "**/.ssh/id_*",
            Block,
            80,
            "access to SSH private key material",
        ),
        path(
            "shadow_path",
            "**/etc/shadow",
            Block,
            80,
            "access to the system password hashes",
        ),
        pattern(
            "curl_pipe_shell",
            r"(curl|wget)\s[^|;]*\|\s*(ba|z|da)?sh(\s|$)",
            Warn,
            50,
            "piping a download straight into a shell",
        ),
        path(
            "dotenv_files",
            "**/.env*",
            Warn,
            40,
            "touching environment secret files",
        ),
        pattern(
            "localhost_request",
            r"https?://(localhost|127\.0\.0\.1|\[::1\])",
            Warn,
            30,
            "request to a loopback service",
        ),
    ]
}
