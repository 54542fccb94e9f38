//! Resource URIs
//!
//! Grammar: `arbor://<kind>/<action>[/<segment>...]`. The kind names a
//! resource family (`fs`, `shell`, `code`, `api`, `memory`, `signals`),
//! the action a verb on it (`read`, `write`, `execute`, ...), and the
//! remaining segments a hierarchical path with prefix semantics: a
//! capability on a path authorizes every descendant of that path. A
//! trailing `**` segment matches any remaining suffix explicitly.

use crate::error::{CapsError, Result};
use serde::{Deserialize, Serialize};

/// The wildcard suffix segment.
pub const WILDCARD: &str = "**";

/// Parsed `arbor://kind/action/path` resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceUri {
    /// URI scheme; always `arbor` for in-process resources
    pub scheme: String,
    /// Resource family (`fs`, `shell`, `code`, `api`, `memory`, `signals`, ...)
    pub kind: String,
    /// Verb (`read`, `write`, `execute`, `delete`, `list`, `call`, ...)
    pub action: String,
    /// Hierarchical path, possibly empty
    pub segments: Vec<String>,
}

impl ResourceUri {
    /// Parse a URI string, rejecting malformed input at the boundary.
    pub fn parse(s: &str) -> Result<Self> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| CapsError::MalformedUri(s.to_string()))?;
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CapsError::MalformedUri(s.to_string()));
        }

        let mut parts = rest.split('/');
        let kind = parts.next().unwrap_or_default();
        let action = parts.next().unwrap_or_default();
        if kind.is_empty() || action.is_empty() {
            return Err(CapsError::MalformedUri(s.to_string()));
        }

        let mut segments = Vec::new();
        for part in parts {
            if part.is_empty() {
                return Err(CapsError::MalformedUri(s.to_string()));
            }
            segments.push(part.to_string());
        }

        Ok(Self {
            scheme: scheme.to_string(),
            kind: kind.to_string(),
            action: action.to_string(),
            segments,
        })
    }

    /// Whether this URI names a filesystem resource (path resolution applies).
    pub fn is_fs(&self) -> bool {
        self.kind == "fs"
    }

    /// The path segments with a trailing wildcard stripped: the root this
    /// capability is anchored at.
    pub fn root_segments(&self) -> &[String] {
        match self.segments.last() {
            Some(last) if last == WILDCARD => &self.segments[..self.segments.len() - 1],
            _ => &self.segments,
        }
    }

    /// Prefix-semantics authorization check.
    ///
    /// `self` authorizes `requested` iff scheme, kind, and action all
    /// match and `self`'s path is equal to or a segment-prefix of the
    /// requested path. A trailing `**` matches any remaining suffix,
    /// including the empty one.
    pub fn authorizes(&self, requested: &ResourceUri) -> bool {
        if self.scheme != requested.scheme
            || self.kind != requested.kind
            || self.action != requested.action
        {
            return false;
        }
        let root = self.root_segments();
        requested.segments.len() >= root.len() && requested.segments[..root.len()] == *root
    }

    /// The path joined with `/` (empty string for a bare kind/action URI).
    pub fn path(&self) -> String {
        self.segments.join("/")
    }
}

impl std::fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.kind, self.action)?;
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl Serialize for ResourceUri {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ResourceUri {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ResourceUri::parse(&s).map_err(serde::de::Error::custom)
    }
}
