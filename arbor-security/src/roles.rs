//! Role bundles
//!
//! A role tag names a list of resource URIs; assigning the role grants
//! one capability per URI. Builtins cover the common agent shapes and
//! config-driven roles are merged over them (a config role with the same
//! tag replaces the builtin).

use std::collections::BTreeMap;

/// Resolves role tags to resource URI bundles.
#[derive(Debug, Clone)]
pub struct RoleAssignments {
    roles: BTreeMap<String, Vec<String>>,
}

impl RoleAssignments {
    /// Builtins merged with config-driven roles.
    pub fn new(config_roles: &BTreeMap<String, Vec<String>>) -> Self {
        let mut roles = builtin_roles();
        for (tag, uris) in config_roles {
            roles.insert(tag.clone(), uris.clone());
        }
        Self { roles }
    }

    /// The URI bundle for a role tag.
    pub fn resolve(&self, role: &str) -> Option<&[String]> {
        self.roles.get(role).map(Vec::as_slice)
    }

    /// All known role tags.
    pub fn tags(&self) -> Vec<&str> {
        self.roles.keys().map(String::as_str).collect()
    }
}

fn builtin_roles() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([
        (
            "reader".to_string(),
            vec!["arbor://fs/read/**".to_string(), "arbor://fs/list/**".to_string()],
        ),
        (
            "writer".to_string(),
            vec![
                "arbor://fs/read/**".to_string(),
                "arbor://fs/list/**".to_string(),
                "arbor://fs/write/**".to_string(),
            ],
        ),
        (
            "executor".to_string(),
            vec!["arbor://shell/execute/**".to_string()],
        ),
        (
            "auditor".to_string(),
            vec![
                "arbor://signals/read/**".to_string(),
                "arbor://memory/read/**".to_string(),
            ],
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_and_overrides() {
        let roles = RoleAssignments::new(&BTreeMap::new());
        assert!(roles.resolve("reader").is_some());
        assert!(roles.resolve("archivist").is_none());

        let config = BTreeMap::from([
            (
                "archivist".to_string(),
                vec!["arbor://fs/read/archive/**".to_string()],
            ),
            ("reader".to_string(), vec!["arbor://fs/read/public/**".to_string()]),
        ]);
        let roles = RoleAssignments::new(&config);

        assert_eq!(
            roles.resolve("archivist").unwrap(),
            ["arbor://fs/read/archive/**"]
        );
        // Config replaces the builtin of the same tag
        assert_eq!(roles.resolve("reader").unwrap(), ["arbor://fs/read/public/**"]);
        // Untouched builtins survive
        assert!(roles.resolve("executor").is_some());
    }
}
