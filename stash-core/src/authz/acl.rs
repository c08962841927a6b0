//! Prefix-based access control: longest-match-first with a secrets carve-out.

use crate::key;
use serde::{Deserialize, Serialize};

/// What a matched permission record grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "r" | "read" => Some(Self::Read),
            "w" | "write" => Some(Self::Write),
            "rw" | "read-write" => Some(Self::ReadWrite),
            _ => None,
        }
    }

    pub fn can_read(&self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn can_write(&self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// A single `(prefix pattern, access)` permission record.
#[derive(Debug, Clone)]
pub struct Permission {
    pub prefix: String,
    pub access: Access,
}

/// The compiled, sorted permission set for a user or token, plus its
/// admin flag.
#[derive(Debug, Clone, Default)]
pub struct AclEntry {
    /// Sorted by pattern length descending (longest-match-first).
    pub permissions: Vec<Permission>,
    pub admin: bool,
}

impl AclEntry {
    pub fn new(mut permissions: Vec<Permission>, admin: bool) -> Self {
        permissions.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { permissions, admin }
    }

    /// Resolve the access a key is granted under this ACL, honoring the
    /// secrets carve-out: patterns that do not grant secrets access are
    /// skipped when the key is a secret path.
    pub fn access_for(&self, k: &str) -> Option<Access> {
        let secret = key::is_secret(k);
        self.permissions
            .iter()
            .find(|p| !(secret && !grants_secrets_access(&p.prefix)) && pattern_matches(&p.prefix, k))
            .map(|p| p.access)
    }

    pub fn can_read(&self, k: &str) -> bool {
        self.access_for(k).is_some_and(|a| a.can_read())
    }

    pub fn can_write(&self, k: &str) -> bool {
        self.access_for(k).is_some_and(|a| a.can_write())
    }

    /// Filter a list of keys down to those this ACL grants read access to.
    pub fn filter_readable<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        keys.into_iter().filter(|k| self.can_read(k)).collect()
    }
}

/// Whether a prefix pattern grants access to secret paths: true iff the
/// pattern with any trailing `*` removed is itself a secret path.
fn grants_secrets_access(prefix: &str) -> bool {
    let base = prefix.strip_suffix('*').unwrap_or(prefix);
    key::is_secret(base)
}

/// Whether `pattern` matches `k`. `"*"` matches everything; a pattern
/// ending in `*` matches any key sharing that literal prefix; anything
/// else requires exact equality.
fn pattern_matches(pattern: &str, k: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(base) => k.starts_with(base),
        None => k == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acl(perms: &[(&str, Access)], admin: bool) -> AclEntry {
        AclEntry::new(
            perms
                .iter()
                .map(|(p, a)| Permission {
                    prefix: p.to_string(),
                    access: *a,
                })
                .collect(),
            admin,
        )
    }

    #[test]
    fn star_grants_non_secret_access_but_never_secrets() {
        let a = acl(&[("*", Access::ReadWrite)], false);
        assert!(a.can_read("app/name"));
        assert!(a.can_write("app/name"));
        assert!(!a.can_read("secrets/x"));
        assert!(!a.can_write("secrets/x"));
    }

    #[test]
    fn prefix_wildcard_does_not_reach_into_secrets() {
        let a = acl(&[("app/*", Access::ReadWrite)], false);
        assert!(a.can_read("app/config"));
        assert!(!a.can_read("app/secrets/x"));
    }

    #[test]
    fn secrets_prefix_grants_secrets_access() {
        let a = acl(&[("secrets/*", Access::Read)], false);
        assert!(a.can_read("secrets/db"));
        assert!(!a.can_write("secrets/db"));
    }

    #[test]
    fn nested_secrets_prefix_grants_nested_secrets_access() {
        let a = acl(&[("app/secrets/*", Access::Read)], false);
        assert!(a.can_read("app/secrets/db"));
        assert!(!a.can_read("other/secrets/db"));
    }

    #[test]
    fn longest_prefix_wins() {
        let a = acl(
            &[("*", Access::Read), ("app/*", Access::ReadWrite)],
            false,
        );
        assert!(a.can_write("app/config"));
        assert!(!a.can_write("other/config"));
        assert!(a.can_read("other/config"));
    }

    #[test]
    fn carve_out_skips_non_granting_prefixes_to_find_a_granting_one() {
        let a = acl(
            &[("*", Access::ReadWrite), ("secrets/*", Access::Read)],
            false,
        );
        assert!(a.can_read("secrets/db"));
        assert!(!a.can_write("secrets/db"));
        assert!(a.can_write("app/x"));
    }

    #[test]
    fn exact_prefix_requires_equality() {
        let a = acl(&[("app/name", Access::Read)], false);
        assert!(a.can_read("app/name"));
        assert!(!a.can_read("app/name/extra"));
        assert!(!a.can_read("app/nam"));
    }

    #[test]
    fn filter_readable_keeps_only_granted_keys() {
        let a = acl(&[("app/*", Access::Read)], false);
        let keys = vec!["app/a", "app/b", "other/c"];
        let readable = a.filter_readable(keys);
        assert_eq!(readable, vec!["app/a", "app/b"]);
    }

    #[test]
    fn access_parses_all_spellings() {
        assert_eq!(Access::parse("r"), Some(Access::Read));
        assert_eq!(Access::parse("read"), Some(Access::Read));
        assert_eq!(Access::parse("w"), Some(Access::Write));
        assert_eq!(Access::parse("write"), Some(Access::Write));
        assert_eq!(Access::parse("rw"), Some(Access::ReadWrite));
        assert_eq!(Access::parse("read-write"), Some(Access::ReadWrite));
        assert_eq!(Access::parse("bogus"), None);
    }
}
