//! Authorization configuration: TOML file shape, schema validation, and
//! the compiled in-memory form the rest of `authz` works with.

use super::acl::{AclEntry, Permission};
use crate::error::{StashError, StashResult};
use serde::Deserialize;
use std::path::Path;

/// The `"*"` token string reserved for public (unauthenticated) access.
pub const PUBLIC_TOKEN: &str = "*";

/// `[[users]]` / `[[tokens]]` as they appear on disk.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    users: Vec<RawUser>,
    #[serde(default)]
    tokens: Vec<RawToken>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawUser {
    name: String,
    password_hash: String,
    #[serde(default)]
    admin: bool,
    #[serde(default)]
    permissions: Vec<RawPermission>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawToken {
    token: String,
    #[serde(default)]
    admin: bool,
    #[serde(default)]
    permissions: Vec<RawPermission>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawPermission {
    prefix: String,
    access: String,
}

/// A configured user: name, bcrypt password hash, and compiled ACL.
#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    pub password_hash: String,
    pub acl: AclEntry,
}

/// A configured token: the token string itself (or `"*"` for public) and
/// compiled ACL.
#[derive(Debug, Clone)]
pub struct Token {
    pub token: String,
    pub acl: AclEntry,
}

/// The fully validated, compiled authorization configuration.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub users: Vec<User>,
    pub tokens: Vec<Token>,
}

impl AuthConfig {
    pub fn user(&self, name: &str) -> Option<&User> {
        self.users.iter().find(|u| u.name == name)
    }

    pub fn token(&self, token: &str) -> Option<&Token> {
        self.tokens.iter().find(|t| t.token == token)
    }

    pub fn public_acl(&self) -> Option<&AclEntry> {
        self.token(PUBLIC_TOKEN).map(|t| &t.acl)
    }
}

/// Parse and validate a configuration file from disk.
pub fn load(path: &Path) -> StashResult<AuthConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| StashError::InvalidConfig(format!("reading {}: {e}", path.display())))?;
    parse(&raw)
}

/// Parse and validate configuration already read into memory (used by the
/// watcher, which re-reads the file itself).
pub fn parse(raw: &str) -> StashResult<AuthConfig> {
    let parsed: RawConfig = toml::from_str(raw)
        .map_err(|e| StashError::InvalidConfig(format!("invalid config syntax: {e}")))?;

    if parsed.users.is_empty() && parsed.tokens.is_empty() {
        return Err(StashError::InvalidConfig(
            "auth configuration must define at least one user or token".into(),
        ));
    }

    let mut users = Vec::with_capacity(parsed.users.len());
    for u in parsed.users {
        if u.name.trim().is_empty() {
            return Err(StashError::InvalidConfig("user with empty name".into()));
        }
        if u.password_hash.trim().is_empty() {
            return Err(StashError::InvalidConfig(format!(
                "user {} has an empty password hash",
                u.name
            )));
        }
        users.push(User {
            name: u.name,
            password_hash: u.password_hash,
            acl: AclEntry::new(compile_permissions(u.permissions)?, u.admin),
        });
    }

    let mut tokens = Vec::with_capacity(parsed.tokens.len());
    for t in parsed.tokens {
        if t.token.trim().is_empty() {
            return Err(StashError::InvalidConfig("token with empty value".into()));
        }
        tokens.push(Token {
            token: t.token,
            acl: AclEntry::new(compile_permissions(t.permissions)?, t.admin),
        });
    }

    Ok(AuthConfig { users, tokens })
}

fn compile_permissions(raw: Vec<RawPermission>) -> StashResult<Vec<Permission>> {
    raw.into_iter()
        .map(|p| {
            let access = super::acl::Access::parse(&p.access).ok_or_else(|| {
                StashError::InvalidConfig(format!("unknown access spec {:?}", p.access))
            })?;
            Ok(Permission {
                prefix: p.prefix,
                access,
            })
        })
        .collect()
}

const BCRYPT_COST: u32 = bcrypt::DEFAULT_COST;

/// Hash a plaintext password for storage in `[[users]]`.
pub fn hash_password(plain: &str) -> StashResult<String> {
    bcrypt::hash(plain, BCRYPT_COST).map_err(|e| StashError::Internal(format!("bcrypt: {e}")))
}

/// Verify a plaintext password against a stored hash. Any hashing error
/// (corrupt hash, unsupported variant) is treated as a verification
/// failure, not propagated.
pub fn verify_password(plain: &str, hash: &str) -> bool {
    bcrypt::verify(plain, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_users_and_tokens_with_permissions() {
        let toml = r#"
            [[users]]
            name = "alice"
            password_hash = "$2b$12$abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWX"
            admin = true
            permissions = [{ prefix = "*", access = "rw" }]

            [[tokens]]
            token = "ci-token"
            permissions = [{ prefix = "app/*", access = "r" }]
        "#;
        let config = parse(toml).unwrap();
        assert_eq!(config.users.len(), 1);
        assert!(config.user("alice").unwrap().acl.admin);
        assert_eq!(config.tokens.len(), 1);
        assert!(config.token("ci-token").unwrap().acl.can_read("app/x"));
    }

    #[test]
    fn rejects_empty_config() {
        assert!(parse("").is_err());
    }

    #[test]
    fn rejects_unknown_access_spec() {
        let toml = r#"
            [[tokens]]
            token = "t"
            permissions = [{ prefix = "*", access = "bogus" }]
        "#;
        assert!(parse(toml).is_err());
    }

    #[test]
    fn rejects_empty_user_name() {
        let toml = r#"
            [[users]]
            name = ""
            password_hash = "h"
        "#;
        assert!(parse(toml).is_err());
    }

    #[test]
    fn password_hash_round_trips() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn public_token_is_recognized() {
        let toml = r#"
            [[tokens]]
            token = "*"
            permissions = [{ prefix = "app/*", access = "r" }]
        "#;
        let config = parse(toml).unwrap();
        assert!(config.public_acl().unwrap().can_read("app/x"));
    }
}
