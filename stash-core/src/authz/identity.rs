//! Actor resolution: turning a presented credential into an ACL.
//!
//! Framework-agnostic by design — `stash-server` extracts the bearer
//! token / session username from the request and hands them here;
//! nothing in this module touches HTTP types.

use super::acl::AclEntry;
use super::config::AuthConfig;
use crate::types::ActorType;

/// The outcome of resolving a request's credential against the current
/// authorization configuration.
#[derive(Debug, Clone)]
pub struct ResolvedActor {
    pub kind: ActorType,
    /// Username, masked token, or empty string for public.
    pub display: String,
    /// `None` means nothing is accessible (unknown identity, or no
    /// public ACL configured).
    pub acl: Option<AclEntry>,
}

impl ResolvedActor {
    pub fn is_admin(&self) -> bool {
        self.acl.as_ref().is_some_and(|a| a.admin)
    }
}

/// Mask a bearer token for logging/audit: `token:` + first 4 chars + `****`.
pub fn mask_token(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("token:{prefix}****")
}

/// Resolve a bearer token against configured tokens.
pub fn resolve_token(config: &AuthConfig, token: &str) -> Option<ResolvedActor> {
    config.token(token).map(|t| ResolvedActor {
        kind: ActorType::Token,
        display: mask_token(token),
        acl: Some(t.acl.clone()),
    })
}

/// Resolve a session's username against configured users.
pub fn resolve_user(config: &AuthConfig, username: &str) -> Option<ResolvedActor> {
    config.user(username).map(|u| ResolvedActor {
        kind: ActorType::User,
        display: u.name.clone(),
        acl: Some(u.acl.clone()),
    })
}

/// The fallback actor for requests carrying no recognized credential.
pub fn public_actor(config: &AuthConfig) -> ResolvedActor {
    ResolvedActor {
        kind: ActorType::Public,
        display: String::new(),
        acl: config.public_acl().cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::config::parse;

    fn config() -> AuthConfig {
        parse(
            r#"
            [[users]]
            name = "alice"
            password_hash = "h"
            permissions = [{ prefix = "*", access = "rw" }]

            [[tokens]]
            token = "secret-tok"
            admin = true
            permissions = [{ prefix = "*", access = "r" }]

            [[tokens]]
            token = "*"
            permissions = [{ prefix = "app/*", access = "r" }]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn mask_token_keeps_only_first_four_chars() {
        assert_eq!(mask_token("abcdefgh"), "token:abcd****");
        assert_eq!(mask_token("ab"), "token:ab****");
    }

    #[test]
    fn resolves_known_token_as_admin() {
        let actor = resolve_token(&config(), "secret-tok").unwrap();
        assert!(actor.is_admin());
        assert_eq!(actor.display, "token:secr****");
    }

    #[test]
    fn unknown_token_resolves_to_none() {
        assert!(resolve_token(&config(), "nope").is_none());
    }

    #[test]
    fn resolves_known_user() {
        let actor = resolve_user(&config(), "alice").unwrap();
        assert!(!actor.is_admin());
        assert_eq!(actor.display, "alice");
    }

    #[test]
    fn public_actor_uses_the_star_token_acl() {
        let actor = public_actor(&config());
        assert!(actor.acl.unwrap().can_read("app/x"));
    }

    #[test]
    fn public_actor_with_no_star_token_has_no_access() {
        let config = parse(
            r#"
            [[users]]
            name = "alice"
            password_hash = "h"
            "#,
        )
        .unwrap();
        assert!(public_actor(&config).acl.is_none());
    }
}
