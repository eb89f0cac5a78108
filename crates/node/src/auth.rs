//! RPC user store and login checks.

use std::collections::HashMap;
use std::sync::Arc;

use fl_domain::config::UserConfig;
use fl_domain::{Credential, PermissionSet, Result};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Constant-time secret comparison via SHA-256 digest.
/// Hashing normalizes lengths so ct_eq always compares 32 bytes.
fn secret_eq(a: &str, b: &str) -> bool {
    let ha = Sha256::digest(a.as_bytes());
    let hb = Sha256::digest(b.as_bytes());
    ha.ct_eq(&hb).into()
}

/// An authenticated user and what they may do.
#[derive(Debug, Clone)]
pub struct Principal {
    pub username: String,
    pub permissions: Arc<PermissionSet>,
}

struct StoredUser {
    password: String,
    permissions: Arc<PermissionSet>,
}

pub struct UserStore {
    users: HashMap<String, StoredUser>,
}

impl UserStore {
    pub fn from_config(users: &[UserConfig]) -> Result<Self> {
        let mut map = HashMap::with_capacity(users.len());
        for user in users {
            map.insert(
                user.username.clone(),
                StoredUser {
                    password: user.password.clone(),
                    permissions: Arc::new(user.permission_set()?),
                },
            );
        }
        Ok(Self { users: map })
    }

    /// Check a credential. Unknown users still pay for a comparison so
    /// they can't be told apart from wrong passwords by timing.
    pub fn authenticate(&self, credential: &Credential) -> Option<Principal> {
        match self.users.get(credential.username()) {
            Some(user) if secret_eq(credential.secret(), &user.password) => Some(Principal {
                username: credential.username().to_string(),
                permissions: user.permissions.clone(),
            }),
            Some(_) => None,
            None => {
                let _ = secret_eq(credential.secret(), "");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> UserStore {
        UserStore::from_config(&[UserConfig {
            username: "user1".into(),
            password: "test".into(),
            permissions: vec!["InvokeOperation:nodeInfo".into()],
        }])
        .unwrap()
    }

    #[test]
    fn valid_credential_yields_permissions() {
        let principal = store().authenticate(&Credential::new("user1", "test")).unwrap();
        assert_eq!(principal.username, "user1");
        assert!(principal.permissions.allows_operation("nodeInfo"));
        assert!(!principal.permissions.allows_flow("CashIssue"));
    }

    #[test]
    fn wrong_password_and_unknown_user_are_rejected() {
        let store = store();
        assert!(store.authenticate(&Credential::new("user1", "nope")).is_none());
        assert!(store.authenticate(&Credential::new("mallory", "test")).is_none());
        assert!(store.authenticate(&Credential::new("USER1", "test")).is_none());
    }

    #[test]
    fn malformed_permission_fails_store_construction() {
        let res = UserStore::from_config(&[UserConfig {
            username: "u".into(),
            password: "p".into(),
            permissions: vec!["StartProcess:".into()],
        }]);
        assert!(res.is_err());
    }

    #[test]
    fn secret_eq_basics() {
        assert!(secret_eq("abc", "abc"));
        assert!(!secret_eq("abc", "abd"));
        assert!(!secret_eq("abc", "abcd"));
    }
}
