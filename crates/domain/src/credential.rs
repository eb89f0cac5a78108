use std::fmt;

use serde::{Deserialize, Serialize};

/// A username/secret pair presented once per login attempt.
///
/// The secret never appears in `Debug` output, so a credential can travel
/// through `tracing` fields and `{:?}` formatting without leaking.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    username: String,
    secret: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secret() {
        let cred = Credential::new("user1", "hunter2");
        let shown = format!("{cred:?}");
        assert!(shown.contains("user1"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn serializes_both_fields() {
        let cred = Credential::new("user1", "test");
        let json = serde_json::to_value(&cred).unwrap();
        assert_eq!(json, serde_json::json!({ "username": "user1", "secret": "test" }));
    }
}
