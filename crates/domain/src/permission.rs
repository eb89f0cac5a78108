//! Permission entries attached to a user on the node.
//!
//! Encoding (matched bit-exact by the node):
//!
//! - `InvokeOperation:<name>`: call the named direct operation
//! - `StartProcess:<flowType>`: start or track flows of that type
//! - `ALL`: everything (case-insensitive)

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

const INVOKE_PREFIX: &str = "InvokeOperation:";
const START_PREFIX: &str = "StartProcess:";
const ALL: &str = "ALL";

/// The string granting permission to invoke `operation`.
pub fn invoke_operation(operation: &str) -> String {
    format!("{INVOKE_PREFIX}{operation}")
}

/// The string granting permission to start flows of `flow_type`.
pub fn start_process(flow_type: &str) -> String {
    format!("{START_PREFIX}{flow_type}")
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    All,
    InvokeOperation(String),
    StartProcess(String),
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::All => f.write_str(ALL),
            Permission::InvokeOperation(name) => write!(f, "{INVOKE_PREFIX}{name}"),
            Permission::StartProcess(flow_type) => write!(f, "{START_PREFIX}{flow_type}"),
        }
    }
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| Error::Permission {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        if s.eq_ignore_ascii_case(ALL) {
            return Ok(Permission::All);
        }

        let (variant, name): (fn(String) -> Permission, &str) =
            if let Some(name) = s.strip_prefix(INVOKE_PREFIX) {
                (Permission::InvokeOperation, name)
            } else if let Some(name) = s.strip_prefix(START_PREFIX) {
                (Permission::StartProcess, name)
            } else {
                return Err(invalid("expected ALL, InvokeOperation:<name> or StartProcess:<type>"));
            };

        if name.is_empty() {
            return Err(invalid("missing name"));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(invalid("name contains whitespace"));
        }
        Ok(variant(name.to_string()))
    }
}

impl Serialize for Permission {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// The permissions granted to one authenticated identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet {
    entries: BTreeSet<Permission>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse every entry, failing on the first malformed one.
    pub fn parse<I, S>(raw: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        raw.into_iter()
            .map(|s| s.as_ref().parse())
            .collect::<Result<BTreeSet<_>, _>>()
            .map(|entries| Self { entries })
    }

    pub fn insert(&mut self, permission: Permission) {
        self.entries.insert(permission);
    }

    pub fn allows_operation(&self, operation: &str) -> bool {
        self.entries.iter().any(|p| match p {
            Permission::All => true,
            Permission::InvokeOperation(name) => name == operation,
            Permission::StartProcess(_) => false,
        })
    }

    pub fn allows_flow(&self, flow_type: &str) -> bool {
        self.entries.iter().any(|p| match p {
            Permission::All => true,
            Permission::StartProcess(name) => name == flow_type,
            Permission::InvokeOperation(_) => false,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
