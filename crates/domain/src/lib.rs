//! `fl-domain`: value types shared by every flowlink crate.
//!
//! Holds the credential and permission model, configuration structs,
//! the shared error type, and structured trace events.

pub mod config;
pub mod credential;
pub mod error;
pub mod permission;
pub mod trace;

pub use credential::Credential;
pub use error::{Error, Result};
pub use permission::{Permission, PermissionSet};
